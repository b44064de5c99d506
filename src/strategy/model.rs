//! Fair-value model for price-threshold contracts.
//!
//! Treats the asset's move to settlement as normal with a standard
//! deviation scaled from a 15-minute volatility figure.

use rust_decimal::prelude::*;

use crate::types::FairValueEstimate;

/// Volatility figures are quoted over this horizon.
const VOL_HORIZON_MINUTES: f64 = 15.0;

#[derive(Debug, Clone, Default)]
pub struct FairValueModel;

impl FairValueModel {
    pub fn new() -> Self {
        Self
    }

    /// Probability that the asset settles below `strike`.
    ///
    /// `vol_pct` is the standard deviation of 15-minute returns, in percent.
    /// Returns `None` when volatility or time left is not positive, or the
    /// inputs are not representable.
    pub fn probability_below(
        &self,
        spot: Decimal,
        strike: Decimal,
        vol_pct: Decimal,
        minutes_to_settlement: i64,
    ) -> Option<FairValueEstimate> {
        let spot = spot.to_f64()?;
        let strike = strike.to_f64()?;
        let vol = vol_pct.to_f64()?;
        if vol <= 0.0 || minutes_to_settlement <= 0 || spot <= 0.0 {
            return None;
        }

        let vol_scaled = vol * (minutes_to_settlement as f64 / VOL_HORIZON_MINUTES).sqrt();
        let distance_pct = (strike - spot) / spot * 100.0;
        let z = distance_pct / vol_scaled;

        let p = Decimal::from_f64(norm_cdf(z))?.round_dp(6);
        FairValueEstimate::new(p)
    }
}

/// Standard normal CDF, Abramowitz–Stegun 26.2.17.
fn norm_cdf(z: f64) -> f64 {
    if z < -6.0 {
        return 0.0;
    }
    if z > 6.0 {
        return 1.0;
    }
    let t = 1.0 / (1.0 + 0.2316419 * z.abs());
    let d = 0.3989423 * (-z * z / 2.0).exp();
    let p = d * t * (0.3193815 + t * (-0.3565638 + t * (1.781478 + t * (-1.821256 + t * 1.330274))));
    if z > 0.0 {
        1.0 - p
    } else {
        p
    }
}
