//! Market data inputs.
//!
//! Defines the `MarketDataFeed` trait the session driver reads each cycle
//! (reference spot, volatility, candidate markets) and the live feed that
//! combines Coinbase spot, a rolling volatility tracker and Kalshi market
//! listings.

pub mod volatility;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::platforms::coinbase::CoinbaseSpot;
use crate::platforms::kalshi::KalshiClient;
use crate::types::{EngineError, Market};
use volatility::VolatilityTracker;

/// Volatility of the reference asset over a 15-minute horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolatilitySample {
    /// Standard deviation in percent.
    pub std_pct: Decimal,
    /// Number of returns behind the estimate.
    pub samples: usize,
}

/// Per-cycle inputs. Every method may fail; the session skips the cycle.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Current reference spot price.
    async fn spot_price(&self) -> Result<Decimal>;

    /// Current volatility estimate.
    async fn volatility(&self) -> Result<VolatilitySample>;

    /// Open markets for the traded series.
    async fn markets(&self) -> Result<Vec<Market>>;
}

/// Production feed.
pub struct LiveFeed {
    spot: CoinbaseSpot,
    kalshi: Arc<KalshiClient>,
    series_prefix: String,
    tracker: Mutex<VolatilityTracker>,
}

impl LiveFeed {
    pub fn new(
        spot: CoinbaseSpot,
        kalshi: Arc<KalshiClient>,
        series_prefix: impl Into<String>,
        vol_window_minutes: i64,
    ) -> Self {
        Self {
            spot,
            kalshi,
            series_prefix: series_prefix.into(),
            tracker: Mutex::new(VolatilityTracker::new(vol_window_minutes)),
        }
    }
}

#[async_trait]
impl MarketDataFeed for LiveFeed {
    async fn spot_price(&self) -> Result<Decimal> {
        let price = self.spot.fetch().await?;
        let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        tracker.record(Utc::now(), price);
        debug!(samples = tracker.len(), "Spot sample recorded");
        Ok(price)
    }

    async fn volatility(&self) -> Result<VolatilitySample> {
        let tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        tracker.volatility().ok_or_else(|| {
            EngineError::data(
                "volatility",
                format!("only {} spot samples in window", tracker.len()),
            )
            .into()
        })
    }

    async fn markets(&self) -> Result<Vec<Market>> {
        self.kalshi.list_markets(&self.series_prefix).await
    }
}
