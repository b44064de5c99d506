//! Exposure guard.
//!
//! Portfolio-wide gate consulted before every sizing decision: total
//! capital at risk never exceeds `max_exposure_fraction × bankroll`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;

/// Snapshot of the exposure budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureState {
    pub bankroll: Decimal,
    /// Dollars currently committed to open positions.
    pub exposure: Decimal,
    /// `bankroll × fraction`.
    pub limit: Decimal,
    /// Additional dollars allowed. Never negative.
    pub headroom: Decimal,
}

impl fmt::Display for ExposureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = if self.bankroll > Decimal::ZERO {
            self.exposure / self.bankroll * dec!(100)
        } else {
            Decimal::ZERO
        };
        write!(
            f,
            "${:.2} / ${:.2} ({:.1}% of bankroll), headroom ${:.2}",
            self.exposure, self.limit, pct, self.headroom
        )
    }
}

impl ExposureState {
    pub fn is_exhausted(&self) -> bool {
        self.headroom <= Decimal::ZERO
    }
}

#[derive(Debug, Clone)]
pub struct ExposureGuard {
    max_exposure_fraction: Decimal,
}

impl ExposureGuard {
    pub fn new(max_exposure_fraction: Decimal) -> Self {
        Self {
            max_exposure_fraction,
        }
    }

    /// Remaining dollars that may be committed. Clamped at zero.
    pub fn headroom(&self, bankroll: Decimal, exposure: Decimal) -> Decimal {
        (bankroll.max(Decimal::ZERO) * self.max_exposure_fraction - exposure).max(Decimal::ZERO)
    }

    pub fn assess(&self, bankroll: Decimal, exposure: Decimal) -> ExposureState {
        ExposureState {
            bankroll,
            exposure,
            limit: bankroll.max(Decimal::ZERO) * self.max_exposure_fraction,
            headroom: self.headroom(bankroll, exposure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headroom_scenario() {
        let guard = ExposureGuard::new(dec!(0.50));
        assert_eq!(guard.headroom(dec!(200), dec!(90)), dec!(10));
    }

    #[test]
    fn test_headroom_clamps_at_zero() {
        let guard = ExposureGuard::new(dec!(0.50));
        assert_eq!(guard.headroom(dec!(200), dec!(130)), Decimal::ZERO);
        assert!(guard.assess(dec!(200), dec!(100)).is_exhausted());
        assert_eq!(guard.headroom(dec!(-50), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_headroom_non_increasing_as_exposure_grows() {
        let guard = ExposureGuard::new(dec!(0.50));
        let mut last = guard.headroom(dec!(200), Decimal::ZERO);
        for step in 1..30 {
            let h = guard.headroom(dec!(200), Decimal::from(step) * dec!(4.4));
            assert!(h <= last);
            assert!(h >= Decimal::ZERO);
            last = h;
        }
    }

    #[test]
    fn test_assess_display() {
        let s = ExposureGuard::new(dec!(0.5)).assess(dec!(200), dec!(90));
        assert_eq!(s.limit, dec!(100));
        assert!(s.to_string().contains("headroom $10.00"));
    }
}
