//! Kelly criterion position sizing.
//!
//! Converts an edge and a bankroll into a whole number of contracts using
//! fractional Kelly, then clamps to the per-trade cap and the exposure
//! headroom. How a win probability and price become a stake fraction is
//! pluggable via [`StakeModel`].

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::fmt;
use tracing::debug;

// ---------------------------------------------------------------------------
// Stake models
// ---------------------------------------------------------------------------

/// Full-Kelly stake fraction for a contract bought at `price` dollars that
/// wins with `win_probability`.
pub trait StakeModel: Send + Sync {
    fn stake_fraction(&self, win_probability: Decimal, price: Decimal) -> Decimal;
}

/// Binary contract paying a fixed amount (normally $1) when it settles in
/// the money.
///
/// Kelly formula: f* = (bp - q) / b
/// where:
///   b = net odds: (payout - price) / price
///   p = win probability
///   q = 1 - p
#[derive(Debug, Clone)]
pub struct BinaryPayoutKelly {
    pub payout: Decimal,
}

impl Default for BinaryPayoutKelly {
    fn default() -> Self {
        Self { payout: dec!(1) }
    }
}

impl StakeModel for BinaryPayoutKelly {
    fn stake_fraction(&self, win_probability: Decimal, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO || price >= self.payout {
            return Decimal::ZERO;
        }
        let b = (self.payout - price) / price;
        let p = win_probability;
        let q = Decimal::ONE - p;
        let kelly = (b * p - q) / b;
        kelly.max(Decimal::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Kelly sizing configuration.
#[derive(Debug, Clone)]
pub struct KellyConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub fraction: Decimal,
    /// Maximum contracts per single trade.
    pub max_contracts: u32,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            fraction: dec!(0.25),
            max_contracts: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Inputs for one sizing decision.
#[derive(Debug, Clone)]
pub struct SizingRequest {
    pub market_id: String,
    /// Net edge in percentage points (informational).
    pub edge_pct: Decimal,
    pub win_probability: Decimal,
    /// Dollars per contract.
    pub price: Decimal,
    pub bankroll: Decimal,
    /// Additional dollars the exposure guard allows.
    pub headroom: Decimal,
}

/// Which bound set the final quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingLimit {
    Kelly,
    MaxContracts,
    Exposure,
}

impl fmt::Display for SizingLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizingLimit::Kelly => write!(f, "kelly"),
            SizingLimit::MaxContracts => write!(f, "max-contracts"),
            SizingLimit::Exposure => write!(f, "exposure"),
        }
    }
}

/// Proposed quantity. Zero means no trade.
#[derive(Debug, Clone)]
pub struct SizingDecision {
    pub quantity: u32,
    /// Full-Kelly fraction before the multiplier.
    pub raw_kelly: Decimal,
    /// Fraction of bankroll after the multiplier.
    pub stake_fraction: Decimal,
    pub kelly_contracts: u32,
    pub headroom_contracts: u32,
    pub limit: SizingLimit,
}

impl SizingDecision {
    pub fn is_trade(&self) -> bool {
        self.quantity >= 1
    }

    fn none(limit: SizingLimit) -> Self {
        Self {
            quantity: 0,
            raw_kelly: Decimal::ZERO,
            stake_fraction: Decimal::ZERO,
            kelly_contracts: 0,
            headroom_contracts: 0,
            limit,
        }
    }
}

/// Floor a non-negative contract count; negatives become zero.
fn floor_contracts(amount: Decimal) -> u32 {
    if amount <= Decimal::ZERO {
        return 0;
    }
    amount.floor().to_u32().unwrap_or(u32::MAX)
}

pub struct PositionSizer {
    config: KellyConfig,
    model: Box<dyn StakeModel>,
}

impl PositionSizer {
    pub fn new(config: KellyConfig) -> Self {
        Self::with_model(config, Box::new(BinaryPayoutKelly::default()))
    }

    pub fn with_model(config: KellyConfig, model: Box<dyn StakeModel>) -> Self {
        Self { config, model }
    }

    /// Access the Kelly configuration.
    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Size an entry.
    ///
    /// quantity = min(floor(bankroll × kelly × fraction / price),
    ///                max_contracts,
    ///                floor(headroom / price))
    pub fn size(&self, req: &SizingRequest) -> SizingDecision {
        if req.price <= Decimal::ZERO || req.bankroll <= Decimal::ZERO {
            return SizingDecision::none(SizingLimit::Kelly);
        }

        let raw_kelly = self.model.stake_fraction(req.win_probability, req.price);
        let stake_fraction = raw_kelly.max(Decimal::ZERO) * self.config.fraction;
        let kelly_contracts = floor_contracts(req.bankroll * stake_fraction / req.price);
        let headroom_contracts = floor_contracts(req.headroom / req.price);

        let mut quantity = kelly_contracts;
        let mut limit = SizingLimit::Kelly;
        if self.config.max_contracts < quantity {
            quantity = self.config.max_contracts;
            limit = SizingLimit::MaxContracts;
        }
        if headroom_contracts < quantity {
            quantity = headroom_contracts;
            limit = SizingLimit::Exposure;
        }

        debug!(
            market_id = %req.market_id,
            edge = format!("{:.1}%", req.edge_pct),
            raw_kelly = format!("{:.2}%", raw_kelly * dec!(100)),
            fractional = format!("{:.2}%", stake_fraction * dec!(100)),
            kelly_contracts,
            headroom_contracts,
            quantity,
            limit = %limit,
            "Position sized"
        );

        SizingDecision {
            quantity,
            raw_kelly,
            stake_fraction,
            kelly_contracts,
            headroom_contracts,
            limit,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
