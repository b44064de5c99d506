//! Edge evaluation.
//!
//! Compares a fair-value probability to a market's quoted ask, nets out the
//! exchange fee, and checks the result against the entry/exit thresholds
//! and the bid-ask spread tolerance. Pure: no side effects.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use tracing::debug;

use crate::types::{FairValueEstimate, Market, Side};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Edge thresholds. Percentages are percentage points of probability.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Minimum net edge to enter.
    pub min_edge_pct: Decimal,
    /// Net edge at or below which an open position is liquidated.
    pub exit_edge_pct: Decimal,
    /// Widest bid-ask spread accepted for an entry.
    pub max_slippage_cents: u32,
    /// Exchange fee rate applied as `rate × price × (1 − price)` per contract.
    pub fee_rate: Decimal,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            min_edge_pct: dec!(10),
            exit_edge_pct: dec!(1),
            max_slippage_cents: 5,
            fee_rate: dec!(0.07),
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Why an otherwise evaluated market is not an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryVeto {
    /// Ask is not strictly inside 0–100¢.
    NoAsk,
    /// Net edge below the entry threshold.
    BelowThreshold,
    /// Spread wider than the slippage tolerance.
    WideSpread { spread_cents: u32, max_cents: u32 },
}

impl fmt::Display for EntryVeto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryVeto::NoAsk => write!(f, "no tradable ask"),
            EntryVeto::BelowThreshold => write!(f, "edge below entry threshold"),
            EntryVeto::WideSpread {
                spread_cents,
                max_cents,
            } => write!(f, "spread {spread_cents}¢ > max {max_cents}¢"),
        }
    }
}

/// Per-cycle edge evaluation for one side of one market.
#[derive(Debug, Clone)]
pub struct EdgeResult {
    pub market_id: String,
    pub side: Side,
    pub fair_value: FairValueEstimate,
    /// Ask the edge was measured against.
    pub price_cents: u32,
    pub bid_cents: u32,
    /// (fair value − ask probability) × 100.
    pub gross_edge_pct: Decimal,
    pub fee_pct: Decimal,
    /// Signed net edge: gross minus fee.
    pub edge_pct: Decimal,
    pub spread_cents: u32,
    /// Entry allowed: net edge ≥ threshold AND spread within tolerance.
    pub tradable: bool,
    /// An existing position on this side should be liquidated.
    pub exit: bool,
    pub veto: Option<EntryVeto>,
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

pub struct EdgeEvaluator {
    config: EdgeConfig,
}

impl EdgeEvaluator {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }

    /// Access the edge configuration.
    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// Fee drag in percentage points of the contract cost at `price_cents`.
    /// Zero outside the open 0–100¢ range.
    pub fn fee_pct(&self, price_cents: u32) -> Decimal {
        if price_cents == 0 || price_cents >= 100 {
            return Decimal::ZERO;
        }
        let price = Decimal::from(price_cents) / dec!(100);
        self.config.fee_rate * (Decimal::ONE - price) * dec!(100)
    }

    /// Evaluate one side of a market against a fair-value estimate for
    /// that side.
    pub fn evaluate(&self, market: &Market, side: Side, fair_value: FairValueEstimate) -> EdgeResult {
        let quote = market.quote(side);
        let price_cents = quote.ask_cents;
        let market_prob = Decimal::from(price_cents) / dec!(100);

        let gross_edge_pct = (fair_value.probability - market_prob) * dec!(100);
        let fee_pct = self.fee_pct(price_cents);
        let edge_pct = gross_edge_pct - fee_pct;
        let spread_cents = quote.spread_cents();

        let veto = if !quote.has_tradable_ask() {
            Some(EntryVeto::NoAsk)
        } else if edge_pct < self.config.min_edge_pct {
            Some(EntryVeto::BelowThreshold)
        } else if spread_cents > self.config.max_slippage_cents {
            Some(EntryVeto::WideSpread {
                spread_cents,
                max_cents: self.config.max_slippage_cents,
            })
        } else {
            None
        };

        // Exits ignore the spread: getting out of risk takes priority.
        let exit = edge_pct <= self.config.exit_edge_pct;

        if let Some(EntryVeto::WideSpread { .. }) = veto {
            debug!(
                market_id = %market.id,
                edge = format!("{:.1}%", edge_pct),
                spread = spread_cents,
                max = self.config.max_slippage_cents,
                "Edge vetoed by spread"
            );
        }

        EdgeResult {
            market_id: market.id.clone(),
            side,
            fair_value,
            price_cents,
            bid_cents: quote.bid_cents,
            gross_edge_pct,
            fee_pct,
            edge_pct,
            spread_cents,
            tradable: veto.is_none(),
            exit,
            veto,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
