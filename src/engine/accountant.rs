//! Accountant: per-cycle tallies and the cycle report.
//!
//! The session feeds every order outcome and skipped opportunity into a
//! [`CycleTally`]; at the end of the cycle the accountant folds it with the
//! ledger and bankroll into a [`CycleReport`] and logs it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::info;

use super::executor::OrderOutcome;
use super::ledger::PositionLedger;
use crate::strategy::SkipReason;
use crate::types::{Mode, OrderStatus, Quote, TradeAction};

// ---------------------------------------------------------------------------
// Tally
// ---------------------------------------------------------------------------

/// Running counts for one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleTally {
    pub markets_scanned: usize,
    pub markets_evaluated: usize,
    pub edges_found: usize,
    pub outcomes: Vec<OrderOutcome>,
    pub skipped: Vec<(String, SkipReason)>,
    /// Bid-side quotes of evaluated markets, for unrealized P&L.
    pub quotes: HashMap<String, Quote>,
}

impl CycleTally {
    pub fn record_outcome(&mut self, outcome: OrderOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn record_skip(&mut self, market_id: &str, reason: SkipReason) {
        self.skipped.push((market_id.to_string(), reason));
    }

    /// Orders that ended `Filled`.
    pub fn filled(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_filled()).count()
    }

    /// Outcomes that changed the ledger.
    pub fn ledger_mutations(&self) -> usize {
        self.outcomes.iter().filter(|o| o.mutated_ledger()).count()
    }

    fn count(&self, pred: impl Fn(&OrderOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Summary of a complete fetch → evaluate → size → execute cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub mode: Mode,
    pub spot: Decimal,
    pub volatility_pct: Decimal,
    pub markets_scanned: usize,
    pub markets_evaluated: usize,
    pub edges_found: usize,
    pub entries_filled: usize,
    pub exits_filled: usize,
    pub settlements: usize,
    pub orders_cancelled: usize,
    pub orders_failed: usize,
    /// Orders whose cancel the venue never confirmed this cycle.
    pub orders_unresolved: usize,
    pub opportunities_skipped: usize,
    pub ledger_mutations: usize,
    pub orders_filled: usize,
    pub positions_open: usize,
    pub exposure: Decimal,
    pub bankroll_before: Decimal,
    pub bankroll_after: Decimal,
    /// Realized P&L from this cycle's closing fills.
    pub cycle_realized_pnl: Decimal,
    /// Ledger lifetime realized P&L.
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Market-level inputs the report carries through.
#[derive(Debug, Clone, Copy)]
pub struct CycleInputs {
    pub cycle_number: u64,
    pub mode: Mode,
    pub spot: Decimal,
    pub volatility_pct: Decimal,
    pub bankroll_before: Decimal,
    pub bankroll_after: Decimal,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Close out a cycle against the ledger state after its last mutation.
    pub fn reconcile(inputs: CycleInputs, tally: &CycleTally, ledger: &PositionLedger) -> CycleReport {
        let filled_as = |action: TradeAction| {
            tally.count(|o| o.is_filled() && o.order.trade == action)
        };

        let report = CycleReport {
            cycle_number: inputs.cycle_number,
            mode: inputs.mode,
            spot: inputs.spot,
            volatility_pct: inputs.volatility_pct,
            markets_scanned: tally.markets_scanned,
            markets_evaluated: tally.markets_evaluated,
            edges_found: tally.edges_found,
            entries_filled: filled_as(TradeAction::Open) + filled_as(TradeAction::Add),
            exits_filled: filled_as(TradeAction::Liquidate),
            settlements: filled_as(TradeAction::Settle),
            orders_cancelled: tally.count(|o| o.order.status == OrderStatus::Cancelled),
            orders_failed: tally.count(|o| o.order.status == OrderStatus::Failed),
            orders_unresolved: tally.count(|o| o.is_unresolved()),
            opportunities_skipped: tally.skipped.len(),
            ledger_mutations: tally.ledger_mutations(),
            orders_filled: tally.filled(),
            positions_open: ledger.len(),
            exposure: ledger.exposure(),
            bankroll_before: inputs.bankroll_before,
            bankroll_after: inputs.bankroll_after,
            cycle_realized_pnl: tally.outcomes.iter().filter_map(|o| o.realized_pnl()).sum(),
            realized_pnl: ledger.realized_pnl(),
            unrealized_pnl: ledger.unrealized_pnl(&tally.quotes),
            timestamp: inputs.timestamp,
        };

        info!(
            cycle = report.cycle_number,
            mode = %report.mode,
            bankroll = format!("${:.2}", report.bankroll_after),
            exposure = format!("${:.2}", report.exposure),
            filled = report.orders_filled,
            positions = report.positions_open,
            realized = format!("${:.2}", report.realized_pnl),
            "Cycle reconciled"
        );

        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
