//! Strategy engine: fair value, edge evaluation, exposure gating and Kelly
//! sizing.

pub mod edge;
pub mod kelly;
pub mod model;
pub mod risk;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use tracing::debug;

use crate::types::{Position, TradeAction};
use edge::{EdgeEvaluator, EdgeResult, EntryVeto};
use kelly::{PositionSizer, SizingDecision, SizingRequest};
use risk::{ExposureGuard, ExposureState};

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

/// Why an entry was passed on.
#[derive(Debug, Clone)]
pub enum SkipReason {
    /// Inside the pre-settlement cutoff window.
    Cutoff,
    /// Edge evaluator said no.
    Vetoed(EntryVeto),
    /// Already holding and the edge has not improved enough to add.
    EdgeNotImproved { last_entry: Decimal, current: Decimal },
    /// No exposure budget left.
    NoHeadroom(ExposureState),
    /// Sizing floored to zero contracts.
    SizedToZero(SizingDecision),
    /// An earlier order on this market may still be live.
    UnresolvedOrder,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Cutoff => write!(f, "inside trading cutoff"),
            SkipReason::Vetoed(v) => write!(f, "{v}"),
            SkipReason::EdgeNotImproved { last_entry, current } => write!(
                f,
                "edge {current:.1}% not enough above last entry {last_entry:.1}%"
            ),
            SkipReason::NoHeadroom(s) => write!(f, "max exposure reached: {s}"),
            SkipReason::SizedToZero(d) => write!(f, "sized to zero ({} bound)", d.limit),
            SkipReason::UnresolvedOrder => write!(f, "unresolved order outstanding"),
        }
    }
}

/// Outcome of planning an entry for one market.
#[derive(Debug, Clone)]
pub enum EntryPlan {
    Enter {
        action: TradeAction,
        quantity: u32,
        price_cents: u32,
        sizing: SizingDecision,
    },
    Skip(SkipReason),
}

/// Inputs the orchestrator needs beyond the edge itself.
#[derive(Debug, Clone)]
pub struct EntryContext<'a> {
    pub edge: &'a EdgeResult,
    pub existing: Option<&'a Position>,
    pub bankroll: Decimal,
    /// Current total exposure from a ledger snapshot.
    pub exposure: Decimal,
    /// False inside the cutoff window.
    pub entries_open: bool,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Pipelines edge → exposure gate → Kelly sizing for a single market.
pub struct StrategyOrchestrator {
    edge: EdgeEvaluator,
    guard: ExposureGuard,
    sizer: PositionSizer,
    /// Percentage points the edge must rise before adding to a position.
    edge_increase_pct: Decimal,
}

impl StrategyOrchestrator {
    pub fn new(
        edge: EdgeEvaluator,
        guard: ExposureGuard,
        sizer: PositionSizer,
        edge_increase_pct: Decimal,
    ) -> Self {
        Self {
            edge,
            guard,
            sizer,
            edge_increase_pct,
        }
    }

    pub fn edge(&self) -> &EdgeEvaluator {
        &self.edge
    }

    /// Plan an entry: cutoff → edge veto → add rule → exposure → sizing.
    pub fn plan_entry(&self, ctx: &EntryContext<'_>) -> EntryPlan {
        if !ctx.entries_open {
            return EntryPlan::Skip(SkipReason::Cutoff);
        }
        if let Some(veto) = ctx.edge.veto {
            return EntryPlan::Skip(SkipReason::Vetoed(veto));
        }

        let action = match ctx.existing {
            Some(pos) => {
                let increase = ctx.edge.edge_pct - pos.last_entry_edge_pct;
                if increase < self.edge_increase_pct {
                    return EntryPlan::Skip(SkipReason::EdgeNotImproved {
                        last_entry: pos.last_entry_edge_pct,
                        current: ctx.edge.edge_pct,
                    });
                }
                TradeAction::Add
            }
            None => TradeAction::Open,
        };

        let exposure = self.guard.assess(ctx.bankroll, ctx.exposure);
        if exposure.is_exhausted() {
            return EntryPlan::Skip(SkipReason::NoHeadroom(exposure));
        }

        let sizing = self.sizer.size(&SizingRequest {
            market_id: ctx.edge.market_id.clone(),
            edge_pct: ctx.edge.edge_pct,
            win_probability: ctx.edge.fair_value.probability,
            price: Decimal::from(ctx.edge.price_cents) / dec!(100),
            bankroll: ctx.bankroll,
            headroom: exposure.headroom,
        });
        if !sizing.is_trade() {
            return EntryPlan::Skip(SkipReason::SizedToZero(sizing));
        }

        debug!(
            market_id = %ctx.edge.market_id,
            action = %action,
            quantity = sizing.quantity,
            price = ctx.edge.price_cents,
            "Entry planned"
        );

        EntryPlan::Enter {
            action,
            quantity: sizing.quantity,
            price_cents: ctx.edge.price_cents,
            sizing,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
