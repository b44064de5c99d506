//! Position ledger.
//!
//! The in-process record of open positions for one mode. Mutation is
//! crate-private and only the order lifecycle manager calls it, once per
//! verified fill. Everyone else reads through [`PositionLedger::snapshot`],
//! which returns an owned copy taken under a single lock acquisition.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

use crate::storage::PositionStore;
use crate::types::{EngineError, Mode, Position, Quote, Side};

/// A verified buy fill to fold into the ledger.
#[derive(Debug, Clone)]
pub struct EntryFill {
    pub market_id: String,
    pub side: Side,
    pub quantity: u32,
    pub price_cents: u32,
    pub strike: Decimal,
    pub expires_at: DateTime<Utc>,
    pub edge_pct: Decimal,
    pub at: DateTime<Utc>,
}

/// A position removed by a verified closing fill.
#[derive(Debug, Clone)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price_cents: u32,
    pub proceeds: Decimal,
    pub realized_pnl: Decimal,
}

#[derive(Debug, Default)]
struct LedgerState {
    positions: BTreeMap<String, Position>,
    realized_pnl: Decimal,
    /// Incremented on every mutation.
    revision: u64,
}

pub struct PositionLedger {
    mode: Mode,
    store: Arc<dyn PositionStore>,
    state: RwLock<LedgerState>,
}

impl PositionLedger {
    /// Empty ledger bound to `store`'s mode.
    pub fn new(store: Arc<dyn PositionStore>) -> Self {
        Self {
            mode: store.mode(),
            store,
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Ledger resumed from `store`.
    ///
    /// A store read failure is fatal in live mode and starts empty in
    /// dry-run mode. Records tagged with another mode are always rejected.
    pub fn restore(store: Arc<dyn PositionStore>) -> Result<Self> {
        let ledger = Self::new(store);
        let loaded = match ledger.store.load_all() {
            Ok(positions) => positions,
            Err(e) if ledger.mode.is_live() => {
                return Err(e.context("Cannot resume live positions"));
            }
            Err(e) => {
                warn!(error = %e, "Could not load dry-run positions, starting empty");
                Vec::new()
            }
        };

        {
            let mut state = ledger.write();
            for position in loaded {
                if position.mode != ledger.mode {
                    return Err(EngineError::ModeMismatch {
                        expected: ledger.mode,
                        found: position.mode,
                    }
                    .into());
                }
                state.positions.insert(position.market_id.clone(), position);
            }
            info!(
                mode = %ledger.mode,
                positions = state.positions.len(),
                "Ledger restored"
            );
        }
        Ok(ledger)
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, position: &Position) {
        if let Err(e) = self.store.put(position) {
            error!(market_id = %position.market_id, error = %e, "Failed to persist position");
        }
    }

    fn persist_removal(&self, market_id: &str) {
        if let Err(e) = self.store.remove(market_id) {
            error!(market_id, error = %e, "Failed to delete persisted position");
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    // -- Mutation (order lifecycle manager only) -------------------------

    /// Open a position, or add to it at a quantity-weighted average price.
    pub(crate) fn apply_fill(&self, fill: &EntryFill) -> Position {
        let cost = Decimal::from(fill.quantity) * Decimal::from(fill.price_cents) / dec!(100);
        let position = {
            let mut state = self.write();
            let position = match state.positions.get(&fill.market_id) {
                Some(existing) => {
                    let quantity = existing.quantity + fill.quantity;
                    let avg = (existing.avg_price_cents * Decimal::from(existing.quantity)
                        + Decimal::from(fill.price_cents) * Decimal::from(fill.quantity))
                        / Decimal::from(quantity);
                    Position {
                        quantity,
                        avg_price_cents: avg,
                        cost_basis: existing.cost_basis + cost,
                        last_entry_edge_pct: fill.edge_pct,
                        ..existing.clone()
                    }
                }
                None => Position {
                    market_id: fill.market_id.clone(),
                    side: fill.side,
                    quantity: fill.quantity,
                    avg_price_cents: Decimal::from(fill.price_cents),
                    cost_basis: cost,
                    strike: fill.strike,
                    expires_at: fill.expires_at,
                    last_entry_edge_pct: fill.edge_pct,
                    opened_at: fill.at,
                    mode: self.mode,
                },
            };
            state.positions.insert(fill.market_id.clone(), position.clone());
            state.revision += 1;
            position
        };
        self.persist(&position);
        position
    }

    /// Remove a position on a verified closing fill at `exit_price_cents`.
    pub(crate) fn close(&self, market_id: &str, exit_price_cents: u32) -> Option<ClosedPosition> {
        let closed = {
            let mut state = self.write();
            let position = state.positions.remove(market_id)?;
            let proceeds =
                Decimal::from(position.quantity) * Decimal::from(exit_price_cents) / dec!(100);
            let realized_pnl = proceeds - position.cost_basis;
            state.realized_pnl += realized_pnl;
            state.revision += 1;
            ClosedPosition {
                position,
                exit_price_cents,
                proceeds,
                realized_pnl,
            }
        };
        self.persist_removal(market_id);
        Some(closed)
    }

    /// Sell part of a position at `exit_price_cents`. The remainder keeps
    /// its average price and a proportional share of the cost basis.
    /// Selling everything held is a [`close`](Self::close).
    pub(crate) fn reduce(&self, market_id: &str, quantity: u32, exit_price_cents: u32) -> Option<ClosedPosition> {
        let mut state = self.write();
        let held = state.positions.get(market_id)?.clone();
        if quantity >= held.quantity {
            drop(state);
            return self.close(market_id, exit_price_cents);
        }

        let sold_cost = held.cost_basis * Decimal::from(quantity) / Decimal::from(held.quantity);
        let proceeds = Decimal::from(quantity) * Decimal::from(exit_price_cents) / dec!(100);
        let realized_pnl = proceeds - sold_cost;
        let remaining = Position {
            quantity: held.quantity - quantity,
            cost_basis: held.cost_basis - sold_cost,
            ..held.clone()
        };
        state.positions.insert(market_id.to_string(), remaining.clone());
        state.realized_pnl += realized_pnl;
        state.revision += 1;
        drop(state);

        self.persist(&remaining);
        Some(ClosedPosition {
            position: Position {
                quantity,
                cost_basis: sold_cost,
                ..held
            },
            exit_price_cents,
            proceeds,
            realized_pnl,
        })
    }

    // -- Reads -----------------------------------------------------------

    /// Owned copy of all open positions, ordered by market id.
    pub fn snapshot(&self) -> Vec<Position> {
        self.read().positions.values().cloned().collect()
    }

    pub fn get(&self, market_id: &str) -> Option<Position> {
        self.read().positions.get(market_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().positions.is_empty()
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.read().realized_pnl
    }

    /// Mark-to-bid P&L of positions with a quote in `quotes`
    /// (market id → quote for the position's side).
    pub fn unrealized_pnl(&self, quotes: &HashMap<String, Quote>) -> Decimal {
        self.read()
            .positions
            .values()
            .filter_map(|p| {
                quotes
                    .get(&p.market_id)
                    .map(|q| p.mark_value(q.bid_cents) - p.cost_basis)
            })
            .sum()
    }

    /// Total cost basis of open positions.
    pub fn exposure(&self) -> Decimal {
        self.read().positions.values().map(|p| p.cost_basis).sum()
    }

    /// Number of mutations applied since construction.
    pub fn revision(&self) -> u64 {
        self.read().revision
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPositionStore;
    use chrono::Duration;

    fn fill(id: &str, qty: u32, price: u32, edge: Decimal) -> EntryFill {
        EntryFill {
            market_id: id.into(),
            side: Side::No,
            quantity: qty,
            price_cents: price,
            strike: dec!(100000),
            expires_at: Utc::now() + Duration::minutes(40),
            edge_pct: edge,
            at: Utc::now(),
        }
    }

    fn ledger(mode: Mode) -> (Arc<MemoryPositionStore>, PositionLedger) {
        let store = Arc::new(MemoryPositionStore::new(mode));
        let ledger = PositionLedger::new(store.clone());
        (store, ledger)
    }

    #[test]
    fn test_open_and_add_weighted_average() {
        let (store, ledger) = ledger(Mode::DryRun);
        ledger.apply_fill(&fill("m1", 4, 80, dec!(12)));
        let pos = ledger.apply_fill(&fill("m1", 6, 90, dec!(18)));

        assert_eq!(pos.quantity, 10);
        assert_eq!(pos.avg_price_cents, dec!(86));
        assert_eq!(pos.cost_basis, dec!(8.60));
        assert_eq!(pos.last_entry_edge_pct, dec!(18));
        assert_eq!(pos.mode, Mode::DryRun);
        assert_eq!(ledger.revision(), 2);
        assert_eq!(store.load_all().unwrap(), vec![pos]);
    }

    #[test]
    fn test_close_realizes_pnl_and_deletes() {
        let (store, ledger) = ledger(Mode::Live);
        ledger.apply_fill(&fill("m1", 5, 88, dec!(12)));
        let closed = ledger.close("m1", 100).unwrap();

        assert_eq!(closed.proceeds, dec!(5));
        assert_eq!(closed.realized_pnl, dec!(0.60));
        assert_eq!(ledger.realized_pnl(), dec!(0.60));
        assert!(ledger.is_empty());
        assert!(store.load_all().unwrap().is_empty());
        assert!(ledger.close("m1", 100).is_none());
        assert_eq!(ledger.revision(), 2);
    }

    #[test]
    fn test_partial_reduce_keeps_remainder() {
        let (store, ledger) = ledger(Mode::Live);
        ledger.apply_fill(&fill("m1", 5, 88, dec!(12)));
        let sold = ledger.reduce("m1", 2, 95).unwrap();

        assert_eq!(sold.position.quantity, 2);
        assert_eq!(sold.proceeds, dec!(1.90));
        assert_eq!(sold.realized_pnl, dec!(0.14));
        let left = ledger.get("m1").unwrap();
        assert_eq!(left.quantity, 3);
        assert_eq!(left.cost_basis, dec!(2.64));
        assert_eq!(left.avg_price_cents, dec!(88));
        assert_eq!(store.load_all().unwrap(), vec![left]);
        assert_eq!(ledger.revision(), 2);

        // selling the rest closes it
        let rest = ledger.reduce("m1", 3, 90).unwrap();
        assert_eq!(rest.realized_pnl, dec!(0.06));
        assert!(ledger.is_empty());
        assert_eq!(ledger.realized_pnl(), dec!(0.20));
        assert!(ledger.reduce("m1", 1, 90).is_none());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let (_, ledger) = ledger(Mode::DryRun);
        ledger.apply_fill(&fill("a", 1, 50, dec!(11)));
        let snap = ledger.snapshot();
        ledger.apply_fill(&fill("b", 1, 50, dec!(11)));
        ledger.close("a", 0);

        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].market_id, "a");
        assert_eq!(ledger.snapshot()[0].market_id, "b");
    }

    #[test]
    fn test_unrealized_and_exposure() {
        let (_, ledger) = ledger(Mode::DryRun);
        ledger.apply_fill(&fill("a", 10, 80, dec!(11)));
        ledger.apply_fill(&fill("b", 2, 50, dec!(11)));

        let mut quotes = HashMap::new();
        quotes.insert("a".to_string(), Quote::new(85, 87));
        assert_eq!(ledger.unrealized_pnl(&quotes), dec!(0.50));
        assert_eq!(ledger.exposure(), dec!(9));
    }

    #[test]
    fn test_storage_failure_keeps_fill() {
        let (store, ledger) = ledger(Mode::Live);
        store.set_fail_writes(true);
        ledger.apply_fill(&fill("a", 1, 50, dec!(11)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_restore_from_store() {
        let store = Arc::new(MemoryPositionStore::new(Mode::DryRun));
        {
            let first = PositionLedger::new(store.clone());
            first.apply_fill(&fill("a", 3, 70, dec!(15)));
        }
        let resumed = PositionLedger::restore(store).unwrap();
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed.get("a").unwrap().quantity, 3);
        assert_eq!(resumed.revision(), 0);
    }

    struct BrokenStore(Mode);

    impl PositionStore for BrokenStore {
        fn mode(&self) -> Mode {
            self.0
        }
        fn load_all(&self) -> Result<Vec<Position>> {
            anyhow::bail!("disk on fire")
        }
        fn put(&self, _: &Position) -> Result<()> {
            Ok(())
        }
        fn remove(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_restore_failure_fatal_only_in_live() {
        assert!(PositionLedger::restore(Arc::new(BrokenStore(Mode::Live))).is_err());
        let dry = PositionLedger::restore(Arc::new(BrokenStore(Mode::DryRun))).unwrap();
        assert!(dry.is_empty());
    }
}
