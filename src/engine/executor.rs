//! Order lifecycle manager.
//!
//! Drives each order through submit → verify-fill → timeout/cancel and is
//! the only caller of the ledger's mutators. A ledger mutation happens
//! exactly once per order whose terminal status is `Filled` and never for
//! `Cancelled` or `Failed`. A cancel that ends with some contracts executed
//! is folded in as a fill of that quantity.
//!
//! The wait is a timer-guarded state machine ([`next_step`]) advanced
//! against an injected [`Clock`], so the timeout path runs instantly in
//! tests.
//!
//! An order whose cancel the venue never confirms is *unresolved*: it may
//! still be live on the book. Its market is blocked for new orders until a
//! later [`OrderManager::resolve_unresolved`] sees it reach a terminal state.

use chrono::Duration;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::ledger::{ClosedPosition, EntryFill, PositionLedger};
use crate::config::ExecutionConfig;
use crate::platforms::ExchangeClient;
use crate::storage::journal::TradeJournal;
use crate::types::{
    Market, Order, OrderAction, OrderRequest, OrderState, OrderStatus, Position, Side, TradeAction,
};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// What to do next with an order in a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStep {
    /// Terminal; nothing more to do.
    Done(OrderStatus),
    /// Still working and within the deadline: poll again.
    Wait,
    /// Still working past the deadline: cancel, then verify.
    Cancel,
}

/// Transition for an order observed in `status`, `elapsed` after submission.
pub fn next_step(status: OrderStatus, elapsed: Duration, timeout: Duration) -> LifecycleStep {
    match status {
        OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Failed => {
            LifecycleStep::Done(status)
        }
        OrderStatus::Submitted | OrderStatus::Resting => {
            if elapsed >= timeout {
                LifecycleStep::Cancel
            } else {
                LifecycleStep::Wait
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of driving one order as far as the venue would confirm.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub order: Order,
    /// Position after an entry fill.
    pub position: Option<Position>,
    /// Contracts removed by a liquidation or settlement fill.
    pub closed: Option<ClosedPosition>,
}

impl OrderOutcome {
    fn unfilled(order: Order) -> Self {
        Self {
            order,
            position: None,
            closed: None,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.order.is_filled()
    }

    /// The venue never confirmed a terminal state; the order may still be
    /// live.
    pub fn is_unresolved(&self) -> bool {
        !self.order.status.is_terminal()
    }

    /// Whether this outcome changed the ledger.
    pub fn mutated_ledger(&self) -> bool {
        self.position.is_some() || self.closed.is_some()
    }

    pub fn realized_pnl(&self) -> Option<Decimal> {
        self.closed.as_ref().map(|c| c.realized_pnl)
    }
}

/// A sized entry ready for submission.
#[derive(Debug, Clone)]
pub struct EntryOrder<'a> {
    pub market: &'a Market,
    pub side: Side,
    pub trade: TradeAction,
    pub quantity: u32,
    pub price_cents: u32,
    pub edge_pct: Decimal,
}

/// Ledger effect of an order once it fills.
#[derive(Debug, Clone)]
enum FillEffect {
    /// Buy into the market described by the template. Quantity and price
    /// come from the order.
    Entry(EntryFill),
    /// Sell contracts out of the held position.
    Exit,
}

/// An order left possibly live after its cancel went unconfirmed.
#[derive(Debug, Clone)]
struct UnresolvedOrder {
    order: Order,
    effect: FillEffect,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct OrderManager {
    exchange: Arc<dyn ExchangeClient>,
    clock: Arc<dyn Clock>,
    ledger: Arc<PositionLedger>,
    journal: Option<Arc<TradeJournal>>,
    timeout: Duration,
    poll_interval: std::time::Duration,
    cancel_attempts: u32,
    /// Keyed by market id; at most one per market.
    unresolved: Mutex<HashMap<String, UnresolvedOrder>>,
}

impl OrderManager {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        clock: Arc<dyn Clock>,
        ledger: Arc<PositionLedger>,
        config: &ExecutionConfig,
    ) -> Self {
        Self {
            exchange,
            clock,
            ledger,
            journal: None,
            timeout: Duration::seconds(config.order_timeout_secs as i64),
            poll_interval: std::time::Duration::from_secs(config.poll_interval_secs.max(1)),
            cancel_attempts: config.cancel_attempts.max(1),
            unresolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_journal(mut self, journal: Arc<TradeJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    /// Whether an unresolved order blocks new orders on `market_id`.
    pub fn has_unresolved(&self, market_id: &str) -> bool {
        self.pending().contains_key(market_id)
    }

    pub fn unresolved_count(&self) -> usize {
        self.pending().len()
    }

    /// Buy into a market (open or add). Commits to the ledger only on a
    /// verified fill.
    pub async fn enter(&self, entry: &EntryOrder<'_>) -> OrderOutcome {
        let request = OrderRequest {
            market_id: entry.market.id.clone(),
            side: entry.side,
            action: OrderAction::Buy,
            quantity: entry.quantity,
            price_cents: entry.price_cents,
        };
        if let Some(refused) = self.refuse_if_blocked(&request, entry.trade, entry.edge_pct) {
            return refused;
        }

        let order = self.drive(&request, entry.trade, entry.edge_pct).await;
        let effect = FillEffect::Entry(EntryFill {
            market_id: entry.market.id.clone(),
            side: entry.side,
            quantity: entry.quantity,
            price_cents: entry.price_cents,
            strike: entry.market.strike,
            expires_at: entry.market.expires_at,
            edge_pct: entry.edge_pct,
            at: order.submitted_at,
        });
        let outcome = self.commit(order, &effect);
        self.journal(&outcome).await;
        outcome
    }

    /// Sell an open position at `bid_cents`. Contracts leave the ledger
    /// only on a verified fill; otherwise the position stays open for the
    /// next cycle.
    pub async fn liquidate(&self, position: &Position, bid_cents: u32, edge_pct: Decimal) -> OrderOutcome {
        let request = OrderRequest {
            market_id: position.market_id.clone(),
            side: position.side,
            action: OrderAction::Sell,
            quantity: position.quantity,
            price_cents: bid_cents,
        };
        if bid_cents == 0 {
            warn!(
                market_id = %position.market_id,
                quantity = position.quantity,
                "No bid to liquidate into, position stays open"
            );
            let mut order = self.local_order(&request, TradeAction::Liquidate, edge_pct, OrderStatus::Failed);
            order.note = Some("no bid".into());
            return OrderOutcome::unfilled(order);
        }
        if let Some(refused) = self.refuse_if_blocked(&request, TradeAction::Liquidate, edge_pct) {
            return refused;
        }

        let order = self.drive(&request, TradeAction::Liquidate, edge_pct).await;
        let outcome = self.commit(order, &FillEffect::Exit);
        self.journal(&outcome).await;
        outcome
    }

    /// Close an expired position once the venue reports its settlement.
    /// Returns `None` while the market is undetermined or unreachable.
    pub async fn settle(&self, position: &Position, spot: Decimal) -> Option<OrderOutcome> {
        let price_cents = match self.exchange.collect_settlement(position, spot).await {
            Ok(Some(price)) => price,
            Ok(None) => {
                info!(market_id = %position.market_id, "Expired position awaiting settlement");
                return None;
            }
            Err(e) => {
                warn!(market_id = %position.market_id, error = %e, "Settlement lookup failed");
                return None;
            }
        };

        let closed = self.ledger.close(&position.market_id, price_cents)?;
        let now = self.clock.now();
        let order = Order {
            id: None,
            market_id: position.market_id.clone(),
            side: position.side,
            action: OrderAction::Sell,
            trade: TradeAction::Settle,
            quantity: position.quantity,
            price_cents,
            status: OrderStatus::Filled,
            submitted_at: now,
            resolved_at: Some(now),
            edge_pct: position.last_entry_edge_pct,
            note: None,
        };
        info!(
            market_id = %position.market_id,
            won = price_cents > 0,
            pnl = format!("${:.2}", closed.realized_pnl),
            "Position settled"
        );

        let outcome = OrderOutcome {
            order,
            position: None,
            closed: Some(closed),
        };
        self.journal(&outcome).await;
        Some(outcome)
    }

    /// Retry cancel-and-verify on every unresolved order. Orders that reach
    /// a terminal state are committed and returned; the rest stay blocked.
    pub async fn resolve_unresolved(&self) -> Vec<OrderOutcome> {
        let pending: Vec<UnresolvedOrder> = self.pending().values().cloned().collect();
        let mut outcomes = Vec::new();

        for item in pending {
            let Some(order_id) = item.order.id.clone() else {
                self.pending().remove(&item.order.market_id);
                continue;
            };
            let state = self.cancel_and_verify(&order_id).await;
            let mut order = item.order.clone();
            self.apply_state(&mut order, state, true);

            if !order.status.is_terminal() {
                error!(
                    market_id = %order.market_id,
                    order_id = %order_id,
                    status = %order.status,
                    "Order still unresolved, market stays blocked"
                );
                continue;
            }
            info!(market_id = %order.market_id, order_id = %order_id, status = %order.status, "Unresolved order settled at venue");
            let outcome = self.commit(order, &item.effect);
            self.journal(&outcome).await;
            outcomes.push(outcome);
        }
        outcomes
    }

    // -- Internal --------------------------------------------------------

    fn pending(&self) -> MutexGuard<'_, HashMap<String, UnresolvedOrder>> {
        self.unresolved.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn local_order(&self, request: &OrderRequest, trade: TradeAction, edge_pct: Decimal, status: OrderStatus) -> Order {
        let now = self.clock.now();
        Order {
            id: None,
            market_id: request.market_id.clone(),
            side: request.side,
            action: request.action,
            trade,
            quantity: request.quantity,
            price_cents: request.price_cents,
            status,
            submitted_at: now,
            resolved_at: Some(now),
            edge_pct,
            note: None,
        }
    }

    /// Refuse to submit while the market has an unresolved order.
    fn refuse_if_blocked(&self, request: &OrderRequest, trade: TradeAction, edge_pct: Decimal) -> Option<OrderOutcome> {
        if !self.has_unresolved(&request.market_id) {
            return None;
        }
        warn!(market_id = %request.market_id, trade = %trade, "Unresolved order outstanding, not submitting");
        let mut order = self.local_order(request, trade, edge_pct, OrderStatus::Failed);
        order.note = Some("unresolved order outstanding".into());
        Some(OrderOutcome::unfilled(order))
    }

    /// Fold a driven order into the ledger. Filled orders mutate it once;
    /// unresolved orders block their market.
    fn commit(&self, order: Order, effect: &FillEffect) -> OrderOutcome {
        if !order.status.is_terminal() {
            error!(
                market_id = %order.market_id,
                order_id = order.id.as_deref().unwrap_or("-"),
                status = %order.status,
                "Cancel unconfirmed, order may still be live; market blocked"
            );
            self.pending().insert(
                order.market_id.clone(),
                UnresolvedOrder {
                    order: order.clone(),
                    effect: effect.clone(),
                },
            );
            return OrderOutcome::unfilled(order);
        }
        self.pending().remove(&order.market_id);

        if !order.is_filled() {
            match effect {
                FillEffect::Entry(_) => info!(
                    market_id = %order.market_id,
                    status = %order.status,
                    note = order.note.as_deref().unwrap_or(""),
                    "Entry not filled, ledger unchanged"
                ),
                FillEffect::Exit => warn!(
                    market_id = %order.market_id,
                    status = %order.status,
                    order_id = order.id.as_deref().unwrap_or("-"),
                    "Liquidation NOT filled, position stays open and will be retried"
                ),
            }
            return OrderOutcome::unfilled(order);
        }

        match effect {
            FillEffect::Entry(template) => {
                let position = self.ledger.apply_fill(&EntryFill {
                    quantity: order.quantity,
                    price_cents: order.price_cents,
                    at: order.resolved_at.unwrap_or(template.at),
                    ..template.clone()
                });
                info!(
                    market_id = %order.market_id,
                    action = %order.trade,
                    quantity = order.quantity,
                    price = order.price_cents,
                    cost = format!("${:.2}", order.notional()),
                    position_qty = position.quantity,
                    "Entry filled"
                );
                OrderOutcome {
                    order,
                    position: Some(position),
                    closed: None,
                }
            }
            FillEffect::Exit => match self.ledger.reduce(&order.market_id, order.quantity, order.price_cents) {
                Some(closed) => {
                    info!(
                        market_id = %order.market_id,
                        quantity = order.quantity,
                        exit = order.price_cents,
                        avg_entry = format!("{:.1}", closed.position.avg_price_cents),
                        pnl = format!("${:.2}", closed.realized_pnl),
                        "Position liquidated"
                    );
                    OrderOutcome {
                        order,
                        position: None,
                        closed: Some(closed),
                    }
                }
                None => {
                    error!(market_id = %order.market_id, "Liquidation filled for a position not in the ledger");
                    OrderOutcome::unfilled(order)
                }
            },
        }
    }

    /// Submit and follow an order until the venue confirms a terminal
    /// state or cancel verification gives up. No ledger access.
    async fn drive(&self, request: &OrderRequest, trade: TradeAction, edge_pct: Decimal) -> Order {
        let submitted_at = self.clock.now();
        let mut order = Order {
            id: None,
            market_id: request.market_id.clone(),
            side: request.side,
            action: request.action,
            trade,
            quantity: request.quantity,
            price_cents: request.price_cents,
            status: OrderStatus::Submitted,
            submitted_at,
            resolved_at: None,
            edge_pct,
            note: None,
        };

        let ack = match self.exchange.submit_order(request).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(market_id = %request.market_id, error = %e, "Order submission failed");
                order.status = OrderStatus::Failed;
                order.note = Some(e.to_string());
                order.resolved_at = Some(self.clock.now());
                return order;
            }
        };
        order.id = Some(ack.order_id.clone());
        debug!(order = %order, ack_status = %ack.status, "Order acknowledged");

        let mut state = OrderState::from(ack.status);
        let mut cancelled = false;
        loop {
            let elapsed = self.clock.now() - submitted_at;
            match next_step(state.status, elapsed, self.timeout) {
                LifecycleStep::Done(_) => break,
                LifecycleStep::Wait => {
                    let remaining = (self.timeout - elapsed).to_std().unwrap_or_default();
                    self.clock.sleep(self.poll_interval.min(remaining)).await;
                    match self.exchange.order_status(&ack.order_id).await {
                        Ok(s) => state = s,
                        Err(e) => {
                            warn!(order_id = %ack.order_id, error = %e, "Order status poll failed")
                        }
                    }
                }
                LifecycleStep::Cancel => {
                    info!(order_id = %ack.order_id, waited_secs = elapsed.num_seconds(), "Order timed out, cancelling");
                    state = self.cancel_and_verify(&ack.order_id).await;
                    cancelled = true;
                    break;
                }
            }
        }

        self.apply_state(&mut order, state, cancelled);
        order
    }

    /// Record the venue's last word on an order. A terminal order with some
    /// contracts executed becomes a fill of that quantity.
    fn apply_state(&self, order: &mut Order, state: OrderState, cancelled: bool) {
        order.resolved_at = Some(self.clock.now());
        if state.is_partial_fill() {
            let requested = order.quantity;
            order.quantity = state.filled_quantity.min(requested);
            order.status = OrderStatus::Filled;
            order.note = Some(format!(
                "partial fill {} of {requested}, remainder {}",
                order.quantity, state.status
            ));
            warn!(
                market_id = %order.market_id,
                order_id = order.id.as_deref().unwrap_or("-"),
                filled = order.quantity,
                requested,
                "Order partially filled"
            );
            return;
        }

        order.status = state.status;
        order.note = match state.status {
            OrderStatus::Filled if cancelled => {
                info!(order_id = order.id.as_deref().unwrap_or("-"), "Order filled while cancelling, honoring fill");
                Some("filled during cancel".into())
            }
            OrderStatus::Filled => None,
            OrderStatus::Cancelled if cancelled => {
                Some(format!("not filled within {}s", self.timeout.num_seconds()))
            }
            OrderStatus::Cancelled => Some("cancelled by venue".into()),
            OrderStatus::Failed => Some("rejected by venue".into()),
            OrderStatus::Submitted | OrderStatus::Resting => {
                Some(format!("cancel unconfirmed (venue status {})", state.status))
            }
        };
    }

    /// Cancel a working order and re-read its status until the venue
    /// reports it terminal, for at most `cancel_attempts` rounds. A fill
    /// that raced the cancel is returned as such. Returns the last status
    /// seen when the venue never confirms.
    async fn cancel_and_verify(&self, order_id: &str) -> OrderState {
        let mut last = OrderState::from(OrderStatus::Resting);
        for attempt in 1..=self.cancel_attempts {
            if let Err(e) = self.exchange.cancel_order(order_id).await {
                warn!(order_id, attempt, error = %e, "Cancel request failed");
            }
            match self.exchange.order_status(order_id).await {
                Ok(state) if state.status.is_terminal() => return state,
                Ok(state) => {
                    warn!(order_id, attempt, status = %state.status, "Order still working after cancel");
                    last = state;
                }
                Err(e) => warn!(order_id, attempt, error = %e, "Could not verify status after cancel"),
            }
            if attempt < self.cancel_attempts {
                self.clock.sleep(self.poll_interval).await;
            }
        }
        last
    }

    async fn journal(&self, outcome: &OrderOutcome) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(&outcome.order, outcome.realized_pnl()).await {
                warn!(market_id = %outcome.order.market_id, error = %e, "Journal write failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;
    use crate::platforms::MockExchangeClient;
    use crate::storage::MemoryPositionStore;
    use crate::types::{Mode, OrderAck, Quote};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn market() -> Market {
        Market {
            id: "KXBTCD-T101000".into(),
            strike: dec!(101000),
            expires_at: Utc::now() + Duration::minutes(40),
            yes: Quote::new(10, 12),
            no: Quote::new(88, 90),
        }
    }

    fn setup(exchange: MockExchangeClient) -> (Arc<ManualClock>, OrderManager) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(PositionLedger::new(Arc::new(MemoryPositionStore::new(Mode::Live))));
        let manager = OrderManager::new(
            Arc::new(exchange),
            clock.clone(),
            ledger,
            &ExecutionConfig::default(),
        );
        (clock, manager)
    }

    fn entry(m: &Market) -> EntryOrder<'_> {
        EntryOrder {
            market: m,
            side: Side::No,
            trade: TradeAction::Open,
            quantity: 5,
            price_cents: 90,
            edge_pct: dec!(12),
        }
    }

    #[test]
    fn test_next_step_transitions() {
        let t = Duration::seconds(30);
        assert_eq!(
            next_step(OrderStatus::Filled, Duration::zero(), t),
            LifecycleStep::Done(OrderStatus::Filled)
        );
        assert_eq!(
            next_step(OrderStatus::Failed, Duration::seconds(99), t),
            LifecycleStep::Done(OrderStatus::Failed)
        );
        assert_eq!(next_step(OrderStatus::Resting, Duration::seconds(29), t), LifecycleStep::Wait);
        assert_eq!(next_step(OrderStatus::Resting, Duration::seconds(30), t), LifecycleStep::Cancel);
        assert_eq!(next_step(OrderStatus::Submitted, Duration::seconds(31), t), LifecycleStep::Cancel);
    }

    #[tokio::test]
    async fn test_immediate_fill_mutates_once() {
        let mut ex = MockExchangeClient::new();
        ex.expect_submit_order().times(1).returning(|_| {
            Ok(OrderAck {
                order_id: "o1".into(),
                status: OrderStatus::Filled,
            })
        });
        ex.expect_order_status().never();
        let (_, manager) = setup(ex);

        let m = market();
        let outcome = manager.enter(&entry(&m)).await;
        assert!(outcome.is_filled());
        assert!(outcome.mutated_ledger());
        assert_eq!(manager.ledger().revision(), 1);
        assert_eq!(manager.ledger().get(&m.id).unwrap().cost_basis, dec!(4.50));
    }

    #[tokio::test]
    async fn test_submission_error_is_failed_without_mutation() {
        let mut ex = MockExchangeClient::new();
        ex.expect_submit_order()
            .returning(|_| Err(anyhow::anyhow!("connection reset")));
        let (_, manager) = setup(ex);

        let m = market();
        let outcome = manager.enter(&entry(&m)).await;
        assert_eq!(outcome.order.status, OrderStatus::Failed);
        assert!(outcome.order.id.is_none());
        assert!(!outcome.mutated_ledger());
        assert_eq!(manager.ledger().revision(), 0);
    }

    #[tokio::test]
    async fn test_resting_then_filled_within_timeout() {
        let polls = Arc::new(AtomicU32::new(0));
        let mut ex = MockExchangeClient::new();
        ex.expect_submit_order().returning(|_| {
            Ok(OrderAck {
                order_id: "o2".into(),
                status: OrderStatus::Resting,
            })
        });
        let p = polls.clone();
        ex.expect_order_status().returning(move |_| {
            if p.fetch_add(1, Ordering::SeqCst) < 3 {
                Ok(OrderStatus::Resting.into())
            } else {
                Ok(OrderStatus::Filled.into())
            }
        });
        ex.expect_cancel_order().never();
        let (clock, manager) = setup(ex);
        let start = clock.now();

        let m = market();
        let outcome = manager.enter(&entry(&m)).await;
        assert!(outcome.is_filled());
        assert_eq!(clock.now() - start, Duration::seconds(8));
        assert_eq!(manager.ledger().revision(), 1);
    }

    #[tokio::test]
    async fn test_timeout_cancels_without_mutation() {
        let mut ex = MockExchangeClient::new();
        ex.expect_submit_order().returning(|_| {
            Ok(OrderAck {
                order_id: "o3".into(),
                status: OrderStatus::Resting,
            })
        });
        let cancelled = Arc::new(AtomicBool::new(false));
        let c = cancelled.clone();
        ex.expect_cancel_order().times(1).returning(move |_| {
            c.store(true, Ordering::SeqCst);
            Ok(())
        });
        let c = cancelled.clone();
        ex.expect_order_status().returning(move |_| {
            if c.load(Ordering::SeqCst) {
                Ok(OrderStatus::Cancelled.into())
            } else {
                Ok(OrderStatus::Resting.into())
            }
        });
        let (clock, manager) = setup(ex);
        let start = clock.now();

        let m = market();
        let outcome = manager.enter(&entry(&m)).await;
        assert_eq!(outcome.order.status, OrderStatus::Cancelled);
        assert_eq!(clock.now() - start, Duration::seconds(30));
        assert!(!outcome.mutated_ledger());
        assert!(manager.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_fill_racing_cancel_is_honored() {
        // Resting throughout the 30s window; the venue reports Filled once
        // the cancel has been sent.
        let mut ex = MockExchangeClient::new();
        ex.expect_submit_order().returning(|_| {
            Ok(OrderAck {
                order_id: "o4".into(),
                status: OrderStatus::Resting,
            })
        });
        let cancelled = Arc::new(AtomicBool::new(false));
        let c = cancelled.clone();
        ex.expect_cancel_order().times(1).returning(move |_| {
            c.store(true, Ordering::SeqCst);
            Err(anyhow::anyhow!("order already filled"))
        });
        let c = cancelled.clone();
        ex.expect_order_status().returning(move |_| {
            if c.load(Ordering::SeqCst) {
                Ok(OrderStatus::Filled.into())
            } else {
                Ok(OrderStatus::Resting.into())
            }
        });
        let (clock, manager) = setup(ex);
        let start = clock.now();

        let m = market();
        let outcome = manager.enter(&entry(&m)).await;
        assert_eq!(clock.now() - start, Duration::seconds(30));
        assert!(outcome.is_filled());
        assert_eq!(manager.ledger().revision(), 1);
        assert_eq!(manager.ledger().get(&m.id).unwrap().quantity, 5);
    }

    /// Venue that never confirms a cancel until `settle_to` is set.
    fn stuck_venue(settle_to: Arc<Mutex<Option<OrderState>>>, submits: Arc<AtomicU32>) -> MockExchangeClient {
        let mut ex = MockExchangeClient::new();
        ex.expect_submit_order().returning(move |_| {
            submits.fetch_add(1, Ordering::SeqCst);
            Ok(OrderAck {
                order_id: "o5".into(),
                status: OrderStatus::Resting,
            })
        });
        ex.expect_cancel_order()
            .returning(|_| Err(anyhow::anyhow!("503 service unavailable")));
        ex.expect_order_status().returning(move |_| {
            Ok((*settle_to.lock().unwrap()).unwrap_or(OrderState::from(OrderStatus::Resting)))
        });
        ex
    }

    #[tokio::test]
    async fn test_unconfirmed_cancel_blocks_market() {
        let settle_to = Arc::new(Mutex::new(None));
        let submits = Arc::new(AtomicU32::new(0));
        let (clock, manager) = setup(stuck_venue(settle_to.clone(), submits.clone()));
        let start = clock.now();

        let m = market();
        let outcome = manager.enter(&entry(&m)).await;
        assert!(outcome.is_unresolved());
        assert_eq!(outcome.order.status, OrderStatus::Resting);
        assert!(!outcome.mutated_ledger());
        assert!(manager.has_unresolved(&m.id));
        // 30s timeout plus two 2s pauses between three cancel rounds
        assert_eq!(clock.now() - start, Duration::seconds(34));

        // no second order while the first may still be live
        let refused = manager.enter(&entry(&m)).await;
        assert_eq!(refused.order.status, OrderStatus::Failed);
        assert!(refused.order.id.is_none());
        assert_eq!(submits.load(Ordering::SeqCst), 1);

        // still stuck: stays blocked, nothing reported
        assert!(manager.resolve_unresolved().await.is_empty());
        assert_eq!(manager.unresolved_count(), 1);
        assert!(manager.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_order_that_filled_is_committed_later() {
        let settle_to = Arc::new(Mutex::new(None));
        let submits = Arc::new(AtomicU32::new(0));
        let (_, manager) = setup(stuck_venue(settle_to.clone(), submits));

        let m = market();
        manager.enter(&entry(&m)).await;
        assert!(manager.ledger().is_empty());

        *settle_to.lock().unwrap() = Some(OrderState::from(OrderStatus::Filled));
        let resolved = manager.resolve_unresolved().await;
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].is_filled());
        assert!(resolved[0].mutated_ledger());
        assert!(!manager.has_unresolved(&m.id));
        assert_eq!(manager.ledger().get(&m.id).unwrap().quantity, 5);
        assert_eq!(manager.ledger().revision(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_order_cancelled_later_unblocks() {
        let settle_to = Arc::new(Mutex::new(None));
        let submits = Arc::new(AtomicU32::new(0));
        let (_, manager) = setup(stuck_venue(settle_to.clone(), submits));

        let m = market();
        manager.enter(&entry(&m)).await;
        *settle_to.lock().unwrap() = Some(OrderState::from(OrderStatus::Cancelled));

        let resolved = manager.resolve_unresolved().await;
        assert_eq!(resolved[0].order.status, OrderStatus::Cancelled);
        assert!(!resolved[0].mutated_ledger());
        assert_eq!(manager.unresolved_count(), 0);
        assert!(manager.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_retried_until_confirmed() {
        let mut ex = MockExchangeClient::new();
        ex.expect_submit_order().returning(|_| {
            Ok(OrderAck {
                order_id: "o6".into(),
                status: OrderStatus::Resting,
            })
        });
        let cancels = Arc::new(AtomicU32::new(0));
        let c = cancels.clone();
        ex.expect_cancel_order().times(2).returning(move |_| {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(anyhow::anyhow!("timeout"))
            } else {
                Ok(())
            }
        });
        let c = cancels.clone();
        ex.expect_order_status().returning(move |_| {
            if c.load(Ordering::SeqCst) >= 2 {
                Ok(OrderStatus::Cancelled.into())
            } else {
                Ok(OrderStatus::Resting.into())
            }
        });
        let (_, manager) = setup(ex);

        let m = market();
        let outcome = manager.enter(&entry(&m)).await;
        assert_eq!(outcome.order.status, OrderStatus::Cancelled);
        assert!(!manager.has_unresolved(&m.id));
    }

    #[tokio::test]
    async fn test_partial_fill_on_cancel_enters_filled_quantity() {
        let mut ex = MockExchangeClient::new();
        ex.expect_submit_order().returning(|_| {
            Ok(OrderAck {
                order_id: "o7".into(),
                status: OrderStatus::Resting,
            })
        });
        let cancelled = Arc::new(AtomicBool::new(false));
        let c = cancelled.clone();
        ex.expect_cancel_order().times(1).returning(move |_| {
            c.store(true, Ordering::SeqCst);
            Ok(())
        });
        let c = cancelled.clone();
        ex.expect_order_status().returning(move |_| {
            if c.load(Ordering::SeqCst) {
                Ok(OrderState::partial(OrderStatus::Cancelled, 2))
            } else {
                Ok(OrderState::partial(OrderStatus::Resting, 2))
            }
        });
        let (_, manager) = setup(ex);

        let m = market();
        let outcome = manager.enter(&entry(&m)).await;
        assert!(outcome.is_filled());
        assert_eq!(outcome.order.quantity, 2);
        assert_eq!(manager.ledger().revision(), 1);
        let held = manager.ledger().get(&m.id).unwrap();
        assert_eq!(held.quantity, 2);
        assert_eq!(held.cost_basis, dec!(1.80));
    }

    #[tokio::test]
    async fn test_partial_liquidation_keeps_remainder() {
        let mut ex = MockExchangeClient::new();
        ex.expect_submit_order().returning(|req| {
            let status = match req.action {
                OrderAction::Buy => OrderStatus::Filled,
                OrderAction::Sell => OrderStatus::Resting,
            };
            Ok(OrderAck {
                order_id: "o8".into(),
                status,
            })
        });
        ex.expect_cancel_order().returning(|_| Ok(()));
        ex.expect_order_status()
            .returning(|_| Ok(OrderState::partial(OrderStatus::Cancelled, 3)));
        let (_, manager) = setup(ex);

        let m = market();
        manager.enter(&entry(&m)).await;
        let position = manager.ledger().get(&m.id).unwrap();
        let outcome = manager.liquidate(&position, 95, dec!(0.5)).await;

        assert!(outcome.is_filled());
        assert_eq!(outcome.order.quantity, 3);
        assert_eq!(outcome.realized_pnl(), Some(dec!(0.15)));
        assert_eq!(manager.ledger().get(&m.id).unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_unfilled_liquidation_keeps_position() {
        let mut ex = MockExchangeClient::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        ex.expect_submit_order().returning(move |req| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            let status = match req.action {
                OrderAction::Buy => OrderStatus::Filled,
                OrderAction::Sell => OrderStatus::Failed,
            };
            Ok(OrderAck {
                order_id: format!("o{n}"),
                status,
            })
        });
        let (_, manager) = setup(ex);

        let m = market();
        manager.enter(&entry(&m)).await;
        let position = manager.ledger().get(&m.id).unwrap();

        let outcome = manager.liquidate(&position, 85, dec!(0.5)).await;
        assert!(!outcome.is_filled());
        assert_eq!(manager.ledger().len(), 1);
        assert_eq!(manager.ledger().revision(), 1);

        let no_bid = manager.liquidate(&position, 0, dec!(0.5)).await;
        assert_eq!(no_bid.order.status, OrderStatus::Failed);
        assert_eq!(manager.ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_filled_liquidation_closes() {
        let mut ex = MockExchangeClient::new();
        ex.expect_submit_order().returning(|_| {
            Ok(OrderAck {
                order_id: "o".into(),
                status: OrderStatus::Filled,
            })
        });
        let (_, manager) = setup(ex);

        let m = market();
        manager.enter(&entry(&m)).await;
        let position = manager.ledger().get(&m.id).unwrap();
        let outcome = manager.liquidate(&position, 85, dec!(0.5)).await;

        assert!(outcome.is_filled());
        assert_eq!(outcome.realized_pnl(), Some(dec!(-0.25)));
        assert!(manager.ledger().is_empty());
        assert_eq!(manager.ledger().revision(), 2);
    }

    #[tokio::test]
    async fn test_settlement() {
        let mut ex = MockExchangeClient::new();
        ex.expect_submit_order().returning(|_| {
            Ok(OrderAck {
                order_id: "o".into(),
                status: OrderStatus::Filled,
            })
        });
        let determined = Arc::new(AtomicBool::new(false));
        let d = determined.clone();
        ex.expect_collect_settlement().returning(move |_, _| {
            if d.load(Ordering::SeqCst) {
                Ok(Some(100))
            } else {
                Ok(None)
            }
        });
        let (_, manager) = setup(ex);

        let m = market();
        manager.enter(&entry(&m)).await;
        let position = manager.ledger().get(&m.id).unwrap();

        assert!(manager.settle(&position, dec!(100500)).await.is_none());
        assert_eq!(manager.ledger().len(), 1);

        determined.store(true, Ordering::SeqCst);
        let outcome = manager.settle(&position, dec!(100500)).await.unwrap();
        assert_eq!(outcome.order.trade, TradeAction::Settle);
        assert_eq!(outcome.realized_pnl(), Some(dec!(0.50)));
        assert!(manager.ledger().is_empty());
    }
}
