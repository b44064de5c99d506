//! In-process venue for dry-run mode.
//!
//! Fills every order immediately and deterministically at its limit price,
//! keeps a simulated cash balance and contract holdings, and settles
//! expired positions against the reference spot price.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

use super::ExchangeClient;
use crate::types::{
    ExchangePosition, OrderAck, OrderAction, OrderRequest, OrderState, OrderStatus, Position, Side,
};

#[derive(Debug)]
struct SimState {
    balance: Decimal,
    orders: HashMap<String, OrderStatus>,
    holdings: HashMap<String, i64>,
}

#[derive(Debug)]
pub struct SimulatedExchange {
    state: Mutex<SimState>,
}

impl SimulatedExchange {
    pub fn new(starting_balance: Decimal) -> Self {
        info!(balance = format!("${:.2}", starting_balance), "Simulated venue ready");
        Self {
            state: Mutex::new(SimState {
                balance: starting_balance,
                orders: HashMap::new(),
                holdings: HashMap::new(),
            }),
        }
    }

    /// Seed holdings so restored dry-run positions can be sold or settled.
    pub fn seed_holdings(&self, positions: &[Position]) {
        let mut state = self.lock();
        for p in positions {
            *state.holdings.entry(p.market_id.clone()).or_insert(0) += i64::from(p.quantity);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(state: &mut SimState, status: OrderStatus) -> OrderAck {
        let order_id = format!("DRY-{}", uuid::Uuid::new_v4());
        state.orders.insert(order_id.clone(), status);
        OrderAck { order_id, status }
    }
}

#[async_trait]
impl ExchangeClient for SimulatedExchange {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        let mut state = self.lock();
        let notional = request.notional();
        let held = state.holdings.get(&request.market_id).copied().unwrap_or(0);

        let status = match request.action {
            OrderAction::Buy if notional > state.balance => {
                warn!(
                    market_id = %request.market_id,
                    cost = format!("${:.2}", notional),
                    balance = format!("${:.2}", state.balance),
                    "Simulated buy rejected: insufficient balance"
                );
                OrderStatus::Failed
            }
            OrderAction::Buy => {
                state.balance -= notional;
                *state.holdings.entry(request.market_id.clone()).or_insert(0) +=
                    i64::from(request.quantity);
                OrderStatus::Filled
            }
            OrderAction::Sell if held < i64::from(request.quantity) => {
                warn!(
                    market_id = %request.market_id,
                    held,
                    requested = request.quantity,
                    "Simulated sell rejected: not enough contracts"
                );
                OrderStatus::Failed
            }
            OrderAction::Sell => {
                state.balance += notional;
                let remaining = held - i64::from(request.quantity);
                if remaining == 0 {
                    state.holdings.remove(&request.market_id);
                } else {
                    state.holdings.insert(request.market_id.clone(), remaining);
                }
                OrderStatus::Filled
            }
        };

        Ok(Self::record(&mut state, status))
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderState> {
        self.lock()
            .orders
            .get(order_id)
            .map(|status| OrderState::from(*status))
            .ok_or_else(|| anyhow::anyhow!("Unknown simulated order {order_id}"))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut state = self.lock();
        match state.orders.get_mut(order_id) {
            Some(status) if !status.is_terminal() => {
                *status = OrderStatus::Cancelled;
                Ok(())
            }
            Some(_) => Ok(()),
            None => anyhow::bail!("Unknown simulated order {order_id}"),
        }
    }

    async fn balance(&self) -> Result<Decimal> {
        Ok(self.lock().balance)
    }

    async fn positions(&self) -> Result<Vec<ExchangePosition>> {
        let mut out: Vec<ExchangePosition> = self
            .lock()
            .holdings
            .iter()
            .map(|(id, qty)| ExchangePosition {
                market_id: id.clone(),
                quantity: *qty,
                avg_price_cents: None,
            })
            .collect();
        out.sort_by(|a, b| a.market_id.cmp(&b.market_id));
        Ok(out)
    }

    async fn collect_settlement(&self, position: &Position, spot: Decimal) -> Result<Option<u32>> {
        let below = spot < position.strike;
        let won = match position.side {
            Side::No => below,
            Side::Yes => !below,
        };
        let price_cents: u32 = if won { 100 } else { 0 };

        let mut state = self.lock();
        let held = state.holdings.remove(&position.market_id).unwrap_or(0);
        let contracts = held.min(i64::from(position.quantity)).max(0);
        let payout = Decimal::from(contracts) * Decimal::from(price_cents) / dec!(100);
        state.balance += payout;

        info!(
            market_id = %position.market_id,
            spot = %spot,
            strike = %position.strike,
            won,
            payout = format!("${:.2}", payout),
            "Simulated settlement"
        );
        Ok(Some(price_cents))
    }
}
