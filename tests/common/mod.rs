//! Scripted venue and feed for integration testing.
//!
//! Deterministic `ExchangeClient` and `MarketDataFeed` implementations
//! whose fills, balances and inputs are fully controllable from test code.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use strike::config::AppConfig;
use strike::data::{MarketDataFeed, VolatilitySample};
use strike::engine::clock::ManualClock;
use strike::engine::Venue;
use strike::platforms::ExchangeClient;
use strike::storage::PositionStore;
use strike::types::*;

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// How the scripted exchange treats submitted orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillBehavior {
    /// Filled on submission.
    Immediate,
    /// Rests until cancelled.
    NeverFills,
    /// Rests, then the fill lands just before the cancel does.
    FillsDuringCancel,
    /// Rejected on submission.
    Rejects,
    /// Rests; cancels are refused and the order keeps resting.
    CancelRefused,
    /// Rests; the cancel lands after this many contracts executed.
    PartialFill(u32),
}

pub struct ScriptedExchange {
    behavior: Mutex<FillBehavior>,
    /// `None` makes balance requests fail.
    balance: Mutex<Option<Decimal>>,
    orders: Mutex<HashMap<String, OrderState>>,
    submitted: Mutex<Vec<OrderRequest>>,
    positions: Mutex<Vec<ExchangePosition>>,
    settlement: Mutex<Option<u32>>,
    cancels: AtomicU32,
    next_id: AtomicU32,
}

impl ScriptedExchange {
    pub fn new(behavior: FillBehavior, balance: Decimal) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            balance: Mutex::new(Some(balance)),
            orders: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            positions: Mutex::new(Vec::new()),
            settlement: Mutex::new(None),
            cancels: AtomicU32::new(0),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn set_behavior(&self, behavior: FillBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_balance(&self, balance: Option<Decimal>) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn set_positions(&self, positions: Vec<ExchangePosition>) {
        *self.positions.lock().unwrap() = positions;
    }

    pub fn set_settlement(&self, price_cents: Option<u32>) {
        *self.settlement.lock().unwrap() = price_cents;
    }

    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> u32 {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeClient for ScriptedExchange {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        self.submitted.lock().unwrap().push(request.clone());
        let status = match *self.behavior.lock().unwrap() {
            FillBehavior::Immediate => OrderStatus::Filled,
            FillBehavior::Rejects => OrderStatus::Failed,
            _ => OrderStatus::Resting,
        };
        let order_id = format!("SCRIPT-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.orders.lock().unwrap().insert(order_id.clone(), status.into());
        Ok(OrderAck { order_id, status })
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderState> {
        self.orders
            .lock()
            .unwrap()
            .get(order_id)
            .copied()
            .ok_or_else(|| anyhow!("unknown order {order_id}"))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        let landed = match *self.behavior.lock().unwrap() {
            FillBehavior::CancelRefused => return Err(anyhow!("cancel refused")),
            FillBehavior::FillsDuringCancel => OrderStatus::Filled.into(),
            FillBehavior::PartialFill(n) => OrderState::partial(OrderStatus::Cancelled, n),
            _ => OrderStatus::Cancelled.into(),
        };
        if let Some(state) = self.orders.lock().unwrap().get_mut(order_id) {
            if !state.status.is_terminal() {
                *state = landed;
            }
        }
        Ok(())
    }

    async fn balance(&self) -> Result<Decimal> {
        (*self.balance.lock().unwrap()).ok_or_else(|| anyhow!("balance endpoint down"))
    }

    async fn positions(&self) -> Result<Vec<ExchangePosition>> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn collect_settlement(&self, _position: &Position, _spot: Decimal) -> Result<Option<u32>> {
        Ok(*self.settlement.lock().unwrap())
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

pub struct ScriptedFeed {
    /// `None` makes spot requests fail.
    spot: Mutex<Option<Decimal>>,
    vol: Mutex<VolatilitySample>,
    markets: Mutex<Vec<Market>>,
}

impl ScriptedFeed {
    pub fn new(spot: Decimal, markets: Vec<Market>) -> Self {
        Self {
            spot: Mutex::new(Some(spot)),
            vol: Mutex::new(VolatilitySample {
                std_pct: dec!(0.2),
                samples: 30,
            }),
            markets: Mutex::new(markets),
        }
    }

    pub fn set_spot(&self, spot: Option<Decimal>) {
        *self.spot.lock().unwrap() = spot;
    }

    pub fn set_vol_samples(&self, samples: usize) {
        self.vol.lock().unwrap().samples = samples;
    }

    pub fn set_markets(&self, markets: Vec<Market>) {
        *self.markets.lock().unwrap() = markets;
    }
}

#[async_trait]
impl MarketDataFeed for ScriptedFeed {
    async fn spot_price(&self) -> Result<Decimal> {
        (*self.spot.lock().unwrap()).ok_or_else(|| anyhow!("spot feed down"))
    }

    async fn volatility(&self) -> Result<VolatilitySample> {
        Ok(*self.vol.lock().unwrap())
    }

    async fn markets(&self) -> Result<Vec<Market>> {
        Ok(self.markets.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn spot() -> Decimal {
    dec!(100000)
}

/// Fixed start time so expiries are reproducible.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()
}

pub fn config(mode: Mode) -> AppConfig {
    config_with(mode, "")
}

/// Defaults plus extra TOML appended after the `[engine]` table.
pub fn config_with(mode: Mode, extra: &str) -> AppConfig {
    let text = format!("[engine]\nmode = \"{}\"\n{extra}", mode.namespace());
    AppConfig::parse(&text).unwrap()
}

/// NO-side market; the YES quote mirrors it.
pub fn market(id: &str, strike: Decimal, minutes_left: i64, no_bid: u32, no_ask: u32) -> Market {
    Market {
        id: id.to_string(),
        strike,
        expires_at: t0() + Duration::minutes(minutes_left),
        yes: Quote::new(100 - no_ask, 100 - no_bid),
        no: Quote::new(no_bid, no_ask),
    }
}

pub fn held(id: &str, strike: Decimal, quantity: u32, avg_cents: u32, expires_at: DateTime<Utc>, mode: Mode) -> Position {
    Position {
        market_id: id.to_string(),
        side: Side::No,
        quantity,
        avg_price_cents: Decimal::from(avg_cents),
        cost_basis: Decimal::from(quantity) * Decimal::from(avg_cents) / dec!(100),
        strike,
        expires_at,
        last_entry_edge_pct: dec!(12),
        opened_at: t0() - Duration::minutes(20),
        mode,
    }
}

pub fn venue(
    mode: Mode,
    exchange: Arc<dyn ExchangeClient>,
    feed: Arc<dyn MarketDataFeed>,
    store: Arc<dyn PositionStore>,
    clock: Arc<ManualClock>,
) -> Venue {
    Venue {
        mode,
        exchange,
        feed,
        store,
        journal: None,
        clock,
    }
}

pub fn temp_dir() -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("strike_it_{}", uuid::Uuid::new_v4()));
    p
}
