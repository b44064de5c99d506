//! Venue integrations.
//!
//! Defines the `ExchangeClient` trait and provides implementations for:
//! - Kalshi (REST v2): live order routing, balance and positions
//! - Coinbase: public spot price for the settlement asset
//! - Simulated: in-process venue backing dry-run mode

pub mod coinbase;
pub mod kalshi;
pub mod simulated;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{ExchangePosition, OrderAck, OrderRequest, OrderState, Position};

/// Order routing and account queries against a venue.
///
/// The engine holds exactly one implementation per session, chosen by mode:
/// the simulated venue in dry-run, the real exchange in live.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit a limit order. The ack carries the venue's order id and its
    /// initial status.
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck>;

    /// Current state of a previously submitted order, including any
    /// contracts already executed.
    async fn order_status(&self, order_id: &str) -> Result<OrderState>;

    /// Cancel a resting order.
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Available cash balance in dollars.
    async fn balance(&self) -> Result<Decimal>;

    /// Open positions as the venue sees them.
    async fn positions(&self) -> Result<Vec<ExchangePosition>>;

    /// Settlement price (cents, for the position's side) of an expired
    /// position, or `None` while the market has not determined yet.
    /// `spot` is the latest reference price, used by venues that settle
    /// locally.
    async fn collect_settlement(&self, position: &Position, spot: Decimal) -> Result<Option<u32>>;
}
