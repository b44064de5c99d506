//! Shared types for the STRIKE engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that platform, strategy,
//! engine and storage modules can depend on them without circular
//! references.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Operating mode
// ---------------------------------------------------------------------------

/// Capital mode. Tagged on every position, bankroll and store at creation
/// and never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Simulated fills, simulated bankroll, isolated storage.
    DryRun,
    /// Verified exchange fills, real balance, reconciliation on startup.
    Live,
}

impl Mode {
    /// Storage namespace for this mode. Stores of different modes never
    /// share a namespace.
    pub fn namespace(&self) -> &'static str {
        match self {
            Mode::DryRun => "dry-run",
            Mode::Live => "live",
        }
    }

    pub fn is_live(&self) -> bool {
        *self == Mode::Live
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::DryRun => write!(f, "DRY-RUN"),
            Mode::Live => write!(f, "LIVE"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dry-run" | "dryrun" | "dry_run" => Ok(Mode::DryRun),
            "live" => Ok(Mode::Live),
            _ => Err(anyhow::anyhow!("Unknown mode: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Contract side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

/// Whether an order buys or sells contracts of its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderAction {
    Buy,
    Sell,
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderAction::Buy => write!(f, "buy"),
            OrderAction::Sell => write!(f, "sell"),
        }
    }
}

/// What a trade does to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Open,
    Add,
    Liquidate,
    Settle,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Open => write!(f, "open"),
            TradeAction::Add => write!(f, "add"),
            TradeAction::Liquidate => write!(f, "liquidate"),
            TradeAction::Settle => write!(f, "settle"),
        }
    }
}

/// Order state. `Filled`, `Cancelled` and `Failed` are terminal; an order
/// still `Submitted` or `Resting` may fill at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Submitted,
    Resting,
    Filled,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Submitted => write!(f, "submitted"),
            OrderStatus::Resting => write!(f, "resting"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
            OrderStatus::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// Top-of-book quote for one side of a binary market, in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quote {
    pub bid_cents: u32,
    pub ask_cents: u32,
}

impl Quote {
    pub fn new(bid_cents: u32, ask_cents: u32) -> Self {
        Self {
            bid_cents,
            ask_cents,
        }
    }

    /// Bid-ask spread in cents. Zero for a crossed book.
    pub fn spread_cents(&self) -> u32 {
        self.ask_cents.saturating_sub(self.bid_cents)
    }

    /// Whether the ask can be bought at all (strictly inside 0–100¢).
    pub fn has_tradable_ask(&self) -> bool {
        self.ask_cents > 0 && self.ask_cents < 100
    }
}

/// A binary settlement contract tied to an asset price at a fixed time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    /// Settlement threshold (asset price).
    pub strike: Decimal,
    /// Settlement time. Fixed for the cycle the market was loaded in.
    pub expires_at: DateTime<Utc>,
    pub yes: Quote,
    pub no: Quote,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} strike={} (YES {}/{}¢ | NO {}/{}¢) expires {}",
            self.id,
            self.strike,
            self.yes.bid_cents,
            self.yes.ask_cents,
            self.no.bid_cents,
            self.no.ask_cents,
            self.expires_at.format("%H:%M UTC"),
        )
    }
}

impl Market {
    /// Quote for the given side.
    pub fn quote(&self, side: Side) -> Quote {
        match side {
            Side::Yes => self.yes,
            Side::No => self.no,
        }
    }

    /// Bid never above ask on either side.
    pub fn is_well_formed(&self) -> bool {
        self.yes.bid_cents <= self.yes.ask_cents && self.no.bid_cents <= self.no.ask_cents
    }

    /// Time left until settlement. Errors when the market has already
    /// expired; callers must treat an error as "expired".
    pub fn time_to_settlement(&self, now: DateTime<Utc>) -> Result<Duration, EngineError> {
        time_to_settlement(&self.id, self.expires_at, now)
    }
}

/// Remaining time before `expires_at`, or an expiry error.
pub fn time_to_settlement(
    market_id: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Duration, EngineError> {
    let remaining = expires_at.signed_duration_since(now);
    if remaining <= Duration::zero() {
        return Err(EngineError::Expiry {
            market_id: market_id.to_string(),
            reason: format!("expired at {expires_at}"),
        });
    }
    Ok(remaining)
}

/// Probability in [0, 1] that a side settles in the money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairValueEstimate {
    pub probability: Decimal,
}

impl FairValueEstimate {
    /// Returns `None` for probabilities outside [0, 1].
    pub fn new(probability: Decimal) -> Option<Self> {
        if probability < Decimal::ZERO || probability > Decimal::ONE {
            return None;
        }
        Some(Self { probability })
    }

    /// Fair value of the opposite side.
    pub fn complement(&self) -> Self {
        Self {
            probability: Decimal::ONE - self.probability,
        }
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// What is sent to a venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market_id: String,
    pub side: Side,
    pub action: OrderAction,
    pub quantity: u32,
    pub price_cents: u32,
}

impl OrderRequest {
    /// Dollar notional at the limit price.
    pub fn notional(&self) -> Decimal {
        Decimal::from(self.quantity) * Decimal::from(self.price_cents) / dec!(100)
    }
}

/// Venue acknowledgement of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
}

/// An order as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderState {
    pub status: OrderStatus,
    /// Contracts executed so far. Venues that only report whole-order
    /// fills leave this at zero.
    pub filled_quantity: u32,
}

impl OrderState {
    pub fn partial(status: OrderStatus, filled_quantity: u32) -> Self {
        Self {
            status,
            filled_quantity,
        }
    }

    /// Terminal without a full fill, but with contracts executed.
    pub fn is_partial_fill(&self) -> bool {
        self.status.is_terminal() && self.status != OrderStatus::Filled && self.filled_quantity > 0
    }
}

impl From<OrderStatus> for OrderState {
    fn from(status: OrderStatus) -> Self {
        Self {
            status,
            filled_quantity: 0,
        }
    }
}

/// An order tracked by the order lifecycle manager until terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Assigned by the venue on submission.
    pub id: Option<String>,
    pub market_id: String,
    pub side: Side,
    pub action: OrderAction,
    pub trade: TradeAction,
    pub quantity: u32,
    pub price_cents: u32,
    pub status: OrderStatus,
    pub submitted_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Net edge (percentage points) at decision time.
    pub edge_pct: Decimal,
    /// Failure or cancellation detail.
    pub note: Option<String>,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} x{} @ {}¢ ({}) [{}]",
            self.trade,
            self.action,
            self.side,
            self.market_id,
            self.quantity,
            self.price_cents,
            self.status,
            self.id.as_deref().unwrap_or("-"),
        )
    }
}

impl Order {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    pub fn notional(&self) -> Decimal {
        Decimal::from(self.quantity) * Decimal::from(self.price_cents) / dec!(100)
    }
}

// ---------------------------------------------------------------------------
// Positions & bankroll
// ---------------------------------------------------------------------------

/// An open position held in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub market_id: String,
    pub side: Side,
    pub quantity: u32,
    /// Quantity-weighted average entry price in cents.
    pub avg_price_cents: Decimal,
    /// Dollars paid for the open quantity.
    pub cost_basis: Decimal,
    pub strike: Decimal,
    pub expires_at: DateTime<Utc>,
    /// Net edge (percentage points) at the most recent entry.
    pub last_entry_edge_pct: Decimal,
    pub opened_at: DateTime<Utc>,
    pub mode: Mode,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} x{} @ {:.1}¢ cost=${:.2} edge@entry={:.1}%",
            self.mode,
            self.side,
            self.market_id,
            self.quantity,
            self.avg_price_cents,
            self.cost_basis,
            self.last_entry_edge_pct,
        )
    }
}

impl Position {
    /// Dollar value if the position were sold at `bid_cents`.
    pub fn mark_value(&self, bid_cents: u32) -> Decimal {
        Decimal::from(self.quantity) * Decimal::from(bid_cents) / dec!(100)
    }

    pub fn time_to_settlement(&self, now: DateTime<Utc>) -> Result<Duration, EngineError> {
        time_to_settlement(&self.market_id, self.expires_at, now)
    }
}

/// A position as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub market_id: String,
    /// Signed contract count (positive = long the reported side).
    pub quantity: i64,
    /// Average entry price in cents, when the venue reports one.
    pub avg_price_cents: Option<Decimal>,
}

/// Capital available for sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bankroll {
    pub mode: Mode,
    pub capital: Decimal,
    /// Last successful refresh, `None` until the first one.
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Bankroll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ${:.2}", self.mode, self.capital)
    }
}

impl Bankroll {
    pub fn new(mode: Mode, capital: Decimal) -> Self {
        Self {
            mode,
            capital,
            refreshed_at: None,
        }
    }

    /// Replace capital with a freshly fetched balance.
    pub fn refresh(&mut self, capital: Decimal, at: DateTime<Utc>) {
        self.capital = capital;
        self.refreshed_at = Some(at);
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for STRIKE.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Data unavailable ({source_name}): {message}")]
    DataUnavailable {
        source_name: String,
        message: String,
    },

    #[error("Balance unavailable: {0}")]
    BalanceUnavailable(String),

    #[error("Mode mismatch: expected {expected}, found {found}")]
    ModeMismatch { expected: Mode, found: Mode },

    #[error("Expiry evaluation failed for {market_id}: {reason}")]
    Expiry { market_id: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn data(source_name: &str, message: impl Into<String>) -> Self {
        EngineError::DataUnavailable {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
