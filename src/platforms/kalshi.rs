//! Kalshi exchange integration (trade API v2).
//!
//! Live venue: order routing, order status polling, cancellation, balance
//! and position queries, plus listing the open markets of a series.
//!
//! Auth: `Authorization: Bearer {token}`, token read from the environment
//! variable named in `[exchange].api_key_env`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::ExchangeClient;
use crate::config::ExchangeConfig;
use crate::types::{
    ExchangePosition, Market, OrderAck, OrderAction, OrderRequest, OrderState, OrderStatus,
    Position, Quote, Side,
};

// ---------------------------------------------------------------------------
// API types (Kalshi JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    #[serde(default)]
    markets: Vec<KalshiMarket>,
}

#[derive(Debug, Deserialize)]
struct MarketResponse {
    market: KalshiMarket,
}

/// Only the fields the engine reads. Prices are integer cents.
#[derive(Debug, Deserialize)]
struct KalshiMarket {
    ticker: String,
    #[serde(default)]
    floor_strike: Option<f64>,
    #[serde(default)]
    close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    yes_bid: u32,
    #[serde(default)]
    yes_ask: u32,
    #[serde(default)]
    no_bid: u32,
    #[serde(default)]
    no_ask: u32,
    /// "yes" / "no" once determined, empty before.
    #[serde(default)]
    result: String,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    ticker: &'a str,
    client_order_id: String,
    action: &'static str,
    side: &'static str,
    count: u32,
    #[serde(rename = "type")]
    order_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    yes_price: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_price: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    order: KalshiOrder,
}

#[derive(Debug, Deserialize)]
struct KalshiOrder {
    order_id: String,
    #[serde(default)]
    status: String,
    /// Contracts executed so far.
    #[serde(default)]
    fill_count: u32,
    #[serde(default)]
    remaining_count: u32,
}

impl KalshiOrder {
    /// Status plus executed quantity. A canceled order may carry fills.
    fn state(&self) -> OrderState {
        let state = OrderState::partial(parse_status(&self.status), self.fill_count);
        if state.is_partial_fill() {
            warn!(
                order_id = %self.order_id,
                status = %self.status,
                filled = self.fill_count,
                remaining = self.remaining_count,
                "Kalshi order ended with a partial fill"
            );
        }
        state
    }
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    /// Cents.
    balance: i64,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(default)]
    market_positions: Vec<KalshiPosition>,
}

#[derive(Debug, Deserialize)]
struct KalshiPosition {
    ticker: String,
    #[serde(default)]
    position: i64,
    /// Cents paid for the open contracts.
    #[serde(default)]
    market_exposure: i64,
}

impl KalshiPosition {
    fn into_exchange(self) -> ExchangePosition {
        let avg_price_cents = (self.position != 0)
            .then(|| Decimal::from(self.market_exposure) / Decimal::from(self.position.unsigned_abs()));
        ExchangePosition {
            market_id: self.ticker,
            quantity: self.position,
            avg_price_cents,
        }
    }
}

/// Map a Kalshi order status string. Unknown states are treated as still
/// working so the lifecycle manager keeps polling and eventually cancels.
pub fn parse_status(raw: &str) -> OrderStatus {
    match raw.to_lowercase().as_str() {
        "filled" | "executed" => OrderStatus::Filled,
        "resting" | "pending" => OrderStatus::Resting,
        "canceled" | "cancelled" => OrderStatus::Cancelled,
        "rejected" | "failed" => OrderStatus::Failed,
        other => {
            warn!(status = other, "Unknown Kalshi order status, treating as resting");
            OrderStatus::Resting
        }
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Yes => "yes",
        Side::No => "no",
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct KalshiClient {
    http: Client,
    base_url: String,
    token: SecretString,
}

impl KalshiClient {
    pub fn new(config: &ExchangeConfig, token: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("STRIKE/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for Kalshi")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    // -- Internal helpers ------------------------------------------------

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<T> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Kalshi {what} error {status}: {body}");
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to parse Kalshi {what} response"))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "Kalshi GET");
        let mut req = self.http.get(&url).header("Accept", "application/json");
        // market listings are public; dry-run may have no token
        if !self.token.expose_secret().is_empty() {
            req = req.bearer_auth(self.token.expose_secret());
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("Kalshi {what} request failed"))?;
        Self::check(resp, what).await
    }

    fn to_market(m: KalshiMarket) -> Option<Market> {
        let strike = Decimal::from_f64(m.floor_strike?)?.round_dp(2);
        let market = Market {
            id: m.ticker,
            strike,
            expires_at: m.close_time?,
            yes: Quote::new(m.yes_bid, m.yes_ask),
            no: Quote::new(m.no_bid, m.no_ask),
        };
        Some(market)
    }

    /// Open markets of a series, sorted by strike.
    pub async fn list_markets(&self, series_prefix: &str) -> Result<Vec<Market>> {
        let path = format!(
            "/markets?series_ticker={}&status=open&limit=200",
            urlencoding::encode(series_prefix)
        );
        let resp: MarketsResponse = self.get(&path, "markets").await?;
        let total = resp.markets.len();

        let mut markets: Vec<Market> = resp
            .markets
            .into_iter()
            .filter_map(|m| {
                let ticker = m.ticker.clone();
                let parsed = Self::to_market(m);
                if parsed.is_none() {
                    debug!(ticker = %ticker, "Skipping market without strike or close time");
                }
                parsed
            })
            .collect();
        markets.sort_by(|a, b| a.strike.cmp(&b.strike));

        debug!(series = series_prefix, total, usable = markets.len(), "Kalshi markets fetched");
        Ok(markets)
    }
}

// ---------------------------------------------------------------------------
// ExchangeClient trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ExchangeClient for KalshiClient {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        let (yes_price, no_price) = match request.side {
            Side::Yes => (Some(request.price_cents), None),
            Side::No => (None, Some(request.price_cents)),
        };
        let body = CreateOrderBody {
            ticker: &request.market_id,
            client_order_id: uuid::Uuid::new_v4().to_string(),
            action: match request.action {
                OrderAction::Buy => "buy",
                OrderAction::Sell => "sell",
            },
            side: side_str(request.side),
            count: request.quantity,
            order_type: "limit",
            yes_price,
            no_price,
        };

        let resp = self
            .http
            .post(self.url("/portfolio/orders"))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Kalshi order submission failed")?;
        let envelope: OrderEnvelope = Self::check(resp, "order").await?;

        let ack = OrderAck {
            status: parse_status(&envelope.order.status),
            order_id: envelope.order.order_id,
        };
        info!(
            order_id = %ack.order_id,
            market_id = %request.market_id,
            status = %ack.status,
            "Kalshi order submitted"
        );
        Ok(ack)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderState> {
        let path = format!("/portfolio/orders/{}", urlencoding::encode(order_id));
        let envelope: OrderEnvelope = self.get(&path, "order status").await?;
        Ok(envelope.order.state())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let url = self.url(&format!("/portfolio/orders/{}", urlencoding::encode(order_id)));
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .context("Kalshi cancel request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Kalshi cancel error {status}: {body}");
        }
        Ok(())
    }

    async fn balance(&self) -> Result<Decimal> {
        let resp: BalanceResponse = self.get("/portfolio/balance", "balance").await?;
        Ok(Decimal::from(resp.balance) / Decimal::ONE_HUNDRED)
    }

    async fn positions(&self) -> Result<Vec<ExchangePosition>> {
        let resp: PositionsResponse = self.get("/portfolio/positions", "positions").await?;
        Ok(resp
            .market_positions
            .into_iter()
            .map(KalshiPosition::into_exchange)
            .collect())
    }

    async fn collect_settlement(&self, position: &Position, _spot: Decimal) -> Result<Option<u32>> {
        let path = format!("/markets/{}", urlencoding::encode(&position.market_id));
        let resp: MarketResponse = self.get(&path, "market").await?;
        let result = resp.market.result.to_lowercase();
        if result.is_empty() {
            return Ok(None);
        }
        let won = result == side_str(position.side);
        Ok(Some(if won { 100 } else { 0 }))
    }
}
