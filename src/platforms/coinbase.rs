//! Coinbase public spot price.
//!
//! No auth. Response shape: `{"data": {"amount": "97123.45", ...}}`.

use anyhow::{Context, Result};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::debug;

use crate::types::EngineError;

const SOURCE: &str = "coinbase";

#[derive(Debug, Deserialize)]
struct SpotResponse {
    data: SpotData,
}

#[derive(Debug, Deserialize)]
struct SpotData {
    amount: String,
}

pub struct CoinbaseSpot {
    http: Client,
    url: String,
    min: Decimal,
    max: Decimal,
}

impl CoinbaseSpot {
    /// `min`/`max` bound what is accepted as a sane spot price.
    pub fn new(url: impl Into<String>, min: Decimal, max: Decimal) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client for Coinbase")?;
        Ok(Self {
            http,
            url: url.into(),
            min,
            max,
        })
    }

    /// Fetch the current spot price. Out-of-range values are data errors.
    pub async fn fetch(&self) -> Result<Decimal, EngineError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| EngineError::data(SOURCE, e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EngineError::data(SOURCE, format!("HTTP {}", resp.status())));
        }
        let body: SpotResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::data(SOURCE, format!("bad response: {e}")))?;
        let price = parse_amount(&body.data.amount)?;
        check_range(price, self.min, self.max)?;
        debug!(spot = %price, "Spot price fetched");
        Ok(price)
    }
}

fn parse_amount(raw: &str) -> Result<Decimal, EngineError> {
    Decimal::from_str(raw.trim())
        .map_err(|e| EngineError::data(SOURCE, format!("unparseable amount '{raw}': {e}")))
}

/// Reject prices outside `[min, max]`.
pub fn check_range(price: Decimal, min: Decimal, max: Decimal) -> Result<(), EngineError> {
    if price < min || price > max {
        return Err(EngineError::data(
            SOURCE,
            format!("spot {price} outside sanity range [{min}, {max}]"),
        ));
    }
    Ok(())
}
