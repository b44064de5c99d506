//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the exchange API token) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.
//!
//! Every option has a default except `engine.mode`: the operator must say
//! `dry-run` or `live` explicitly.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::types::{EngineError, Mode};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Required. There is deliberately no default.
    pub mode: Mode,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_cutoff")]
    pub trading_cutoff_minutes: i64,
    #[serde(default = "default_series")]
    pub series_prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrategyConfig {
    pub min_edge_pct: Decimal,
    pub exit_edge_pct: Decimal,
    pub max_slippage_cents: u32,
    pub fee_rate: Decimal,
    pub edge_increase_pct: Decimal,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_edge_pct: dec!(10),
            exit_edge_pct: dec!(1),
            max_slippage_cents: 5,
            fee_rate: dec!(0.07),
            edge_increase_pct: dec!(5),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    pub kelly_fraction: Decimal,
    pub max_contracts: u32,
    pub max_exposure_fraction: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: dec!(0.25),
            max_contracts: 10,
            max_exposure_fraction: dec!(0.50),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutionConfig {
    pub order_timeout_secs: u64,
    pub poll_interval_secs: u64,
    /// Cancel-and-verify rounds before an order is declared unresolved.
    pub cancel_attempts: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_timeout_secs: 30,
            poll_interval_secs: 2,
            cancel_attempts: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DryRunConfig {
    pub starting_balance: Decimal,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            starting_balance: dec!(200),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding per-mode position stores and trade journals.
    pub dir: String,
    pub journal_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: "state".to_string(),
            journal_enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elections.kalshi.com/trade-api/v2".to_string(),
            api_key_env: "KALSHI_API_TOKEN".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub spot_url: String,
    pub spot_min: Decimal,
    pub spot_max: Decimal,
    pub min_vol_samples: usize,
    pub vol_window_minutes: i64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            spot_url: "https://api.coinbase.com/v2/prices/BTC-USD/spot".to_string(),
            spot_min: dec!(10000),
            spot_max: dec!(500000),
            min_vol_samples: 10,
            vol_window_minutes: 60,
        }
    }
}

fn default_refresh_interval() -> u64 {
    10
}

fn default_cutoff() -> i64 {
    15
}

fn default_series() -> String {
    "KXBTCD".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make sizing or gating meaningless.
    pub fn validate(&self) -> Result<(), EngineError> {
        let r = &self.risk;
        if r.kelly_fraction <= Decimal::ZERO || r.kelly_fraction > Decimal::ONE {
            return Err(EngineError::Config(format!(
                "kelly_fraction must be in (0, 1], got {}",
                r.kelly_fraction
            )));
        }
        if r.max_exposure_fraction < Decimal::ZERO || r.max_exposure_fraction > Decimal::ONE {
            return Err(EngineError::Config(format!(
                "max_exposure_fraction must be in [0, 1], got {}",
                r.max_exposure_fraction
            )));
        }
        if self.strategy.exit_edge_pct >= self.strategy.min_edge_pct {
            return Err(EngineError::Config(
                "exit_edge_pct must be below min_edge_pct".to_string(),
            ));
        }
        if self.execution.poll_interval_secs == 0 {
            return Err(EngineError::Config(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.execution.cancel_attempts == 0 {
            return Err(EngineError::Config(
                "cancel_attempts must be at least 1".to_string(),
            ));
        }
        if self.dry_run.starting_balance <= Decimal::ZERO {
            return Err(EngineError::Config(
                "dry_run.starting_balance must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Exchange API token, wrapped so it never lands in logs.
    pub fn exchange_token(&self) -> Result<SecretString> {
        Self::resolve_env(&self.exchange.api_key_env).map(SecretString::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = AppConfig::parse("[engine]\nmode = \"dry-run\"\n").unwrap();
        assert_eq!(cfg.engine.mode, Mode::DryRun);
        assert_eq!(cfg.engine.refresh_interval_secs, 10);
        assert_eq!(cfg.engine.trading_cutoff_minutes, 15);
        assert_eq!(cfg.strategy.min_edge_pct, dec!(10));
        assert_eq!(cfg.strategy.exit_edge_pct, dec!(1));
        assert_eq!(cfg.strategy.max_slippage_cents, 5);
        assert_eq!(cfg.risk.kelly_fraction, dec!(0.25));
        assert_eq!(cfg.risk.max_contracts, 10);
        assert_eq!(cfg.risk.max_exposure_fraction, dec!(0.50));
        assert_eq!(cfg.execution.order_timeout_secs, 30);
        assert_eq!(cfg.execution.cancel_attempts, 3);
        assert_eq!(cfg.dry_run.starting_balance, dec!(200));
    }

    #[test]
    fn test_mode_is_required() {
        let err = AppConfig::parse("[engine]\nrefresh_interval_secs = 5\n");
        assert!(err.is_err());
        assert!(AppConfig::parse("").is_err());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(AppConfig::parse("[engine]\nmode = \"paper\"\n").is_err());
    }

    #[test]
    fn test_live_mode_parses() {
        let cfg = AppConfig::parse(
            "[engine]\nmode = \"live\"\n[risk]\nmax_contracts = 4\n",
        )
        .unwrap();
        assert!(cfg.engine.mode.is_live());
        assert_eq!(cfg.risk.max_contracts, 4);
        // untouched fields in a partially specified section keep defaults
        assert_eq!(cfg.risk.kelly_fraction, dec!(0.25));
    }

    #[test]
    fn test_zero_cancel_attempts_rejected() {
        let err = AppConfig::parse("[engine]\nmode = \"live\"\n[execution]\ncancel_attempts = 0\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_invalid_kelly_rejected() {
        let err = AppConfig::parse("[engine]\nmode = \"live\"\n[risk]\nkelly_fraction = 1.5\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_exit_must_be_below_entry() {
        let err = AppConfig::parse(
            "[engine]\nmode = \"dry-run\"\n[strategy]\nmin_edge_pct = 5\nexit_edge_pct = 6\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(AppConfig::load("/nonexistent/strike.toml").is_err());
    }
}
