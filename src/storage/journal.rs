//! SQLite trade journal.
//!
//! Append-only record of every order that reached a terminal state, one
//! database file per mode. Money columns are stored as decimal text so the
//! journal reads back exactly what was written.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use crate::types::{Mode, Order, OrderAction, OrderStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id   TEXT NOT NULL,
    mode         TEXT NOT NULL,
    recorded_at  TEXT NOT NULL,
    order_id     TEXT,
    market_id    TEXT NOT NULL,
    side         TEXT NOT NULL,
    action       TEXT NOT NULL,
    trade        TEXT NOT NULL,
    quantity     INTEGER NOT NULL,
    price_cents  INTEGER NOT NULL,
    status       TEXT NOT NULL,
    edge_pct     TEXT NOT NULL,
    realized_pnl TEXT,
    note         TEXT
)
"#;

/// Aggregates over the current session's journal rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub orders: u32,
    pub filled: u32,
    pub cancelled: u32,
    pub failed: u32,
    pub contracts_traded: u64,
    /// Dollars paid on filled buys.
    pub cost: Decimal,
    /// Closing trades with positive realized P&L.
    pub wins: u32,
    pub losses: u32,
    pub realized_pnl: Decimal,
}

pub struct TradeJournal {
    pool: SqlitePool,
    mode: Mode,
    session_id: String,
}

impl TradeJournal {
    /// Open (or create) `<dir>/trades-<namespace>.db`.
    pub async fn open(dir: impl AsRef<Path>, mode: Mode) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(format!("trades-{}.db", mode.namespace()));

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open journal {}", path.display()))?;

        let journal = Self::with_pool(pool, mode).await?;
        info!(path = %path.display(), session = %journal.session_id, "Trade journal opened");
        Ok(journal)
    }

    /// Volatile journal, used by tests.
    pub async fn in_memory(mode: Mode) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory journal")?;
        Self::with_pool(pool, mode).await
    }

    async fn with_pool(pool: SqlitePool, mode: Mode) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .context("Failed to create journal schema")?;
        Ok(Self {
            pool,
            mode,
            session_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append a terminal order. `realized_pnl` is set for closing trades.
    pub async fn record(&self, order: &Order, realized_pnl: Option<Decimal>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades
                (session_id, mode, recorded_at, order_id, market_id, side, action,
                 trade, quantity, price_cents, status, edge_pct, realized_pnl, note)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&self.session_id)
        .bind(self.mode.namespace())
        .bind(order.resolved_at.unwrap_or_else(Utc::now).to_rfc3339())
        .bind(order.id.as_deref())
        .bind(&order.market_id)
        .bind(order.side.to_string())
        .bind(order.action.to_string())
        .bind(order.trade.to_string())
        .bind(i64::from(order.quantity))
        .bind(i64::from(order.price_cents))
        .bind(order.status.to_string())
        .bind(order.edge_pct.to_string())
        .bind(realized_pnl.map(|p| p.to_string()))
        .bind(order.note.as_deref())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to journal order for {}", order.market_id))?;
        Ok(())
    }

    /// Totals for rows written by this journal instance.
    pub async fn session_stats(&self) -> Result<SessionStats> {
        let rows = sqlx::query(
            "SELECT status, action, quantity, price_cents, realized_pnl FROM trades WHERE session_id = ?1",
        )
        .bind(&self.session_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read journal")?;

        let mut stats = SessionStats::default();
        let filled = OrderStatus::Filled.to_string();
        let cancelled = OrderStatus::Cancelled.to_string();
        let failed = OrderStatus::Failed.to_string();
        let buy = OrderAction::Buy.to_string();

        for row in rows {
            let status: String = row.try_get("status")?;
            let action: String = row.try_get("action")?;
            let quantity: i64 = row.try_get("quantity")?;
            let price_cents: i64 = row.try_get("price_cents")?;
            let pnl: Option<String> = row.try_get("realized_pnl")?;

            stats.orders += 1;
            if status == filled {
                stats.filled += 1;
                stats.contracts_traded += quantity.max(0) as u64;
                if action == buy {
                    stats.cost += Decimal::from(quantity) * Decimal::from(price_cents) / dec!(100);
                }
            } else if status == cancelled {
                stats.cancelled += 1;
            } else if status == failed {
                stats.failed += 1;
            }

            if let Some(raw) = pnl {
                match Decimal::from_str(&raw) {
                    Ok(v) => {
                        stats.realized_pnl += v;
                        if v > Decimal::ZERO {
                            stats.wins += 1;
                        } else if v < Decimal::ZERO {
                            stats.losses += 1;
                        }
                    }
                    Err(e) => warn!(value = %raw, error = %e, "Unparseable P&L in journal"),
                }
            }
        }
        Ok(stats)
    }
}
