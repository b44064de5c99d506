//! Startup reconciliation of the ledger against the exchange.
//!
//! Informational only: discrepancies are logged as warnings and the ledger
//! is never touched. Running it twice against unchanged state yields the
//! same report.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{info, warn};

use super::ledger::PositionLedger;
use crate::platforms::ExchangeClient;
use crate::types::{ExchangePosition, Position};

/// Ledger vs exchange diff, keyed by market id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Held in the ledger, absent at the exchange (possibly settled).
    pub ledger_only: BTreeSet<String>,
    /// Held at the exchange, absent from the ledger (possibly out-of-band).
    pub exchange_only: BTreeSet<String>,
    /// Present in both with different contract counts: (ledger, exchange).
    pub quantity_mismatches: BTreeMap<String, (u32, u64)>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.ledger_only.is_empty()
            && self.exchange_only.is_empty()
            && self.quantity_mismatches.is_empty()
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ledger-only={} exchange-only={} qty-mismatch={}",
            self.ledger_only.len(),
            self.exchange_only.len(),
            self.quantity_mismatches.len()
        )
    }
}

pub struct Reconciler {
    series_prefix: String,
}

impl Reconciler {
    /// Exchange positions outside `series_prefix` are ignored.
    pub fn new(series_prefix: impl Into<String>) -> Self {
        Self {
            series_prefix: series_prefix.into(),
        }
    }

    /// Pure diff. Zero-quantity exchange rows count as absent.
    pub fn diff(&self, ledger: &[Position], exchange: &[ExchangePosition]) -> ReconciliationReport {
        let held: HashMap<&str, u64> = exchange
            .iter()
            .filter(|p| p.quantity != 0 && p.market_id.starts_with(&self.series_prefix))
            .map(|p| (p.market_id.as_str(), p.quantity.unsigned_abs()))
            .collect();
        let ours: HashMap<&str, u32> = ledger
            .iter()
            .map(|p| (p.market_id.as_str(), p.quantity))
            .collect();

        let mut report = ReconciliationReport::default();
        for (id, qty) in &ours {
            match held.get(id) {
                None => {
                    report.ledger_only.insert(id.to_string());
                }
                Some(theirs) if *theirs != u64::from(*qty) => {
                    report.quantity_mismatches.insert(id.to_string(), (*qty, *theirs));
                }
                Some(_) => {}
            }
        }
        for id in held.keys() {
            if !ours.contains_key(id) {
                report.exchange_only.insert(id.to_string());
            }
        }
        report
    }

    /// Fetch exchange positions, diff against a ledger snapshot and log
    /// every discrepancy.
    pub async fn run(&self, ledger: &PositionLedger, exchange: &dyn ExchangeClient) -> Result<ReconciliationReport> {
        let remote = exchange
            .positions()
            .await
            .context("Failed to fetch exchange positions for reconciliation")?;
        let local = ledger.snapshot();
        let report = self.diff(&local, &remote);

        let their_price = |id: &str| {
            remote
                .iter()
                .find(|p| p.market_id == id)
                .and_then(|p| p.avg_price_cents)
                .map(|c| format!("{c:.1}¢"))
                .unwrap_or_else(|| "n/a".into())
        };
        let our_price = |id: &str| {
            local
                .iter()
                .find(|p| p.market_id == id)
                .map(|p| format!("{:.1}¢", p.avg_price_cents))
                .unwrap_or_else(|| "n/a".into())
        };

        for id in &report.ledger_only {
            warn!(market_id = %id, ledger_entry = %our_price(id), "[RECONCILE] In ledger but not at exchange (settled?)");
        }
        for id in &report.exchange_only {
            warn!(
                market_id = %id,
                exchange_entry = %their_price(id),
                "[RECONCILE] At exchange but not in ledger (placed out-of-band?)"
            );
        }
        for (id, (ours, theirs)) in &report.quantity_mismatches {
            warn!(
                market_id = %id,
                ledger = ours,
                exchange = theirs,
                ledger_entry = %our_price(id),
                exchange_entry = %their_price(id),
                "[RECONCILE] Quantity mismatch"
            );
        }
        if report.is_clean() {
            info!(positions = ledger.len(), "[RECONCILE] Ledger matches exchange");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::MockExchangeClient;
    use crate::storage::MemoryPositionStore;
    use crate::types::{Mode, Side};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn ours(id: &str, qty: u32) -> Position {
        Position {
            market_id: id.into(),
            side: Side::No,
            quantity: qty,
            avg_price_cents: dec!(88),
            cost_basis: dec!(1),
            strike: dec!(100000),
            expires_at: Utc::now(),
            last_entry_edge_pct: dec!(11),
            opened_at: Utc::now(),
            mode: Mode::Live,
        }
    }

    fn theirs(id: &str, qty: i64) -> ExchangePosition {
        ExchangePosition {
            market_id: id.into(),
            quantity: qty,
            avg_price_cents: Some(dec!(88)),
        }
    }

    #[test]
    fn test_diff_classifies() {
        let r = Reconciler::new("KXBTCD");
        let report = r.diff(
            &[ours("KXBTCD-A", 5), ours("KXBTCD-B", 3), ours("KXBTCD-C", 2)],
            &[
                theirs("KXBTCD-A", -5),
                theirs("KXBTCD-C", -4),
                theirs("KXBTCD-D", 1),
                theirs("KXBTCD-E", 0),
                theirs("OTHER-X", 7),
            ],
        );
        assert_eq!(report.ledger_only, BTreeSet::from(["KXBTCD-B".to_string()]));
        assert_eq!(report.exchange_only, BTreeSet::from(["KXBTCD-D".to_string()]));
        assert_eq!(report.quantity_mismatches.get("KXBTCD-C"), Some(&(2, 4)));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_clean_when_matching() {
        let r = Reconciler::new("KXBTCD");
        let report = r.diff(&[ours("KXBTCD-A", 5)], &[theirs("KXBTCD-A", 5)]);
        assert!(report.is_clean());
        assert!(r.diff(&[], &[]).is_clean());
    }

    #[test]
    fn test_diff_is_idempotent() {
        let r = Reconciler::new("KXBTCD");
        let ledger = vec![ours("KXBTCD-B", 3), ours("KXBTCD-A", 5)];
        let exchange = vec![theirs("KXBTCD-D", 1), theirs("KXBTCD-A", -5)];
        assert_eq!(r.diff(&ledger, &exchange), r.diff(&ledger, &exchange));
    }

    #[tokio::test]
    async fn test_run_reports_without_touching_ledger() {
        let ledger = PositionLedger::new(Arc::new(MemoryPositionStore::new(Mode::Live)));
        let mut ex = MockExchangeClient::new();
        ex.expect_positions()
            .returning(|| Ok(vec![theirs("KXBTCD-D", 2), theirs("OTHER-X", 1)]));

        let report = Reconciler::new("KXBTCD").run(&ledger, &ex).await.unwrap();
        assert_eq!(report.exchange_only, BTreeSet::from(["KXBTCD-D".to_string()]));
        assert!(ledger.is_empty());
        assert_eq!(ledger.revision(), 0);
    }
}
