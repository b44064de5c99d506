//! Session driver.
//!
//! Owns one mode's engine state and runs cycles strictly one after
//! another. A cycle fetches its inputs (spot, volatility, markets, balance)
//! up front and aborts as a whole if any of them is unavailable; otherwise
//! it retries any unresolved orders, settles expired positions, evaluates
//! every market, liquidates positions whose edge has decayed and opens or
//! adds where the strategy says so. A market with an unresolved order gets
//! no new orders. The bankroll used for sizing is fixed at its cycle-start
//! value.

use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::accountant::{Accountant, CycleInputs, CycleReport, CycleTally};
use super::clock::Clock;
use super::executor::{EntryOrder, OrderManager};
use super::ledger::PositionLedger;
use super::reconciler::{ReconciliationReport, Reconciler};
use super::Venue;
use crate::config::AppConfig;
use crate::data::{MarketDataFeed, VolatilitySample};
use crate::platforms::ExchangeClient;
use crate::storage::journal::TradeJournal;
use crate::strategy::edge::{EdgeConfig, EdgeEvaluator};
use crate::strategy::kelly::{KellyConfig, PositionSizer};
use crate::strategy::model::FairValueModel;
use crate::strategy::risk::ExposureGuard;
use crate::strategy::{EntryContext, EntryPlan, SkipReason, StrategyOrchestrator};
use crate::types::{Bankroll, EngineError, Market, Mode, Side};

/// Side bought on strikes above spot.
const TRADED_SIDE: Side = Side::No;

pub struct Session {
    mode: Mode,
    cutoff_minutes: i64,
    series_prefix: String,
    min_vol_samples: usize,
    strategy: StrategyOrchestrator,
    model: FairValueModel,
    exchange: Arc<dyn ExchangeClient>,
    feed: Arc<dyn MarketDataFeed>,
    clock: Arc<dyn Clock>,
    ledger: Arc<PositionLedger>,
    orders: OrderManager,
    reconciler: Reconciler,
    journal: Option<Arc<TradeJournal>>,
    bankroll: Bankroll,
    cycle: u64,
}

impl Session {
    /// Build a session and resume its ledger from the venue's store.
    pub fn new(config: &AppConfig, venue: Venue) -> Result<Self> {
        venue.check()?;
        if venue.mode != config.engine.mode {
            return Err(EngineError::ModeMismatch {
                expected: config.engine.mode,
                found: venue.mode,
            }
            .into());
        }

        let strategy = StrategyOrchestrator::new(
            EdgeEvaluator::new(EdgeConfig {
                min_edge_pct: config.strategy.min_edge_pct,
                exit_edge_pct: config.strategy.exit_edge_pct,
                max_slippage_cents: config.strategy.max_slippage_cents,
                fee_rate: config.strategy.fee_rate,
            }),
            ExposureGuard::new(config.risk.max_exposure_fraction),
            PositionSizer::new(KellyConfig {
                fraction: config.risk.kelly_fraction,
                max_contracts: config.risk.max_contracts,
            }),
            config.strategy.edge_increase_pct,
        );

        let ledger = Arc::new(PositionLedger::restore(venue.store.clone())?);
        let mut orders = OrderManager::new(
            venue.exchange.clone(),
            venue.clock.clone(),
            ledger.clone(),
            &config.execution,
        );
        if let Some(journal) = &venue.journal {
            orders = orders.with_journal(journal.clone());
        }

        let opening_capital = match venue.mode {
            Mode::DryRun => config.dry_run.starting_balance,
            Mode::Live => Decimal::ZERO,
        };

        Ok(Self {
            mode: venue.mode,
            cutoff_minutes: config.engine.trading_cutoff_minutes,
            series_prefix: config.engine.series_prefix.clone(),
            min_vol_samples: config.feed.min_vol_samples,
            strategy,
            model: FairValueModel::new(),
            exchange: venue.exchange,
            feed: venue.feed,
            clock: venue.clock,
            ledger,
            orders,
            reconciler: Reconciler::new(config.engine.series_prefix.clone()),
            journal: venue.journal,
            bankroll: Bankroll::new(venue.mode, opening_capital),
            cycle: 0,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    pub fn bankroll(&self) -> &Bankroll {
        &self.bankroll
    }

    pub fn journal(&self) -> Option<&Arc<TradeJournal>> {
        self.journal.as_ref()
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycle
    }

    /// Orders whose cancel the venue has not yet confirmed.
    pub fn unresolved_orders(&self) -> usize {
        self.orders.unresolved_count()
    }

    /// One-off startup work. Live mode reconciles the resumed ledger
    /// against the exchange; a failed fetch is logged and skipped.
    pub async fn startup(&self) -> Option<ReconciliationReport> {
        if !self.mode.is_live() {
            return None;
        }
        match self.reconciler.run(&self.ledger, self.exchange.as_ref()).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "[RECONCILE] Skipped: exchange positions unavailable");
                None
            }
        }
    }

    /// Run one cycle. Errors mean the cycle was skipped before any order
    /// was placed.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.cycle += 1;
        let now = self.clock.now();

        // -- Inputs (all or nothing) --------------------------------------
        let spot = self
            .feed
            .spot_price()
            .await
            .map_err(|e| EngineError::data("spot", e.to_string()))?;
        let vol = self
            .feed
            .volatility()
            .await
            .map_err(|e| EngineError::data("volatility", e.to_string()))?;
        if vol.samples < self.min_vol_samples {
            return Err(EngineError::data(
                "volatility",
                format!("{} samples, need {}", vol.samples, self.min_vol_samples),
            )
            .into());
        }
        let mut markets = self
            .feed
            .markets()
            .await
            .map_err(|e| EngineError::data("markets", e.to_string()))?;
        markets.retain(|m| m.id.starts_with(&self.series_prefix));
        let capital = self
            .exchange
            .balance()
            .await
            .map_err(|e| EngineError::BalanceUnavailable(e.to_string()))?;
        self.bankroll.refresh(capital, now);
        let bankroll_before = self.bankroll.capital;

        info!(
            cycle = self.cycle,
            mode = %self.mode,
            spot = %spot,
            vol_15m = format!("{:.4}%", vol.std_pct),
            markets = markets.len(),
            bankroll = format!("${:.2}", bankroll_before),
            "Cycle started"
        );

        let mut tally = CycleTally {
            markets_scanned: markets.len(),
            ..Default::default()
        };

        // -- Unresolved orders ---------------------------------------------
        for outcome in self.orders.resolve_unresolved().await {
            tally.record_outcome(outcome);
        }

        // -- Expired positions ---------------------------------------------
        for position in self.ledger.snapshot() {
            if self.orders.has_unresolved(&position.market_id) {
                continue;
            }
            if position.time_to_settlement(now).is_err() {
                if let Some(outcome) = self.orders.settle(&position, spot).await {
                    tally.record_outcome(outcome);
                }
            }
        }

        // -- Markets -------------------------------------------------------
        markets.sort_by(|a, b| a.strike.cmp(&b.strike));
        for market in &markets {
            self.evaluate_market(market, spot, &vol, bankroll_before, &mut tally)
                .await;
        }

        // -- Close out -----------------------------------------------------
        let bankroll_after = match self.exchange.balance().await {
            Ok(capital) => {
                self.bankroll.refresh(capital, self.clock.now());
                capital
            }
            Err(e) => {
                warn!(error = %e, "Post-cycle balance refresh failed, keeping cycle-start value");
                self.bankroll.capital
            }
        };

        Ok(Accountant::reconcile(
            CycleInputs {
                cycle_number: self.cycle,
                mode: self.mode,
                spot,
                volatility_pct: vol.std_pct,
                bankroll_before,
                bankroll_after,
                timestamp: self.clock.now(),
            },
            &tally,
            &self.ledger,
        ))
    }

    async fn evaluate_market(
        &self,
        market: &Market,
        spot: Decimal,
        vol: &VolatilitySample,
        bankroll: Decimal,
        tally: &mut CycleTally,
    ) {
        let existing = self.ledger.get(&market.id);
        let above_spot = market.strike > spot;
        if !above_spot && existing.is_none() {
            return;
        }
        if self.orders.has_unresolved(&market.id) {
            warn!(market_id = %market.id, "Unresolved order outstanding, market blocked");
            tally.record_skip(&market.id, SkipReason::UnresolvedOrder);
            return;
        }
        if !market.is_well_formed() {
            debug!(market = %market, "Skipping crossed quote");
            return;
        }

        let now = self.clock.now();
        let remaining = match market.time_to_settlement(now) {
            Ok(remaining) => remaining,
            Err(e) => {
                debug!(market_id = %market.id, reason = %e, "Treating market as expired");
                return;
            }
        };
        let minutes_left = remaining.num_minutes();
        // round up so the last partial minute still prices
        let model_minutes = (remaining.num_seconds() + 59) / 60;

        let Some(fair_below) =
            self.model
                .probability_below(spot, market.strike, vol.std_pct, model_minutes)
        else {
            debug!(market_id = %market.id, "No fair value");
            return;
        };
        let fair = match TRADED_SIDE {
            Side::No => fair_below,
            Side::Yes => fair_below.complement(),
        };

        let edge = self.strategy.edge().evaluate(market, TRADED_SIDE, fair);
        tally.markets_evaluated += 1;
        tally
            .quotes
            .insert(market.id.clone(), market.quote(TRADED_SIDE));
        if edge.tradable {
            tally.edges_found += 1;
        }

        // Exits first, regardless of cutoff or spread.
        if let Some(position) = &existing {
            if edge.exit {
                info!(
                    market_id = %market.id,
                    edge = format!("{:.1}%", edge.edge_pct),
                    bid = edge.bid_cents,
                    "Edge decayed, liquidating"
                );
                let outcome = self
                    .orders
                    .liquidate(position, edge.bid_cents, edge.edge_pct)
                    .await;
                tally.record_outcome(outcome);
                return;
            }
        }
        if !above_spot {
            return;
        }

        let plan = self.strategy.plan_entry(&EntryContext {
            edge: &edge,
            existing: existing.as_ref(),
            bankroll,
            exposure: self.ledger.exposure(),
            entries_open: minutes_left > self.cutoff_minutes,
        });

        match plan {
            EntryPlan::Enter {
                action,
                quantity,
                price_cents,
                ..
            } => {
                info!(
                    market_id = %market.id,
                    strike = %market.strike,
                    action = %action,
                    edge = format!("{:.1}%", edge.edge_pct),
                    fair = %fair.probability,
                    quantity,
                    price = price_cents,
                    "Entering"
                );
                let outcome = self
                    .orders
                    .enter(&EntryOrder {
                        market,
                        side: TRADED_SIDE,
                        trade: action,
                        quantity,
                        price_cents,
                        edge_pct: edge.edge_pct,
                    })
                    .await;
                tally.record_outcome(outcome);
            }
            EntryPlan::Skip(reason) => {
                if edge.edge_pct >= self.strategy.edge().config().min_edge_pct {
                    info!(market_id = %market.id, reason = %reason, "Opportunity skipped");
                } else {
                    debug!(market_id = %market.id, reason = %reason, "No entry");
                }
                tally.record_skip(&market.id, reason);
            }
        }
    }
}
