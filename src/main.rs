//! STRIKE: edge-driven trading engine for hourly binary settlement contracts
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the mode's venue (simulated or exchange-backed), resumes the
//! position ledger and runs the fetch→evaluate→size→execute loop with
//! graceful shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use strike::config;
use strike::data::LiveFeed;
use strike::engine::accountant::CycleReport;
use strike::engine::clock::SystemClock;
use strike::engine::session::Session;
use strike::engine::Venue;
use strike::platforms::coinbase::CoinbaseSpot;
use strike::platforms::kalshi::KalshiClient;
use strike::platforms::simulated::SimulatedExchange;
use strike::platforms::ExchangeClient;
use strike::storage::journal::TradeJournal;
use strike::storage::{JsonPositionStore, PositionStore};
use strike::types::{EngineError, Mode};

const BANNER: &str = r#"
 ____ _____ ____  ___ _  _______
/ ___|_   _|  _ \|_ _| |/ / ____|
\___ \ | | | |_) || || ' /|  _|
 ___) || | |  _ < | || . \| |___
|____/ |_| |_| \_\___|_|\_\_____|

  Hourly binary contracts, edge-driven
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        mode = %cfg.engine.mode,
        refresh_interval_secs = cfg.engine.refresh_interval_secs,
        series = %cfg.engine.series_prefix,
        min_edge = %cfg.strategy.min_edge_pct,
        kelly_fraction = %cfg.risk.kelly_fraction,
        "STRIKE starting up"
    );
    if cfg.engine.mode.is_live() {
        warn!("LIVE mode: orders will be placed with real capital");
    }

    // -- Venue -------------------------------------------------------------

    let venue = build_venue(&cfg).await?;
    let mut session = Session::new(&cfg, venue)?;
    info!(
        positions = session.ledger().len(),
        exposure = format!("${:.2}", session.ledger().exposure()),
        "Ledger resumed"
    );

    if let Some(report) = session.startup().await {
        info!(report = %report, "Startup reconciliation complete");
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.engine.refresh_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.engine.refresh_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match session.run_cycle().await {
                    Ok(report) => log_cycle_report(&report),
                    Err(e) => match e.downcast_ref::<EngineError>() {
                        Some(EngineError::DataUnavailable { .. })
                        | Some(EngineError::BalanceUnavailable(_)) => {
                            warn!(error = %e, "Cycle skipped");
                        }
                        _ => error!(error = %e, "Cycle failed, continuing to next"),
                    },
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // -- Shutdown summary ------------------------------------------------

    if let Some(journal) = session.journal() {
        match journal.session_stats().await {
            Ok(stats) => info!(
                session = journal.session_id(),
                orders = stats.orders,
                filled = stats.filled,
                cancelled = stats.cancelled,
                failed = stats.failed,
                contracts = stats.contracts_traded,
                wins = stats.wins,
                losses = stats.losses,
                realized = format!("${:.2}", stats.realized_pnl),
                "Session journal"
            ),
            Err(e) => warn!(error = %e, "Could not read session journal"),
        }
    }
    for position in session.ledger().snapshot() {
        info!(position = %position, "Open at shutdown");
    }
    if session.unresolved_orders() > 0 {
        error!(
            count = session.unresolved_orders(),
            "Orders with unconfirmed cancels may still be live at the exchange"
        );
    }
    info!(
        mode = %session.mode(),
        cycles = session.cycles_run(),
        bankroll = format!("${:.2}", session.bankroll().capital),
        positions = session.ledger().len(),
        realized = format!("${:.2}", session.ledger().realized_pnl()),
        "STRIKE shut down cleanly."
    );

    Ok(())
}

/// Wire the collaborators for the configured mode. Only the exchange
/// differs between modes; feed, store and journal are namespaced by mode.
async fn build_venue(cfg: &config::AppConfig) -> Result<Venue> {
    let mode = cfg.engine.mode;
    let store = Arc::new(JsonPositionStore::new(&cfg.storage.dir, mode));

    let journal = if cfg.storage.journal_enabled {
        match TradeJournal::open(&cfg.storage.dir, mode).await {
            Ok(j) => Some(Arc::new(j)),
            Err(e) => {
                warn!(error = %e, "Trade journal unavailable, continuing without it");
                None
            }
        }
    } else {
        None
    };

    // Market listings are public; a missing token only matters in live mode.
    let token = match (mode, cfg.exchange_token()) {
        (_, Ok(token)) => token,
        (Mode::Live, Err(e)) => return Err(e.context("Live mode requires an exchange token")),
        (Mode::DryRun, Err(_)) => secrecy::SecretString::new(String::new()),
    };
    let kalshi = Arc::new(KalshiClient::new(&cfg.exchange, token)?);

    let exchange: Arc<dyn ExchangeClient> = match mode {
        Mode::DryRun => {
            let sim = SimulatedExchange::new(cfg.dry_run.starting_balance);
            let held = store
                .load_all()
                .context("Failed to read dry-run positions for the simulated venue")?;
            sim.seed_holdings(&held);
            Arc::new(sim)
        }
        Mode::Live => kalshi.clone(),
    };

    let feed = LiveFeed::new(
        CoinbaseSpot::new(&cfg.feed.spot_url, cfg.feed.spot_min, cfg.feed.spot_max)?,
        kalshi,
        cfg.engine.series_prefix.clone(),
        cfg.feed.vol_window_minutes,
    );

    Ok(Venue {
        mode,
        exchange,
        feed: Arc::new(feed),
        store,
        journal,
        clock: Arc::new(SystemClock),
    })
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    info!(
        cycle = report.cycle_number,
        mode = %report.mode,
        spot = %report.spot,
        scanned = report.markets_scanned,
        evaluated = report.markets_evaluated,
        edges = report.edges_found,
        entries = report.entries_filled,
        exits = report.exits_filled,
        settled = report.settlements,
        cancelled = report.orders_cancelled,
        failed = report.orders_failed,
        unresolved = report.orders_unresolved,
        skipped = report.opportunities_skipped,
        positions = report.positions_open,
        exposure = format!("${:.2}", report.exposure),
        bankroll = format!("${:.2}", report.bankroll_after),
        cycle_pnl = format!("${:.2}", report.cycle_realized_pnl),
        unrealized = format!("${:.2}", report.unrealized_pnl),
        "Cycle complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("strike=info"));

    let json_logging = std::env::var("STRIKE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
