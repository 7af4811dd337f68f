// =============================================================================
// Meridian — futures-market signal engine
// =============================================================================
//
// Thin CLI shell around the engine:
//   start    — run the full pipeline until Ctrl+C
//   refresh  — one-shot candle refresh / backfill
//   health   — store statistics and freshness summary
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod app_state;
mod binance;
mod config;
mod engine;
mod error;
mod indicators;
mod journal;
mod market_data;
mod regime;
mod scoring;
mod strategies;
mod tracker;
mod zones;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::journal::Journal;
use crate::market_data::candle::Timeframe;
use crate::market_data::Store;
use crate::tracker::PerformanceTracker;

#[derive(Parser)]
#[command(name = "meridian", about = "Futures-market signal engine for Binance USDT-M perpetuals")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the signal engine until Ctrl+C.
    Start,
    /// Refresh candles for one symbol (or all configured symbols),
    /// optionally backfilling the given number of days.
    Refresh {
        symbol: Option<String>,
        days: Option<i64>,
    },
    /// Print signal statistics and per-symbol candle freshness.
    Health,
}

fn load_config() -> EngineConfig {
    let path =
        std::env::var("MERIDIAN_CONFIG").unwrap_or_else(|_| "meridian_config.json".to_string());
    EngineConfig::load(&path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config — using defaults");
        EngineConfig::default()
    })
}

fn database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://meridian.db".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config();

    match cli.command {
        Command::Start => start(config).await,
        Command::Refresh { symbol, days } => refresh(config, symbol, days).await,
        Command::Health => health(config).await,
    }
}

// =============================================================================
// start
// =============================================================================

async fn start(config: EngineConfig) -> anyhow::Result<()> {
    info!(symbols = ?config.symbols, "Meridian starting");

    let store = Arc::new(
        Store::open(&database_url())
            .await
            .context("failed to open store")?,
    );
    let journal = Arc::new(Journal::open(
        &config.journal.signal_path,
        &config.journal.decision_path,
    )?);

    let tracker_config = config.tracker.clone();
    let state = AppState::new(config, store, journal);

    // Restore a persisted ban so a restart never hammers a banned endpoint.
    if let Some(ban_until) = state.store.load_ban_until().await? {
        if ban_until > Utc::now().timestamp_millis() {
            warn!(ban_until, "restored active ban from the rate ledger");
            state.rate_budget.trip_ban(ban_until);
        }
    }

    // Sanity-check the configured symbols against exchange info; a typo'd
    // symbol would otherwise fail every cycle.
    let deadline_ms = Utc::now().timestamp_millis() + 60_000;
    match state.client.get_exchange_info(deadline_ms).await {
        Ok(infos) => {
            let tradable: std::collections::HashSet<&str> = infos
                .iter()
                .filter(|i| i.status == "TRADING")
                .map(|i| i.symbol.as_str())
                .collect();
            for symbol in &state.config.read().symbols {
                if !tradable.contains(symbol.as_str()) {
                    warn!(symbol = %symbol, "symbol not tradable per exchange info");
                }
            }
        }
        Err(e) => warn!(error = %e, "exchange info unavailable — skipping symbol check"),
    }

    // Rebuild locks from surviving active signals: restarts must not
    // duplicate-emit.
    let active = state.store.active_signals().await?;
    state.locks.rebuild(&active).await?;
    info!(active = active.len(), "active signals reloaded");

    let tracker = Arc::new(PerformanceTracker::new(
        Arc::clone(&state.store),
        Arc::clone(&state.locks),
        Arc::clone(&state.journal),
        tracker_config,
    ));
    tokio::spawn(Arc::clone(&tracker).run());

    let engine = Engine::new(Arc::clone(&state), Arc::clone(&tracker));

    // Kline close hints wake the scheduler a little early.
    let hint_symbols = state.config.read().symbols.clone();
    tokio::spawn(binance::ws::run_close_hint_stream(
        hint_symbols,
        Timeframe::FASTEST,
        Arc::clone(&engine.close_hint),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            return;
        }
        warn!("shutdown signal received — stopping gracefully");
        let _ = shutdown_tx.send(true);
    });

    info!("all subsystems running — press Ctrl+C to stop");
    engine.run(shutdown_rx).await;

    let status = state.status();
    info!(
        cycles = status.cycles,
        dropped_ticks = status.dropped_ticks,
        uptime_secs = status.uptime_secs,
        "final engine status"
    );

    // Flush: one final tracker pass, then persist the rate ledger.
    if let Err(e) = tracker.check_all(&HashMap::new()).await {
        warn!(error = %e, "final tracker flush failed");
    }
    let snap = state.rate_budget.snapshot();
    let now = Utc::now().timestamp_millis();
    let window = state.config.read().rate.minute_window_ms;
    state
        .store
        .save_rate_ledger(
            now - (window - snap.bucket_resets_in_ms),
            snap.weight_used,
            snap.banned_until_ms,
        )
        .await?;

    info!("Meridian shut down complete");
    Ok(())
}

// =============================================================================
// refresh
// =============================================================================

async fn refresh(config: EngineConfig, symbol: Option<String>, days: Option<i64>) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(&database_url()).await?);
    let rate_budget = Arc::new(binance::RateBudget::new(config.rate.clone()));
    let client = Arc::new(binance::FuturesClient::new(Arc::clone(&rate_budget)));
    let loader = market_data::CandleLoader::new(
        Arc::clone(&client),
        Arc::clone(&store),
        config.loader.clone(),
    );

    let symbols = match symbol {
        Some(s) => vec![s.to_uppercase()],
        None => config.symbols.clone(),
    };
    let horizon_days = days.unwrap_or(config.loader.refresh_horizon_days);
    let deadline_ms = Utc::now().timestamp_millis() + 600_000;

    for symbol in &symbols {
        let now = Utc::now().timestamp_millis();
        let from = now - horizon_days * 86_400_000;
        let mut total = 0u32;
        for tf in Timeframe::ALL {
            total += loader
                .backfill_gap(symbol, tf, from, now, deadline_ms)
                .await
                .with_context(|| format!("backfill failed for {symbol}"))?;
        }
        match client.get_ticker_24h(symbol, deadline_ms).await {
            Ok(ticker) => println!(
                "{symbol}: {total} candles refreshed over {horizon_days}d (last {:.4}, 24h {:+.2}%)",
                ticker.last_price, ticker.price_change_percent
            ),
            Err(_) => println!("{symbol}: {total} candles refreshed over {horizon_days}d"),
        }
    }
    Ok(())
}

// =============================================================================
// health
// =============================================================================

async fn health(config: EngineConfig) -> anyhow::Result<()> {
    let store = Store::open(&database_url()).await?;

    let stats = store.signal_stats().await?;
    let active = store.active_signals().await?;

    println!("signals: {} active, {} closed", active.len(), stats.closed);
    println!(
        "outcomes: {} wins / {} losses / {} breakeven",
        stats.wins, stats.losses, stats.breakeven
    );
    match stats.win_rate() {
        Some(rate) => println!("win rate: {:.1}% (breakeven excluded)", rate * 100.0),
        None => println!("win rate: n/a"),
    }
    println!("cumulative pnl: {:+.2}%", stats.total_pnl_pct);

    let now = Utc::now().timestamp_millis();
    for symbol in &config.symbols {
        let last = store.last_close_time(symbol, Timeframe::M15).await?;
        match last {
            Some(close_time) => {
                let age_min = (now - close_time) / 60_000;
                println!("{symbol}: last 15m close {age_min}m ago");
            }
            None => println!("{symbol}: no candles stored"),
        }
    }
    Ok(())
}
