// =============================================================================
// Engine — candle-close-aligned analysis cycle
// =============================================================================
//
// The scheduler sleeps until the next close of the fastest traded timeframe
// plus the settle delay (the exchange may revise a just-closed candle for a
// few seconds), then runs one cycle:
//
//   refresh -> snapshot -> evaluate strategies -> score -> persist/lock ->
//   tracker pass
//
// Cycles run as spawned tasks behind an in-progress flag: if a cycle is
// still running when the next tick fires, the new tick is dropped and
// logged, never queued. Per-symbol work is bounded (I/O by the loader pool,
// CPU by a core-count semaphore) and failures are isolated per symbol.
//
// The WebSocket close hint only wakes the scheduler early; correctness never
// depends on it.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Notify, Semaphore};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::error::EngineError;
use crate::journal::SignalEvent;
use crate::market_data::candle::{SeriesKey, Timeframe};
use crate::regime::{Bias, Regime, RegimeSnapshot};
use crate::scoring::{ScoredProposal, SignalScorer};
use crate::strategies::{BtcTrend, Strategy, SymbolSnapshot};
use crate::tracker::{PerformanceTracker, Signal};

/// Candle depths fetched per timeframe for one snapshot.
const M15_DEPTH: u32 = 300;
const H1_DEPTH: u32 = 250;
const H4_DEPTH: u32 = 120;

/// BTC trend lookback (bars on 1h) and noise threshold (percent).
const BTC_LOOKBACK: usize = 3;
const BTC_NOISE_PCT: f64 = 0.3;

/// Order book depth requested for the flow side channel.
const DEPTH_LEVELS: u32 = 100;

/// A symbol whose newest 15m candle is older than this many periods is
/// stale for the cycle.
const STALE_PERIODS: i64 = 2;

// =============================================================================
// Pure helpers
// =============================================================================

/// Classify the BTC 1h trend from its close series.
pub fn btc_trend_tag(closes: &[f64]) -> BtcTrend {
    if closes.len() <= BTC_LOOKBACK {
        return BtcTrend::Flat;
    }
    let now = closes[closes.len() - 1];
    let then = closes[closes.len() - 1 - BTC_LOOKBACK];
    if then == 0.0 {
        return BtcTrend::Flat;
    }
    let change_pct = (now - then) / then * 100.0;
    if change_pct > BTC_NOISE_PCT {
        BtcTrend::Up
    } else if change_pct < -BTC_NOISE_PCT {
        BtcTrend::Down
    } else {
        BtcTrend::Flat
    }
}

/// Epoch ms at which the next cycle should start: the next close of the
/// fastest timeframe plus the settle delay.
pub fn next_cycle_wake_ms(now_ms: i64, settle_delay_sec: u64) -> i64 {
    Timeframe::FASTEST.next_period_start(now_ms) + settle_delay_sec as i64 * 1_000
}

// =============================================================================
// Engine
// =============================================================================

pub struct Engine {
    state: Arc<AppState>,
    strategies: Arc<Vec<Box<dyn Strategy>>>,
    scorer: Arc<SignalScorer>,
    tracker: Arc<PerformanceTracker>,
    cycle_in_progress: Arc<AtomicBool>,
    pub close_hint: Arc<Notify>,
}

impl Engine {
    pub fn new(state: Arc<AppState>, tracker: Arc<PerformanceTracker>) -> Self {
        let config = state.config.read();
        let strategies = Arc::new(crate::strategies::default_strategies(
            config.action_price.clone(),
        ));
        let scorer = Arc::new(SignalScorer::new(config.scorer.clone()));
        drop(config);

        Self {
            state,
            strategies,
            scorer,
            tracker,
            cycle_in_progress: Arc::new(AtomicBool::new(false)),
            close_hint: Arc::new(Notify::new()),
        }
    }

    /// Scheduler loop. Returns when `shutdown` flips to true; an in-flight
    /// cycle is then drained for at most one cycle budget.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("engine scheduler started");
        let mut last_period_start: i64 = 0;

        loop {
            let settle = self.state.config.read().loader.settle_delay_sec;
            let now = Utc::now().timestamp_millis();
            let wake = next_cycle_wake_ms(now, settle);
            let wait = Duration::from_millis((wake - now).max(0) as u64);
            debug!(wait_ms = wait.as_millis() as u64, "sleeping until next candle close");

            tokio::select! {
                _ = sleep(wait) => {}
                _ = self.close_hint.notified() => {
                    // A close arrived early; still honour the settle delay.
                    let now = Utc::now().timestamp_millis();
                    let boundary = Timeframe::FASTEST.period_start(now);
                    let settled = boundary + settle as i64 * 1_000;
                    if now < settled {
                        sleep(Duration::from_millis((settled - now) as u64)).await;
                    }
                }
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            // A late hint after the scheduled tick must not re-run the same
            // period.
            let period_start = Timeframe::FASTEST.period_start(Utc::now().timestamp_millis());
            if period_start == last_period_start {
                continue;
            }

            if self.cycle_in_progress.swap(true, Ordering::SeqCst) {
                self.state.dropped_ticks.fetch_add(1, Ordering::Relaxed);
                warn!("cycle still running — tick dropped");
                continue;
            }
            last_period_start = period_start;

            let state = Arc::clone(&self.state);
            let strategies = Arc::clone(&self.strategies);
            let scorer = Arc::clone(&self.scorer);
            let tracker = Arc::clone(&self.tracker);
            let flag = Arc::clone(&self.cycle_in_progress);

            tokio::spawn(async move {
                let started = std::time::Instant::now();
                let budget = state.config.read().loader.cycle_budget_sec;

                let result = timeout(
                    Duration::from_secs(budget),
                    run_cycle(&state, &strategies, &scorer, &tracker),
                )
                .await;

                match result {
                    Ok(Ok(emitted)) => {
                        debug!(emitted, elapsed_ms = started.elapsed().as_millis() as u64, "cycle complete")
                    }
                    Ok(Err(e)) => warn!(error = %e, "cycle failed"),
                    Err(_) => warn!(budget_sec = budget, "cycle exceeded its budget — aborted"),
                }

                state
                    .last_cycle_duration_ms
                    .store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                state.cycle_counter.fetch_add(1, Ordering::Relaxed);
                flag.store(false, Ordering::SeqCst);
            });
        }

        // Drain: give an in-flight cycle one budget to finish.
        let budget = self.state.config.read().loader.cycle_budget_sec;
        let drain_deadline = std::time::Instant::now() + Duration::from_secs(budget);
        while self.cycle_in_progress.load(Ordering::SeqCst) {
            if std::time::Instant::now() >= drain_deadline {
                warn!("shutdown drain timed out with a cycle still running");
                break;
            }
            sleep(Duration::from_millis(200)).await;
        }
        info!("engine scheduler stopped");
    }
}

// =============================================================================
// One analysis cycle
// =============================================================================

async fn run_cycle(
    state: &Arc<AppState>,
    strategies: &Arc<Vec<Box<dyn Strategy>>>,
    scorer: &Arc<SignalScorer>,
    tracker: &Arc<PerformanceTracker>,
) -> Result<u32, EngineError> {
    let (symbols, budget_sec) = {
        let config = state.config.read();
        (config.symbols.clone(), config.loader.cycle_budget_sec)
    };
    let deadline_ms = Utc::now().timestamp_millis() + budget_sec as i64 * 1_000;
    let timeframes = Timeframe::ALL;

    // ── BTC trend first: every symbol's scoring reads it ────────────────
    if let Err(e) = state
        .loader
        .refresh_recent("BTCUSDT", &timeframes, deadline_ms)
        .await
    {
        warn!(error = %e, "BTC refresh failed — trend defaults to FLAT");
    }
    let btc_closes: Vec<f64> = state
        .loader
        .recent_candles("BTCUSDT", Timeframe::H1, (BTC_LOOKBACK + 2) as u32)
        .await?
        .iter()
        .map(|c| c.close)
        .collect();
    let btc_trend = btc_trend_tag(&btc_closes);
    debug!(btc_trend = %btc_trend, "cycle context ready");

    // ── Refresh all symbols; evaluate each as soon as it is ready ──────
    let (ready_tx, mut ready_rx) = mpsc::channel::<String>(symbols.len().max(1));
    let loader = Arc::clone(&state.loader);
    let refresh_symbols = symbols.clone();
    let refresh = tokio::spawn(async move {
        loader
            .refresh_all(&refresh_symbols, &timeframes, deadline_ms, ready_tx)
            .await
    });

    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let cpu_slots = Arc::new(Semaphore::new(cores));
    let mut eval_tasks = Vec::new();

    while let Some(symbol) = ready_rx.recv().await {
        let state = Arc::clone(state);
        let strategies = Arc::clone(strategies);
        let scorer = Arc::clone(scorer);
        let slots = Arc::clone(&cpu_slots);

        eval_tasks.push(tokio::spawn(async move {
            let _slot = slots.acquire_owned().await.expect("cpu semaphore closed");
            match evaluate_symbol(&state, &strategies, &scorer, &symbol, btc_trend, deadline_ms)
                .await
            {
                Ok((mark, emitted)) => Some((symbol, mark, emitted)),
                Err(EngineError::Stale { symbol, detail }) => {
                    warn!(symbol = %symbol, detail = %detail, "symbol stale — skipped for this cycle");
                    None
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "symbol evaluation failed — isolated");
                    None
                }
            }
        }));
    }

    let failures = refresh.await.unwrap_or_default();
    for (symbol, error) in &failures {
        warn!(symbol = %symbol, error = %error, "symbol unhealthy for this cycle");
    }

    let mut mark_prices = HashMap::new();
    let mut emitted_total = 0u32;
    for task in eval_tasks {
        if let Ok(Some((symbol, mark, emitted))) = task.await {
            if let Some(price) = mark {
                mark_prices.insert(symbol, price);
            }
            emitted_total += emitted;
        }
    }

    // ── Tracker pass on the fresh candles and marks ─────────────────────
    tracker.check_all(&mark_prices).await?;

    // ── Persist the rate ledger for restart continuity ──────────────────
    let snap = state.rate_budget.snapshot();
    let now = Utc::now().timestamp_millis();
    let window = state.config.read().rate.minute_window_ms;
    let bucket_start = now - (window - snap.bucket_resets_in_ms);
    state
        .store
        .save_rate_ledger(bucket_start, snap.weight_used, snap.banned_until_ms)
        .await?;

    Ok(emitted_total)
}

/// Build the snapshot for one symbol, run the strategy portfolio, score the
/// proposals, and persist the winners.
async fn evaluate_symbol(
    state: &Arc<AppState>,
    strategies: &[Box<dyn Strategy>],
    scorer: &SignalScorer,
    symbol: &str,
    btc_trend: BtcTrend,
    deadline_ms: i64,
) -> Result<(Option<f64>, u32), EngineError> {
    let snapshot = build_snapshot(state, symbol, btc_trend, deadline_ms).await?;
    let mark = Some(snapshot.mark_price);

    let proposals: Vec<_> = strategies
        .iter()
        .filter_map(|s| s.evaluate(&snapshot))
        .collect();
    if proposals.is_empty() {
        return Ok((mark, 0));
    }

    let (winners, decisions) = scorer.score_cycle(&snapshot, proposals);
    for decision in decisions {
        state.push_decision(decision);
    }

    let emitted = emit_signals(state, &snapshot, winners).await?;
    Ok((mark, emitted))
}

async fn build_snapshot(
    state: &Arc<AppState>,
    symbol: &str,
    btc_trend: BtcTrend,
    deadline_ms: i64,
) -> Result<SymbolSnapshot, EngineError> {
    let candles_m15 = state
        .loader
        .recent_candles(symbol, Timeframe::M15, M15_DEPTH)
        .await?;
    let candles_h1 = state
        .loader
        .recent_candles(symbol, Timeframe::H1, H1_DEPTH)
        .await?;
    let candles_h4 = state
        .loader
        .recent_candles(symbol, Timeframe::H4, H4_DEPTH)
        .await?;

    // Staleness gate: evaluating on old data is worse than skipping.
    let now = Utc::now().timestamp_millis();
    let newest_close = candles_m15.last().map(|c| c.close_time).unwrap_or(0);
    if now - newest_close > STALE_PERIODS * Timeframe::M15.duration_ms() {
        return Err(EngineError::Stale {
            symbol: symbol.to_string(),
            detail: format!("newest 15m close {}ms old", now - newest_close),
        });
    }

    let bundle_m15 = state
        .indicator_cache
        .get_or_compute(&SeriesKey::new(symbol, Timeframe::M15), &candles_m15);
    let bundle_h1 = state
        .indicator_cache
        .get_or_compute(&SeriesKey::new(symbol, Timeframe::H1), &candles_h1);
    let bundle_h4 = state
        .indicator_cache
        .get_or_compute(&SeriesKey::new(symbol, Timeframe::H4), &candles_h4);

    state.zones.rebuild(symbol, Timeframe::M15, &candles_m15);

    let regime = match &bundle_h1 {
        Some(bundle) => state.regimes.update(symbol, bundle),
        None => RegimeSnapshot {
            regime: Regime::Undecided,
            bias: Bias::Neutral,
            adx: None,
            ema200_slope_pct: None,
            bb_width_percentile: None,
            squeeze_contained: None,
        },
    };

    // Flow side channels are best-effort: their absence only costs factors.
    match state.client.get_depth(symbol, DEPTH_LEVELS, deadline_ms).await {
        Ok(depth) => state.flow.update_depth(symbol, depth.imbalance(), now),
        Err(e) => debug!(symbol, error = %e, "depth snapshot unavailable"),
    }
    match state.client.get_open_interest(symbol, deadline_ms).await {
        Ok(oi) => state.flow.update_open_interest(symbol, oi, now),
        Err(e) => debug!(symbol, error = %e, "open interest unavailable"),
    }

    let mark_price = match state.client.get_mark_price(symbol, deadline_ms).await {
        Ok(price) => price,
        Err(e) => {
            debug!(symbol, error = %e, "mark price unavailable — using last close");
            candles_m15.last().map(|c| c.close).unwrap_or(0.0)
        }
    };

    Ok(SymbolSnapshot {
        symbol: symbol.to_string(),
        candles_m15: Arc::new(candles_m15),
        candles_h1: Arc::new(candles_h1),
        candles_h4: Arc::new(candles_h4),
        bundle_m15,
        bundle_h1,
        bundle_h4,
        zones: state.zones.view(symbol),
        regime,
        mark_price,
        btc_trend,
        flow: state.flow.snapshot(symbol),
    })
}

/// Persist the scored winners: acquire the per-strategy lock, save, journal.
/// A held lock suppresses the duplicate without failing the cycle.
pub async fn emit_signals(
    state: &Arc<AppState>,
    snapshot: &SymbolSnapshot,
    winners: Vec<ScoredProposal>,
) -> Result<u32, EngineError> {
    let mut emitted = 0u32;

    for scored in winners {
        let p = &scored.proposal;
        let mut signal = match Signal::new(
            &snapshot.symbol,
            p.strategy,
            p.direction,
            p.timeframe,
            p.entry,
            p.sl,
            p.tp1,
            p.tp2,
            p.tp3,
            p.atr,
        ) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(symbol = %snapshot.symbol, strategy = p.strategy, error = %e,
                    "scored proposal violates level ordering — dropped");
                continue;
            }
        };
        signal.market_regime = snapshot.regime.regime.to_string();
        signal.confidence_score = scored.final_score;
        signal.action_price = p.ap.clone();
        signal.meta = serde_json::json!({
            "base_score": p.base_score,
            "factor_count": scored.factor_count,
            "btc_trend": snapshot.btc_trend.to_string(),
            "bias": snapshot.regime.bias.to_string(),
        });

        if !state.locks.try_acquire(&signal.lock_key()).await? {
            info!(key = %signal.lock_key(), "signal suppressed — lock held");
            continue;
        }

        state.store.save_signal(&signal).await?;
        state.journal.record_signal(&SignalEvent::created(&signal));
        info!(
            id = %signal.id,
            symbol = %signal.symbol,
            strategy = %signal.strategy,
            direction = %signal.direction,
            entry = signal.entry,
            sl = signal.sl,
            tp1 = signal.tp1,
            tp2 = ?signal.tp2,
            score = scored.final_score,
            regime = %signal.market_regime,
            "signal emitted"
        );
        emitted += 1;
    }

    Ok(emitted)
}
