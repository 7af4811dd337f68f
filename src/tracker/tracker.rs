// =============================================================================
// Performance Tracker — drives every ACTIVE signal to a terminal state
// =============================================================================
//
// Runs on its own cadence (default 60s) and re-checks each active signal
// against the latest closed candle (plus the mark price when available).
//
// Resolution order per check, for a LONG (SHORT mirrors):
//   1. candle.low <= sl            -> STOP_LOSS (or BREAKEVEN once TP1 hit)
//   2. close >= tp2, not tp2_hit   -> TP2 partial, trailing armed
//   3. close >= tp1, not tp1_hit   -> TP1 partial, stop to breakeven
//                                     (full TP1 close when no TP2 exists)
//   4. trailing retracement >= trail_atr_mult * ATR  -> TRAILING
//   5. time stops: pre-TP1 bar count; post-TP2 stale-runner hours
//
// Partial accounting uses the 30/40/30 schedule; final PnL is the sum of
// the tiers that actually fired. MFE/MAE are recorded in R multiples of the
// initial risk and skipped when that risk is degenerate.
//
// Every transition is persisted individually; a failure on one signal is
// isolated and never aborts the pass. The cadence loop carries an overlap
// guard: a tick that fires while the previous pass is still running is
// dropped and logged, never queued.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::EngineError;
use crate::journal::{Journal, SignalEvent};
use crate::market_data::store::Store;
use crate::tracker::locks::SignalLockTable;
use crate::tracker::types::{ExitReason, Signal, SignalStatus};

/// Position fractions of the three-tier exit schedule.
const TP1_SIZE: f64 = 0.30;
const TP2_SIZE: f64 = 0.40;
const TRAIL_SIZE: f64 = 0.30;

// =============================================================================
// Observation & step outcome
// =============================================================================

/// What the tracker saw for one check: the reference price (mark preferred,
/// else last close), the bar extremes, and the bar count since entry.
#[derive(Debug, Clone)]
pub struct Observation {
    pub price: f64,
    pub low: f64,
    pub high: f64,
    pub bars_since_entry: u32,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    NoChange,
    /// A partial transition or trailing-state move that must be persisted.
    Updated,
    Closed(ExitReason),
}

// =============================================================================
// The pure resolution step
// =============================================================================

/// Apply one tracker check to a signal. Mutates the signal in place and
/// reports whether anything changed. Applying the step to an already-closed
/// signal is a no-op.
pub fn step(signal: &mut Signal, obs: &Observation, config: &TrackerConfig) -> StepOutcome {
    if signal.is_terminal() {
        return StepOutcome::NoChange;
    }

    let direction = signal.direction;
    let before = (
        signal.mfe_r,
        signal.mae_r,
        signal.trailing_peak_price,
        signal.tp1_hit,
        signal.tp2_hit,
    );

    signal.update_excursions(obs.high);
    signal.update_excursions(obs.low);

    // ── 1. Stop check (bar extremes, not the close) ─────────────────────
    let stop_hit = match direction {
        crate::tracker::types::Direction::Long => obs.low <= signal.sl,
        crate::tracker::types::Direction::Short => obs.high >= signal.sl,
    };
    if stop_hit {
        return if signal.tp1_hit {
            // The stop sits at entry after TP1: the remainder dies flat and
            // the banked partials are preserved.
            close(signal, obs, ExitReason::Breakeven, signal.realized_pnl_pct())
        } else {
            let full = direction.return_pct(signal.entry, signal.sl);
            close(signal, obs, ExitReason::StopLoss, full)
        };
    }

    // ── 2. TP2 ──────────────────────────────────────────────────────────
    if let Some(tp2) = signal.tp2 {
        if !signal.tp2_hit && direction.reached(obs.price, tp2) {
            if !signal.tp1_hit {
                apply_tp1_partial(signal, obs);
            }
            signal.tp2_hit = true;
            signal.tp2_closed_at = Some(obs.now);
            signal.tp2_pnl_pct = Some(direction.return_pct(signal.entry, tp2) * TP2_SIZE);
            signal.trailing_active = true;
            signal.trailing_peak_price = Some(match direction {
                crate::tracker::types::Direction::Long => obs.high,
                crate::tracker::types::Direction::Short => obs.low,
            });
            debug!(id = %signal.id, "TP2 hit — trailing armed for the runner");
            return StepOutcome::Updated;
        }
    }

    // ── 3. TP1 ──────────────────────────────────────────────────────────
    if !signal.tp1_hit && direction.reached(obs.price, signal.tp1) {
        if signal.tp2.is_none() {
            // Single-target signal: the whole position exits at TP1.
            signal.tp1_hit = true;
            signal.tp1_closed_at = Some(obs.now);
            let full = direction.return_pct(signal.entry, signal.tp1);
            signal.tp1_pnl_pct = Some(full);
            return close(signal, obs, ExitReason::Tp1, full);
        }
        apply_tp1_partial(signal, obs);
        return StepOutcome::Updated;
    }

    // ── 4. Trailing runner ──────────────────────────────────────────────
    if signal.trailing_active {
        let peak = signal.trailing_peak_price.unwrap_or(obs.price);
        let new_peak = match direction {
            crate::tracker::types::Direction::Long => peak.max(obs.high),
            crate::tracker::types::Direction::Short => peak.min(obs.low),
        };
        signal.trailing_peak_price = Some(new_peak);

        let retracement = match direction {
            crate::tracker::types::Direction::Long => new_peak - obs.price,
            crate::tracker::types::Direction::Short => obs.price - new_peak,
        };
        if retracement >= config.trail_atr_mult * signal.atr_at_entry {
            signal.runner_pnl_pct =
                Some(direction.return_pct(signal.entry, obs.price) * TRAIL_SIZE);
            return close(signal, obs, ExitReason::Trailing, signal.realized_pnl_pct());
        }

        // Post-TP2 time stop: close stale runners.
        if let Some(tp2_at) = signal.tp2_closed_at {
            let stale_hours = (obs.now - tp2_at).num_hours();
            if stale_hours >= config.post_tp2_time_stop_hours {
                signal.runner_pnl_pct =
                    Some(direction.return_pct(signal.entry, obs.price) * TRAIL_SIZE);
                return close(signal, obs, ExitReason::TimeStop, signal.realized_pnl_pct());
            }
        }
    }

    // ── 5. Pre-TP1 time stop ────────────────────────────────────────────
    if !signal.tp1_hit && obs.bars_since_entry >= config.time_stop_bars {
        let full = direction.return_pct(signal.entry, obs.price);
        return close(signal, obs, ExitReason::TimeStop, full);
    }

    let after = (
        signal.mfe_r,
        signal.mae_r,
        signal.trailing_peak_price,
        signal.tp1_hit,
        signal.tp2_hit,
    );
    if before != after {
        StepOutcome::Updated
    } else {
        StepOutcome::NoChange
    }
}

/// TP1 partial: bank 30%, move the stop to entry. Never closes the signal.
fn apply_tp1_partial(signal: &mut Signal, obs: &Observation) {
    signal.tp1_hit = true;
    signal.tp1_closed_at = Some(obs.now);
    signal.tp1_pnl_pct =
        Some(signal.direction.return_pct(signal.entry, signal.tp1) * TP1_SIZE);
    signal.sl = signal.entry;
    debug!(id = %signal.id, "TP1 hit — stop moved to breakeven");
}

fn close(
    signal: &mut Signal,
    obs: &Observation,
    reason: ExitReason,
    final_pnl_pct: f64,
) -> StepOutcome {
    signal.status = SignalStatus::Closed;
    signal.exit_reason = Some(reason);
    signal.closed_at = Some(obs.now);
    signal.bars_to_exit = Some(obs.bars_since_entry);
    signal.final_pnl_pct = Some(final_pnl_pct);
    StepOutcome::Closed(reason)
}

// =============================================================================
// PerformanceTracker
// =============================================================================

pub struct PerformanceTracker {
    store: Arc<Store>,
    locks: Arc<SignalLockTable>,
    journal: Arc<Journal>,
    config: TrackerConfig,
    /// Overlap guard: a cadence tick arriving while a pass is still running
    /// is dropped, not queued.
    check_in_progress: AtomicBool,
}

impl PerformanceTracker {
    pub fn new(
        store: Arc<Store>,
        locks: Arc<SignalLockTable>,
        journal: Arc<Journal>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            store,
            locks,
            journal,
            config,
            check_in_progress: AtomicBool::new(false),
        }
    }

    /// Cadence loop; spawn once at engine startup.
    pub async fn run(self: Arc<Self>) {
        info!(cadence_sec = self.config.cadence_sec, "performance tracker started");
        let mut ticker = interval(Duration::from_secs(self.config.cadence_sec));

        loop {
            ticker.tick().await;

            if self.check_in_progress.swap(true, Ordering::SeqCst) {
                warn!("tracker pass still running — tick dropped");
                continue;
            }
            let result = self.check_all(&HashMap::new()).await;
            self.check_in_progress.store(false, Ordering::SeqCst);

            match result {
                Ok(0) => {}
                Ok(transitions) => debug!(transitions, "tracker pass complete"),
                Err(e) => warn!(error = %e, "tracker pass failed"),
            }
        }
    }

    /// Check every active signal once. Failures on a single signal are
    /// isolated; earlier commits in the same pass are preserved.
    pub async fn check_all(
        &self,
        mark_prices: &HashMap<String, f64>,
    ) -> Result<u32, EngineError> {
        let active = self.store.active_signals().await?;
        let mut transitions = 0u32;

        for mut signal in active {
            match self.check_one(&mut signal, mark_prices).await {
                Ok(true) => transitions += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(id = %signal.id, symbol = %signal.symbol, error = %e,
                        "tracker check failed — signal isolated");
                }
            }
        }
        Ok(transitions)
    }

    async fn check_one(
        &self,
        signal: &mut Signal,
        mark_prices: &HashMap<String, f64>,
    ) -> Result<bool, EngineError> {
        let candles = self
            .store
            .recent_candles(&signal.symbol, signal.timeframe, 1)
            .await?;
        let Some(candle) = candles.last() else {
            return Ok(false);
        };

        // Only bars that closed after entry participate.
        let created_ms = signal.created_at.timestamp_millis();
        if candle.close_time <= created_ms {
            return Ok(false);
        }

        let duration = signal.timeframe.duration_ms();
        let entry_bar_open = signal.timeframe.period_start(created_ms);
        let bars_since_entry = ((candle.open_time - entry_bar_open) / duration).max(0) as u32;

        let mark = mark_prices.get(&signal.symbol).copied();
        let price = mark.unwrap_or(candle.close);
        let obs = Observation {
            price,
            // A fresh mark outside the last bar's range still counts toward
            // the stop and the trailing peak.
            low: candle.low.min(price),
            high: candle.high.max(price),
            bars_since_entry,
            now: Utc::now(),
        };

        match step(signal, &obs, &self.config) {
            StepOutcome::NoChange => Ok(false),
            StepOutcome::Updated => {
                self.store.save_signal(signal).await?;
                Ok(true)
            }
            StepOutcome::Closed(reason) => {
                self.store.save_signal(signal).await?;
                self.locks.release(&signal.lock_key()).await?;
                self.journal.record_signal(&SignalEvent::closed(signal));
                info!(
                    id = %signal.id,
                    symbol = %signal.symbol,
                    strategy = %signal.strategy,
                    reason = %reason,
                    final_pnl_pct = signal.final_pnl_pct.unwrap_or(0.0),
                    mfe_r = signal.mfe_r,
                    mae_r = signal.mae_r,
                    bars = signal.bars_to_exit.unwrap_or(0),
                    "signal closed"
                );
                Ok(true)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::candle::Timeframe;
    use crate::tracker::types::Direction;

    fn config() -> TrackerConfig {
        TrackerConfig::default()
    }

    fn obs(price: f64, bars: u32) -> Observation {
        Observation {
            price,
            low: price,
            high: price,
            bars_since_entry: bars,
            now: Utc::now(),
        }
    }

    fn long_signal(entry: f64, sl: f64, tp1: f64, tp2: Option<f64>, atr: f64) -> Signal {
        Signal::new("BTCUSDT", "break_retest", Direction::Long, Timeframe::M15, entry, sl, tp1, tp2, None, atr).unwrap()
    }

    fn short_signal(entry: f64, sl: f64, tp1: f64, tp2: Option<f64>, atr: f64) -> Signal {
        Signal::new("BTCUSDT", "break_retest", Direction::Short, Timeframe::M15, entry, sl, tp1, tp2, None, atr).unwrap()
    }

    // ── Scenario: TP1 then breakeven ────────────────────────────────────
    #[test]
    fn tp1_then_return_to_entry_closes_breakeven() {
        let mut s = long_signal(100.0, 98.0, 102.0, Some(104.0), 0.5);

        // (103): TP1 fires, stop to breakeven.
        assert_eq!(step(&mut s, &obs(103.0, 1), &config()), StepOutcome::Updated);
        assert!(s.tp1_hit);
        assert!((s.tp1_pnl_pct.unwrap() - 0.6).abs() < 1e-9); // +2% * 0.30
        assert!((s.sl - 100.0).abs() < 1e-12);
        assert_eq!(s.status, SignalStatus::Active);

        // (101.5): nothing.
        step(&mut s, &obs(101.5, 2), &config());
        assert_eq!(s.status, SignalStatus::Active);

        // (100): breakeven close; the banked TP1 partial is the final PnL.
        let outcome = step(&mut s, &obs(100.0, 3), &config());
        assert_eq!(outcome, StepOutcome::Closed(ExitReason::Breakeven));
        assert!((s.final_pnl_pct.unwrap() - 0.6).abs() < 1e-9);
    }

    // ── Scenario: full three-tier short (Action Price SCALP shape) ─────
    #[test]
    fn short_runs_all_three_tiers() {
        let mut s = short_signal(50.0, 51.0, 49.0, Some(48.5), 0.2);

        // (48.8): TP1.
        assert_eq!(step(&mut s, &obs(48.8, 1), &config()), StepOutcome::Updated);
        assert!((s.tp1_pnl_pct.unwrap() - 0.6).abs() < 1e-9); // +2% * 0.30
        assert!((s.sl - 50.0).abs() < 1e-12);

        // (48.4): TP2, trailing armed, peak at the favorable extreme.
        assert_eq!(step(&mut s, &obs(48.4, 2), &config()), StepOutcome::Updated);
        assert!(s.tp2_hit);
        assert!((s.tp2_pnl_pct.unwrap() - 1.2).abs() < 1e-9); // +3% * 0.40
        assert!(s.trailing_active);
        assert!((s.trailing_peak_price.unwrap() - 48.4).abs() < 1e-12);

        // (48.6): retrace 0.2 < 1.2 * ATR (0.24): stays open.
        let outcome = step(&mut s, &obs(48.6, 3), &config());
        assert_ne!(outcome, StepOutcome::Closed(ExitReason::Trailing));
        assert_eq!(s.status, SignalStatus::Active);
        assert!((s.trailing_peak_price.unwrap() - 48.4).abs() < 1e-12);

        // (48.8): retrace 0.4 >= 0.24: runner closes at 48.8.
        let outcome = step(&mut s, &obs(48.8, 4), &config());
        assert_eq!(outcome, StepOutcome::Closed(ExitReason::Trailing));
        assert!((s.runner_pnl_pct.unwrap() - 0.72).abs() < 1e-9); // +2.4% * 0.30
        assert!((s.final_pnl_pct.unwrap() - 2.52).abs() < 1e-9);
    }

    // ── Scenario: straight stop-out ─────────────────────────────────────
    #[test]
    fn stop_loss_closes_full_position() {
        let mut s = long_signal(10.0, 9.0, 11.0, Some(12.0), 0.1);

        let mut o = obs(9.2, 1);
        o.low = 8.9; // wick through the stop
        let outcome = step(&mut s, &o, &config());
        assert_eq!(outcome, StepOutcome::Closed(ExitReason::StopLoss));
        assert!((s.final_pnl_pct.unwrap() + 10.0).abs() < 1e-9);
        assert!(!s.tp1_hit);
    }

    // ── Scenario: time stop before TP1 ─────────────────────────────────
    #[test]
    fn time_stop_fires_at_the_bar_limit() {
        let mut s = long_signal(100.0, 99.0, 101.0, None, 0.5);

        // One bar short of the limit: stays open (the pass only records the
        // favorable excursion).
        assert_ne!(
            step(&mut s, &obs(100.3, 11), &config()),
            StepOutcome::Closed(ExitReason::TimeStop)
        );
        assert_eq!(s.status, SignalStatus::Active);

        // At the limit: closes at the current price, full position.
        let outcome = step(&mut s, &obs(100.3, 12), &config());
        assert_eq!(outcome, StepOutcome::Closed(ExitReason::TimeStop));
        assert!((s.final_pnl_pct.unwrap() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn tp1_only_signal_closes_fully_at_target() {
        let mut s = long_signal(100.0, 99.0, 101.0, None, 0.5);
        let outcome = step(&mut s, &obs(101.0, 2), &config());
        assert_eq!(outcome, StepOutcome::Closed(ExitReason::Tp1));
        assert!((s.final_pnl_pct.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn exactly_at_tp1_counts_as_hit() {
        let mut s = long_signal(100.0, 98.0, 102.0, Some(104.0), 0.5);
        assert_eq!(step(&mut s, &obs(102.0, 1), &config()), StepOutcome::Updated);
        assert!(s.tp1_hit);
    }

    #[test]
    fn jump_through_tp2_banks_tp1_as_well() {
        let mut s = long_signal(100.0, 98.0, 102.0, Some(104.0), 0.5);
        // One candle blows straight through both targets.
        assert_eq!(step(&mut s, &obs(104.5, 1), &config()), StepOutcome::Updated);
        assert!(s.tp1_hit && s.tp2_hit, "tp2_hit implies tp1_hit");
        assert!(s.tp1_pnl_pct.is_some() && s.tp2_pnl_pct.is_some());
        assert!((s.sl - s.entry).abs() < 1e-12);
        assert!(s.trailing_active);
    }

    #[test]
    fn trailing_peak_is_monotonic() {
        let mut s = long_signal(100.0, 98.0, 102.0, Some(104.0), 1.0);
        step(&mut s, &obs(104.0, 1), &config()); // TP2, peak 104
        step(&mut s, &obs(105.0, 2), &config()); // peak 105
        assert!((s.trailing_peak_price.unwrap() - 105.0).abs() < 1e-12);
        step(&mut s, &obs(104.2, 3), &config()); // retrace 0.8 < 1.2
        assert!((s.trailing_peak_price.unwrap() - 105.0).abs() < 1e-12, "peak never moves adversely");
    }

    #[test]
    fn retracement_exactly_at_threshold_closes() {
        let mut s = long_signal(100.0, 98.0, 102.0, Some(104.0), 1.0);
        step(&mut s, &obs(104.0, 1), &config()); // peak 104
        step(&mut s, &obs(106.0, 2), &config()); // peak 106
        // Exactly 1.2 * ATR below the peak.
        let outcome = step(&mut s, &obs(104.8, 3), &config());
        assert_eq!(outcome, StepOutcome::Closed(ExitReason::Trailing));
    }

    #[test]
    fn stale_runner_times_out_after_tp2() {
        let mut s = long_signal(100.0, 98.0, 102.0, Some(104.0), 5.0);
        step(&mut s, &obs(104.0, 1), &config());
        assert!(s.trailing_active);
        // Backdate the TP2 fill past the 72h window.
        s.tp2_closed_at = Some(Utc::now() - chrono::Duration::hours(73));

        let outcome = step(&mut s, &obs(104.5, 300), &config());
        assert_eq!(outcome, StepOutcome::Closed(ExitReason::TimeStop));
        assert!(s.runner_pnl_pct.is_some());
    }

    #[test]
    fn terminal_signal_is_a_no_op() {
        let mut s = long_signal(10.0, 9.0, 11.0, Some(12.0), 0.1);
        let mut o = obs(9.2, 1);
        o.low = 8.9;
        step(&mut s, &o, &config());
        assert!(s.is_terminal());

        let snapshot = s.clone();
        assert_eq!(step(&mut s, &obs(20.0, 5), &config()), StepOutcome::NoChange);
        assert_eq!(s, snapshot, "closed signals never mutate");
    }

    #[test]
    fn mfe_mae_recorded_in_r_multiples() {
        let mut s = long_signal(100.0, 98.0, 102.0, Some(104.0), 0.5); // R = 2
        let mut o = obs(100.5, 1);
        o.high = 103.0; // +1.5R
        o.low = 99.0; // -0.5R
        step(&mut s, &o, &config());
        assert!((s.mfe_r - 1.5).abs() < 1e-9);
        assert!((s.mae_r - 0.5).abs() < 1e-9);
    }

    // ── Integration: store-backed pass ──────────────────────────────────

    async fn tracker_fixture() -> (Arc<Store>, Arc<SignalLockTable>, PerformanceTracker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let locks = Arc::new(SignalLockTable::new(Arc::clone(&store)));
        let journal = Arc::new(
            Journal::open(dir.path().join("signals.jsonl"), dir.path().join("decisions.jsonl"))
                .unwrap(),
        );
        let tracker = PerformanceTracker::new(
            Arc::clone(&store),
            Arc::clone(&locks),
            journal,
            TrackerConfig::default(),
        );
        (store, locks, tracker, dir)
    }

    fn candle_at(open_time: i64, price: f64, low: f64, high: f64) -> crate::market_data::candle::Candle {
        crate::market_data::candle::Candle {
            open_time,
            close_time: open_time + Timeframe::M15.duration_ms() - 1,
            open: price,
            high,
            low,
            close: price,
            volume: 100.0,
            taker_buy_volume: 50.0,
        }
    }

    #[tokio::test]
    async fn pass_closes_stopped_signal_and_releases_lock() {
        let (store, locks, tracker, _dir) = tracker_fixture().await;

        let mut signal = long_signal(100.0, 98.0, 102.0, Some(104.0), 0.5);
        // Entry happened in the past so the next candle counts.
        signal.created_at = Utc::now() - chrono::Duration::minutes(30);
        assert!(locks.try_acquire(&signal.lock_key()).await.unwrap());
        store.save_signal(&signal).await.unwrap();

        // Latest closed candle wicks through the stop.
        let bar_open = Timeframe::M15.period_start(Utc::now().timestamp_millis()) - Timeframe::M15.duration_ms();
        store
            .upsert_candles("BTCUSDT", Timeframe::M15, &[candle_at(bar_open, 99.0, 97.5, 99.5)])
            .await
            .unwrap();

        let transitions = tracker.check_all(&HashMap::new()).await.unwrap();
        assert_eq!(transitions, 1);

        let closed = store.load_signal(&signal.id).await.unwrap().unwrap();
        assert_eq!(closed.status, SignalStatus::Closed);
        assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
        assert!(!locks.is_held(&signal.lock_key()).await.unwrap(), "lock released on close");
    }

    #[tokio::test]
    async fn mark_price_is_preferred_over_the_close() {
        let (store, locks, tracker, _dir) = tracker_fixture().await;

        let mut signal = long_signal(100.0, 98.0, 102.0, Some(104.0), 0.5);
        signal.created_at = Utc::now() - chrono::Duration::minutes(30);
        locks.try_acquire(&signal.lock_key()).await.unwrap();
        store.save_signal(&signal).await.unwrap();

        // Candle alone would not reach TP1, but the fresh mark does.
        let bar_open = Timeframe::M15.period_start(Utc::now().timestamp_millis()) - Timeframe::M15.duration_ms();
        store
            .upsert_candles("BTCUSDT", Timeframe::M15, &[candle_at(bar_open, 101.0, 100.5, 101.5)])
            .await
            .unwrap();

        let marks = HashMap::from([("BTCUSDT".to_string(), 102.5)]);
        tracker.check_all(&marks).await.unwrap();

        let updated = store.load_signal(&signal.id).await.unwrap().unwrap();
        assert!(updated.tp1_hit);
        assert_eq!(updated.status, SignalStatus::Active);
    }

    #[tokio::test]
    async fn pass_without_candles_changes_nothing() {
        let (store, _locks, tracker, _dir) = tracker_fixture().await;
        let mut signal = long_signal(100.0, 98.0, 102.0, None, 0.5);
        signal.created_at = Utc::now() - chrono::Duration::minutes(30);
        store.save_signal(&signal).await.unwrap();

        assert_eq!(tracker.check_all(&HashMap::new()).await.unwrap(), 0);
    }
}
