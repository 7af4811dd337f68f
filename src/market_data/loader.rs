// =============================================================================
// Candle Loader — keeps per-(symbol, timeframe) series fresh and gap-free
// =============================================================================
//
// Refresh path per timeframe:
//   1. Freshness short-circuit: if the newest stored close_time already
//      covers every closed period, no API call is made at all.
//   2. Otherwise fetch klines sized to the gap (paginated under the
//      per-request cap), drop any not-yet-closed candle the exchange returns,
//      and upsert the rest.
//
// A series is dense iff every consecutive open-time delta equals the
// timeframe's canonical duration; the tail scan finds holes and the loader
// auto-fixes those younger than the refresh horizon.
//
// Per-cycle refresh across symbols runs through a bounded worker pool; each
// worker reserves rate budget inside the client before calling the exchange,
// and completed symbols are announced on a ready queue so strategy
// evaluation can start without waiting for the whole batch.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::binance::client::FuturesClient;
use crate::config::LoaderConfig;
use crate::error::EngineError;
use crate::market_data::candle::{Candle, Timeframe};
use crate::market_data::store::Store;

/// Exchange per-request kline cap used for pagination.
const MAX_KLINES_PER_REQUEST: u32 = 1000;

/// How many tail candles the gap scan inspects.
const GAP_SCAN_TAIL: u32 = 200;

// =============================================================================
// Pure helpers (unit-tested without I/O)
// =============================================================================

/// Whether a refresh call is needed at all. The newest closed candle of the
/// current wall-clock period closes at `period_start(now) - 1`; stored data
/// at or past that point means nothing new has closed.
pub fn needs_refresh(last_close_time: Option<i64>, now_ms: i64, timeframe: Timeframe) -> bool {
    match last_close_time {
        None => true,
        Some(last) => last < timeframe.period_start(now_ms) - 1,
    }
}

/// Number of candles required to cover `[from_ms, now_ms]`.
pub fn bars_to_cover(from_ms: i64, now_ms: i64, timeframe: Timeframe) -> u32 {
    if from_ms >= now_ms {
        return 0;
    }
    let span = now_ms - from_ms;
    let duration = timeframe.duration_ms();
    ((span + duration - 1) / duration + 1).min(u32::MAX as i64) as u32
}

/// Find holes in an ascending open-time sequence. Each hole is reported as
/// `(first_missing_open, last_missing_open)`.
pub fn find_gaps(open_times: &[i64], timeframe: Timeframe) -> Vec<(i64, i64)> {
    let duration = timeframe.duration_ms();
    let mut gaps = Vec::new();
    for pair in open_times.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > duration {
            gaps.push((pair[0] + duration, pair[1] - duration));
        }
    }
    gaps
}

// =============================================================================
// CandleLoader
// =============================================================================

pub struct CandleLoader {
    client: Arc<FuturesClient>,
    store: Arc<Store>,
    config: LoaderConfig,
}

impl CandleLoader {
    pub fn new(client: Arc<FuturesClient>, store: Arc<Store>, config: LoaderConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    // -------------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------------

    /// Bring every requested timeframe of one symbol up to date. Skips
    /// timeframes whose stored data already covers the current period.
    pub async fn refresh_recent(
        &self,
        symbol: &str,
        timeframes: &[Timeframe],
        deadline_ms: i64,
    ) -> Result<(), EngineError> {
        let now = Utc::now().timestamp_millis();
        let horizon_ms = self.config.refresh_horizon_days * 86_400_000;

        for &tf in timeframes {
            let last = self.store.last_close_time(symbol, tf).await?;

            if !needs_refresh(last, now, tf) {
                debug!(symbol, tf = %tf, "series fresh — skipping API call");
                continue;
            }

            let from = match last {
                Some(last_close) => (last_close + 1).max(now - horizon_ms),
                None => now - horizon_ms,
            };

            self.fetch_range(symbol, tf, from, now, deadline_ms).await?;
            self.scan_and_fix_gaps(symbol, tf, deadline_ms).await?;
        }
        Ok(())
    }

    /// Fill an explicit historical hole, paginating under the per-request
    /// cap. Rate budget is reserved per page inside the client.
    pub async fn backfill_gap(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
        deadline_ms: i64,
    ) -> Result<u32, EngineError> {
        self.fetch_range(symbol, timeframe, from_ms, to_ms, deadline_ms)
            .await
    }

    /// Shared fetch loop: page through `[from_ms, to_ms]`, drop unclosed
    /// candles, upsert the rest. Returns the number of stored candles.
    async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
        deadline_ms: i64,
    ) -> Result<u32, EngineError> {
        let mut cursor = from_ms;
        let mut stored: u32 = 0;

        loop {
            let now = Utc::now().timestamp_millis();
            let remaining = bars_to_cover(cursor, to_ms, timeframe);
            if remaining == 0 {
                break;
            }
            let limit = remaining.min(MAX_KLINES_PER_REQUEST);

            let batch = self
                .client
                .get_klines(symbol, timeframe, limit, Some(cursor), deadline_ms)
                .await?;

            if batch.is_empty() {
                break;
            }

            let last_open = batch.last().map(|c| c.open_time).unwrap_or(cursor);

            // Only fully closed candles within the requested range persist.
            let closed: Vec<Candle> = batch
                .into_iter()
                .filter(|c| c.is_closed_at(now) && c.open_time <= to_ms)
                .collect();

            stored += closed.len() as u32;
            if !closed.is_empty() {
                self.store.upsert_candles(symbol, timeframe, &closed).await?;
            }

            if last_open >= to_ms || limit < MAX_KLINES_PER_REQUEST {
                break;
            }
            cursor = last_open + timeframe.duration_ms();
        }

        if stored > 0 {
            debug!(symbol, tf = %timeframe, stored, "candles refreshed");
        }
        Ok(stored)
    }

    /// The most recent `n` closed candles, oldest-first.
    pub async fn recent_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: u32,
    ) -> Result<Vec<Candle>, EngineError> {
        self.store.recent_candles(symbol, timeframe, n).await
    }

    // -------------------------------------------------------------------------
    // Gap repair
    // -------------------------------------------------------------------------

    /// Scan the stored tail for holes and backfill the ones younger than the
    /// refresh horizon. Older holes are left to explicit backfill commands.
    pub async fn scan_and_fix_gaps(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        deadline_ms: i64,
    ) -> Result<(), EngineError> {
        let open_times = self
            .store
            .recent_open_times(symbol, timeframe, GAP_SCAN_TAIL)
            .await?;
        let gaps = find_gaps(&open_times, timeframe);
        if gaps.is_empty() {
            return Ok(());
        }

        let now = Utc::now().timestamp_millis();
        let horizon_floor = now - self.config.refresh_horizon_days * 86_400_000;

        for (from, to) in gaps {
            if to < horizon_floor {
                debug!(symbol, tf = %timeframe, from, to, "gap beyond horizon — left alone");
                continue;
            }
            warn!(symbol, tf = %timeframe, from, to, "gap detected — backfilling");
            self.backfill_gap(symbol, timeframe, from, to + timeframe.duration_ms(), deadline_ms)
                .await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Bounded-parallel refresh across symbols
    // -------------------------------------------------------------------------

    /// Refresh every symbol through a bounded worker pool. Completed symbols
    /// are announced on `ready_tx` immediately so evaluation can begin while
    /// slower symbols are still loading. Per-symbol failures are isolated and
    /// returned; they never abort the batch.
    pub async fn refresh_all(
        self: &Arc<Self>,
        symbols: &[String],
        timeframes: &[Timeframe],
        deadline_ms: i64,
        ready_tx: mpsc::Sender<String>,
    ) -> Vec<(String, EngineError)> {
        let semaphore = Arc::new(Semaphore::new(self.config.parallel_max));
        let mut handles = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            let loader = Arc::clone(self);
            let permit_source = Arc::clone(&semaphore);
            let symbol = symbol.clone();
            let timeframes = timeframes.to_vec();
            let ready = ready_tx.clone();

            handles.push(tokio::spawn(async move {
                let _slot = permit_source
                    .acquire_owned()
                    .await
                    .expect("refresh semaphore closed");

                match loader.refresh_recent(&symbol, &timeframes, deadline_ms).await {
                    Ok(()) => {
                        let _ = ready.send(symbol).await;
                        None
                    }
                    Err(e) => Some((symbol, e)),
                }
            }));
        }
        drop(ready_tx);

        let mut failures = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(failure)) => failures.push(failure),
                Ok(None) => {}
                Err(join_err) => {
                    warn!(error = %join_err, "refresh worker panicked");
                }
            }
        }

        if !failures.is_empty() {
            info!(
                failed = failures.len(),
                "refresh batch completed with unhealthy symbols"
            );
        }
        failures
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const M15: i64 = 900_000;

    #[test]
    fn fresh_series_needs_no_call() {
        let tf = Timeframe::M15;
        let now = 1_700_000_000_000i64;
        let newest_closed = tf.period_start(now) - 1;

        // Stored data covers the newest closed candle: skip.
        assert!(!needs_refresh(Some(newest_closed), now, tf));
        // Running "twice with no new candles" stays a no-op.
        assert!(!needs_refresh(Some(newest_closed), now + 1_000, tf));
    }

    #[test]
    fn stale_or_missing_series_needs_call() {
        let tf = Timeframe::M15;
        let now = 1_700_000_000_000i64;

        assert!(needs_refresh(None, now, tf));
        // One period behind.
        let behind = tf.period_start(now) - 1 - tf.duration_ms();
        assert!(needs_refresh(Some(behind), now, tf));
    }

    #[test]
    fn bars_to_cover_rounds_up() {
        let tf = Timeframe::M15;
        assert_eq!(bars_to_cover(0, 0, tf), 0);
        assert_eq!(bars_to_cover(100, 0, tf), 0);
        // Half a candle still needs one bar (plus the overlap bar).
        assert_eq!(bars_to_cover(0, M15 / 2, tf), 2);
        assert_eq!(bars_to_cover(0, M15 * 10, tf), 11);
    }

    #[test]
    fn dense_series_has_no_gaps() {
        let times: Vec<i64> = (0..10).map(|i| i * M15).collect();
        assert!(find_gaps(&times, Timeframe::M15).is_empty());
    }

    #[test]
    fn single_missing_candle_is_detected() {
        // Candle at 2*M15 missing.
        let times = vec![0, M15, 3 * M15, 4 * M15];
        let gaps = find_gaps(&times, Timeframe::M15);
        assert_eq!(gaps, vec![(2 * M15, 2 * M15)]);
    }

    #[test]
    fn multi_candle_hole_spans_the_range() {
        let times = vec![0, M15, 5 * M15];
        let gaps = find_gaps(&times, Timeframe::M15);
        assert_eq!(gaps, vec![(2 * M15, 4 * M15)]);
    }

    #[test]
    fn short_series_has_no_gaps() {
        assert!(find_gaps(&[], Timeframe::M15).is_empty());
        assert!(find_gaps(&[42 * M15], Timeframe::M15).is_empty());
    }
}
