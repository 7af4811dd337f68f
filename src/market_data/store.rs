// =============================================================================
// SQLite store — candles, signals, locks, rate ledger
// =============================================================================
//
// Table contracts:
//   candles              UNIQUE(symbol, timeframe, open_time); upsert fully
//                        overwrites existing rows (the exchange may revise a
//                        just-closed candle for several seconds).
//   signals              one row per signal, rewritten on every tracker
//                        transition; `action_price_signals` carries the extra
//                        fields for EMA200 body-cross signals.
//   signal_locks         UNIQUE(symbol, direction, strategy); conditional
//                        insert inside a transaction gives the atomic
//                        try-acquire.
//   rate_ledger          singleton row persisting the weight bucket across
//                        restarts.
//
// All statements are runtime-bound (no compile-time schema macros) so the
// crate builds without a database present.
// =============================================================================

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::market_data::candle::{Candle, Timeframe};
use crate::tracker::types::{
    ApComponents, ApDetails, ApMode, Direction, ExitReason, LockKey, Signal, SignalStatus,
};

pub struct Store {
    pool: SqlitePool,
}

/// Win/loss summary over CLOSED signals, counted by terminal exit reason.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SignalStats {
    pub closed: u32,
    pub wins: u32,
    pub losses: u32,
    pub breakeven: u32,
    pub total_pnl_pct: f64,
}

impl SignalStats {
    /// Win rate over decisive outcomes (breakeven excluded).
    pub fn win_rate(&self) -> Option<f64> {
        let decisive = self.wins + self.losses;
        if decisive == 0 {
            None
        } else {
            Some(self.wins as f64 / decisive as f64)
        }
    }
}

impl Store {
    // -------------------------------------------------------------------------
    // Open & migrate
    // -------------------------------------------------------------------------

    pub async fn open(url: &str) -> Result<Self, EngineError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| EngineError::Config(format!("bad database url '{url}': {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "store opened");
        Ok(store)
    }

    /// In-memory store for tests. A single connection keeps the database
    /// alive for the pool's lifetime.
    pub async fn open_in_memory() -> Result<Self, EngineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// One statement per call: sqlite prepares a single statement at a time.
    async fn migrate(&self) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol            TEXT NOT NULL,
                timeframe         TEXT NOT NULL,
                open_time         INTEGER NOT NULL,
                close_time        INTEGER NOT NULL,
                open              REAL NOT NULL,
                high              REAL NOT NULL,
                low               REAL NOT NULL,
                close             REAL NOT NULL,
                volume            REAL NOT NULL,
                taker_buy_volume  REAL NOT NULL,
                PRIMARY KEY (symbol, timeframe, open_time)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id                  TEXT PRIMARY KEY,
                symbol              TEXT NOT NULL,
                strategy            TEXT NOT NULL,
                direction           TEXT NOT NULL,
                timeframe           TEXT NOT NULL,
                entry               REAL NOT NULL,
                sl                  REAL NOT NULL,
                initial_sl          REAL NOT NULL,
                tp1                 REAL NOT NULL,
                tp2                 REAL,
                tp3                 REAL,
                atr_at_entry        REAL NOT NULL,
                tp1_hit             INTEGER NOT NULL,
                tp1_closed_at       TEXT,
                tp1_pnl_pct         REAL,
                tp2_hit             INTEGER NOT NULL,
                tp2_closed_at       TEXT,
                tp2_pnl_pct         REAL,
                trailing_active     INTEGER NOT NULL,
                trailing_peak_price REAL,
                runner_pnl_pct      REAL,
                status              TEXT NOT NULL,
                exit_reason         TEXT,
                created_at          TEXT NOT NULL,
                closed_at           TEXT,
                bars_to_exit        INTEGER,
                mfe_r               REAL NOT NULL,
                mae_r               REAL NOT NULL,
                final_pnl_pct       REAL,
                market_regime       TEXT NOT NULL,
                confidence_score    REAL NOT NULL,
                meta                TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS action_price_signals (
                signal_id             TEXT PRIMARY KEY,
                mode                  TEXT NOT NULL,
                initiator_size        REAL NOT NULL,
                ema_proximity         REAL NOT NULL,
                pullback_depth        REAL NOT NULL,
                ema_slope             REAL NOT NULL,
                fan_compactness       REAL NOT NULL,
                retest                REAL NOT NULL,
                break_and_base        REAL NOT NULL,
                rejection_wick        REAL NOT NULL,
                volume_confirmation   REAL NOT NULL,
                sticky_penalty        REAL NOT NULL,
                overextension_penalty REAL NOT NULL,
                total_score           REAL NOT NULL,
                initiator_time        INTEGER NOT NULL,
                confirm_open          REAL NOT NULL,
                confirm_high          REAL NOT NULL,
                confirm_low           REAL NOT NULL,
                confirm_close         REAL NOT NULL,
                ema200_at_entry       REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signal_locks (
                symbol      TEXT NOT NULL,
                direction   TEXT NOT NULL,
                strategy    TEXT NOT NULL,
                acquired_at INTEGER NOT NULL,
                ttl_ms      INTEGER NOT NULL,
                PRIMARY KEY (symbol, direction, strategy)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_ledger (
                id                INTEGER PRIMARY KEY CHECK (id = 1),
                bucket_start      INTEGER NOT NULL,
                weight_used       INTEGER NOT NULL,
                ban_until         INTEGER,
                reset_observed_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Candles
    // -------------------------------------------------------------------------

    /// Upsert a batch of candles; existing rows for the same key are fully
    /// replaced.
    pub async fn upsert_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;
        for c in candles {
            sqlx::query(
                r#"
                INSERT INTO candles
                    (symbol, timeframe, open_time, close_time, open, high, low, close, volume, taker_buy_volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (symbol, timeframe, open_time) DO UPDATE SET
                    close_time = excluded.close_time,
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    taker_buy_volume = excluded.taker_buy_volume
                "#,
            )
            .bind(symbol)
            .bind(timeframe.interval())
            .bind(c.open_time)
            .bind(c.close_time)
            .bind(c.open)
            .bind(c.high)
            .bind(c.low)
            .bind(c.close)
            .bind(c.volume)
            .bind(c.taker_buy_volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(symbol, tf = %timeframe, count = candles.len(), "candles upserted");
        Ok(())
    }

    /// Close time of the newest stored candle for the series, if any.
    pub async fn last_close_time(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<i64>, EngineError> {
        let row = sqlx::query(
            "SELECT MAX(close_time) AS last_close FROM candles WHERE symbol = ? AND timeframe = ?",
        )
        .bind(symbol)
        .bind(timeframe.interval())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<Option<i64>, _>("last_close")?)
    }

    /// The most recent `n` candles, oldest-first.
    pub async fn recent_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: u32,
    ) -> Result<Vec<Candle>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT open_time, close_time, open, high, low, close, volume, taker_buy_volume
            FROM candles
            WHERE symbol = ? AND timeframe = ?
            ORDER BY open_time DESC
            LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(timeframe.interval())
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        let mut candles: Vec<Candle> = rows.iter().map(candle_from_row).collect::<Result<_, _>>()?;
        candles.reverse();
        Ok(candles)
    }

    /// Open times of the most recent `n` candles, oldest-first — used by the
    /// gap scan without materialising full rows.
    pub async fn recent_open_times(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: u32,
    ) -> Result<Vec<i64>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT open_time FROM candles
            WHERE symbol = ? AND timeframe = ?
            ORDER BY open_time DESC
            LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(timeframe.interval())
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        let mut times: Vec<i64> = rows
            .iter()
            .map(|r| r.try_get::<i64, _>("open_time"))
            .collect::<Result<_, _>>()?;
        times.reverse();
        Ok(times)
    }

    // -------------------------------------------------------------------------
    // Signals
    // -------------------------------------------------------------------------

    /// Insert or fully rewrite a signal row (and its Action Price extras when
    /// present). Each tracker transition commits individually through this.
    pub async fn save_signal(&self, signal: &Signal) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO signals (
                id, symbol, strategy, direction, timeframe,
                entry, sl, initial_sl, tp1, tp2, tp3, atr_at_entry,
                tp1_hit, tp1_closed_at, tp1_pnl_pct,
                tp2_hit, tp2_closed_at, tp2_pnl_pct,
                trailing_active, trailing_peak_price, runner_pnl_pct,
                status, exit_reason, created_at, closed_at, bars_to_exit,
                mfe_r, mae_r, final_pnl_pct,
                market_regime, confidence_score, meta
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.id)
        .bind(&signal.symbol)
        .bind(&signal.strategy)
        .bind(signal.direction.to_string())
        .bind(signal.timeframe.interval())
        .bind(signal.entry)
        .bind(signal.sl)
        .bind(signal.initial_sl)
        .bind(signal.tp1)
        .bind(signal.tp2)
        .bind(signal.tp3)
        .bind(signal.atr_at_entry)
        .bind(signal.tp1_hit)
        .bind(signal.tp1_closed_at.map(|t| t.to_rfc3339()))
        .bind(signal.tp1_pnl_pct)
        .bind(signal.tp2_hit)
        .bind(signal.tp2_closed_at.map(|t| t.to_rfc3339()))
        .bind(signal.tp2_pnl_pct)
        .bind(signal.trailing_active)
        .bind(signal.trailing_peak_price)
        .bind(signal.runner_pnl_pct)
        .bind(signal.status.to_string())
        .bind(signal.exit_reason.map(|r| r.to_string()))
        .bind(signal.created_at.to_rfc3339())
        .bind(signal.closed_at.map(|t| t.to_rfc3339()))
        .bind(signal.bars_to_exit)
        .bind(signal.mfe_r)
        .bind(signal.mae_r)
        .bind(signal.final_pnl_pct)
        .bind(&signal.market_regime)
        .bind(signal.confidence_score)
        .bind(signal.meta.to_string())
        .execute(&mut *tx)
        .await?;

        if let Some(ap) = &signal.action_price {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO action_price_signals (
                    signal_id, mode,
                    initiator_size, ema_proximity, pullback_depth, ema_slope,
                    fan_compactness, retest, break_and_base, rejection_wick,
                    volume_confirmation, sticky_penalty, overextension_penalty,
                    total_score, initiator_time,
                    confirm_open, confirm_high, confirm_low, confirm_close,
                    ema200_at_entry
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&signal.id)
            .bind(ap.mode.to_string())
            .bind(ap.components.initiator_size)
            .bind(ap.components.ema_proximity)
            .bind(ap.components.pullback_depth)
            .bind(ap.components.ema_slope)
            .bind(ap.components.fan_compactness)
            .bind(ap.components.retest)
            .bind(ap.components.break_and_base)
            .bind(ap.components.rejection_wick)
            .bind(ap.components.volume_confirmation)
            .bind(ap.components.sticky_penalty)
            .bind(ap.components.overextension_penalty)
            .bind(ap.total_score)
            .bind(ap.initiator_time)
            .bind(ap.confirm_open)
            .bind(ap.confirm_high)
            .bind(ap.confirm_low)
            .bind(ap.confirm_close)
            .bind(ap.ema200_at_entry)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn load_signal(&self, id: &str) -> Result<Option<Signal>, EngineError> {
        let row = sqlx::query("SELECT * FROM signals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut signal = signal_from_row(&row)?;
                signal.action_price = self.load_ap_details(id).await?;
                Ok(Some(signal))
            }
            None => Ok(None),
        }
    }

    /// All non-terminal signals, used to rebuild tracker state and locks on
    /// process start.
    pub async fn active_signals(&self) -> Result<Vec<Signal>, EngineError> {
        let rows = sqlx::query("SELECT * FROM signals WHERE status != 'CLOSED' ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        let mut signals = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut signal = signal_from_row(row)?;
            signal.action_price = self.load_ap_details(&signal.id).await?;
            signals.push(signal);
        }
        Ok(signals)
    }

    async fn load_ap_details(&self, signal_id: &str) -> Result<Option<ApDetails>, EngineError> {
        let row = sqlx::query("SELECT * FROM action_price_signals WHERE signal_id = ?")
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| ap_details_from_row(&row)).transpose()
    }

    /// Win/loss summary counted exclusively by terminal exit reason.
    pub async fn signal_stats(&self) -> Result<SignalStats, EngineError> {
        let rows = sqlx::query(
            "SELECT exit_reason, final_pnl_pct FROM signals WHERE status = 'CLOSED'",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = SignalStats::default();
        for row in &rows {
            let reason: Option<String> = row.try_get("exit_reason")?;
            let pnl: Option<f64> = row.try_get("final_pnl_pct")?;
            let Some(reason) = reason.as_deref().and_then(ExitReason::parse) else {
                continue;
            };
            stats.closed += 1;
            stats.total_pnl_pct += pnl.unwrap_or(0.0);
            if reason == ExitReason::Breakeven {
                stats.breakeven += 1;
            } else if reason.is_win() {
                stats.wins += 1;
            } else {
                stats.losses += 1;
            }
        }
        Ok(stats)
    }

    // -------------------------------------------------------------------------
    // Signal locks
    // -------------------------------------------------------------------------

    /// Atomic conditional insert: returns true iff no non-expired row existed
    /// for the key. Expired rows are purged inside the same transaction.
    pub async fn try_acquire_lock(
        &self,
        key: &LockKey,
        ttl_ms: i64,
        now_ms: i64,
    ) -> Result<bool, EngineError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM signal_locks
             WHERE symbol = ? AND direction = ? AND strategy = ? AND acquired_at + ttl_ms <= ?",
        )
        .bind(&key.symbol)
        .bind(key.direction.to_string())
        .bind(&key.strategy)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO signal_locks (symbol, direction, strategy, acquired_at, ttl_ms)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&key.symbol)
        .bind(key.direction.to_string())
        .bind(&key.strategy)
        .bind(now_ms)
        .bind(ttl_ms)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn release_lock(&self, key: &LockKey) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM signal_locks WHERE symbol = ? AND direction = ? AND strategy = ?")
            .bind(&key.symbol)
            .bind(key.direction.to_string())
            .bind(&key.strategy)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn lock_held(&self, key: &LockKey, now_ms: i64) -> Result<bool, EngineError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS held FROM signal_locks
             WHERE symbol = ? AND direction = ? AND strategy = ? AND acquired_at + ttl_ms > ?",
        )
        .bind(&key.symbol)
        .bind(key.direction.to_string())
        .bind(&key.strategy)
        .bind(now_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("held")? > 0)
    }

    // -------------------------------------------------------------------------
    // Rate ledger
    // -------------------------------------------------------------------------

    pub async fn save_rate_ledger(
        &self,
        bucket_start: i64,
        weight_used: u32,
        ban_until: Option<i64>,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO rate_ledger (id, bucket_start, weight_used, ban_until, reset_observed_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                bucket_start = excluded.bucket_start,
                weight_used = excluded.weight_used,
                ban_until = excluded.ban_until,
                reset_observed_at = excluded.reset_observed_at
            "#,
        )
        .bind(bucket_start)
        .bind(weight_used)
        .bind(ban_until)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Restore the persisted ban deadline, if any — consulted once at start
    /// so a restart does not resume hammering a banned endpoint.
    pub async fn load_ban_until(&self) -> Result<Option<i64>, EngineError> {
        let row = sqlx::query("SELECT ban_until FROM rate_ledger WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.try_get::<Option<i64>, _>("ban_until").ok().flatten()))
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn candle_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Candle, EngineError> {
    Ok(Candle {
        open_time: row.try_get("open_time")?,
        close_time: row.try_get("close_time")?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get("volume")?,
        taker_buy_volume: row.try_get("taker_buy_volume")?,
    })
}

fn parse_time(value: Option<String>) -> Result<Option<DateTime<Utc>>, EngineError> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| EngineError::Invariant(format!("bad timestamp '{s}' in store: {e}")))
        })
        .transpose()
}

fn signal_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Signal, EngineError> {
    let direction: String = row.try_get("direction")?;
    let timeframe: String = row.try_get("timeframe")?;
    let status: String = row.try_get("status")?;
    let exit_reason: Option<String> = row.try_get("exit_reason")?;
    let meta: String = row.try_get("meta")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Signal {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        strategy: row.try_get("strategy")?,
        direction: Direction::parse(&direction)
            .ok_or_else(|| EngineError::Invariant(format!("bad direction '{direction}'")))?,
        timeframe: Timeframe::parse(&timeframe)
            .ok_or_else(|| EngineError::Invariant(format!("bad timeframe '{timeframe}'")))?,
        entry: row.try_get("entry")?,
        sl: row.try_get("sl")?,
        initial_sl: row.try_get("initial_sl")?,
        tp1: row.try_get("tp1")?,
        tp2: row.try_get("tp2")?,
        tp3: row.try_get("tp3")?,
        atr_at_entry: row.try_get("atr_at_entry")?,
        tp1_hit: row.try_get("tp1_hit")?,
        tp1_closed_at: parse_time(row.try_get("tp1_closed_at")?)?,
        tp1_pnl_pct: row.try_get("tp1_pnl_pct")?,
        tp2_hit: row.try_get("tp2_hit")?,
        tp2_closed_at: parse_time(row.try_get("tp2_closed_at")?)?,
        tp2_pnl_pct: row.try_get("tp2_pnl_pct")?,
        trailing_active: row.try_get("trailing_active")?,
        trailing_peak_price: row.try_get("trailing_peak_price")?,
        runner_pnl_pct: row.try_get("runner_pnl_pct")?,
        status: SignalStatus::parse(&status)
            .ok_or_else(|| EngineError::Invariant(format!("bad status '{status}'")))?,
        exit_reason: exit_reason.as_deref().and_then(ExitReason::parse),
        created_at: parse_time(Some(created_at))?
            .ok_or_else(|| EngineError::Invariant("missing created_at".into()))?,
        closed_at: parse_time(row.try_get("closed_at")?)?,
        bars_to_exit: row.try_get("bars_to_exit")?,
        mfe_r: row.try_get("mfe_r")?,
        mae_r: row.try_get("mae_r")?,
        final_pnl_pct: row.try_get("final_pnl_pct")?,
        market_regime: row.try_get("market_regime")?,
        confidence_score: row.try_get("confidence_score")?,
        meta: serde_json::from_str(&meta).unwrap_or(serde_json::Value::Null),
        action_price: None,
    })
}

fn ap_details_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ApDetails, EngineError> {
    let mode: String = row.try_get("mode")?;
    Ok(ApDetails {
        mode: ApMode::parse(&mode)
            .ok_or_else(|| EngineError::Invariant(format!("bad ap mode '{mode}'")))?,
        components: ApComponents {
            initiator_size: row.try_get("initiator_size")?,
            ema_proximity: row.try_get("ema_proximity")?,
            pullback_depth: row.try_get("pullback_depth")?,
            ema_slope: row.try_get("ema_slope")?,
            fan_compactness: row.try_get("fan_compactness")?,
            retest: row.try_get("retest")?,
            break_and_base: row.try_get("break_and_base")?,
            rejection_wick: row.try_get("rejection_wick")?,
            volume_confirmation: row.try_get("volume_confirmation")?,
            sticky_penalty: row.try_get("sticky_penalty")?,
            overextension_penalty: row.try_get("overextension_penalty")?,
        },
        total_score: row.try_get("total_score")?,
        initiator_time: row.try_get("initiator_time")?,
        confirm_open: row.try_get("confirm_open")?,
        confirm_high: row.try_get("confirm_high")?,
        confirm_low: row.try_get("confirm_low")?,
        confirm_close: row.try_get("confirm_close")?,
        ema200_at_entry: row.try_get("ema200_at_entry")?,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + Timeframe::M15.duration_ms() - 1,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            taker_buy_volume: 55.0,
        }
    }

    fn sample_signal() -> Signal {
        let mut s = Signal::new(
            "BTCUSDT",
            "liquidity_sweep",
            Direction::Long,
            Timeframe::M15,
            100.0,
            98.0,
            102.0,
            Some(104.0),
            None,
            0.5,
        )
        .unwrap();
        s.market_regime = "TREND".into();
        s.confidence_score = 4.2;
        s.meta = serde_json::json!({ "factors": 4 });
        s
    }

    #[tokio::test]
    async fn upsert_replaces_existing_rows() {
        let store = Store::open_in_memory().await.unwrap();

        store
            .upsert_candles("BTCUSDT", Timeframe::M15, &[candle(0, 100.0)])
            .await
            .unwrap();
        // Exchange revises the same candle a few seconds later.
        store
            .upsert_candles("BTCUSDT", Timeframe::M15, &[candle(0, 101.5)])
            .await
            .unwrap();

        let rows = store.recent_candles("BTCUSDT", Timeframe::M15, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].close - 101.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn recent_candles_oldest_first() {
        let store = Store::open_in_memory().await.unwrap();
        let step = Timeframe::M15.duration_ms();
        let batch: Vec<Candle> = (0..5).map(|i| candle(i * step, 100.0 + i as f64)).collect();
        store.upsert_candles("ETHUSDT", Timeframe::M15, &batch).await.unwrap();

        let rows = store.recent_candles("ETHUSDT", Timeframe::M15, 3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].open_time < rows[1].open_time && rows[1].open_time < rows[2].open_time);
        assert!((rows[2].close - 104.0).abs() < 1e-12);

        let last = store.last_close_time("ETHUSDT", Timeframe::M15).await.unwrap();
        assert_eq!(last, Some(4 * step + step - 1));
    }

    #[tokio::test]
    async fn series_are_keyed_by_symbol_and_timeframe() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .upsert_candles("BTCUSDT", Timeframe::M15, &[candle(0, 100.0)])
            .await
            .unwrap();
        store
            .upsert_candles("BTCUSDT", Timeframe::H1, &[candle(0, 200.0)])
            .await
            .unwrap();

        let m15 = store.recent_candles("BTCUSDT", Timeframe::M15, 10).await.unwrap();
        let h1 = store.recent_candles("BTCUSDT", Timeframe::H1, 10).await.unwrap();
        assert_eq!(m15.len(), 1);
        assert_eq!(h1.len(), 1);
        assert!((h1[0].close - 200.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn signal_roundtrip_reproduces_every_field() {
        let store = Store::open_in_memory().await.unwrap();
        let mut signal = sample_signal();
        signal.tp1_hit = true;
        signal.tp1_closed_at = Some(Utc::now());
        signal.tp1_pnl_pct = Some(0.6);
        signal.sl = signal.entry; // moved to breakeven
        signal.mfe_r = 1.5;
        signal.mae_r = 0.25;

        store.save_signal(&signal).await.unwrap();
        let loaded = store.load_signal(&signal.id).await.unwrap().unwrap();
        assert_eq!(signal, loaded);
    }

    #[tokio::test]
    async fn action_price_extras_roundtrip() {
        let store = Store::open_in_memory().await.unwrap();
        let mut signal = sample_signal();
        signal.strategy = "action_price".into();
        signal.action_price = Some(ApDetails {
            mode: ApMode::Scalp,
            components: ApComponents {
                initiator_size: 2.0,
                volume_confirmation: 2.0,
                sticky_penalty: -2.0,
                ..Default::default()
            },
            total_score: 6.5,
            initiator_time: 1_700_000_000_000,
            confirm_open: 100.0,
            confirm_high: 101.0,
            confirm_low: 99.5,
            confirm_close: 100.8,
            ema200_at_entry: 99.7,
        });

        store.save_signal(&signal).await.unwrap();
        let loaded = store.load_signal(&signal.id).await.unwrap().unwrap();
        assert_eq!(signal, loaded);
    }

    #[tokio::test]
    async fn active_signals_excludes_closed() {
        let store = Store::open_in_memory().await.unwrap();
        let open = sample_signal();
        let mut closed = sample_signal();
        closed.status = SignalStatus::Closed;
        closed.exit_reason = Some(ExitReason::StopLoss);
        closed.final_pnl_pct = Some(-2.0);

        store.save_signal(&open).await.unwrap();
        store.save_signal(&closed).await.unwrap();

        let active = store.active_signals().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, open.id);
    }

    #[tokio::test]
    async fn lock_acquire_is_exclusive_until_released() {
        let store = Store::open_in_memory().await.unwrap();
        let key = sample_signal().lock_key();
        let now = 1_000_000;

        assert!(store.try_acquire_lock(&key, 60_000, now).await.unwrap());
        // Second acquire while held fails.
        assert!(!store.try_acquire_lock(&key, 60_000, now + 1).await.unwrap());
        assert!(store.lock_held(&key, now + 1).await.unwrap());

        store.release_lock(&key).await.unwrap();
        assert!(store.try_acquire_lock(&key, 60_000, now + 2).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let store = Store::open_in_memory().await.unwrap();
        let key = sample_signal().lock_key();

        assert!(store.try_acquire_lock(&key, 1_000, 0).await.unwrap());
        // Not yet expired.
        assert!(!store.try_acquire_lock(&key, 1_000, 999).await.unwrap());
        // Expired exactly at acquired_at + ttl.
        assert!(store.try_acquire_lock(&key, 1_000, 1_000).await.unwrap());
    }

    #[tokio::test]
    async fn stats_count_by_terminal_exit_reason() {
        let store = Store::open_in_memory().await.unwrap();

        let mut win = sample_signal();
        win.status = SignalStatus::Closed;
        win.exit_reason = Some(ExitReason::Tp2);
        win.final_pnl_pct = Some(1.8);

        let mut loss = sample_signal();
        loss.status = SignalStatus::Closed;
        loss.exit_reason = Some(ExitReason::StopLoss);
        loss.final_pnl_pct = Some(-2.0);

        let mut flat = sample_signal();
        flat.status = SignalStatus::Closed;
        flat.exit_reason = Some(ExitReason::Breakeven);
        flat.final_pnl_pct = Some(0.6);

        for s in [&win, &loss, &flat] {
            store.save_signal(s).await.unwrap();
        }

        let stats = store.signal_stats().await.unwrap();
        assert_eq!(stats.closed, 3);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.breakeven, 1);
        assert!((stats.total_pnl_pct - 0.4).abs() < 1e-9);
        assert!((stats.win_rate().unwrap() - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn rate_ledger_singleton_row() {
        let store = Store::open_in_memory().await.unwrap();
        store.save_rate_ledger(0, 100, None).await.unwrap();
        store.save_rate_ledger(60_000, 10, Some(120_000)).await.unwrap();
        assert_eq!(store.load_ban_until().await.unwrap(), Some(120_000));
    }
}
