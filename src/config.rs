// =============================================================================
// Engine Configuration — recognized options only, atomic save
// =============================================================================
//
// Central configuration hub for the Meridian signal engine. Every tunable
// lives here, grouped by subsystem. Each field carries `#[serde(default)]`
// so older config files keep loading when new fields are added; unknown keys
// are rejected at load so a typo never silently falls back to a default.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_threshold_fraction() -> f64 {
    0.55
}

fn default_hard_limit_per_min() -> u32 {
    2400
}

fn default_ban_grace_ms() -> i64 {
    2_000
}

fn default_minute_window_ms() -> i64 {
    60_000
}

fn default_parallel_max() -> usize {
    50
}

fn default_refresh_horizon_days() -> i64 {
    10
}

fn default_settle_delay_sec() -> u64 {
    31
}

fn default_cycle_budget_sec() -> u64 {
    300
}

fn default_cadence_sec() -> u64 {
    60
}

fn default_time_stop_bars() -> u32 {
    12
}

fn default_post_tp2_time_stop_hours() -> i64 {
    72
}

fn default_trail_atr_mult() -> f64 {
    1.2
}

fn default_enter_threshold() -> f64 {
    3.0
}

fn default_min_factors() -> u32 {
    3
}

fn default_btc_penalty() -> f64 {
    2.0
}

fn default_max_sl_percent() -> f64 {
    15.0
}

fn default_min_total_score() -> f64 {
    6.0
}

fn default_standard_score() -> f64 {
    8.0
}

fn default_tp2_scalp_rr() -> f64 {
    1.5
}

fn default_tp1_size() -> f64 {
    0.30
}

fn default_tp2_size() -> f64 {
    0.40
}

fn default_trail_size() -> f64 {
    0.30
}

fn default_signal_journal() -> String {
    "journal/signals.jsonl".to_string()
}

fn default_decision_journal() -> String {
    "journal/decisions.jsonl".to_string()
}

// =============================================================================
// Subsystem sections
// =============================================================================

/// Rate limiter budget parameters (mirrors the exchange's per-minute weight
/// counter).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateConfig {
    /// Fraction of the hard weight limit the engine allows itself to use.
    #[serde(default = "default_threshold_fraction")]
    pub threshold_fraction: f64,

    /// The exchange's hard request-weight limit per minute.
    #[serde(default = "default_hard_limit_per_min")]
    pub hard_limit_per_min: u32,

    /// Extra wait added after a ban deadline before resuming requests.
    #[serde(default = "default_ban_grace_ms")]
    pub ban_grace_ms: i64,

    /// Length of the weight accounting window.
    #[serde(default = "default_minute_window_ms")]
    pub minute_window_ms: i64,
}

impl RateConfig {
    /// Effective reservable budget per window.
    pub fn threshold_weight(&self) -> u32 {
        (self.hard_limit_per_min as f64 * self.threshold_fraction).floor() as u32
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            threshold_fraction: default_threshold_fraction(),
            hard_limit_per_min: default_hard_limit_per_min(),
            ban_grace_ms: default_ban_grace_ms(),
            minute_window_ms: default_minute_window_ms(),
        }
    }
}

/// Candle loader parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Maximum symbols refreshed concurrently per cycle.
    #[serde(default = "default_parallel_max")]
    pub parallel_max: usize,

    /// Gaps older than this horizon are left to explicit backfill.
    #[serde(default = "default_refresh_horizon_days")]
    pub refresh_horizon_days: i64,

    /// Delay after a candle close before refreshing, letting the exchange
    /// finalize the bar.
    #[serde(default = "default_settle_delay_sec")]
    pub settle_delay_sec: u64,

    /// Wall-clock budget for one full analysis cycle; laggard symbols are
    /// abandoned when it runs out.
    #[serde(default = "default_cycle_budget_sec")]
    pub cycle_budget_sec: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            parallel_max: default_parallel_max(),
            refresh_horizon_days: default_refresh_horizon_days(),
            settle_delay_sec: default_settle_delay_sec(),
            cycle_budget_sec: default_cycle_budget_sec(),
        }
    }
}

/// Performance tracker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    /// Tracker wake-up cadence in seconds.
    #[serde(default = "default_cadence_sec")]
    pub cadence_sec: u64,

    /// Bars since entry after which an untouched signal is time-stopped.
    #[serde(default = "default_time_stop_bars")]
    pub time_stop_bars: u32,

    /// Hours after TP2 before a stale trailing runner is closed.
    #[serde(default = "default_post_tp2_time_stop_hours")]
    pub post_tp2_time_stop_hours: i64,

    /// Trailing retracement threshold as a multiple of ATR.
    #[serde(default = "default_trail_atr_mult")]
    pub trail_atr_mult: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            cadence_sec: default_cadence_sec(),
            time_stop_bars: default_time_stop_bars(),
            post_tp2_time_stop_hours: default_post_tp2_time_stop_hours(),
            trail_atr_mult: default_trail_atr_mult(),
        }
    }
}

/// Signal scorer parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScorerConfig {
    /// Minimum final score for a proposal to become a signal.
    #[serde(default = "default_enter_threshold")]
    pub enter_threshold: f64,

    /// Minimum confirming factors in the multi-factor gate.
    #[serde(default = "default_min_factors")]
    pub min_factors: u32,

    /// Score subtracted when the BTC 1h trend opposes the direction.
    #[serde(default = "default_btc_penalty")]
    pub btc_penalty: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            enter_threshold: default_enter_threshold(),
            min_factors: default_min_factors(),
            btc_penalty: default_btc_penalty(),
        }
    }
}

/// Action Price (EMA200 body-cross) recognizer parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionPriceConfig {
    /// Hard cap on |entry - sl| / entry, in percent. Wider setups are
    /// rejected outright.
    #[serde(default = "default_max_sl_percent")]
    pub max_sl_percent: f64,

    /// Minimum total component score to emit any signal (SCALP floor).
    #[serde(default = "default_min_total_score")]
    pub min_total_score: f64,

    /// Score at or above which the signal runs in STANDARD mode (2R TP2).
    #[serde(default = "default_standard_score")]
    pub standard_score: f64,

    /// TP2 reward multiple in SCALP mode.
    #[serde(default = "default_tp2_scalp_rr")]
    pub tp2_scalp_rr: f64,

    /// Position fraction closed at TP1.
    #[serde(default = "default_tp1_size")]
    pub tp1_size: f64,

    /// Position fraction closed at TP2.
    #[serde(default = "default_tp2_size")]
    pub tp2_size: f64,

    /// Position fraction left to the trailing runner.
    #[serde(default = "default_trail_size")]
    pub trail_size: f64,
}

impl Default for ActionPriceConfig {
    fn default() -> Self {
        Self {
            max_sl_percent: default_max_sl_percent(),
            min_total_score: default_min_total_score(),
            standard_score: default_standard_score(),
            tp2_scalp_rr: default_tp2_scalp_rr(),
            tp1_size: default_tp1_size(),
            tp2_size: default_tp2_size(),
            trail_size: default_trail_size(),
        }
    }
}

/// Journal output paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JournalConfig {
    /// Append-only JSONL file for signal create/terminal events.
    #[serde(default = "default_signal_journal")]
    pub signal_path: String,

    /// Append-only JSONL file for scoring decisions.
    #[serde(default = "default_decision_journal")]
    pub decision_path: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            signal_path: default_signal_journal(),
            decision_path: default_decision_journal(),
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the Meridian engine.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialize; unknown keys anywhere in the tree are a load error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Symbols the engine watches and evaluates.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default)]
    pub rate: RateConfig,

    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub scorer: ScorerConfig,

    #[serde(default)]
    pub action_price: ActionPriceConfig,

    #[serde(default)]
    pub journal: JournalConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            rate: RateConfig::default(),
            loader: LoaderConfig::default(),
            tracker: TrackerConfig::default(),
            scorer: ScorerConfig::default(),
            action_price: ActionPriceConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning. Unknown keys are rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialize engine config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}
