// =============================================================================
// Signal model — identity, pricing, partial-exit state, lifecycle
// =============================================================================
//
// A signal is born ACTIVE the moment it is persisted (market entry) and is
// mutated exclusively by the performance tracker until it reaches CLOSED.
// Pricing invariants (checked at construction):
//
//   LONG:  sl < entry < tp1 < tp2 < tp3   (tp2/tp3 when present)
//   SHORT: sl > entry > tp1 > tp2 > tp3
//
// Partial-exit accounting uses position fractions 30/40/30 (TP1 / TP2 /
// trailing runner); `final_pnl_pct` is the sum of the tiers that actually
// fired, with the whole position attributed to a tier when no earlier tier
// fired (full stop-out, time-stop, or tp1-only signals).
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::market_data::candle::Timeframe;

/// Risk distances below this fraction of entry are treated as zero; MFE/MAE
/// updates are skipped to avoid dividing by nothing.
pub const RISK_EPSILON: f64 = 1e-9;

// =============================================================================
// Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short; multiplies price differences into
    /// favorable-positive space.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// Signed return from `entry` to `price`, in percent of entry, positive
    /// when the move favors this direction.
    pub fn return_pct(self, entry: f64, price: f64) -> f64 {
        ((price - entry) / entry) * 100.0 * self.sign()
    }

    /// Whether `price` is at or beyond `target` in the favorable direction.
    pub fn reached(self, price: f64, target: f64) -> bool {
        match self {
            Direction::Long => price >= target,
            Direction::Short => price <= target,
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn parse(s: &str) -> Option<Direction> {
        match s {
            "LONG" => Some(Direction::Long),
            "SHORT" => Some(Direction::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Pending,
    Active,
    Closed,
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalStatus::Pending => write!(f, "PENDING"),
            SignalStatus::Active => write!(f, "ACTIVE"),
            SignalStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

impl SignalStatus {
    pub fn parse(s: &str) -> Option<SignalStatus> {
        match s {
            "PENDING" => Some(SignalStatus::Pending),
            "ACTIVE" => Some(SignalStatus::Active),
            "CLOSED" => Some(SignalStatus::Closed),
            _ => None,
        }
    }
}

/// The reason a signal reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    Tp1,
    Tp2,
    Trailing,
    StopLoss,
    Breakeven,
    TimeStop,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Tp1 => write!(f, "TP1"),
            ExitReason::Tp2 => write!(f, "TP2"),
            ExitReason::Trailing => write!(f, "TRAILING"),
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::Breakeven => write!(f, "BREAKEVEN"),
            ExitReason::TimeStop => write!(f, "TIME_STOP"),
        }
    }
}

impl ExitReason {
    pub fn parse(s: &str) -> Option<ExitReason> {
        match s {
            "TP1" => Some(ExitReason::Tp1),
            "TP2" => Some(ExitReason::Tp2),
            "TRAILING" => Some(ExitReason::Trailing),
            "STOP_LOSS" => Some(ExitReason::StopLoss),
            "BREAKEVEN" => Some(ExitReason::Breakeven),
            "TIME_STOP" => Some(ExitReason::TimeStop),
            _ => None,
        }
    }

    /// A win for statistics purposes. BREAKEVEN is neither a win nor a loss.
    pub fn is_win(self) -> bool {
        matches!(self, ExitReason::Tp1 | ExitReason::Tp2 | ExitReason::Trailing)
    }
}

/// Action Price execution mode chosen from the total component score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApMode {
    Standard,
    Scalp,
    Skip,
}

impl std::fmt::Display for ApMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApMode::Standard => write!(f, "STANDARD"),
            ApMode::Scalp => write!(f, "SCALP"),
            ApMode::Skip => write!(f, "SKIP"),
        }
    }
}

impl ApMode {
    pub fn parse(s: &str) -> Option<ApMode> {
        match s {
            "STANDARD" => Some(ApMode::Standard),
            "SCALP" => Some(ApMode::Scalp),
            "SKIP" => Some(ApMode::Skip),
            _ => None,
        }
    }
}

// =============================================================================
// Action Price extras
// =============================================================================

/// The eleven additive component scores behind an Action Price signal, kept
/// for the journal and post-trade review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ApComponents {
    /// Initiator body size relative to ATR.
    pub initiator_size: f64,
    /// Proximity of the confirming close to EMA200 (distance penalizes).
    pub ema_proximity: f64,
    /// Reward for a pullback body inside the EMA200..EMA13 band.
    pub pullback_depth: f64,
    /// EMA200 slope agreement with the cross direction.
    pub ema_slope: f64,
    /// Compactness of the EMA 5/13/20/200 fan.
    pub fan_compactness: f64,
    /// Retest of the crossed level.
    pub retest: f64,
    /// Break-and-base structure before the cross.
    pub break_and_base: f64,
    /// Rejection wick on the initiator bar.
    pub rejection_wick: f64,
    /// Breakout volume vs the 20-bar mean.
    pub volume_confirmation: f64,
    /// Penalty for repeated prior EMA200 touches (price glued to the mean).
    pub sticky_penalty: f64,
    /// Penalty for entries overextended beyond N*ATR from EMA200.
    pub overextension_penalty: f64,
}

impl ApComponents {
    pub fn total(&self) -> f64 {
        self.initiator_size
            + self.ema_proximity
            + self.pullback_depth
            + self.ema_slope
            + self.fan_compactness
            + self.retest
            + self.break_and_base
            + self.rejection_wick
            + self.volume_confirmation
            + self.sticky_penalty
            + self.overextension_penalty
    }
}

/// Extra fields carried by Action Price signals on top of the common
/// skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApDetails {
    pub mode: ApMode,
    pub components: ApComponents,
    pub total_score: f64,
    /// Open time of the initiator bar whose body crossed EMA200.
    pub initiator_time: i64,
    /// OHLC of the confirming bar.
    pub confirm_open: f64,
    pub confirm_high: f64,
    pub confirm_low: f64,
    pub confirm_close: f64,
    pub ema200_at_entry: f64,
}

// =============================================================================
// Signal
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    // ── Identity ────────────────────────────────────────────────────────
    pub id: String,
    pub symbol: String,
    pub strategy: String,
    pub direction: Direction,
    pub timeframe: Timeframe,

    // ── Pricing ─────────────────────────────────────────────────────────
    pub entry: f64,
    /// Current stop — moves to entry after TP1 and never back.
    pub sl: f64,
    /// The stop at creation; defines the risk unit R for MFE/MAE.
    pub initial_sl: f64,
    pub tp1: f64,
    pub tp2: Option<f64>,
    pub tp3: Option<f64>,
    /// ATR on the signal timeframe at entry; the trailing runner closes on a
    /// retracement of trail_atr_mult * this value.
    pub atr_at_entry: f64,

    // ── Partial-exit state ──────────────────────────────────────────────
    pub tp1_hit: bool,
    pub tp1_closed_at: Option<DateTime<Utc>>,
    pub tp1_pnl_pct: Option<f64>,
    pub tp2_hit: bool,
    pub tp2_closed_at: Option<DateTime<Utc>>,
    pub tp2_pnl_pct: Option<f64>,
    pub trailing_active: bool,
    pub trailing_peak_price: Option<f64>,
    pub runner_pnl_pct: Option<f64>,

    // ── Lifecycle ───────────────────────────────────────────────────────
    pub status: SignalStatus,
    pub exit_reason: Option<ExitReason>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub bars_to_exit: Option<u32>,
    /// Max favorable excursion, in R multiples of the initial risk.
    pub mfe_r: f64,
    /// Max adverse excursion, in R multiples (positive magnitude).
    pub mae_r: f64,
    pub final_pnl_pct: Option<f64>,

    // ── Context ─────────────────────────────────────────────────────────
    pub market_regime: String,
    pub confidence_score: f64,
    pub meta: serde_json::Value,
    /// Present on Action Price signals only.
    pub action_price: Option<ApDetails>,
}

impl Signal {
    /// Construct a new ACTIVE signal, validating the pricing invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        strategy: impl Into<String>,
        direction: Direction,
        timeframe: Timeframe,
        entry: f64,
        sl: f64,
        tp1: f64,
        tp2: Option<f64>,
        tp3: Option<f64>,
        atr_at_entry: f64,
    ) -> Result<Self, EngineError> {
        validate_levels(direction, entry, sl, tp1, tp2, tp3)?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            strategy: strategy.into(),
            direction,
            timeframe,
            entry,
            sl,
            initial_sl: sl,
            tp1,
            tp2,
            tp3,
            atr_at_entry,
            tp1_hit: false,
            tp1_closed_at: None,
            tp1_pnl_pct: None,
            tp2_hit: false,
            tp2_closed_at: None,
            tp2_pnl_pct: None,
            trailing_active: false,
            trailing_peak_price: None,
            runner_pnl_pct: None,
            status: SignalStatus::Active,
            exit_reason: None,
            created_at: Utc::now(),
            closed_at: None,
            bars_to_exit: None,
            mfe_r: 0.0,
            mae_r: 0.0,
            final_pnl_pct: None,
            market_regime: String::new(),
            confidence_score: 0.0,
            meta: serde_json::Value::Null,
            action_price: None,
        })
    }

    /// Initial risk distance R = |entry - initial_sl|.
    pub fn risk(&self) -> f64 {
        (self.entry - self.initial_sl).abs()
    }

    pub fn is_terminal(&self) -> bool {
        self.status == SignalStatus::Closed
    }

    /// The key this signal holds in the per-strategy lock table.
    pub fn lock_key(&self) -> LockKey {
        LockKey {
            symbol: self.symbol.clone(),
            direction: self.direction,
            strategy: self.strategy.clone(),
        }
    }

    /// Update MFE/MAE from an observed price. Skipped entirely when the
    /// initial risk is degenerate (sl at entry after a breakeven edit would
    /// otherwise divide by zero — `initial_sl` protects against that, but a
    /// malformed row may still carry zero risk).
    pub fn update_excursions(&mut self, price: f64) {
        let risk = self.risk();
        if risk < RISK_EPSILON * self.entry.max(1.0) {
            return;
        }
        let excursion = (price - self.entry) * self.direction.sign() / risk;
        if excursion > self.mfe_r {
            self.mfe_r = excursion;
        }
        if -excursion > self.mae_r {
            self.mae_r = -excursion;
        }
    }

    /// Sum of the tier PnLs that actually fired.
    pub fn realized_pnl_pct(&self) -> f64 {
        self.tp1_pnl_pct.unwrap_or(0.0)
            + self.tp2_pnl_pct.unwrap_or(0.0)
            + self.runner_pnl_pct.unwrap_or(0.0)
    }
}

/// Validate the level ordering invariant for a direction.
pub fn validate_levels(
    direction: Direction,
    entry: f64,
    sl: f64,
    tp1: f64,
    tp2: Option<f64>,
    tp3: Option<f64>,
) -> Result<(), EngineError> {
    let ordered: Vec<f64> = match direction {
        Direction::Long => {
            let mut v = vec![sl, entry, tp1];
            v.extend(tp2);
            v.extend(tp3);
            v
        }
        Direction::Short => {
            let mut v = vec![sl, entry, tp1];
            v.extend(tp2);
            v.extend(tp3);
            v.reverse();
            v
        }
    };

    let strictly_increasing = ordered.windows(2).all(|w| w[0] < w[1]);
    if !strictly_increasing {
        return Err(EngineError::Invariant(format!(
            "level ordering violated for {direction}: sl={sl} entry={entry} tp1={tp1} tp2={tp2:?} tp3={tp3:?}"
        )));
    }
    Ok(())
}

// =============================================================================
// Lock key
// =============================================================================

/// The at-most-one-signal key: a strategy may hold only one non-terminal
/// signal per (symbol, direction).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub symbol: String,
    pub direction: Direction,
    pub strategy: String,
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.direction, self.strategy)
    }
}
