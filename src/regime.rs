// =============================================================================
// Market Regime Detector
// =============================================================================
//
// Classifies each symbol's 1h series into one of five regimes plus a
// directional bias. The cascade is evaluated top-to-bottom and the first
// match wins — tie-breaks follow this order by construction:
//
//   1. UNDECIDED — inputs missing (series too short for ADX / EMA200 slope)
//   2. TREND     — ADX >= 25 AND |EMA200 slope| >= 0.15%
//   3. SQUEEZE   — BB width in the bottom 20% of its lookback AND the
//                  Bollinger bands contained inside the Keltner channel
//   4. RANGE     — EMA200 slope flat (|slope| < 0.05%)
//   5. CHOP      — everything else
//
// Bias is read from the EMA50/EMA200 relation and the slope sign; it rides
// along with the regime tag so strategies and the scorer never recompute it.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::IndicatorBundle;

/// ADX at or above this reads as a trending market.
const TREND_ADX_MIN: f64 = 25.0;

/// Minimum |EMA200 slope| (percent over the slope lookback) for TREND.
const TREND_SLOPE_MIN_PCT: f64 = 0.15;

/// BB-width percentile at or below this qualifies as compression.
const SQUEEZE_WIDTH_PCTL_MAX: f64 = 0.20;

/// |EMA200 slope| below this reads as flat (RANGE).
const FLAT_SLOPE_MAX_PCT: f64 = 0.05;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    Trend,
    Squeeze,
    Range,
    Chop,
    Undecided,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::Trend => write!(f, "TREND"),
            Regime::Squeeze => write!(f, "SQUEEZE"),
            Regime::Range => write!(f, "RANGE"),
            Regime::Chop => write!(f, "CHOP"),
            Regime::Undecided => write!(f, "UNDECIDED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bias::Bullish => write!(f, "bullish"),
            Bias::Bearish => write!(f, "bearish"),
            Bias::Neutral => write!(f, "neutral"),
        }
    }
}

/// Snapshot of one classification with its contributing metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub regime: Regime,
    pub bias: Bias,
    pub adx: Option<f64>,
    pub ema200_slope_pct: Option<f64>,
    pub bb_width_percentile: Option<f64>,
    pub squeeze_contained: Option<bool>,
}

// =============================================================================
// Classification
// =============================================================================

/// Classify a bundle into (regime, bias). Pure; the cascade order is the
/// tie-break contract.
pub fn classify(bundle: &IndicatorBundle) -> (Regime, Bias) {
    let bias = read_bias(bundle);

    let (Some(adx), Some(slope)) = (bundle.adx, bundle.ema200_slope_pct) else {
        return (Regime::Undecided, bias);
    };

    if adx >= TREND_ADX_MIN && slope.abs() >= TREND_SLOPE_MIN_PCT {
        return (Regime::Trend, bias);
    }

    let compressed = bundle
        .bb_width_percentile
        .map(|p| p <= SQUEEZE_WIDTH_PCTL_MAX)
        .unwrap_or(false);
    let contained = bundle.squeeze_contained.unwrap_or(false);
    if compressed && contained {
        return (Regime::Squeeze, bias);
    }

    if slope.abs() < FLAT_SLOPE_MAX_PCT {
        return (Regime::Range, bias);
    }

    (Regime::Chop, bias)
}

fn read_bias(bundle: &IndicatorBundle) -> Bias {
    let (Some(e50), Some(e200)) = (bundle.ema50, bundle.ema200) else {
        return Bias::Neutral;
    };
    let slope = bundle.ema200_slope_pct.unwrap_or(0.0);

    if e50 > e200 && slope >= 0.0 {
        Bias::Bullish
    } else if e50 < e200 && slope <= 0.0 {
        Bias::Bearish
    } else {
        Bias::Neutral
    }
}

// =============================================================================
// Detector — cached latest snapshot per symbol
// =============================================================================

pub struct RegimeDetector {
    states: RwLock<HashMap<String, RegimeSnapshot>>,
}

impl RegimeDetector {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Classify from the symbol's 1h bundle and cache the snapshot.
    pub fn update(&self, symbol: &str, bundle: &IndicatorBundle) -> RegimeSnapshot {
        let (regime, bias) = classify(bundle);

        let snapshot = RegimeSnapshot {
            regime,
            bias,
            adx: bundle.adx,
            ema200_slope_pct: bundle.ema200_slope_pct,
            bb_width_percentile: bundle.bb_width_percentile,
            squeeze_contained: bundle.squeeze_contained,
        };

        debug!(
            symbol,
            regime = %regime,
            bias = %bias,
            adx = ?bundle.adx,
            slope = ?bundle.ema200_slope_pct,
            "regime classified"
        );

        self.states.write().insert(symbol.to_string(), snapshot.clone());
        snapshot
    }

    /// Latest cached snapshot without recomputation.
    pub fn current(&self, symbol: &str) -> Option<RegimeSnapshot> {
        self.states.read().get(symbol).cloned()
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new()
    }
}
