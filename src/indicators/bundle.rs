// =============================================================================
// Indicator Bundle — memoized per-(symbol, timeframe, newest close) snapshot
// =============================================================================
//
// Every strategy in a cycle reads the same pre-computed bundle, so the math
// runs once per series per cycle. The cache key includes the newest closed
// candle's close_time: a new bar invalidates the entry naturally, and a
// re-request within the same cycle is a cheap map hit.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::indicators::adx::calculate_adx;
use crate::indicators::atr::{atr_percentile, calculate_atr, calculate_atr_pct, median_atr};
use crate::indicators::bollinger::{
    bb_width_percentile, calculate_bollinger, calculate_donchian, squeeze_contained,
    BollingerResult, DonchianResult,
};
use crate::indicators::ema::{ema_slope_pct, last_ema};
use crate::indicators::profile::{volume_profile, VolumeProfile};
use crate::indicators::rsi::last_rsi;
use crate::indicators::volume::{mean_volume, vwap, volume_ratio};
use crate::market_data::candle::{Candle, SeriesKey};

/// Standard look-backs used across the engine.
const ATR_PERIOD: usize = 14;
const ADX_PERIOD: usize = 14;
const RSI_PERIOD: usize = 14;
const BB_PERIOD: usize = 20;
const BB_STD: f64 = 2.0;
const DONCHIAN_PERIOD: usize = 20;
const VOLUME_PERIOD: usize = 20;
const PROFILE_PERIOD: usize = 50;
const PERCENTILE_LOOKBACK: usize = 100;
const SLOPE_LOOKBACK: usize = 5;

/// Immutable indicator snapshot for one candle series. Fields are `None`
/// when the series is too short for the corresponding look-back.
#[derive(Debug, Clone)]
pub struct IndicatorBundle {
    pub newest_close_time: i64,
    pub last_close: f64,

    pub ema20: Option<f64>,
    pub ema50: Option<f64>,
    pub ema200: Option<f64>,
    pub ema200_slope_pct: Option<f64>,

    pub atr: Option<f64>,
    pub atr_pct: Option<f64>,
    pub atr_percentile: Option<f64>,
    pub median_atr: Option<f64>,

    pub adx: Option<f64>,
    pub rsi: Option<f64>,

    pub bollinger: Option<BollingerResult>,
    pub bb_width_percentile: Option<f64>,
    pub squeeze_contained: Option<bool>,
    pub donchian: Option<DonchianResult>,

    pub mean_volume: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub vwap: Option<f64>,
    pub profile: Option<VolumeProfile>,
}

impl IndicatorBundle {
    /// Compute the full bundle from a closed-candle series (oldest first).
    /// Returns `None` for an empty series.
    pub fn compute(candles: &[Candle]) -> Option<Self> {
        let last = candles.last()?;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        Some(Self {
            newest_close_time: last.close_time,
            last_close: last.close,

            ema20: last_ema(&closes, 20),
            ema50: last_ema(&closes, 50),
            ema200: last_ema(&closes, 200),
            ema200_slope_pct: ema_slope_pct(&closes, 200, SLOPE_LOOKBACK),

            atr: calculate_atr(candles, ATR_PERIOD),
            atr_pct: calculate_atr_pct(candles, ATR_PERIOD),
            atr_percentile: atr_percentile(candles, ATR_PERIOD, PERCENTILE_LOOKBACK),
            median_atr: median_atr(candles, ATR_PERIOD, PERCENTILE_LOOKBACK / 2),

            adx: calculate_adx(candles, ADX_PERIOD),
            rsi: last_rsi(&closes, RSI_PERIOD),

            bollinger: calculate_bollinger(&closes, BB_PERIOD, BB_STD),
            bb_width_percentile: bb_width_percentile(&closes, BB_PERIOD, BB_STD, PERCENTILE_LOOKBACK),
            squeeze_contained: squeeze_contained(candles, BB_PERIOD),
            donchian: calculate_donchian(candles, DONCHIAN_PERIOD),

            mean_volume: mean_volume(candles, VOLUME_PERIOD),
            volume_ratio: volume_ratio(candles, VOLUME_PERIOD),
            vwap: vwap(candles, VOLUME_PERIOD),
            profile: volume_profile(candles, PROFILE_PERIOD),
        })
    }
}

/// Cache of the latest bundle per series. One writer computes on miss; all
/// strategies of the cycle read the shared `Arc`.
pub struct IndicatorCache {
    entries: RwLock<HashMap<SeriesKey, Arc<IndicatorBundle>>>,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the bundle for `key` at the series' newest close time,
    /// computing it once on miss. An entry from an older bar is replaced.
    pub fn get_or_compute(&self, key: &SeriesKey, candles: &[Candle]) -> Option<Arc<IndicatorBundle>> {
        let newest = candles.last()?.close_time;

        if let Some(hit) = self.entries.read().get(key) {
            if hit.newest_close_time == newest {
                return Some(Arc::clone(hit));
            }
        }

        let bundle = Arc::new(IndicatorBundle::compute(candles)?);
        self.entries.write().insert(key.clone(), Arc::clone(&bundle));
        Some(bundle)
    }
}

impl Default for IndicatorCache {
    fn default() -> Self {
        Self::new()
    }
}
