// =============================================================================
// Bollinger Bands, Keltner Channels, Donchian Channels
// =============================================================================
//
// Bollinger: middle = SMA, upper/lower = SMA ± k*σ,
//            width = (upper - lower) / middle * 100.
// Keltner:   middle = EMA, upper/lower = EMA ± k*ATR.
// Donchian:  highest high / lowest low over the window.
//
// The squeeze test used by the regime detector is Bollinger-inside-Keltner
// containment combined with a low band-width percentile.
// =============================================================================

use crate::indicators::{atr::calculate_atr, ema::last_ema, percentile_rank};
use crate::market_data::candle::Candle;

/// Bollinger Band snapshot.
#[derive(Debug, Clone)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Band width as a percent of the middle band.
    pub width: f64,
}

/// Calculate Bollinger Bands over the last `period` closes.
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerResult> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    if middle == 0.0 {
        return None;
    }

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + num_std * std_dev;
    let lower = middle - num_std * std_dev;
    let width = (upper - lower) / middle * 100.0;

    width.is_finite().then_some(BollingerResult {
        upper,
        middle,
        lower,
        width,
    })
}

/// Band-width series (one value per window position), used for the
/// percentile that feeds squeeze detection.
pub fn bb_width_series(closes: &[f64], period: usize, num_std: f64) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }
    (period..=closes.len())
        .filter_map(|end| calculate_bollinger(&closes[..end], period, num_std).map(|b| b.width))
        .collect()
}

/// Percentile rank of the current band width within `lookback` history.
pub fn bb_width_percentile(
    closes: &[f64],
    period: usize,
    num_std: f64,
    lookback: usize,
) -> Option<f64> {
    let series = bb_width_series(closes, period, num_std);
    let current = *series.last()?;
    let start = series.len().saturating_sub(lookback);
    let window = &series[start..];
    if window.len() < 2 {
        return None;
    }
    Some(percentile_rank(window, current))
}

/// Keltner Channel snapshot.
#[derive(Debug, Clone)]
pub struct KeltnerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Calculate the Keltner Channel (EMA midline ± `atr_mult` * ATR).
pub fn calculate_keltner(candles: &[Candle], period: usize, atr_mult: f64) -> Option<KeltnerResult> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let middle = last_ema(&closes, period)?;
    let atr = calculate_atr(candles, period)?;
    Some(KeltnerResult {
        upper: middle + atr_mult * atr,
        middle,
        lower: middle - atr_mult * atr,
    })
}

/// Whether the Bollinger Bands sit fully inside the Keltner Channel — the
/// classic volatility-compression signature.
pub fn squeeze_contained(candles: &[Candle], period: usize) -> Option<bool> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let bb = calculate_bollinger(&closes, period, 2.0)?;
    let kc = calculate_keltner(candles, period, 1.5)?;
    Some(bb.upper <= kc.upper && bb.lower >= kc.lower)
}

/// Donchian Channel: extremes over the last `period` candles.
#[derive(Debug, Clone)]
pub struct DonchianResult {
    pub upper: f64,
    pub lower: f64,
}

pub fn calculate_donchian(candles: &[Candle], period: usize) -> Option<DonchianResult> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let upper = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let lower = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    (upper.is_finite() && lower.is_finite()).then_some(DonchianResult { upper, lower })
}
