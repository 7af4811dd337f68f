// =============================================================================
// Average True Range (ATR) — Wilder's smoothing
// =============================================================================
//
// True Range per bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR:
//   ATR_0 = SMA of the first `period` TR values
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
// =============================================================================

use crate::market_data::candle::Candle;

/// The full ATR series for `candles` (oldest first). Output element `i`
/// corresponds to candle index `period + i`; the last element is the current
/// ATR. Empty when input is too short or the series turns non-finite.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period + 1 {
        return Vec::new();
    }

    let tr_values: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let high = w[1].high;
            let low = w[1].low;
            let prev_close = w[0].close;
            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect();

    let seed: f64 = tr_values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let period_f = period as f64;
    let mut series = Vec::with_capacity(tr_values.len() - period + 1);
    series.push(seed);

    let mut atr = seed;
    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            return Vec::new();
        }
        series.push(atr);
    }

    series
}

/// The most recent ATR value.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    atr_series(candles, period).last().copied()
}

/// ATR as a percentage of the latest close — comparable across price scales.
pub fn calculate_atr_pct(candles: &[Candle], period: usize) -> Option<f64> {
    let atr = calculate_atr(candles, period)?;
    let last_close = candles.last()?.close;
    if last_close == 0.0 {
        return None;
    }
    Some((atr / last_close) * 100.0)
}

/// Percentile rank of the current ATR within its own recent history
/// (fraction of historical values at or below the current one, in [0, 1]).
pub fn atr_percentile(candles: &[Candle], period: usize, lookback: usize) -> Option<f64> {
    let series = atr_series(candles, period);
    let current = *series.last()?;
    let start = series.len().saturating_sub(lookback);
    let window = &series[start..];
    if window.len() < 2 {
        return None;
    }
    Some(crate::indicators::percentile_rank(window, current))
}

/// Median of the last `lookback` ATR values — the ATR Momentum strategy
/// compares impulse bars against this baseline.
pub fn median_atr(candles: &[Candle], period: usize, lookback: usize) -> Option<f64> {
    let series = atr_series(candles, period);
    if series.is_empty() {
        return None;
    }
    let start = series.len().saturating_sub(lookback);
    let mut window: Vec<f64> = series[start..].to_vec();
    window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = window.len() / 2;
    if window.len() % 2 == 0 {
        Some((window[mid - 1] + window[mid]) / 2.0)
    } else {
        Some(window[mid])
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open,
            high,
            low,
            close,
            volume: 10.0,
            taker_buy_volume: 5.0,
        }
    }

    #[test]
    fn degenerate_inputs() {
        let candles = vec![candle(100.0, 105.0, 95.0, 102.0); 20];
        assert!(atr_series(&candles, 0).is_empty());
        assert!(calculate_atr(&candles[..10], 14).is_none());
    }

    #[test]
    fn constant_range_converges() {
        // All bars span 10, close at midpoint: ATR should stay near 10.
        let mut candles = Vec::new();
        for i in 0..30 {
            let base = 100.0 + i as f64 * 0.1;
            candles.push(candle(base, base + 5.0, base - 5.0, base));
        }
        let atr = calculate_atr(&candles, 14).unwrap();
        assert!((atr - 10.0).abs() < 1.0, "expected ATR near 10, got {atr}");
    }

    #[test]
    fn gap_inflates_true_range() {
        let candles = vec![
            candle(100.0, 105.0, 95.0, 95.0),
            candle(110.0, 115.0, 108.0, 112.0), // |115 - 95| = 20 dominates
            candle(112.0, 118.0, 110.0, 115.0),
            candle(115.0, 120.0, 113.0, 118.0),
        ];
        let atr = calculate_atr(&candles, 3).unwrap();
        assert!(atr > 7.0, "ATR should reflect the gap, got {atr}");
    }

    #[test]
    fn series_grows_with_input() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base + 2.0, base - 2.0, base + 1.0)
            })
            .collect();
        let series = atr_series(&candles, 14);
        // 29 TR values, seeded at 14 -> 16 ATR values.
        assert_eq!(series.len(), 16);
        assert!(series.iter().all(|v| *v > 0.0 && v.is_finite()));
    }

    #[test]
    fn pct_variant_normalizes() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base + 3.0, base - 3.0, base + 1.0)
            })
            .collect();
        let pct = calculate_atr_pct(&candles, 14).unwrap();
        assert!(pct > 0.0 && pct < 100.0);
    }

    #[test]
    fn percentile_of_expanding_volatility_is_high() {
        // Ranges grow with every bar, so the newest ATR ranks at the top.
        let mut candles = vec![candle(100.0, 101.0, 99.0, 100.0)];
        for i in 1..60 {
            let spread = 1.0 + i as f64 * 0.3;
            candles.push(candle(100.0, 100.0 + spread, 100.0 - spread, 100.0));
        }
        let pct = atr_percentile(&candles, 14, 30).unwrap();
        assert!(pct > 0.9, "expected top-decile percentile, got {pct}");
    }

    #[test]
    fn percentile_of_contracting_volatility_is_low() {
        let mut candles = vec![candle(100.0, 120.0, 80.0, 100.0)];
        for i in 1..60 {
            let spread = (20.0 - i as f64 * 0.3).max(0.5);
            candles.push(candle(100.0, 100.0 + spread, 100.0 - spread, 100.0));
        }
        let pct = atr_percentile(&candles, 14, 30).unwrap();
        assert!(pct < 0.2, "expected bottom-quintile percentile, got {pct}");
    }

    #[test]
    fn median_atr_on_constant_series() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.01;
                candle(base, base + 5.0, base - 5.0, base)
            })
            .collect();
        let median = median_atr(&candles, 14, 20).unwrap();
        assert!((median - 10.0).abs() < 1.0);
    }

    #[test]
    fn nan_input_empties_series() {
        let candles = vec![
            candle(100.0, 105.0, 95.0, 100.0),
            candle(100.0, f64::NAN, 95.0, 100.0),
            candle(100.0, 105.0, 95.0, 100.0),
            candle(100.0, 105.0, 95.0, 100.0),
        ];
        assert!(calculate_atr(&candles, 3).is_none());
    }
}
