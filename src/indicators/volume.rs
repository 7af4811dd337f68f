// =============================================================================
// Volume statistics and VWAP
// =============================================================================

use crate::market_data::candle::Candle;

/// Mean volume over the last `period` candles.
pub fn mean_volume(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    Some(window.iter().map(|c| c.volume).sum::<f64>() / period as f64)
}

/// Current volume relative to the `period`-bar mean (1.0 = average).
pub fn volume_ratio(candles: &[Candle], period: usize) -> Option<f64> {
    let mean = mean_volume(candles, period)?;
    if mean == 0.0 {
        return None;
    }
    Some(candles.last()?.volume / mean)
}

/// Volume-weighted average price over the last `period` candles, using the
/// typical price (H+L+C)/3 per bar.
pub fn vwap(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];

    let mut pv = 0.0;
    let mut total_volume = 0.0;
    for c in window {
        let typical = (c.high + c.low + c.close) / 3.0;
        pv += typical * c.volume;
        total_volume += c.volume;
    }

    if total_volume == 0.0 {
        return None;
    }
    let value = pv / total_volume;
    value.is_finite().then_some(value)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open: close,
            high,
            low,
            close,
            volume,
            taker_buy_volume: volume / 2.0,
        }
    }

    #[test]
    fn mean_volume_over_window() {
        let candles = vec![
            candle(101.0, 99.0, 100.0, 10.0),
            candle(101.0, 99.0, 100.0, 20.0),
            candle(101.0, 99.0, 100.0, 30.0),
        ];
        assert!((mean_volume(&candles, 3).unwrap() - 20.0).abs() < 1e-12);
        // Tail-only window.
        assert!((mean_volume(&candles, 2).unwrap() - 25.0).abs() < 1e-12);
        assert!(mean_volume(&candles, 5).is_none());
    }

    #[test]
    fn ratio_flags_volume_spikes() {
        let mut candles: Vec<Candle> = (0..20).map(|_| candle(101.0, 99.0, 100.0, 10.0)).collect();
        candles.push(candle(101.0, 99.0, 100.0, 30.0));
        let ratio = volume_ratio(&candles, 20).unwrap();
        assert!(ratio > 2.5, "spike should dominate the mean, got {ratio}");
    }

    #[test]
    fn zero_volume_window_has_no_ratio() {
        let candles = vec![candle(101.0, 99.0, 100.0, 0.0); 5];
        assert!(volume_ratio(&candles, 5).is_none());
        assert!(vwap(&candles, 5).is_none());
    }

    #[test]
    fn vwap_weights_by_volume() {
        // One heavy bar at typical price 110, one light at 90.
        let candles = vec![
            candle(111.0, 109.0, 110.0, 90.0),
            candle(91.0, 89.0, 90.0, 10.0),
        ];
        let value = vwap(&candles, 2).unwrap();
        // 0.9 * 110 + 0.1 * 90 = 108.
        assert!((value - 108.0).abs() < 1e-9);
    }

    #[test]
    fn vwap_of_uniform_series_is_typical_price() {
        let candles = vec![candle(102.0, 98.0, 100.0, 10.0); 10];
        let value = vwap(&candles, 10).unwrap();
        assert!((value - 100.0).abs() < 1e-9);
    }
}
