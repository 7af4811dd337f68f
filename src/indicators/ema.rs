// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The first EMA value is seeded with the SMA of the first `period` closes.
// The last element of the returned series always corresponds to the last
// input close.
// =============================================================================

/// Compute the EMA series for `closes` and look-back `period`.
///
/// Returns an empty `Vec` when the input is too short or the period is zero.
/// Output element `i` corresponds to close index `period - 1 + i`.
pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period + 1) as f64;

    let sma: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    if !sma.is_finite() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(closes.len() - period + 1);
    result.push(sma);

    let mut prev = sma;
    for &close in &closes[period..] {
        let ema = close * multiplier + prev * (1.0 - multiplier);
        if !ema.is_finite() {
            // A broken series must not keep producing values.
            break;
        }
        result.push(ema);
        prev = ema;
    }

    result
}

/// The latest EMA value, if computable.
pub fn last_ema(closes: &[f64], period: usize) -> Option<f64> {
    calculate_ema(closes, period).last().copied()
}

/// EMA value at the candle `bars_back` from the end of the input, if the
/// series extends that far. `bars_back = 0` is the latest candle.
pub fn ema_at(closes: &[f64], period: usize, bars_back: usize) -> Option<f64> {
    let series = calculate_ema(closes, period);
    if bars_back >= series.len() {
        return None;
    }
    Some(series[series.len() - 1 - bars_back])
}

/// Percent slope of the EMA over the last `lookback` bars:
/// `(ema_now - ema_then) / ema_then * 100`. Positive for a rising mean.
pub fn ema_slope_pct(closes: &[f64], period: usize, lookback: usize) -> Option<f64> {
    let series = calculate_ema(closes, period);
    if lookback == 0 || series.len() <= lookback {
        return None;
    }
    let now = series[series.len() - 1];
    let then = series[series.len() - 1 - lookback];
    if then == 0.0 {
        return None;
    }
    let slope = (now - then) / then * 100.0;
    slope.is_finite().then_some(slope)
}

/// Directional alignment of the EMA 20/50/200 stack.
///
/// Returns `Some(true)` for a bullish stack (EMA20 > EMA50 > EMA200),
/// `Some(false)` for a bearish one, and `None` when the stack is mixed or
/// the input is too short for EMA200.
pub fn stack_aligned(closes: &[f64]) -> Option<bool> {
    let e20 = last_ema(closes, 20)?;
    let e50 = last_ema(closes, 50)?;
    let e200 = last_ema(closes, 200)?;

    if e20 > e50 && e50 > e200 {
        Some(true)
    } else if e20 < e50 && e50 < e200 {
        Some(false)
    } else {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ascending(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64).collect()
    }

    #[test]
    fn empty_and_degenerate_inputs() {
        assert!(calculate_ema(&[], 5).is_empty());
        assert!(calculate_ema(&[1.0, 2.0, 3.0], 0).is_empty());
        assert!(calculate_ema(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn seed_is_sma() {
        let ema = calculate_ema(&[2.0, 4.0, 6.0], 3);
        assert_eq!(ema.len(), 1);
        assert!((ema[0] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn known_values() {
        // 5-period EMA of 1..10: seed SMA 3.0, multiplier 1/3.
        let closes = ascending(10);
        let ema = calculate_ema(&closes, 5);
        assert_eq!(ema.len(), 6);

        let mult = 2.0 / 6.0;
        let mut expected = 3.0;
        for (i, &c) in closes[5..].iter().enumerate() {
            expected = c * mult + expected * (1.0 - mult);
            assert!((ema[i + 1] - expected).abs() < 1e-10);
        }
    }

    #[test]
    fn nan_truncates_series() {
        let closes = vec![1.0, 2.0, 3.0, f64::NAN, 5.0];
        let ema = calculate_ema(&closes, 3);
        assert_eq!(ema.len(), 1); // only the seed survives
    }

    #[test]
    fn ema_at_indexes_from_the_end() {
        let closes = ascending(10);
        let series = calculate_ema(&closes, 3);
        assert_eq!(ema_at(&closes, 3, 0), series.last().copied());
        assert_eq!(ema_at(&closes, 3, 2), Some(series[series.len() - 3]));
        assert_eq!(ema_at(&closes, 3, 100), None);
    }

    #[test]
    fn slope_sign_tracks_trend() {
        let up = ascending(300);
        assert!(ema_slope_pct(&up, 200, 5).unwrap() > 0.0);

        let down: Vec<f64> = (1..=300).rev().map(|i| i as f64).collect();
        assert!(ema_slope_pct(&down, 200, 5).unwrap() < 0.0);

        let flat = vec![100.0; 300];
        assert!(ema_slope_pct(&flat, 200, 5).unwrap().abs() < 1e-9);
    }

    #[test]
    fn slope_requires_enough_history() {
        assert!(ema_slope_pct(&ascending(50), 200, 5).is_none());
        assert!(ema_slope_pct(&ascending(300), 200, 0).is_none());
    }

    #[test]
    fn stack_alignment() {
        assert_eq!(stack_aligned(&ascending(300)), Some(true));

        let down: Vec<f64> = (1..=300).rev().map(|i| i as f64).collect();
        assert_eq!(stack_aligned(&down), Some(false));

        // Flat: all EMAs equal, not strictly ordered.
        assert_eq!(stack_aligned(&vec![100.0; 300]), None);
        // Too short for EMA200.
        assert_eq!(stack_aligned(&ascending(100)), None);
    }
}
