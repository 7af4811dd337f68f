// =============================================================================
// Relative Strength Index (RSI) — Wilder's smoothing
// =============================================================================
//
//   avg_gain = (prev_avg_gain * (period - 1) + gain) / period
//   avg_loss = (prev_avg_loss * (period - 1) + loss) / period
//   RSI      = 100 - 100 / (1 + avg_gain / avg_loss)
//
// RSI > 70 reads as overbought, RSI < 30 as oversold.
// =============================================================================

/// Compute the RSI series for `closes`; one value per close starting at
/// index `period`. Empty on degenerate input.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l - d)
            }
        });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let Some(first) = rsi_from_averages(avg_gain, avg_loss) else {
        return Vec::new();
    };

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    result.push(first);

    for &delta in &deltas[period..] {
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_from_averages(avg_gain, avg_loss) {
            Some(rsi) => result.push(rsi),
            None => break,
        }
    }

    result
}

/// The most recent RSI value.
pub fn last_rsi(closes: &[f64], period: usize) -> Option<f64> {
    calculate_rsi(closes, period).last().copied()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    if !avg_gain.is_finite() || !avg_loss.is_finite() {
        return None;
    }
    if avg_loss == 0.0 {
        // No down moves in the window: clamp rather than divide by zero.
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    let rsi = 100.0 - 100.0 / (1.0 + rs);
    rsi.is_finite().then_some(rsi)
}
