// =============================================================================
// Volume Profile — POC and the 70% value area
// =============================================================================
//
// Volume is binned by typical price over the window. The Point of Control
// (POC) is the heaviest bin; the value area grows outward from the POC,
// greedily adding the heavier neighbour until it holds the target share of
// total volume (70%). VAH/VAL are the outer edges of that area.
// =============================================================================

use crate::market_data::candle::Candle;

/// Number of price bins the window is histogrammed into.
const PROFILE_BINS: usize = 48;

/// Share of total volume enclosed by the value area.
const VALUE_AREA_FRACTION: f64 = 0.70;

#[derive(Debug, Clone)]
pub struct VolumeProfile {
    /// Point of control: the price level with the most traded volume.
    pub poc: f64,
    /// Value area high.
    pub vah: f64,
    /// Value area low.
    pub val: f64,
}

/// Build the volume profile of the last `period` candles.
///
/// Returns `None` when the window is too short, carries no volume, or spans
/// a zero price range.
pub fn volume_profile(candles: &[Candle], period: usize) -> Option<VolumeProfile> {
    if period < 2 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];

    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    if !(low.is_finite() && high.is_finite()) || high <= low {
        return None;
    }

    let bin_size = (high - low) / PROFILE_BINS as f64;
    let mut bins = [0.0f64; PROFILE_BINS];

    for c in window {
        let typical = (c.high + c.low + c.close) / 3.0;
        let idx = (((typical - low) / bin_size) as usize).min(PROFILE_BINS - 1);
        bins[idx] += c.volume;
    }

    let total: f64 = bins.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let poc_idx = bins
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)?;

    // Expand the value area greedily toward the heavier side.
    let mut lo = poc_idx;
    let mut hi = poc_idx;
    let mut captured = bins[poc_idx];
    let target = total * VALUE_AREA_FRACTION;

    while captured < target && (lo > 0 || hi < PROFILE_BINS - 1) {
        let below = if lo > 0 { bins[lo - 1] } else { f64::MIN };
        let above = if hi < PROFILE_BINS - 1 { bins[hi + 1] } else { f64::MIN };

        if above >= below && hi < PROFILE_BINS - 1 {
            hi += 1;
            captured += bins[hi];
        } else if lo > 0 {
            lo -= 1;
            captured += bins[lo];
        } else {
            break;
        }
    }

    let bin_center = |i: usize| low + (i as f64 + 0.5) * bin_size;

    Some(VolumeProfile {
        poc: bin_center(poc_idx),
        vah: bin_center(hi),
        val: bin_center(lo),
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(price: f64, volume: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open: price,
            high: price + 0.5,
            low: price - 0.5,
            close: price,
            volume,
            taker_buy_volume: volume / 2.0,
        }
    }

    #[test]
    fn poc_sits_at_the_heaviest_level() {
        // Most volume concentrated near 100, thin tails at 90 and 110.
        let mut candles = Vec::new();
        for _ in 0..20 {
            candles.push(candle(100.0, 100.0));
        }
        candles.push(candle(90.0, 5.0));
        candles.push(candle(110.0, 5.0));

        let profile = volume_profile(&candles, candles.len()).unwrap();
        assert!(
            (profile.poc - 100.0).abs() < 1.5,
            "POC should be near 100, got {}",
            profile.poc
        );
        assert!(profile.vah >= profile.poc);
        assert!(profile.val <= profile.poc);
    }

    #[test]
    fn value_area_ordering_holds() {
        let candles: Vec<Candle> = (0..50)
            .map(|i| candle(100.0 + (i as f64 * 0.4).sin() * 5.0, 10.0))
            .collect();
        let profile = volume_profile(&candles, 50).unwrap();
        assert!(profile.val <= profile.poc && profile.poc <= profile.vah);
    }

    #[test]
    fn value_area_excludes_thin_extremes() {
        let mut candles = Vec::new();
        for _ in 0..30 {
            candles.push(candle(100.0, 50.0));
        }
        candles.push(candle(120.0, 1.0));

        let profile = volume_profile(&candles, candles.len()).unwrap();
        assert!(
            profile.vah < 115.0,
            "one thin print at 120 must not drag VAH up, got {}",
            profile.vah
        );
    }

    #[test]
    fn degenerate_inputs() {
        assert!(volume_profile(&[], 10).is_none());
        assert!(volume_profile(&[candle(100.0, 10.0)], 1).is_none());
        // Zero total volume.
        let flat = vec![candle(100.0, 0.0); 10];
        assert!(volume_profile(&flat, 10).is_none());
    }
}
