// =============================================================================
// Zone Registry — support/resistance zones shared across strategies
// =============================================================================
//
// Zones are rebuilt per symbol whenever its source series advances:
//
//   1. Swing points: a bar is a swing high/low when its extreme dominates
//      `SWING_WING` bars on both sides.
//   2. Clustering: swing prices within a price tolerance merge into one zone
//      whose band spans the clustered extremes.
//   3. Touches & freshness: every bar whose range intersects the band counts
//      as a touch; zones untouched for `MAX_AGE_BARS` age out at rebuild.
//   4. A zone whose swings formed above price but now sits below it (or vice
//      versa) is marked flipped — old resistance acting as support.
//
// One writer per symbol (the rebuild in the analysis cycle); strategies hold
// read-only clones for the duration of their evaluation.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::market_data::candle::{Candle, Timeframe};

/// Bars on each side a swing extreme must dominate.
const SWING_WING: usize = 2;

/// Cluster tolerance as a fraction of price.
const CLUSTER_TOLERANCE_PCT: f64 = 0.3;

/// Zones untouched for this many bars age out.
const MAX_AGE_BARS: usize = 120;

/// Bars examined after a touch to measure the reaction.
const REACTION_WINDOW: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneKind {
    Support,
    Resistance,
}

impl std::fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneKind::Support => write!(f, "S"),
            ZoneKind::Resistance => write!(f, "R"),
        }
    }
}

/// One support/resistance band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub timeframe: Timeframe,
    pub kind: ZoneKind,
    pub low: f64,
    pub high: f64,
    /// Number of swing points merged into this band.
    pub strength: u32,
    /// Open times of bars that touched the band.
    pub touches: Vec<i64>,
    /// Percent excursions away from the band after each touch.
    pub reactions: Vec<f64>,
    /// Bars since the last touch.
    pub freshness: u32,
    /// True when the band formed on the other side of price than it sits now.
    pub flipped: bool,
}

impl Zone {
    pub fn mid(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }

    /// Signed distance from `price` to the band mid, as a percent of price.
    pub fn distance_pct(&self, price: f64) -> f64 {
        if price == 0.0 {
            return f64::MAX;
        }
        (self.mid() - price) / price * 100.0
    }
}

// =============================================================================
// Zone construction (pure)
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct SwingPoint {
    index: usize,
    price: f64,
    /// True when the point is a swing high.
    is_high: bool,
}

fn find_swings(candles: &[Candle]) -> Vec<SwingPoint> {
    let mut swings = Vec::new();
    if candles.len() < 2 * SWING_WING + 1 {
        return swings;
    }

    for i in SWING_WING..candles.len() - SWING_WING {
        let window = &candles[i - SWING_WING..=i + SWING_WING];

        let is_high = window.iter().all(|c| candles[i].high >= c.high);
        let is_low = window.iter().all(|c| candles[i].low <= c.low);

        if is_high {
            swings.push(SwingPoint {
                index: i,
                price: candles[i].high,
                is_high: true,
            });
        }
        if is_low {
            swings.push(SwingPoint {
                index: i,
                price: candles[i].low,
                is_high: false,
            });
        }
    }
    swings
}

/// Build zones for one series. Pure; the registry wraps this with storage.
pub fn build_zones(candles: &[Candle], timeframe: Timeframe) -> Vec<Zone> {
    let Some(last) = candles.last() else {
        return Vec::new();
    };
    let current_price = last.close;

    let mut swings = find_swings(candles);
    if swings.is_empty() {
        return Vec::new();
    }
    swings.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));

    // Greedy clustering over the sorted prices.
    let tolerance = current_price * CLUSTER_TOLERANCE_PCT / 100.0;
    let mut clusters: Vec<Vec<SwingPoint>> = Vec::new();
    for swing in swings {
        match clusters.last_mut() {
            Some(cluster)
                if swing.price - cluster.last().map(|s| s.price).unwrap_or(swing.price)
                    <= tolerance =>
            {
                cluster.push(swing)
            }
            _ => clusters.push(vec![swing]),
        }
    }

    let mut zones = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        if cluster.is_empty() {
            continue;
        }
        let low = cluster.iter().map(|s| s.price).fold(f64::MAX, f64::min);
        let high = cluster.iter().map(|s| s.price).fold(f64::MIN, f64::max);
        let high_swings = cluster.iter().filter(|s| s.is_high).count();

        let kind = if (low + high) / 2.0 <= current_price {
            ZoneKind::Support
        } else {
            ZoneKind::Resistance
        };
        // A band now below price but built mostly from swing highs was
        // resistance before the break (and mirror for the other side).
        let flipped = match kind {
            ZoneKind::Support => high_swings * 2 > cluster.len(),
            ZoneKind::Resistance => high_swings * 2 < cluster.len(),
        };

        let mut zone = Zone {
            timeframe,
            kind,
            low,
            high,
            strength: cluster.len() as u32,
            touches: Vec::new(),
            reactions: Vec::new(),
            freshness: 0,
            flipped,
        };
        record_touches(&mut zone, candles);

        if (zone.freshness as usize) <= MAX_AGE_BARS {
            zones.push(zone);
        }
    }

    zones.sort_by(|a, b| a.low.partial_cmp(&b.low).unwrap_or(std::cmp::Ordering::Equal));
    zones
}

/// Fill touches, reactions, and freshness by walking the series once.
fn record_touches(zone: &mut Zone, candles: &[Candle]) {
    let mut last_touch_index = None;

    for (i, c) in candles.iter().enumerate() {
        let intersects = c.low <= zone.high && c.high >= zone.low;
        if !intersects {
            continue;
        }
        zone.touches.push(c.open_time);
        last_touch_index = Some(i);

        // Reaction: the strongest move away from the band mid within the
        // next few bars, in percent.
        let mid = zone.mid();
        let end = (i + 1 + REACTION_WINDOW).min(candles.len());
        let reaction = candles[i + 1..end]
            .iter()
            .map(|next| ((next.close - mid) / mid * 100.0).abs())
            .fold(0.0, f64::max);
        zone.reactions.push(reaction);
    }

    zone.freshness = match last_touch_index {
        Some(i) => (candles.len() - 1 - i) as u32,
        None => u32::MAX,
    };
}

// =============================================================================
// Registry
// =============================================================================

/// Per-symbol zone storage: single writer (the cycle's rebuild), many
/// readers (strategies take clones).
pub struct ZoneRegistry {
    zones: RwLock<HashMap<String, Vec<Zone>>>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self {
            zones: RwLock::new(HashMap::new()),
        }
    }

    pub fn rebuild(&self, symbol: &str, timeframe: Timeframe, candles: &[Candle]) {
        let zones = build_zones(candles, timeframe);
        debug!(symbol, tf = %timeframe, count = zones.len(), "zones rebuilt");
        self.zones.write().insert(symbol.to_string(), zones);
    }

    /// Read-only view for one evaluation.
    pub fn view(&self, symbol: &str) -> Vec<Zone> {
        self.zones.read().get(symbol).cloned().unwrap_or_default()
    }

    /// The nearest zone of `kind` measured from `price`.
    pub fn nearest(&self, symbol: &str, price: f64, kind: ZoneKind) -> Option<Zone> {
        self.view(symbol)
            .into_iter()
            .filter(|z| z.kind == kind)
            .min_by(|a, b| {
                a.distance_pct(price)
                    .abs()
                    .partial_cmp(&b.distance_pct(price).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

impl Default for ZoneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: i as i64 * 900_000,
            close_time: i as i64 * 900_000 + 899_999,
            open,
            high,
            low,
            close,
            volume: 100.0,
            taker_buy_volume: 50.0,
        }
    }

    /// Price oscillates between ~95 (lows) and ~105 (highs), closing at 100:
    /// one support band near 95 and one resistance band near 105.
    fn oscillating_series(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                if i % 6 == 0 {
                    candle(i, 100.0, 105.0, 99.0, 100.0) // swing high bar
                } else if i % 6 == 3 {
                    candle(i, 100.0, 101.0, 95.0, 100.0) // swing low bar
                } else {
                    candle(i, 100.0, 101.0, 99.0, 100.0)
                }
            })
            .collect()
    }

    #[test]
    fn finds_support_and_resistance_bands() {
        let zones = build_zones(&oscillating_series(60), Timeframe::M15);
        assert!(!zones.is_empty());

        let support = zones
            .iter()
            .find(|z| z.kind == ZoneKind::Support && z.contains(95.0));
        let resistance = zones
            .iter()
            .find(|z| z.kind == ZoneKind::Resistance && z.contains(105.0));
        assert!(support.is_some(), "expected a support band at 95: {zones:?}");
        assert!(resistance.is_some(), "expected a resistance band at 105: {zones:?}");
    }

    #[test]
    fn repeated_swings_build_strength() {
        let zones = build_zones(&oscillating_series(120), Timeframe::M15);
        let resistance = zones.iter().find(|z| z.kind == ZoneKind::Resistance).unwrap();
        assert!(
            resistance.strength >= 3,
            "repeated rejections should merge, strength = {}",
            resistance.strength
        );
        assert!(!resistance.touches.is_empty());
        assert_eq!(resistance.touches.len(), resistance.reactions.len());
    }

    #[test]
    fn short_series_builds_nothing() {
        assert!(build_zones(&oscillating_series(3), Timeframe::M15).is_empty());
        assert!(build_zones(&[], Timeframe::M15).is_empty());
    }

    #[test]
    fn freshness_counts_bars_since_touch() {
        // Swing structure early, then price walks away from both bands.
        let mut candles = oscillating_series(30);
        let n = candles.len();
        for i in 0..10 {
            candles.push(candle(n + i, 100.0, 100.5, 99.5, 100.0));
        }
        let zones = build_zones(&candles, Timeframe::M15);
        let support = zones.iter().find(|z| z.kind == ZoneKind::Support).unwrap();
        assert!(support.freshness >= 10, "freshness = {}", support.freshness);
    }

    #[test]
    fn registry_view_is_isolated_per_symbol() {
        let registry = ZoneRegistry::new();
        registry.rebuild("BTCUSDT", Timeframe::M15, &oscillating_series(60));

        assert!(!registry.view("BTCUSDT").is_empty());
        assert!(registry.view("ETHUSDT").is_empty());
    }

    #[test]
    fn nearest_picks_the_closest_band_of_kind() {
        let registry = ZoneRegistry::new();
        registry.rebuild("BTCUSDT", Timeframe::M15, &oscillating_series(60));

        let near_support = registry.nearest("BTCUSDT", 96.0, ZoneKind::Support).unwrap();
        assert!(near_support.mid() < 97.0);

        let near_res = registry.nearest("BTCUSDT", 104.0, ZoneKind::Resistance).unwrap();
        assert!(near_res.mid() > 103.0);
    }
}
