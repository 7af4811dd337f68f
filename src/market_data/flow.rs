// =============================================================================
// Order-flow side channels — depth imbalance, CVD, open interest
// =============================================================================
//
// Exogenous facts consumed by the Order Flow strategy and the scorer's
// factor gate. Each channel has a single writer (the per-cycle poller) and
// many readers (strategies), mirroring the registry discipline used for
// zones.
//
// CVD is derived from kline taker-buy volumes rather than a raw trade
// stream: per candle, taker buys minus taker sells equals
// `2 * taker_buy_volume - volume`.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::market_data::candle::Candle;

// =============================================================================
// Pure series math
// =============================================================================

/// Signed taker delta of one candle.
pub fn taker_delta(candle: &Candle) -> f64 {
    2.0 * candle.taker_buy_volume - candle.volume
}

/// Cumulative volume delta series over a candle window (same length as the
/// input, running sum of taker deltas).
pub fn cvd_series(candles: &[Candle]) -> Vec<f64> {
    let mut acc = 0.0;
    candles
        .iter()
        .map(|c| {
            acc += taker_delta(c);
            acc
        })
        .collect()
}

/// Net CVD change over the last `lookback` candles.
pub fn cvd_change(candles: &[Candle], lookback: usize) -> f64 {
    let start = candles.len().saturating_sub(lookback);
    candles[start..].iter().map(taker_delta).sum()
}

// =============================================================================
// Per-symbol flow snapshot
// =============================================================================

/// Latest order-flow observations for one symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSnapshot {
    /// Depth imbalance in [-1, +1] from the latest order book snapshot.
    pub depth_imbalance: Option<f64>,
    /// Open interest in contracts.
    pub open_interest: Option<f64>,
    /// Percent change of open interest since the previous observation.
    pub oi_change_pct: Option<f64>,
    /// Epoch ms of the last update.
    pub observed_at_ms: i64,
}

/// Registry of flow snapshots, one writer per cycle, read by strategies.
pub struct FlowRegistry {
    snapshots: RwLock<HashMap<String, FlowSnapshot>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn update_depth(&self, symbol: &str, imbalance: f64, now_ms: i64) {
        let mut map = self.snapshots.write();
        let snap = map.entry(symbol.to_string()).or_default();
        snap.depth_imbalance = Some(imbalance);
        snap.observed_at_ms = now_ms;
        debug!(symbol, imbalance = format!("{:.3}", imbalance), "depth imbalance updated");
    }

    /// Record an open-interest observation, deriving the percent change from
    /// the previous one when available.
    pub fn update_open_interest(&self, symbol: &str, oi: f64, now_ms: i64) {
        let mut map = self.snapshots.write();
        let snap = map.entry(symbol.to_string()).or_default();
        snap.oi_change_pct = snap
            .open_interest
            .filter(|prev| *prev > 0.0)
            .map(|prev| (oi - prev) / prev * 100.0);
        snap.open_interest = Some(oi);
        snap.observed_at_ms = now_ms;
    }

    pub fn snapshot(&self, symbol: &str) -> FlowSnapshot {
        self.snapshots.read().get(symbol).cloned().unwrap_or_default()
    }
}

impl Default for FlowRegistry {
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

    fn candle(volume: f64, taker_buy: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 899_999,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume,
            taker_buy_volume: taker_buy,
        }
    }

    #[test]
    fn taker_delta_sign_convention() {
        // All taker buys: delta = +volume.
        assert!((taker_delta(&candle(10.0, 10.0)) - 10.0).abs() < 1e-12);
        // All taker sells: delta = -volume.
        assert!((taker_delta(&candle(10.0, 0.0)) + 10.0).abs() < 1e-12);
        // Balanced: zero.
        assert!(taker_delta(&candle(10.0, 5.0)).abs() < 1e-12);
    }

    #[test]
    fn cvd_series_is_cumulative() {
        let candles = vec![candle(10.0, 10.0), candle(10.0, 0.0), candle(10.0, 7.5)];
        let cvd = cvd_series(&candles);
        assert_eq!(cvd.len(), 3);
        assert!((cvd[0] - 10.0).abs() < 1e-12);
        assert!((cvd[1] - 0.0).abs() < 1e-12);
        assert!((cvd[2] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn cvd_change_over_window() {
        let candles = vec![candle(10.0, 10.0), candle(10.0, 0.0), candle(10.0, 7.5)];
        // Last two candles: -10 + 5 = -5.
        assert!((cvd_change(&candles, 2) + 5.0).abs() < 1e-12);
        // Window larger than series: whole sum.
        assert!((cvd_change(&candles, 10) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn registry_tracks_oi_change() {
        let registry = FlowRegistry::new();
        registry.update_open_interest("BTCUSDT", 1_000.0, 1);
        assert!(registry.snapshot("BTCUSDT").oi_change_pct.is_none());

        registry.update_open_interest("BTCUSDT", 1_100.0, 2);
        let snap = registry.snapshot("BTCUSDT");
        assert!((snap.oi_change_pct.unwrap() - 10.0).abs() < 1e-9);
        assert!((snap.open_interest.unwrap() - 1_100.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_symbol_yields_default_snapshot() {
        let registry = FlowRegistry::new();
        let snap = registry.snapshot("DOGEUSDT");
        assert!(snap.depth_imbalance.is_none());
        assert!(snap.open_interest.is_none());
    }

    #[test]
    fn depth_update_is_visible() {
        let registry = FlowRegistry::new();
        registry.update_depth("ETHUSDT", 0.42, 99);
        let snap = registry.snapshot("ETHUSDT");
        assert!((snap.depth_imbalance.unwrap() - 0.42).abs() < 1e-12);
        assert_eq!(snap.observed_at_ms, 99);
    }
}
