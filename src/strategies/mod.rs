// =============================================================================
// Strategy Set — uniform evaluate contract over a per-symbol snapshot
// =============================================================================
//
// Strategies are pure recognizers: no persistence, no locks, no clock reads
// beyond the candle series handed to them. Each receives the same
// [`SymbolSnapshot`] for the cycle and returns at most one [`Proposal`].
//
// | Strategy          | TF  | Regime affinity | Trigger                        |
// |-------------------|-----|-----------------|--------------------------------|
// | liquidity_sweep   | 15m | any             | wick through extreme + reclaim |
// | break_retest      | 15m | TREND/SQUEEZE   | zone break, return, rejection  |
// | order_flow        | 15m | SQUEEZE         | depth + CVD near value area    |
// | ma_vwap_pullback  | 4h  | TREND           | pullback into EMA20/VWAP band  |
// | volume_profile    | 15m | any             | VAH/VAL fade or acceptance     |
// | atr_momentum      | 15m | TREND           | impulse bar + follow-through   |
// | action_price      | 15m | any             | EMA200 body cross + confirm    |
// =============================================================================

pub mod action_price;
pub mod atr_momentum;
pub mod break_retest;
pub mod liquidity_sweep;
pub mod ma_vwap_pullback;
pub mod order_flow;
pub mod volume_profile;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ActionPriceConfig;
use crate::indicators::IndicatorBundle;
use crate::market_data::candle::{Candle, Timeframe};
use crate::market_data::flow::FlowSnapshot;
use crate::regime::RegimeSnapshot;
use crate::tracker::types::{ApDetails, Direction};
use crate::zones::Zone;

/// Exogenous BTC 1h trend tag computed once per cycle and shared by every
/// symbol's evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BtcTrend {
    Up,
    Down,
    Flat,
}

impl BtcTrend {
    /// Whether this trend opposes a proposal direction.
    pub fn opposes(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (BtcTrend::Up, Direction::Short) | (BtcTrend::Down, Direction::Long)
        )
    }
}

impl std::fmt::Display for BtcTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BtcTrend::Up => write!(f, "UP"),
            BtcTrend::Down => write!(f, "DOWN"),
            BtcTrend::Flat => write!(f, "FLAT"),
        }
    }
}

/// Category used by the scorer's regime-affinity refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    TrendFollowing,
    MeanReversion,
    Breakout,
}

/// Factor flags a recognizer can assert about its own trigger. The scorer
/// fills in the snapshot-derived factors (HTF alignment, volume, CVD/OI).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorFlags {
    /// A recognizable price-action pattern sits on the trigger bar.
    pub price_action: bool,
    /// The setup coincides with a registered S/R zone.
    pub zone_confluence: bool,
}

/// One candidate trade from one strategy, pre-scoring.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub strategy: &'static str,
    pub kind: StrategyKind,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry: f64,
    pub sl: f64,
    pub tp1: f64,
    pub tp2: Option<f64>,
    pub tp3: Option<f64>,
    pub base_score: f64,
    pub factors: FactorFlags,
    /// ATR on the proposal timeframe, used for trailing once tracked.
    pub atr: f64,
    /// Action Price extras, present only for the EMA200 body-cross pipeline.
    pub ap: Option<ApDetails>,
}

impl Proposal {
    /// Initial risk distance.
    pub fn risk(&self) -> f64 {
        (self.entry - self.sl).abs()
    }
}

/// Everything one symbol's evaluation may read for a cycle. Built once per
/// symbol after its refresh completes; strategies never see in-flight data.
#[derive(Clone)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub candles_m15: Arc<Vec<Candle>>,
    pub candles_h1: Arc<Vec<Candle>>,
    pub candles_h4: Arc<Vec<Candle>>,
    pub bundle_m15: Option<Arc<IndicatorBundle>>,
    pub bundle_h1: Option<Arc<IndicatorBundle>>,
    pub bundle_h4: Option<Arc<IndicatorBundle>>,
    pub zones: Vec<Zone>,
    pub regime: RegimeSnapshot,
    pub mark_price: f64,
    pub btc_trend: BtcTrend,
    pub flow: FlowSnapshot,
}

impl SymbolSnapshot {
    /// Candles for a strategy's declared timeframe.
    pub fn candles(&self, timeframe: Timeframe) -> &[Candle] {
        match timeframe {
            Timeframe::M15 => &self.candles_m15,
            Timeframe::H1 => &self.candles_h1,
            Timeframe::H4 => &self.candles_h4,
            Timeframe::D1 => &[],
        }
    }

    pub fn bundle(&self, timeframe: Timeframe) -> Option<&Arc<IndicatorBundle>> {
        match timeframe {
            Timeframe::M15 => self.bundle_m15.as_ref(),
            Timeframe::H1 => self.bundle_h1.as_ref(),
            Timeframe::H4 => self.bundle_h4.as_ref(),
            Timeframe::D1 => None,
        }
    }
}

/// The uniform evaluate contract.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> StrategyKind;
    fn timeframe(&self) -> Timeframe;
    /// Zero or one proposal. Must be pure.
    fn evaluate(&self, snapshot: &SymbolSnapshot) -> Option<Proposal>;
}

/// Build the full strategy portfolio.
pub fn default_strategies(action_price: ActionPriceConfig) -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(liquidity_sweep::LiquiditySweep),
        Box::new(break_retest::BreakRetest),
        Box::new(order_flow::OrderFlow),
        Box::new(ma_vwap_pullback::MaVwapPullback),
        Box::new(volume_profile::VolumeProfileStrategy),
        Box::new(atr_momentum::AtrMomentum),
        Box::new(action_price::ActionPrice::new(action_price)),
    ]
}

// =============================================================================
// Test support — snapshot builder shared by the strategy test modules
// =============================================================================
#[cfg(test)]
pub(crate) mod testkit {
    use super::*;
    use crate::regime::{Bias, Regime};

    pub fn flat_candle(i: usize, price: f64) -> Candle {
        Candle {
            open_time: i as i64 * 900_000,
            close_time: i as i64 * 900_000 + 899_999,
            open: price,
            high: price + 0.5,
            low: price - 0.5,
            close: price,
            volume: 100.0,
            taker_buy_volume: 50.0,
        }
    }

    /// A quiet series around `price` long enough for every indicator.
    pub fn base_series(n: usize, price: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let drift = (i as f64 * 0.35).sin() * 0.4;
                let mut c = flat_candle(i, price + drift);
                c.volume = 100.0 + (i % 7) as f64;
                c.taker_buy_volume = c.volume / 2.0;
                c
            })
            .collect()
    }

    pub fn snapshot_from(candles_m15: Vec<Candle>, regime: Regime, bias: Bias) -> SymbolSnapshot {
        let candles_h1 = base_series(250, candles_m15.last().map(|c| c.close).unwrap_or(100.0));
        let candles_h4 = base_series(80, candles_m15.last().map(|c| c.close).unwrap_or(100.0));

        let bundle_m15 = IndicatorBundle::compute(&candles_m15).map(Arc::new);
        let bundle_h1 = IndicatorBundle::compute(&candles_h1).map(Arc::new);
        let bundle_h4 = IndicatorBundle::compute(&candles_h4).map(Arc::new);

        let zones = crate::zones::build_zones(&candles_m15, Timeframe::M15);
        let mark_price = candles_m15.last().map(|c| c.close).unwrap_or(100.0);

        SymbolSnapshot {
            symbol: "TESTUSDT".to_string(),
            candles_m15: Arc::new(candles_m15),
            candles_h1: Arc::new(candles_h1),
            candles_h4: Arc::new(candles_h4),
            bundle_m15,
            bundle_h1,
            bundle_h4,
            zones,
            regime: RegimeSnapshot {
                regime,
                bias,
                adx: Some(28.0),
                ema200_slope_pct: Some(0.2),
                bb_width_percentile: Some(0.5),
                squeeze_contained: Some(false),
            },
            mark_price,
            btc_trend: BtcTrend::Flat,
            flow: FlowSnapshot::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btc_trend_opposition() {
        assert!(BtcTrend::Up.opposes(Direction::Short));
        assert!(BtcTrend::Down.opposes(Direction::Long));
        assert!(!BtcTrend::Up.opposes(Direction::Long));
        assert!(!BtcTrend::Flat.opposes(Direction::Long));
        assert!(!BtcTrend::Flat.opposes(Direction::Short));
    }

    #[test]
    fn portfolio_contains_all_recognizers() {
        let strategies = default_strategies(ActionPriceConfig::default());
        let names: Vec<&str> = strategies.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), 7);
        for expected in [
            "liquidity_sweep",
            "break_retest",
            "order_flow",
            "ma_vwap_pullback",
            "volume_profile",
            "atr_momentum",
            "action_price",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }
}
