// =============================================================================
// MA/VWAP Pullback — retrace into the moving-average band inside a trend
// =============================================================================
//
// On the 4h timeframe: the EMA20 stack confirms an established trend, price
// retraces into the EMA20/VWAP band, and the retrace depth lands inside the
// Fibonacci window of the last swing. The trigger bar must close back in the
// trend direction.
// =============================================================================

use crate::market_data::candle::Timeframe;
use crate::strategies::{FactorFlags, Proposal, Strategy, StrategyKind, SymbolSnapshot};
use crate::tracker::types::Direction;

/// Bars defining the swing whose retrace is measured.
const SWING_LOOKBACK: usize = 30;

/// Acceptable retrace window around the 38.2%–61.8% Fibonacci levels.
const FIB_MIN: f64 = 0.32;
const FIB_MAX: f64 = 0.68;

/// Band widening and stop buffer, in ATR.
const BAND_BUFFER_ATR: f64 = 0.5;

pub struct MaVwapPullback;

impl Strategy for MaVwapPullback {
    fn name(&self) -> &'static str {
        "ma_vwap_pullback"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::TrendFollowing
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::H4
    }

    fn evaluate(&self, snapshot: &SymbolSnapshot) -> Option<Proposal> {
        let candles = snapshot.candles(self.timeframe());
        if candles.len() < SWING_LOOKBACK + 1 {
            return None;
        }
        let bundle = snapshot.bundle(self.timeframe())?;
        let (atr, ema20, ema50, vwap) = (bundle.atr?, bundle.ema20?, bundle.ema50?, bundle.vwap?);
        if atr <= 0.0 {
            return None;
        }

        let trigger = candles.last()?;
        let window = &candles[candles.len() - SWING_LOOKBACK..];
        let swing_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let swing_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let swing_range = swing_high - swing_low;
        if swing_range <= 0.0 {
            return None;
        }

        let band_low = ema20.min(vwap) - BAND_BUFFER_ATR * atr;
        let band_high = ema20.max(vwap) + BAND_BUFFER_ATR * atr;

        // Uptrend pullback: stack bullish, retrace depth inside the window,
        // bar tags the band and closes back up.
        if ema20 > ema50 && trigger.is_bullish() {
            let retrace = (swing_high - trigger.low) / swing_range;
            let tagged = trigger.low <= band_high && trigger.close >= band_low;
            if (FIB_MIN..=FIB_MAX).contains(&retrace) && tagged {
                let entry = trigger.close;
                let sl = trigger.low - BAND_BUFFER_ATR * atr;
                let risk = entry - sl;
                return Some(Proposal {
                    strategy: self.name(),
                    kind: self.kind(),
                    timeframe: self.timeframe(),
                    direction: Direction::Long,
                    entry,
                    sl,
                    tp1: entry + risk,
                    tp2: Some(entry + 2.0 * risk),
                    tp3: None,
                    base_score: 2.8 + (1.0 - (retrace - 0.5).abs()).max(0.0),
                    factors: FactorFlags {
                        price_action: true,
                        zone_confluence: false,
                    },
                    atr,
                    ap: None,
                });
            }
        }

        // Downtrend mirror.
        if ema20 < ema50 && !trigger.is_bullish() {
            let retrace = (trigger.high - swing_low) / swing_range;
            let tagged = trigger.high >= band_low && trigger.close <= band_high;
            if (FIB_MIN..=FIB_MAX).contains(&retrace) && tagged {
                let entry = trigger.close;
                let sl = trigger.high + BAND_BUFFER_ATR * atr;
                let risk = sl - entry;
                return Some(Proposal {
                    strategy: self.name(),
                    kind: self.kind(),
                    timeframe: self.timeframe(),
                    direction: Direction::Short,
                    entry,
                    sl,
                    tp1: entry - risk,
                    tp2: Some(entry - 2.0 * risk),
                    tp3: None,
                    base_score: 2.8 + (1.0 - (retrace - 0.5).abs()).max(0.0),
                    factors: FactorFlags {
                        price_action: true,
                        zone_confluence: false,
                    },
                    atr,
                    ap: None,
                });
            }
        }

        None
    }
}
