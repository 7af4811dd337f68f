// =============================================================================
// ATR Momentum — impulse bar with follow-through
// =============================================================================
//
// An impulse bar whose body dwarfs the median ATR, confirmed by the next bar
// closing further in the same direction. Entry joins the move; the stop sits
// behind the impulse origin.
// =============================================================================

use crate::market_data::candle::Timeframe;
use crate::strategies::{FactorFlags, Proposal, Strategy, StrategyKind, SymbolSnapshot};
use crate::tracker::types::Direction;

/// Impulse body must reach this multiple of the median ATR.
const IMPULSE_BODY_MULT: f64 = 1.4;

/// Follow-through body must reach this multiple of ATR.
const FOLLOW_BODY_ATR: f64 = 0.3;

/// Stop buffer behind the impulse origin, in ATR.
const SL_BUFFER_ATR: f64 = 0.25;

pub struct AtrMomentum;

impl Strategy for AtrMomentum {
    fn name(&self) -> &'static str {
        "atr_momentum"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::TrendFollowing
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M15
    }

    fn evaluate(&self, snapshot: &SymbolSnapshot) -> Option<Proposal> {
        let candles = snapshot.candles(self.timeframe());
        if candles.len() < 2 {
            return None;
        }
        let bundle = snapshot.bundle(self.timeframe())?;
        let atr = bundle.atr?;
        let median_atr = bundle.median_atr?;
        if atr <= 0.0 || median_atr <= 0.0 {
            return None;
        }

        let impulse = &candles[candles.len() - 2];
        let follow = candles.last()?;

        if impulse.body() < IMPULSE_BODY_MULT * median_atr {
            return None;
        }
        if follow.body() < FOLLOW_BODY_ATR * atr {
            return None;
        }

        let impulse_strength = impulse.body() / median_atr;

        // Long: bullish impulse, follow-through extends beyond its close.
        if impulse.is_bullish() && follow.is_bullish() && follow.close > impulse.close {
            let entry = follow.close;
            let sl = impulse.open - SL_BUFFER_ATR * atr;
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
                base_score: 2.5 + (impulse_strength - IMPULSE_BODY_MULT).min(1.5),
                factors: FactorFlags {
                    price_action: true,
                    zone_confluence: false,
                },
                atr,
                ap: None,
            });
        }

        // Short mirror.
        if !impulse.is_bullish() && !follow.is_bullish() && follow.close < impulse.close {
            let entry = follow.close;
            let sl = impulse.open + SL_BUFFER_ATR * atr;
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
                base_score: 2.5 + (impulse_strength - IMPULSE_BODY_MULT).min(1.5),
                factors: FactorFlags {
                    price_action: true,
                    zone_confluence: false,
                },
                atr,
                ap: None,
            });
        }

        None
    }
}
