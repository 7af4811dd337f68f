// =============================================================================
// Order Flow — sustained depth imbalance with CVD agreement at value
// =============================================================================
//
// Fires when the order book leans hard to one side, recent taker flow (CVD)
// agrees, and price sits at a value-area reference (POC / VAH / VAL) where
// the imbalance can actually resolve into a move.
// =============================================================================

use crate::market_data::candle::Timeframe;
use crate::market_data::flow::cvd_change;
use crate::strategies::{FactorFlags, Proposal, Strategy, StrategyKind, SymbolSnapshot};
use crate::tracker::types::Direction;

/// Minimum absolute depth imbalance.
const MIN_IMBALANCE: f64 = 0.25;

/// CVD agreement window, in bars.
const CVD_LOOKBACK: usize = 5;

/// Maximum distance from a value-area level, percent of price.
const MAX_VA_DISTANCE_PCT: f64 = 0.3;

/// Stop distance beyond entry, in ATR.
const SL_ATR: f64 = 0.75;

pub struct OrderFlow;

impl Strategy for OrderFlow {
    fn name(&self) -> &'static str {
        "order_flow"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Breakout
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M15
    }

    fn evaluate(&self, snapshot: &SymbolSnapshot) -> Option<Proposal> {
        let candles = snapshot.candles(self.timeframe());
        let bundle = snapshot.bundle(self.timeframe())?;
        let atr = bundle.atr?;
        let profile = bundle.profile.as_ref()?;
        if atr <= 0.0 {
            return None;
        }

        let imbalance = snapshot.flow.depth_imbalance?;
        if imbalance.abs() < MIN_IMBALANCE {
            return None;
        }

        let direction = if imbalance > 0.0 {
            Direction::Long
        } else {
            Direction::Short
        };

        // Taker flow must push the same way as the book lean.
        let cvd = cvd_change(candles, CVD_LOOKBACK);
        if cvd * direction.sign() <= 0.0 {
            return None;
        }

        // Price must sit at a value-area reference.
        let price = candles.last()?.close;
        let near_value = [profile.poc, profile.vah, profile.val]
            .iter()
            .any(|level| ((price - level) / price * 100.0).abs() <= MAX_VA_DISTANCE_PCT);
        if !near_value {
            return None;
        }

        let entry = price;
        let (sl, risk) = match direction {
            Direction::Long => (entry - SL_ATR * atr, SL_ATR * atr),
            Direction::Short => (entry + SL_ATR * atr, SL_ATR * atr),
        };

        let (tp1, tp2) = match direction {
            Direction::Long => (entry + risk, entry + 2.0 * risk),
            Direction::Short => (entry - risk, entry - 2.0 * risk),
        };

        Some(Proposal {
            strategy: self.name(),
            kind: self.kind(),
            timeframe: self.timeframe(),
            direction,
            entry,
            sl,
            tp1,
            tp2: Some(tp2),
            tp3: None,
            base_score: 2.5 + imbalance.abs() * 2.0,
            factors: FactorFlags {
                price_action: false,
                zone_confluence: true,
            },
            atr,
            ap: None,
        })
    }
}
