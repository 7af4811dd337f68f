// =============================================================================
// Liquidity Sweep — wick through a recent extreme, rapid reclaim
// =============================================================================
//
// The trigger bar pierces the lowest low (highest high) of the recent window
// with its wick, then closes back on the original side. Stops resting beyond
// the extreme get swept, and the reclaim signals the move was liquidity
// collection rather than a genuine break.
// =============================================================================

use crate::market_data::candle::Timeframe;
use crate::strategies::{FactorFlags, Proposal, Strategy, StrategyKind, SymbolSnapshot};
use crate::tracker::types::Direction;
use crate::zones::ZoneKind;

/// Bars scanned for the prior extreme (trigger bar excluded).
const EXTREME_LOOKBACK: usize = 20;

/// Minimum rejection wick as a multiple of ATR.
const MIN_WICK_ATR: f64 = 0.5;

/// Stop buffer beyond the sweep extreme, in ATR.
const SL_BUFFER_ATR: f64 = 0.25;

pub struct LiquiditySweep;

impl Strategy for LiquiditySweep {
    fn name(&self) -> &'static str {
        "liquidity_sweep"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::MeanReversion
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M15
    }

    fn evaluate(&self, snapshot: &SymbolSnapshot) -> Option<Proposal> {
        let candles = snapshot.candles(self.timeframe());
        if candles.len() < EXTREME_LOOKBACK + 1 {
            return None;
        }
        let atr = snapshot.bundle(self.timeframe())?.atr?;
        if atr <= 0.0 {
            return None;
        }

        let trigger = candles.last()?;
        let window = &candles[candles.len() - 1 - EXTREME_LOOKBACK..candles.len() - 1];
        let prior_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let prior_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);

        // Sweep below the prior low, reclaimed by the close.
        if trigger.low < prior_low
            && trigger.close > prior_low
            && trigger.lower_wick() >= MIN_WICK_ATR * atr
        {
            let pierce_depth = prior_low - trigger.low;
            let sl = trigger.low - SL_BUFFER_ATR * atr;
            let entry = trigger.close;
            let risk = entry - sl;

            let zone_confluence = snapshot
                .zones
                .iter()
                .any(|z| z.kind == ZoneKind::Support && z.contains(trigger.low));

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
                base_score: 2.5 + (pierce_depth / atr).min(1.5),
                factors: FactorFlags {
                    price_action: true,
                    zone_confluence,
                },
                atr,
                ap: None,
            });
        }

        // Mirror: sweep above the prior high, rejected back under it.
        if trigger.high > prior_high
            && trigger.close < prior_high
            && trigger.upper_wick() >= MIN_WICK_ATR * atr
        {
            let pierce_depth = trigger.high - prior_high;
            let sl = trigger.high + SL_BUFFER_ATR * atr;
            let entry = trigger.close;
            let risk = sl - entry;

            let zone_confluence = snapshot
                .zones
                .iter()
                .any(|z| z.kind == ZoneKind::Resistance && z.contains(trigger.high));

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
                base_score: 2.5 + (pierce_depth / atr).min(1.5),
                factors: FactorFlags {
                    price_action: true,
                    zone_confluence,
                },
                atr,
                ap: None,
            });
        }

        None
    }
}
