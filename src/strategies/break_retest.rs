// =============================================================================
// Break & Retest — body break of an S/R band, return, rejection
// =============================================================================
//
// A body close through a registered band within the recent window, followed
// by the current bar dipping back into the band and closing on the break
// side. The old level holding as new support/resistance is the entry.
// =============================================================================

use crate::market_data::candle::Timeframe;
use crate::strategies::{FactorFlags, Proposal, Strategy, StrategyKind, SymbolSnapshot};
use crate::tracker::types::Direction;
use crate::zones::{Zone, ZoneKind};

/// Bars back in which the body break must have happened.
const BREAK_LOOKBACK: usize = 10;

/// Stop buffer beyond the band, in ATR.
const SL_BUFFER_ATR: f64 = 0.25;

pub struct BreakRetest;

impl BreakRetest {
    /// A bar in the window whose body crossed the band upward.
    fn broke_up(window: &[crate::market_data::candle::Candle], level: f64) -> bool {
        window.iter().any(|c| c.open <= level && c.close > level)
    }

    fn broke_down(window: &[crate::market_data::candle::Candle], level: f64) -> bool {
        window.iter().any(|c| c.open >= level && c.close < level)
    }

    fn long_setup(&self, snapshot: &SymbolSnapshot, atr: f64, zone: &Zone) -> Option<Proposal> {
        let candles = snapshot.candles(self.timeframe());
        let trigger = candles.last()?;
        let start = candles.len().saturating_sub(BREAK_LOOKBACK + 1);
        let window = &candles[start..candles.len() - 1];

        let retested = trigger.low <= zone.high && trigger.close > zone.high;
        let rejected = trigger.is_bullish();
        if !(retested && rejected && Self::broke_up(window, zone.high)) {
            return None;
        }

        let entry = trigger.close;
        let sl = zone.low - SL_BUFFER_ATR * atr;
        let risk = entry - sl;
        if risk <= 0.0 {
            return None;
        }

        Some(Proposal {
            strategy: self.name(),
            kind: self.kind(),
            timeframe: self.timeframe(),
            direction: Direction::Long,
            entry,
            sl,
            tp1: entry + risk,
            tp2: Some(entry + 2.0 * risk),
            tp3: None,
            base_score: 2.8 + (zone.strength as f64 * 0.2).min(1.0),
            factors: FactorFlags {
                price_action: true,
                zone_confluence: true,
            },
            atr,
            ap: None,
        })
    }

    fn short_setup(&self, snapshot: &SymbolSnapshot, atr: f64, zone: &Zone) -> Option<Proposal> {
        let candles = snapshot.candles(self.timeframe());
        let trigger = candles.last()?;
        let start = candles.len().saturating_sub(BREAK_LOOKBACK + 1);
        let window = &candles[start..candles.len() - 1];

        let retested = trigger.high >= zone.low && trigger.close < zone.low;
        let rejected = !trigger.is_bullish();
        if !(retested && rejected && Self::broke_down(window, zone.low)) {
            return None;
        }

        let entry = trigger.close;
        let sl = zone.high + SL_BUFFER_ATR * atr;
        let risk = sl - entry;
        if risk <= 0.0 {
            return None;
        }

        Some(Proposal {
            strategy: self.name(),
            kind: self.kind(),
            timeframe: self.timeframe(),
            direction: Direction::Short,
            entry,
            sl,
            tp1: entry - risk,
            tp2: Some(entry - 2.0 * risk),
            tp3: None,
            base_score: 2.8 + (zone.strength as f64 * 0.2).min(1.0),
            factors: FactorFlags {
                price_action: true,
                zone_confluence: true,
            },
            atr,
            ap: None,
        })
    }
}

impl Strategy for BreakRetest {
    fn name(&self) -> &'static str {
        "break_retest"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::TrendFollowing
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M15
    }

    fn evaluate(&self, snapshot: &SymbolSnapshot) -> Option<Proposal> {
        let candles = snapshot.candles(self.timeframe());
        if candles.len() < BREAK_LOOKBACK + 2 {
            return None;
        }
        let atr = snapshot.bundle(self.timeframe())?.atr?;
        if atr <= 0.0 {
            return None;
        }

        // A broken-and-held band sits below price as support (mirror above
        // as resistance); check the fresh break inside each candidate.
        for zone in &snapshot.zones {
            let proposal = match zone.kind {
                ZoneKind::Support => self.long_setup(snapshot, atr, zone),
                ZoneKind::Resistance => self.short_setup(snapshot, atr, zone),
            };
            if proposal.is_some() {
                return proposal;
            }
        }
        None
    }
}
