// =============================================================================
// Volume Profile — value-area fades and acceptance breakouts
// =============================================================================
//
// Around the session profile's value area:
//   - Fade: a poke through VAH/VAL that closes back inside value targets the
//     POC (rotation back through the distribution).
//   - Acceptance: a body close beyond the edge on elevated volume targets
//     the move away from value.
// =============================================================================

use crate::market_data::candle::Timeframe;
use crate::strategies::{FactorFlags, Proposal, Strategy, StrategyKind, SymbolSnapshot};
use crate::tracker::types::Direction;

/// Volume ratio a breakout bar must print for acceptance.
const ACCEPT_VOLUME_RATIO: f64 = 1.4;

/// Stop buffer beyond the faded extreme / broken edge, in ATR.
const SL_BUFFER_ATR: f64 = 0.5;

pub struct VolumeProfileStrategy;

impl Strategy for VolumeProfileStrategy {
    fn name(&self) -> &'static str {
        "volume_profile"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::MeanReversion
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M15
    }

    fn evaluate(&self, snapshot: &SymbolSnapshot) -> Option<Proposal> {
        let candles = snapshot.candles(self.timeframe());
        let bundle = snapshot.bundle(self.timeframe())?;
        let atr = bundle.atr?;
        let profile = bundle.profile.as_ref()?;
        let volume_ratio = bundle.volume_ratio.unwrap_or(1.0);
        if atr <= 0.0 {
            return None;
        }

        let trigger = candles.last()?;
        let (poc, vah, val) = (profile.poc, profile.vah, profile.val);

        // ── Acceptance above VAH: body break on volume ─────────────────
        if trigger.open <= vah && trigger.close > vah && volume_ratio >= ACCEPT_VOLUME_RATIO {
            let entry = trigger.close;
            let sl = vah - SL_BUFFER_ATR * atr;
            let risk = entry - sl;
            return Some(Proposal {
                strategy: self.name(),
                kind: StrategyKind::Breakout,
                timeframe: self.timeframe(),
                direction: Direction::Long,
                entry,
                sl,
                tp1: entry + risk,
                tp2: Some(entry + 2.0 * risk),
                tp3: None,
                base_score: 2.6 + (volume_ratio - ACCEPT_VOLUME_RATIO).min(1.2),
                factors: FactorFlags {
                    price_action: false,
                    zone_confluence: true,
                },
                atr,
                ap: None,
            });
        }

        // ── Acceptance below VAL ───────────────────────────────────────
        if trigger.open >= val && trigger.close < val && volume_ratio >= ACCEPT_VOLUME_RATIO {
            let entry = trigger.close;
            let sl = val + SL_BUFFER_ATR * atr;
            let risk = sl - entry;
            return Some(Proposal {
                strategy: self.name(),
                kind: StrategyKind::Breakout,
                timeframe: self.timeframe(),
                direction: Direction::Short,
                entry,
                sl,
                tp1: entry - risk,
                tp2: Some(entry - 2.0 * risk),
                tp3: None,
                base_score: 2.6 + (volume_ratio - ACCEPT_VOLUME_RATIO).min(1.2),
                factors: FactorFlags {
                    price_action: false,
                    zone_confluence: true,
                },
                atr,
                ap: None,
            });
        }

        // ── Fade at VAH: poke above, close back inside value ───────────
        if trigger.high >= vah && trigger.close < vah && !trigger.is_bullish() {
            let entry = trigger.close;
            let sl = trigger.high.max(vah) + SL_BUFFER_ATR * atr;
            let risk = sl - entry;
            let tp1 = if poc < entry { poc } else { entry - risk };
            let tp2 = (val < tp1).then_some(val);
            return Some(Proposal {
                strategy: self.name(),
                kind: self.kind(),
                timeframe: self.timeframe(),
                direction: Direction::Short,
                entry,
                sl,
                tp1,
                tp2,
                tp3: None,
                base_score: 2.6 + (trigger.upper_wick() / atr).min(1.0),
                factors: FactorFlags {
                    price_action: true,
                    zone_confluence: true,
                },
                atr,
                ap: None,
            });
        }

        // ── Fade at VAL: poke below, close back inside value ───────────
        if trigger.low <= val && trigger.close > val && trigger.is_bullish() {
            let entry = trigger.close;
            let sl = trigger.low.min(val) - SL_BUFFER_ATR * atr;
            let risk = entry - sl;
            let tp1 = if poc > entry { poc } else { entry + risk };
            let tp2 = (vah > tp1).then_some(vah);
            return Some(Proposal {
                strategy: self.name(),
                kind: self.kind(),
                timeframe: self.timeframe(),
                direction: Direction::Long,
                entry,
                sl,
                tp1,
                tp2,
                tp3: None,
                base_score: 2.6 + (trigger.lower_wick() / atr).min(1.0),
                factors: FactorFlags {
                    price_action: true,
                    zone_confluence: true,
                },
                atr,
                ap: None,
            });
        }

        None
    }
}
