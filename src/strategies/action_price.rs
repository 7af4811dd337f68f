// =============================================================================
// Action Price — EMA200 body cross with confirming bar
// =============================================================================
//
// The trigger is structural: an initiator bar whose body crosses EMA200,
// followed by a confirming bar that closes on the same side. Eleven additive
// components score the quality of the cross; the total selects the execution
// mode:
//
//   total >= standard_score        => STANDARD (TP2 at 2R)
//   total >= min_total_score       => SCALP    (TP2 at tp2_scalp_rr * R)
//   otherwise                      => no signal
//
// The stop anchors to the initiator extreme plus a small ATR buffer and is
// hard-capped by max_sl_percent. The TP schedule is shared with the tracker:
// TP1 at 1R (30%), TP2 (40%), trailing runner (30%).
// =============================================================================

use crate::config::ActionPriceConfig;
use crate::indicators::ema::{calculate_ema, ema_slope_pct};
use crate::market_data::candle::{Candle, Timeframe};
use crate::strategies::{FactorFlags, Proposal, Strategy, StrategyKind, SymbolSnapshot};
use crate::tracker::types::{ApComponents, ApDetails, ApMode, Direction};

/// Bars of history required (EMA200 plus a scoring tail).
const MIN_CANDLES: usize = 220;

/// Stop buffer beyond the initiator extreme, in ATR.
const SL_BUFFER_ATR: f64 = 0.25;

/// Distance from EMA200 (in ATR) within which proximity costs nothing.
const PROXIMITY_FREE_ATR: f64 = 1.0;

/// EMA200 slope magnitude (percent) that counts as directional.
const SLOPE_MIN_PCT: f64 = 0.02;

/// Fan spread (in ATR) under which the 5/13/20 EMAs read as compact.
const FAN_COMPACT_ATR: f64 = 1.0;

/// Retest search window before the initiator, in bars.
const RETEST_LOOKBACK: usize = 5;

/// Proximity (in ATR) that counts as touching EMA200 for the retest tag.
const RETEST_TOUCH_ATR: f64 = 0.3;

/// Base-structure search window before the initiator, in bars.
const BASE_LOOKBACK: usize = 6;

/// Consecutive small bodies required for the break-and-base tag.
const BASE_MIN_BARS: usize = 3;

/// Body (in ATR) under which a bar counts as basing.
const BASE_BODY_ATR: f64 = 0.5;

/// Volume multipliers for the confirmation component.
const VOLUME_STRONG_MULT: f64 = 2.0;
const VOLUME_OK_MULT: f64 = 1.3;
const VOLUME_WEAK_MULT: f64 = 0.8;

/// EMA200-touch window and count for the sticky penalty.
const STICKY_LOOKBACK: usize = 30;
const STICKY_MAX_TOUCHES: usize = 3;

/// Distance from EMA200 (in ATR) beyond which the entry is overextended.
const OVEREXTENDED_ATR: f64 = 3.0;

pub struct ActionPrice {
    config: ActionPriceConfig,
}

impl ActionPrice {
    pub fn new(config: ActionPriceConfig) -> Self {
        Self { config }
    }

    /// EMA200 value at candle index `i` (needs `i >= 199`).
    fn ema200_at(series: &[f64], i: usize) -> Option<f64> {
        (i >= 199).then(|| series.get(i + 1 - 200).copied()).flatten()
    }

    fn score_components(
        &self,
        candles: &[Candle],
        closes: &[f64],
        ema200_series: &[f64],
        direction: Direction,
        atr: f64,
    ) -> ApComponents {
        let n = candles.len();
        let initiator = &candles[n - 2];
        let confirm = &candles[n - 1];
        let sign = direction.sign();

        let e200_confirm = ema200_series.last().copied().unwrap_or(confirm.close);

        let mut c = ApComponents::default();

        // c1 — initiator body relative to ATR, bounded at 2.
        c.initiator_size = (initiator.body() / atr).clamp(0.0, 2.0);

        // c2 — proximity of the confirming close to EMA200; the first ATR is
        // free, further distance penalizes up to -2.
        let dist_atr = (confirm.close - e200_confirm).abs() / atr;
        c.ema_proximity = -((dist_atr - PROXIMITY_FREE_ATR).max(0.0)).min(2.0);

        // c3 — confirming body centered inside the EMA200..EMA13 band.
        if let Some(ema13) = calculate_ema(closes, 13).last().copied() {
            let body_mid = (confirm.open + confirm.close) / 2.0;
            let (lo, hi) = if e200_confirm <= ema13 {
                (e200_confirm, ema13)
            } else {
                (ema13, e200_confirm)
            };
            if body_mid >= lo && body_mid <= hi {
                c.pullback_depth = 1.0;
            }
        }

        // c4 — EMA200 slope agreement with the cross direction.
        if let Some(slope) = ema_slope_pct(closes, 200, 5) {
            if slope * sign >= SLOPE_MIN_PCT {
                c.ema_slope = 1.0;
            } else if slope * sign <= -SLOPE_MIN_PCT {
                c.ema_slope = -1.0;
            }
        }

        // c5 — compactness of the fast-EMA fan.
        let fan: Vec<f64> = [5usize, 13, 20]
            .iter()
            .filter_map(|p| calculate_ema(closes, *p).last().copied())
            .collect();
        if fan.len() == 3 {
            let spread = fan.iter().cloned().fold(f64::MIN, f64::max)
                - fan.iter().cloned().fold(f64::MAX, f64::min);
            if spread / atr <= FAN_COMPACT_ATR {
                c.fan_compactness = 1.0;
            }
        }

        // c6 — a recent retest: a bar touching EMA200 and closing back on
        // the cross side.
        for i in n.saturating_sub(2 + RETEST_LOOKBACK)..n - 2 {
            let Some(e200) = Self::ema200_at(ema200_series, i) else {
                continue;
            };
            let bar = &candles[i];
            let touched = match direction {
                Direction::Long => bar.low <= e200 + RETEST_TOUCH_ATR * atr,
                Direction::Short => bar.high >= e200 - RETEST_TOUCH_ATR * atr,
            };
            let held = (bar.close - e200) * sign > 0.0;
            if touched && held {
                c.retest = 1.0;
                break;
            }
        }

        // c7 — break-and-base: consecutive small bodies hugging EMA200
        // before the initiator.
        let mut consecutive = 0usize;
        let mut based = false;
        for i in n.saturating_sub(2 + BASE_LOOKBACK)..n - 2 {
            let Some(e200) = Self::ema200_at(ema200_series, i) else {
                continue;
            };
            let bar = &candles[i];
            if bar.body() <= BASE_BODY_ATR * atr && (bar.close - e200).abs() <= atr {
                consecutive += 1;
                if consecutive >= BASE_MIN_BARS {
                    based = true;
                }
            } else {
                consecutive = 0;
            }
        }
        if based {
            c.break_and_base = 1.0;
        }

        // c8 — rejection wick on the initiator against the cross direction.
        let rejection = match direction {
            Direction::Long => initiator.lower_wick(),
            Direction::Short => initiator.upper_wick(),
        };
        if rejection >= initiator.body() {
            c.rejection_wick = 1.0;
        }

        // c9 — breakout volume against the 20-bar mean before the initiator.
        let vol_window = &candles[n.saturating_sub(22)..n - 2];
        if !vol_window.is_empty() {
            let mean: f64 =
                vol_window.iter().map(|b| b.volume).sum::<f64>() / vol_window.len() as f64;
            if mean > 0.0 {
                let ratio = initiator.volume / mean;
                c.volume_confirmation = if ratio >= VOLUME_STRONG_MULT {
                    2.0
                } else if ratio >= VOLUME_OK_MULT {
                    1.0
                } else if ratio < VOLUME_WEAK_MULT {
                    -1.0
                } else {
                    0.0
                };
            }
        }

        // c10 — sticky EMA200: too many prior touches means the level has
        // stopped mattering.
        let touches = (n.saturating_sub(2 + STICKY_LOOKBACK)..n - 2)
            .filter(|&i| {
                Self::ema200_at(ema200_series, i)
                    .map(|e200| candles[i].low <= e200 && candles[i].high >= e200)
                    .unwrap_or(false)
            })
            .count();
        if touches >= STICKY_MAX_TOUCHES {
            c.sticky_penalty = -2.0;
        }

        // c11 — overextension beyond N ATR from EMA200.
        if dist_atr > OVEREXTENDED_ATR {
            c.overextension_penalty = -2.0;
        }

        c
    }
}

impl Strategy for ActionPrice {
    fn name(&self) -> &'static str {
        "action_price"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::TrendFollowing
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M15
    }

    fn evaluate(&self, snapshot: &SymbolSnapshot) -> Option<Proposal> {
        let candles = snapshot.candles(self.timeframe());
        let n = candles.len();
        if n < MIN_CANDLES {
            return None;
        }
        let atr = snapshot.bundle(self.timeframe())?.atr?;
        if atr <= 0.0 {
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let ema200_series = calculate_ema(&closes, 200);

        let initiator = &candles[n - 2];
        let confirm = &candles[n - 1];
        let e200_initiator = Self::ema200_at(&ema200_series, n - 2)?;
        let e200_confirm = ema200_series.last().copied()?;

        let body_lo = initiator.open.min(initiator.close);
        let body_hi = initiator.open.max(initiator.close);
        if !(body_lo < e200_initiator && e200_initiator < body_hi) {
            return None;
        }

        let direction = if initiator.close > e200_initiator {
            Direction::Long
        } else {
            Direction::Short
        };
        // The confirming bar must close on the cross side.
        if (confirm.close - e200_confirm) * direction.sign() <= 0.0 {
            return None;
        }

        let components = self.score_components(candles, &closes, &ema200_series, direction, atr);
        let total = components.total();

        let mode = if total >= self.config.standard_score {
            ApMode::Standard
        } else if total >= self.config.min_total_score {
            ApMode::Scalp
        } else {
            return None;
        };

        // Stop anchored to the initiator extreme, hard-capped in percent.
        let entry = confirm.close;
        let sl = match direction {
            Direction::Long => initiator.low - SL_BUFFER_ATR * atr,
            Direction::Short => initiator.high + SL_BUFFER_ATR * atr,
        };
        let risk = (entry - sl).abs();
        if risk / entry * 100.0 > self.config.max_sl_percent {
            return None;
        }

        let tp2_rr = match mode {
            ApMode::Standard => 2.0,
            ApMode::Scalp => self.config.tp2_scalp_rr,
            ApMode::Skip => return None,
        };
        let (tp1, tp2) = match direction {
            Direction::Long => (entry + risk, entry + tp2_rr * risk),
            Direction::Short => (entry - risk, entry - tp2_rr * risk),
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
            base_score: total,
            factors: FactorFlags {
                price_action: true,
                zone_confluence: false,
            },
            atr,
            ap: Some(ApDetails {
                mode,
                components,
                total_score: total,
                initiator_time: initiator.open_time,
                confirm_open: confirm.open,
                confirm_high: confirm.high,
                confirm_low: confirm.low,
                confirm_close: confirm.close,
                ema200_at_entry: e200_confirm,
            }),
        })
    }
}
