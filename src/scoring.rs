// =============================================================================
// Signal Scorer — multi-factor gate, regime weighting, modifiers, threshold
// =============================================================================
//
// Converts the strategies' proposals for one (symbol, cycle) into at most
// one committed candidate per (symbol, direction, strategy). The pipeline
// runs in a fixed order; the first failing stage blocks the proposal and is
// recorded in its decision:
//
//   1. Factor gate        — fewer than min_factors confirming factors
//   2. Regime weighting   — weight < 0.5 rejects; otherwise multiplies
//   3. BTC filter         — opposing BTC 1h trend subtracts btc_penalty
//   4. CVD divergence     — agreeing 15m+1h divergence adds +0.3..+0.8
//   5. ADX/RSI refinements
//   6. Entry threshold
//   7. Conflict resolution — best score per (direction, strategy)
//
// Every proposal, accepted or not, produces a DecisionRecord for the
// journal: no silent drops.
// =============================================================================

use chrono::Utc;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::ScorerConfig;
use crate::market_data::candle::Candle;
use crate::market_data::flow::cvd_change;
use crate::regime::Regime;
use crate::strategies::{Proposal, StrategyKind, SymbolSnapshot};
use crate::tracker::types::Direction;

/// Bars used for CVD/price agreement and divergence checks.
const CVD_LOOKBACK: usize = 5;

/// Weight below which a (regime, strategy) pairing is rejected outright.
const MIN_REGIME_WEIGHT: f64 = 0.5;

/// Divergence bonus bounds.
const DIVERGENCE_BONUS_MIN: f64 = 0.3;
const DIVERGENCE_BONUS_MAX: f64 = 0.8;

// =============================================================================
// Records
// =============================================================================

/// Auditable record of one scoring decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub id: String,
    pub symbol: String,
    pub strategy: String,
    pub direction: Direction,
    pub regime: Regime,
    pub factor_count: u32,
    pub regime_weight: f64,
    pub base_score: f64,
    pub final_score: f64,
    /// "ACCEPT" or "REJECT".
    pub outcome: &'static str,
    /// The stage that blocked a rejected proposal.
    pub blocking_stage: Option<&'static str>,
    pub reason: Option<String>,
    pub created_at: String,
}

impl DecisionRecord {
    fn accept(proposal: &Proposal, snapshot: &SymbolSnapshot, factors: u32, weight: f64, score: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: snapshot.symbol.clone(),
            strategy: proposal.strategy.to_string(),
            direction: proposal.direction,
            regime: snapshot.regime.regime,
            factor_count: factors,
            regime_weight: weight,
            base_score: proposal.base_score,
            final_score: score,
            outcome: "ACCEPT",
            blocking_stage: None,
            reason: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    fn reject(
        proposal: &Proposal,
        snapshot: &SymbolSnapshot,
        factors: u32,
        weight: f64,
        score: f64,
        stage: &'static str,
        reason: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: snapshot.symbol.clone(),
            strategy: proposal.strategy.to_string(),
            direction: proposal.direction,
            regime: snapshot.regime.regime,
            factor_count: factors,
            regime_weight: weight,
            base_score: proposal.base_score,
            final_score: score,
            outcome: "REJECT",
            blocking_stage: Some(stage),
            reason: Some(reason),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// A proposal that survived the pipeline.
#[derive(Debug, Clone)]
pub struct ScoredProposal {
    pub proposal: Proposal,
    pub final_score: f64,
    pub factor_count: u32,
}

// =============================================================================
// Regime weight table
// =============================================================================

/// Per-(regime, strategy) score multiplier.
pub fn regime_weight(regime: Regime, strategy: &str) -> f64 {
    match regime {
        Regime::Trend => match strategy {
            "break_retest" => 1.5,
            "ma_vwap_pullback" => 1.3,
            "atr_momentum" => 1.2,
            "action_price" => 1.2,
            "volume_profile" => 0.8,
            _ => 0.9,
        },
        Regime::Range => match strategy {
            "volume_profile" => 1.5,
            "liquidity_sweep" => 1.3,
            "order_flow" => 1.0,
            "action_price" => 0.9,
            "break_retest" => 0.7,
            "ma_vwap_pullback" => 0.6,
            "atr_momentum" => 0.4,
            _ => 0.8,
        },
        Regime::Squeeze => match strategy {
            "order_flow" => 1.5,
            "break_retest" => 1.2,
            "action_price" => 1.1,
            "atr_momentum" => 1.0,
            "ma_vwap_pullback" => 0.7,
            _ => 0.9,
        },
        Regime::Chop => match strategy {
            "liquidity_sweep" | "volume_profile" => 1.0,
            "ma_vwap_pullback" | "atr_momentum" => 0.4,
            _ => 0.8,
        },
        Regime::Undecided => 0.8,
    }
}

/// Regime-specific volume multiplier for the factor gate.
fn volume_multiplier(regime: Regime) -> f64 {
    match regime {
        Regime::Trend => 1.2,
        Regime::Squeeze => 1.3,
        _ => 1.5,
    }
}

// =============================================================================
// Scorer
// =============================================================================

pub struct SignalScorer {
    config: ScorerConfig,
}

impl SignalScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    /// Score one symbol's proposals. Returns the accepted candidates (after
    /// conflict resolution) and a decision record per input proposal.
    pub fn score_cycle(
        &self,
        snapshot: &SymbolSnapshot,
        proposals: Vec<Proposal>,
    ) -> (Vec<ScoredProposal>, Vec<DecisionRecord>) {
        let mut decisions = Vec::with_capacity(proposals.len());
        let mut survivors: Vec<(ScoredProposal, usize)> = Vec::new();

        for proposal in proposals {
            match self.score_one(snapshot, &proposal) {
                Ok((score, factors, weight)) => {
                    decisions.push(DecisionRecord::accept(&proposal, snapshot, factors, weight, score));
                    survivors.push((
                        ScoredProposal {
                            proposal,
                            final_score: score,
                            factor_count: factors,
                        },
                        decisions.len() - 1,
                    ));
                }
                Err(record) => decisions.push(*record),
            }
        }

        // Conflict resolution: best score per (direction, strategy). LONG
        // and SHORT coexist; distinct strategies each win independently.
        // Losers get their decision rewritten so nothing drops silently.
        survivors.sort_by(|a, b| {
            b.0.final_score
                .partial_cmp(&a.0.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut winners: Vec<ScoredProposal> = Vec::new();
        for (candidate, decision_idx) in survivors {
            let duplicate = winners.iter().any(|w| {
                w.proposal.direction == candidate.proposal.direction
                    && w.proposal.strategy == candidate.proposal.strategy
            });
            if duplicate {
                let record = &mut decisions[decision_idx];
                record.outcome = "REJECT";
                record.blocking_stage = Some("Conflict");
                record.reason = Some("superseded by a higher-scored duplicate".to_string());
            } else {
                winners.push(candidate);
            }
        }

        (winners, decisions)
    }

    /// The pipeline for one proposal. Returns (final_score, factors, weight)
    /// or the rejecting decision.
    fn score_one(
        &self,
        snapshot: &SymbolSnapshot,
        proposal: &Proposal,
    ) -> Result<(f64, u32, f64), Box<DecisionRecord>> {
        let regime = snapshot.regime.regime;
        let direction = proposal.direction;

        // ── 1. Multi-factor gate ────────────────────────────────────────
        let factors = self.count_factors(snapshot, proposal);
        if factors < self.config.min_factors {
            return Err(Box::new(DecisionRecord::reject(
                proposal,
                snapshot,
                factors,
                0.0,
                0.0,
                "FactorGate",
                format!("{factors} factors < {}", self.config.min_factors),
            )));
        }

        // ── 2. Regime weighting ─────────────────────────────────────────
        let weight = regime_weight(regime, proposal.strategy);
        if weight < MIN_REGIME_WEIGHT {
            return Err(Box::new(DecisionRecord::reject(
                proposal,
                snapshot,
                factors,
                weight,
                0.0,
                "RegimeWeight",
                format!("weight {weight:.2} in {regime}"),
            )));
        }
        let mut score = proposal.base_score * weight;

        // ── 3. BTC filter ───────────────────────────────────────────────
        if snapshot.btc_trend.opposes(direction) {
            score -= self.config.btc_penalty;
        }

        // ── 4. CVD divergence bonus ─────────────────────────────────────
        if let Some(bonus) = self.divergence_bonus(snapshot, direction) {
            score += bonus;
        }

        // ── 5. Refinements ──────────────────────────────────────────────
        if regime == Regime::Trend {
            if let Some(adx) = snapshot.bundle_h1.as_ref().and_then(|b| b.adx) {
                if adx > 30.0 {
                    score += 1.0;
                }
            }
        }

        if proposal.kind == StrategyKind::MeanReversion {
            if let Some(rsi) = snapshot.bundle_m15.as_ref().and_then(|b| b.rsi) {
                let extreme_reversal = match direction {
                    Direction::Long => rsi < 30.0,
                    Direction::Short => rsi > 70.0,
                };
                if extreme_reversal {
                    score += 0.5;
                }
            }
        }

        let category_fit = matches!(
            (regime, proposal.kind),
            (Regime::Trend, StrategyKind::TrendFollowing)
                | (Regime::Range, StrategyKind::MeanReversion)
                | (Regime::Squeeze, StrategyKind::Breakout)
        );
        if category_fit {
            score += 1.0;
        }

        if let Some(bundle) = snapshot.bundle_m15.as_ref() {
            if let (Some(atr), Some(median)) = (bundle.atr, bundle.median_atr) {
                if atr > 2.0 * median {
                    score -= 0.5;
                }
            }
        }

        // ── 6. Threshold ────────────────────────────────────────────────
        if score < self.config.enter_threshold {
            return Err(Box::new(DecisionRecord::reject(
                proposal,
                snapshot,
                factors,
                weight,
                score,
                "Threshold",
                format!("score {score:.2} < {}", self.config.enter_threshold),
            )));
        }

        debug!(
            symbol = %snapshot.symbol,
            strategy = proposal.strategy,
            direction = %direction,
            factors,
            weight,
            score = format!("{score:.2}"),
            "proposal accepted"
        );
        Ok((score, factors, weight))
    }

    /// Count confirming factors: the proposal itself, HTF EMA alignment,
    /// volume expansion, CVD/ΔOI agreement, plus the recognizer's own
    /// price-action and zone-confluence flags.
    fn count_factors(&self, snapshot: &SymbolSnapshot, proposal: &Proposal) -> u32 {
        let direction = proposal.direction;
        let mut count = 1; // the proposal itself

        if let Some(bundle) = snapshot.bundle_h1.as_ref() {
            if let (Some(e50), Some(e200)) = (bundle.ema50, bundle.ema200) {
                let aligned = match direction {
                    Direction::Long => e50 > e200,
                    Direction::Short => e50 < e200,
                };
                if aligned {
                    count += 1;
                }
            }
        }

        if let Some(ratio) = snapshot.bundle_m15.as_ref().and_then(|b| b.volume_ratio) {
            if ratio >= volume_multiplier(snapshot.regime.regime) {
                count += 1;
            }
        }

        if self.cvd_oi_agreement(snapshot, direction) {
            count += 1;
        }

        if proposal.factors.price_action {
            count += 1;
        }
        if proposal.factors.zone_confluence {
            count += 1;
        }

        count
    }

    /// Taker flow agrees with the direction, and open interest (when known)
    /// does not contradict it.
    fn cvd_oi_agreement(&self, snapshot: &SymbolSnapshot, direction: Direction) -> bool {
        let cvd = cvd_change(&snapshot.candles_m15, CVD_LOOKBACK);
        if cvd * direction.sign() <= 0.0 {
            return false;
        }
        match snapshot.flow.oi_change_pct {
            Some(oi) => oi * direction.sign() >= 0.0,
            None => true,
        }
    }

    /// Multi-timeframe CVD divergence: flow pushes with the direction while
    /// price has not followed yet, on both 15m and 1h.
    fn divergence_bonus(&self, snapshot: &SymbolSnapshot, direction: Direction) -> Option<f64> {
        let diverges = |candles: &[Candle]| -> Option<f64> {
            if candles.len() <= CVD_LOOKBACK {
                return None;
            }
            let cvd = cvd_change(candles, CVD_LOOKBACK);
            let price_move =
                candles.last()?.close - candles[candles.len() - 1 - CVD_LOOKBACK].close;
            let flow_agrees = cvd * direction.sign() > 0.0;
            let price_lags = price_move * direction.sign() <= 0.0;
            (flow_agrees && price_lags).then_some(cvd.abs())
        };

        let m15 = diverges(&snapshot.candles_m15)?;
        let _h1 = diverges(&snapshot.candles_h1)?;

        // Scale the bonus by flow magnitude relative to recent volume.
        let mean_volume = snapshot
            .bundle_m15
            .as_ref()
            .and_then(|b| b.mean_volume)
            .unwrap_or(0.0);
        let strength = if mean_volume > 0.0 {
            (m15 / (mean_volume * CVD_LOOKBACK as f64)).min(1.0)
        } else {
            0.0
        };
        Some(DIVERGENCE_BONUS_MIN + (DIVERGENCE_BONUS_MAX - DIVERGENCE_BONUS_MIN) * strength)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScorerConfig;
    use crate::market_data::candle::Timeframe;
    use crate::regime::{Bias, Regime};
    use crate::strategies::testkit::{base_series, snapshot_from};
    use crate::strategies::{BtcTrend, FactorFlags};

    fn proposal(strategy: &'static str, direction: Direction, base: f64) -> Proposal {
        let (entry, sl, tp1, tp2) = match direction {
            Direction::Long => (100.0, 98.0, 102.0, 104.0),
            Direction::Short => (100.0, 102.0, 98.0, 96.0),
        };
        Proposal {
            strategy,
            kind: StrategyKind::TrendFollowing,
            timeframe: Timeframe::M15,
            direction,
            entry,
            sl,
            tp1,
            tp2: Some(tp2),
            tp3: None,
            base_score: base,
            factors: FactorFlags {
                price_action: true,
                zone_confluence: true,
            },
            atr: 0.5,
            ap: None,
        }
    }

    fn scorer() -> SignalScorer {
        SignalScorer::new(ScorerConfig::default())
    }

    /// Snapshot whose 1h EMA stack is bullish and whose recent taker flow
    /// pushes long, so a LONG proposal collects the snapshot factors.
    fn bullish_snapshot() -> SymbolSnapshot {
        let mut candles = base_series(250, 100.0);
        let n = candles.len();
        for c in &mut candles[n - 5..] {
            c.taker_buy_volume = c.volume * 0.8;
        }
        let mut snapshot = snapshot_from(candles, Regime::Trend, Bias::Bullish);
        // Rising 1h series: EMA50 > EMA200.
        let h1: Vec<_> = (0..260)
            .map(|i| {
                let mut c = crate::strategies::testkit::flat_candle(i, 90.0 + i as f64 * 0.1);
                c.taker_buy_volume = c.volume * 0.8;
                c
            })
            .collect();
        snapshot.bundle_h1 = crate::indicators::IndicatorBundle::compute(&h1).map(std::sync::Arc::new);
        snapshot.candles_h1 = std::sync::Arc::new(h1);
        snapshot
    }

    #[test]
    fn strong_proposal_is_accepted() {
        let snapshot = bullish_snapshot();
        let (winners, decisions) =
            scorer().score_cycle(&snapshot, vec![proposal("break_retest", Direction::Long, 3.0)]);

        assert_eq!(winners.len(), 1);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].outcome, "ACCEPT");
        assert!(decisions[0].factor_count >= 3);
        // TREND weight for break_retest is 1.5, plus category fit.
        assert!(winners[0].final_score > 4.5);
    }

    #[test]
    fn factor_gate_blocks_thin_proposals() {
        let snapshot = bullish_snapshot();
        let mut thin = proposal("break_retest", Direction::Short, 3.0);
        // Short against a bullish stack and buy-side flow, with no
        // recognizer flags: only the proposal-itself factor remains.
        thin.factors = FactorFlags::default();

        let (winners, decisions) = scorer().score_cycle(&snapshot, vec![thin]);
        assert!(winners.is_empty());
        assert_eq!(decisions[0].outcome, "REJECT");
        assert_eq!(decisions[0].blocking_stage, Some("FactorGate"));
    }

    #[test]
    fn low_regime_weight_rejects() {
        let mut snapshot = bullish_snapshot();
        snapshot.regime.regime = Regime::Range;

        let (winners, decisions) =
            scorer().score_cycle(&snapshot, vec![proposal("atr_momentum", Direction::Long, 5.0)]);
        assert!(winners.is_empty());
        assert_eq!(decisions[0].blocking_stage, Some("RegimeWeight"));
        assert!((decisions[0].regime_weight - 0.4).abs() < 1e-12);
    }

    #[test]
    fn btc_opposition_subtracts_penalty() {
        let mut snapshot = bullish_snapshot();
        let (with_flat, _) =
            scorer().score_cycle(&snapshot, vec![proposal("break_retest", Direction::Long, 3.0)]);

        snapshot.btc_trend = BtcTrend::Down;
        let (with_down, _) =
            scorer().score_cycle(&snapshot, vec![proposal("break_retest", Direction::Long, 3.0)]);

        let flat_score = with_flat[0].final_score;
        match with_down.first() {
            Some(scored) => assert!((flat_score - scored.final_score - 2.0).abs() < 1e-9),
            None => {
                // Penalty pushed it under the threshold entirely; that is the
                // same contract.
            }
        }
    }

    #[test]
    fn below_threshold_is_rejected() {
        let snapshot = bullish_snapshot();
        let (winners, decisions) =
            scorer().score_cycle(&snapshot, vec![proposal("liquidity_sweep", Direction::Long, 0.5)]);
        assert!(winners.is_empty());
        assert_eq!(decisions[0].blocking_stage, Some("Threshold"));
    }

    #[test]
    fn conflict_resolution_keeps_best_per_strategy_direction() {
        let snapshot = bullish_snapshot();
        let (winners, decisions) = scorer().score_cycle(
            &snapshot,
            vec![
                proposal("break_retest", Direction::Long, 3.0),
                proposal("break_retest", Direction::Long, 4.0),
            ],
        );

        assert_eq!(decisions.len(), 2, "every proposal gets a decision");
        assert_eq!(winners.len(), 1, "one winner per (direction, strategy)");
        assert!((winners[0].proposal.base_score - 4.0).abs() < 1e-12);

        let accepted = decisions.iter().filter(|d| d.outcome == "ACCEPT").count();
        let conflicted = decisions
            .iter()
            .filter(|d| d.blocking_stage == Some("Conflict"))
            .count();
        assert_eq!(accepted, 1, "the loser's decision is rewritten");
        assert_eq!(conflicted, 1);
    }

    #[test]
    fn different_strategies_win_independently() {
        let snapshot = bullish_snapshot();
        let (winners, _) = scorer().score_cycle(
            &snapshot,
            vec![
                proposal("break_retest", Direction::Long, 3.0),
                proposal("ma_vwap_pullback", Direction::Long, 3.0),
            ],
        );
        assert_eq!(winners.len(), 2);
    }

    #[test]
    fn trend_weight_table_matches_contract() {
        assert!((regime_weight(Regime::Trend, "break_retest") - 1.5).abs() < 1e-12);
        assert!((regime_weight(Regime::Trend, "ma_vwap_pullback") - 1.3).abs() < 1e-12);
        assert!((regime_weight(Regime::Range, "volume_profile") - 1.5).abs() < 1e-12);
        assert!((regime_weight(Regime::Range, "liquidity_sweep") - 1.3).abs() < 1e-12);
        assert!((regime_weight(Regime::Squeeze, "order_flow") - 1.5).abs() < 1e-12);
        assert!(regime_weight(Regime::Range, "atr_momentum") < 0.5);
    }
}
