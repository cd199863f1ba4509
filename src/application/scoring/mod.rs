//! Scoring engine: per-security sub-scores, the weighted composite, and
//! the tag set refresh (spec.md §4.C).

pub mod quantum;

use crate::domain::ids::Isin;
use crate::domain::regime::MarketRegime;
use crate::domain::score::{ScoreWeights, SecurityScore, SubScores};
use crate::domain::security::{ProductType, Tag, TagSet};
use crate::domain::settings::Settings;
use chrono::Utc;

/// Market/fundamental snapshot the scoring engine needs for one security.
/// Assembled by the application layer from `MarketDataAdapter` +
/// `SecurityRepository` reads; not persisted itself.
#[derive(Debug, Clone)]
pub struct SecurityMarketData {
    pub isin: Isin,
    pub product_type: ProductType,
    pub current_price: f64,
    pub week_52_high: f64,
    pub week_52_low: f64,
    pub pe_ratio: Option<f64>,
    pub market_avg_pe: Option<f64>,
    pub cagr: f64,
    pub dividend_yield: f64,
    pub dividend_yield_history: Vec<f64>,
    pub payout_ratio: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub volatility: f64,
    pub historical_returns: Vec<f64>,
}

/// Long-term CAGR sub-score. Monotonically rewards CAGR above target,
/// floored half-gaussian penalty below it, and a bubble guard that caps the
/// score when CAGR is far above target but quality metrics are weak.
pub fn long_term_score(data: &SecurityMarketData, target: f64, fundamentals: f64) -> f64 {
    if target <= 0.0 {
        return 0.5;
    }
    let ratio = data.cagr / target;
    let mut score = if ratio >= 1.0 {
        (0.8 + (ratio - 1.0) * 0.4).min(1.0)
    } else {
        let gap = 1.0 - ratio;
        (0.8 * (-2.0 * gap * gap).exp()).max(0.05)
    };

    let bubble_guard_triggered = data.cagr > target * 1.5
        && (data.sharpe < 0.5
            || data.sortino < 0.5
            || data.volatility > 0.40
            || fundamentals < 0.6);
    if bubble_guard_triggered {
        score = score.min(0.6);
    }
    score
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// Dividend sub-score: yield + consistency + payout health, plus a
/// total-return boost that can add up to +0.2.
pub fn dividend_score(data: &SecurityMarketData, target: f64) -> (f64, bool) {
    let yield_component = (data.dividend_yield / 0.05).clamp(0.0, 1.0);

    let consistency = if data.dividend_yield_history.len() >= 2 {
        let m = mean(&data.dividend_yield_history);
        if m > 0.0 {
            let variance = data
                .dividend_yield_history
                .iter()
                .map(|y| (y - m).powi(2))
                .sum::<f64>()
                / data.dividend_yield_history.len() as f64;
            (1.0 - (variance.sqrt() / m)).clamp(0.0, 1.0)
        } else {
            0.5
        }
    } else {
        0.5
    };

    let payout_health = if data.payout_ratio >= 0.3 && data.payout_ratio <= 0.7 {
        1.0
    } else if data.payout_ratio < 0.3 {
        (data.payout_ratio / 0.3).clamp(0.0, 1.0)
    } else {
        (1.0 - (data.payout_ratio - 0.7) / 0.3).clamp(0.0, 1.0)
    };

    let mut score = 0.5 * yield_component + 0.3 * consistency + 0.2 * payout_health;

    let total_return = data.cagr + data.dividend_yield;
    let boost = if total_return >= 0.15 {
        0.20
    } else if total_return >= 0.12 {
        0.10
    } else if total_return >= 0.10 {
        0.05
    } else {
        0.0
    };
    let boosted = boost > 0.0;
    score = (score + boost).min(1.0);
    let _ = target;
    (score, boosted)
}

/// Opportunity sub-score: proximity to 52-week high plus P/E vs market
/// average, with a value-trap quality gate.
pub fn opportunity_score(data: &SecurityMarketData, fundamentals: f64, long_term: f64) -> (f64, bool) {
    let proximity_weight = if data.product_type.is_diversified() {
        0.25
    } else {
        0.50
    };

    let range = data.week_52_high - data.week_52_low;
    let proximity = if range > 0.0 {
        ((data.current_price - data.week_52_low) / range).clamp(0.0, 1.0)
    } else {
        0.5
    };

    let pe_component = match (data.pe_ratio, data.market_avg_pe) {
        (Some(pe), Some(avg)) if avg > 0.0 => (1.0 - pe / (2.0 * avg)).clamp(0.0, 1.0),
        _ => 0.5,
    };

    let mut score = proximity_weight * proximity + (1.0 - proximity_weight) * pe_component;

    let quality_gated = score > 0.7 && (fundamentals < 0.6 || long_term < 0.5);
    if quality_gated {
        score *= 0.7;
    }
    (score, quality_gated)
}

/// Soft/hard target-return penalty per spec.md §4.C and §4.D. Returns
/// `None` when the security should be hard-filtered from the investable
/// universe; `Some(penalty_fraction)` (applied multiplicatively to scores
/// or expected returns) otherwise.
pub fn target_return_penalty(
    cagr: f64,
    target: f64,
    threshold_pct: f64,
    high_quality_factor: f64,
) -> Option<f64> {
    let hard_floor = (0.5 * target).max(0.06);
    if cagr < hard_floor {
        return None;
    }

    let soft_floor = target * threshold_pct;
    if cagr >= soft_floor {
        return Some(0.0);
    }

    let gap_ratio = (soft_floor - cagr) / soft_floor;
    let mut penalty = (0.30 * gap_ratio).min(0.30);

    if high_quality_factor > 0.80 {
        penalty *= 1.0 - 0.35;
    } else if high_quality_factor > 0.75 {
        penalty *= 1.0 - 0.20;
    }

    Some(penalty)
}

/// Fundamentals sub-score placeholder composed from the same signals used
/// elsewhere (no dedicated external fundamentals feed specified beyond P/E
/// and quality ratios) — a blend of bubble-guard-free long-term quality and
/// payout health, clamped to [0, 1].
pub fn fundamentals_score(data: &SecurityMarketData) -> f64 {
    let payout_health = if data.payout_ratio >= 0.3 && data.payout_ratio <= 0.7 {
        1.0
    } else {
        0.5
    };
    let stability = (1.0 - data.volatility).clamp(0.0, 1.0);
    (0.6 * stability + 0.4 * payout_health).clamp(0.0, 1.0)
}

pub struct ScoringEngine<'a> {
    pub settings: &'a Settings,
}

impl<'a> ScoringEngine<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Scores one security and returns the composite `SecurityScore`
    /// alongside the full set of tags that should be present after this
    /// computation (the caller diffs this against the security's current
    /// `TagSet` and calls `update_specific`).
    pub fn score(
        &self,
        data: &SecurityMarketData,
        regime: &MarketRegime,
        current_tags: &TagSet,
    ) -> (SecurityScore, Vec<(Tag, bool)>) {
        let target = self.settings.get_f64("target_annual_return");
        let threshold_pct = self.settings.get_f64("target_return_threshold_pct");

        let fundamentals = fundamentals_score(data);
        let long_term = long_term_score(data, target, fundamentals);
        let (dividends, total_return_boosted) = dividend_score(data, target);
        let (opportunity, value_trap_gate) = opportunity_score(data, fundamentals, long_term);

        let high_quality_factor = (long_term + fundamentals) / 2.0;
        let target_return_penalty =
            target_return_penalty(data.cagr, target, threshold_pct, high_quality_factor);
        let target_return_hard_filtered = target_return_penalty.is_none();

        let lambda = regime.quantum_lambda();
        let quantum = quantum::assess(
            &data.historical_returns,
            data.pe_ratio,
            data.market_avg_pe,
            lambda,
        );

        let classical_bubble = data.cagr > target * 1.5 && data.volatility > 0.40;
        let classical_value_trap = value_trap_gate;

        let ensemble_bubble_risk = classical_bubble || quantum.bubble_probability > 0.7;
        let quantum_bubble_warning = !classical_bubble
            && quantum.bubble_probability > 0.5
            && quantum.bubble_probability <= 0.7;
        let ensemble_value_trap = classical_value_trap || quantum.value_trap_probability > 0.7;
        let quantum_value_warning = !classical_value_trap
            && quantum.value_trap_probability > 0.5
            && quantum.value_trap_probability <= 0.7;

        let quality_gate_fundamentals_threshold =
            self.settings.get_f64("quality_gate_fundamentals_threshold");
        let quality_gate_long_term_threshold =
            self.settings.get_f64("quality_gate_long_term_threshold");
        let quality_gate_pass =
            fundamentals >= quality_gate_fundamentals_threshold && long_term >= quality_gate_long_term_threshold;

        let sub_scores = SubScores {
            long_term,
            fundamentals,
            dividends,
            opportunity,
            short_term: 0.5,
            technicals: 0.5,
            opinion: 0.5,
            diversification: 0.5,
            quantum: quantum.bubble_probability.max(quantum.value_trap_probability),
        };

        let weights = ScoreWeights::for_product(data.product_type);
        let mut composite = weights.weighted_sum(&sub_scores);
        composite *= 1.0 - target_return_penalty.unwrap_or(1.0);
        composite = composite.clamp(0.0, 1.0);

        let now = Utc::now();
        let mut tags = vec![
            (Tag::QualityGatePass, quality_gate_pass),
            (Tag::QualityGateFail, !quality_gate_pass),
            (Tag::BubbleRisk, classical_bubble),
            (Tag::ValueTrap, classical_value_trap),
            (Tag::EnsembleBubbleRisk, ensemble_bubble_risk),
            (Tag::QuantumBubbleWarning, quantum_bubble_warning),
            (Tag::EnsembleValueTrap, ensemble_value_trap),
            (Tag::QuantumValueWarning, quantum_value_warning),
            (Tag::TotalReturnBoosted, total_return_boosted),
            (Tag::TargetReturnHardFiltered, target_return_hard_filtered),
        ];

        let regime_tag = match regime.label {
            crate::domain::regime::RegimeLabel::Bull => Tag::RegimeBull,
            crate::domain::regime::RegimeLabel::Bear => Tag::RegimeBear,
            crate::domain::regime::RegimeLabel::Sideways => Tag::RegimeSideways,
            crate::domain::regime::RegimeLabel::Volatile => Tag::RegimeVolatile,
        };
        for candidate in [
            Tag::RegimeBull,
            Tag::RegimeBear,
            Tag::RegimeSideways,
            Tag::RegimeVolatile,
        ] {
            tags.push((candidate, candidate == regime_tag));
        }

        let _ = current_tags;

        (
            SecurityScore {
                isin: data.isin.clone(),
                composite,
                sub_scores,
                computed_at: now,
            },
            tags,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::regime::RegimeLabel;

    fn base_data() -> SecurityMarketData {
        SecurityMarketData {
            isin: Isin::from("US0000000000"),
            product_type: ProductType::Equity,
            current_price: 100.0,
            week_52_high: 120.0,
            week_52_low: 80.0,
            pe_ratio: Some(18.0),
            market_avg_pe: Some(20.0),
            cagr: 0.11,
            dividend_yield: 0.03,
            dividend_yield_history: vec![0.03, 0.031, 0.029],
            payout_ratio: 0.5,
            sharpe: 1.0,
            sortino: 1.0,
            volatility: 0.15,
            historical_returns: vec![0.01, 0.02, -0.01, 0.015, 0.005],
        }
    }

    #[test]
    fn cagr_exactly_at_target_yields_point_eight() {
        let data = base_data();
        let score = long_term_score(&data, 0.11, 0.8);
        assert!((score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn cagr_at_half_target_is_hard_filtered() {
        let penalty = target_return_penalty(0.055, 0.11, 0.80, 0.5);
        assert!(penalty.is_none());
    }

    #[test]
    fn cagr_well_above_target_with_good_fundamentals_not_capped() {
        let mut data = base_data();
        data.cagr = 0.50;
        data.sharpe = 1.5;
        data.sortino = 1.5;
        data.volatility = 0.1;
        let score = long_term_score(&data, 0.11, 0.9);
        assert!(score > 0.6);
    }

    #[test]
    fn bubble_guard_caps_score_when_quality_is_weak() {
        let mut data = base_data();
        data.cagr = 0.50;
        data.sharpe = 0.2;
        let score = long_term_score(&data, 0.11, 0.9);
        assert!(score <= 0.6);
    }

    #[test]
    fn scoring_engine_produces_composite_in_unit_interval() {
        let settings = Settings::with_defaults();
        let engine = ScoringEngine::new(&settings);
        let data = base_data();
        let regime = MarketRegime::from_score(0.1, 0.1, Utc::now());
        let tags = TagSet::new();
        let (score, _) = engine.score(&data, &regime, &tags);
        assert!((0.0..=1.0).contains(&score.composite));
    }

    #[test]
    fn bull_regime_tag_is_set_exclusively() {
        let settings = Settings::with_defaults();
        let engine = ScoringEngine::new(&settings);
        let data = base_data();
        let regime = MarketRegime::from_score(0.5, 0.1, Utc::now());
        assert_eq!(regime.label, RegimeLabel::Bull);
        let tags = TagSet::new();
        let (_, tag_updates) = engine.score(&data, &regime, &tags);
        let bull_present = tag_updates.iter().any(|(t, p)| *t == Tag::RegimeBull && *p);
        let bear_present = tag_updates.iter().any(|(t, p)| *t == Tag::RegimeBear && *p);
        assert!(bull_present);
        assert!(!bear_present);
    }
}
