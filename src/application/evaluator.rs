//! Reference, in-process `EvaluatorAdapter` (spec.md §4.F): simulates a
//! sequence against a virtual portfolio, prices its transaction cost, and
//! scores the resulting end state. Runs in the same process so the engine
//! is runnable end-to-end without an external evaluator service; a
//! remote HTTP-backed adapter implementing the same trait lives in
//! `infrastructure::evaluator_adapter` for production deployments that do
//! run the evaluator out-of-process.

use crate::domain::action::ActionSequence;
use crate::domain::allocation::{AllocationTargets, Dimension};
use crate::domain::errors::EngineResult;
use crate::domain::evaluation::{EvaluationResult, QualitySubScores};
use crate::domain::ids::{BucketId, Isin};
use crate::domain::ports::{EvaluationRequest, EvaluatorAdapter};
use crate::domain::position::Position;
use crate::domain::regime::RegimeLabel;
use crate::domain::score::SecurityScore;
use crate::domain::security::Security;
use crate::domain::settings::Settings;
use crate::domain::trade::Side;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Evaluator {
    settings: Arc<Settings>,
}

impl Evaluator {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    fn transaction_cost(&self, value: Decimal) -> Decimal {
        let fixed = Decimal::try_from(self.settings.get_f64("transaction_cost_fixed")).unwrap_or(Decimal::ZERO);
        let variable = Decimal::try_from(self.settings.get_f64("transaction_cost_percent")).unwrap_or(Decimal::ZERO);
        let spread = Decimal::try_from(self.settings.get_f64("spread")).unwrap_or(Decimal::ZERO);
        let slippage = Decimal::try_from(self.settings.get_f64("slippage")).unwrap_or(Decimal::ZERO);
        let market_impact = Decimal::try_from(self.settings.get_f64("market_impact")).unwrap_or(Decimal::ZERO);
        fixed + value.abs() * (variable + spread + slippage + market_impact)
    }

    /// Left-to-right state transition over a virtual portfolio. Returns
    /// the resulting positions, cash balances, total transaction cost, and
    /// whether every BUY was fundable as encountered.
    fn simulate(
        &self,
        sequence: &ActionSequence,
        starting_positions: &[Position],
        starting_cash: &HashMap<String, Decimal>,
    ) -> (HashMap<Isin, Position>, HashMap<String, Decimal>, Decimal, bool) {
        let mut positions: HashMap<Isin, Position> =
            starting_positions.iter().map(|p| (p.isin.clone(), p.clone())).collect();
        let mut cash = starting_cash.clone();
        let mut total_cost = Decimal::ZERO;
        let mut feasible = true;
        let bucket_id = starting_positions
            .first()
            .map(|p| p.bucket_id.clone())
            .unwrap_or_else(|| BucketId::from("core"));

        for action in &sequence.actions {
            let value = action.quantity * action.estimated_price;
            let cost = self.transaction_cost(value);
            total_cost += cost;

            match action.side {
                Side::Sell => {
                    let position = positions.entry(action.isin.clone()).or_insert_with(|| Position {
                        isin: action.isin.clone(),
                        bucket_id: bucket_id.clone(),
                        quantity: Decimal::ZERO,
                        average_cost: action.estimated_price,
                        last_price: action.estimated_price,
                        currency: action.currency.clone(),
                        as_of: starting_positions.first().map(|p| p.as_of).unwrap_or_else(chrono::Utc::now),
                    });
                    let sold_qty = action.quantity.min(position.quantity);
                    position.quantity -= sold_qty;
                    position.last_price = action.estimated_price;
                    let proceeds = sold_qty * action.estimated_price - cost;
                    *cash.entry(action.currency.clone()).or_insert(Decimal::ZERO) += proceeds;
                }
                Side::Buy => {
                    let needed = value + cost;
                    let balance = cash.entry(action.currency.clone()).or_insert(Decimal::ZERO);
                    if *balance < needed {
                        feasible = false;
                        continue;
                    }
                    *balance -= needed;
                    let position = positions.entry(action.isin.clone()).or_insert_with(|| Position {
                        isin: action.isin.clone(),
                        bucket_id: bucket_id.clone(),
                        quantity: Decimal::ZERO,
                        average_cost: action.estimated_price,
                        last_price: action.estimated_price,
                        currency: action.currency.clone(),
                        as_of: starting_positions.first().map(|p| p.as_of).unwrap_or_else(chrono::Utc::now),
                    });
                    let prior_value = position.quantity * position.average_cost;
                    position.quantity += action.quantity;
                    position.average_cost = if position.quantity > Decimal::ZERO {
                        (prior_value + value) / position.quantity
                    } else {
                        action.estimated_price
                    };
                    position.last_price = action.estimated_price;
                }
            }
        }

        (positions, cash, total_cost, feasible)
    }

    fn post_trade_weights(positions: &HashMap<Isin, Position>, portfolio_value: Decimal) -> HashMap<Isin, f64> {
        if portfolio_value <= Decimal::ZERO {
            return HashMap::new();
        }
        positions
            .values()
            .filter(|p| p.quantity > Decimal::ZERO)
            .map(|p| {
                let weight = (p.market_value() / portfolio_value).to_string().parse::<f64>().unwrap_or(0.0);
                (p.isin.clone(), weight)
            })
            .collect()
    }

    fn optimizer_alignment(post: &HashMap<Isin, f64>, target: &HashMap<Isin, f64>) -> f64 {
        let isins: std::collections::HashSet<&Isin> = post.keys().chain(target.keys()).collect();
        let n = isins.len().max(1) as f64;
        let deviation: f64 = isins
            .iter()
            .map(|isin| {
                let p = post.get(*isin).copied().unwrap_or(0.0);
                let t = target.get(*isin).copied().unwrap_or(0.0);
                (p - t).abs()
            })
            .sum();
        (1.0 - (2.0 * deviation / n).min(1.0)).max(0.0)
    }

    fn group_weights(
        post: &HashMap<Isin, f64>,
        securities: &HashMap<Isin, Security>,
        dimension: Dimension,
    ) -> HashMap<String, f64> {
        let mut out: HashMap<String, f64> = HashMap::new();
        for (isin, weight) in post {
            let group = match securities.get(isin) {
                Some(sec) => match dimension {
                    Dimension::Country => sec.country_group().to_string(),
                    Dimension::Industry => sec.industry_group().to_string(),
                    Dimension::ProductType => sec.product_type.to_string(),
                },
                None => crate::domain::security::OTHER_GROUP.to_string(),
            };
            *out.entry(group).or_insert(0.0) += weight;
        }
        out
    }

    fn diversification(
        post: &HashMap<Isin, f64>,
        securities: &HashMap<Isin, Security>,
        allocation_targets: &AllocationTargets,
    ) -> f64 {
        let mut dim_deviations = Vec::new();
        for dimension in [Dimension::Country, Dimension::Industry] {
            let groups = Self::group_weights(post, securities, dimension);
            let mut weighted_dev = 0.0;
            let mut weight_sum = 0.0;
            for (group, weight) in &groups {
                let target_mid = allocation_targets
                    .band_for(dimension, group)
                    .map(|b| (b.min + b.max) / 2.0)
                    .unwrap_or(0.0);
                weighted_dev += weight * (weight - target_mid).abs();
                weight_sum += weight;
            }
            if weight_sum > 0.0 {
                dim_deviations.push(weighted_dev / weight_sum);
            }
        }
        if dim_deviations.is_empty() {
            return 1.0;
        }
        let avg_dev = dim_deviations.iter().sum::<f64>() / dim_deviations.len() as f64;
        (1.0 - avg_dev).clamp(0.0, 1.0)
    }

    /// Implied total return per spec.md §4.C: a `long_term` sub-score of
    /// 0.5 corresponds to CAGR == the target annual return, so this
    /// inverts that mapping to recover a return estimate from the score.
    fn implied_return(score: &SecurityScore, target_annual_return: f64) -> f64 {
        score.sub_scores.long_term * target_annual_return * 2.0
    }

    fn expected_return(
        post: &HashMap<Isin, f64>,
        scores: &HashMap<Isin, SecurityScore>,
        target_annual_return: f64,
    ) -> f64 {
        let mut weighted = 0.0;
        let mut weight_sum = 0.0;
        for (isin, weight) in post {
            if let Some(score) = scores.get(isin) {
                weighted += weight * Self::implied_return(score, target_annual_return);
                weight_sum += weight;
            }
        }
        let blended_return = if weight_sum > 0.0 { weighted / weight_sum } else { 0.0 };
        expected_return_curve(blended_return)
    }

    fn quality(post: &HashMap<Isin, f64>, scores: &HashMap<Isin, SecurityScore>) -> f64 {
        let mut weighted = 0.0;
        let mut weight_sum = 0.0;
        for (isin, weight) in post {
            if let Some(score) = scores.get(isin) {
                let per_security = (score.sub_scores.long_term + score.sub_scores.fundamentals) / 2.0;
                weighted += weight * per_security;
                weight_sum += weight;
            }
        }
        if weight_sum > 0.0 { weighted / weight_sum } else { 0.0 }
    }

    fn risk_adjusted(post: &HashMap<Isin, f64>, securities: &HashMap<Isin, Security>) -> f64 {
        let worst_relative = post
            .iter()
            .map(|(isin, weight)| {
                let cap = securities.get(isin).map(|s| s.product_type.max_concentration()).unwrap_or(1.0);
                if cap > 0.0 { weight / cap } else { 0.0 }
            })
            .fold(0.0_f64, f64::max);
        (1.0 - worst_relative).clamp(0.0, 1.0)
    }

    /// Multiplicative adjustment per spec.md §4.F regime-aware mode,
    /// bounded to +/-20%.
    fn regime_adjustment(label: RegimeLabel, sub_scores: &QualitySubScores) -> f64 {
        match label {
            RegimeLabel::Bear => -0.10 * (1.0 - sub_scores.quality) + 0.05 * sub_scores.quality,
            RegimeLabel::Bull => 0.05 * sub_scores.expected_return,
            RegimeLabel::Sideways => 0.03 * sub_scores.quality,
            RegimeLabel::Volatile => -0.10 * (1.0 - sub_scores.risk_adjusted),
        }
        .clamp(-0.20, 0.20)
    }
}

fn expected_return_curve(total_return: f64) -> f64 {
    const BREAKPOINTS: [(f64, f64); 5] = [(0.0, 0.0), (0.05, 0.2), (0.11, 0.5), (0.15, 0.75), (0.20, 1.0)];
    if total_return <= BREAKPOINTS[0].0 {
        return 0.0;
    }
    for window in BREAKPOINTS.windows(2) {
        let (x0, y0) = window[0];
        let (x1, y1) = window[1];
        if total_return <= x1 {
            let t = (total_return - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }
    1.0
}

#[async_trait::async_trait]
impl EvaluatorAdapter for Evaluator {
    async fn evaluate(&self, request: EvaluationRequest) -> EngineResult<EvaluationResult> {
        let (positions, _cash, total_cost, feasible) =
            self.simulate(&request.sequence, &request.starting_positions, &request.starting_cash);

        let post_value = if request.portfolio_value > Decimal::ZERO {
            request.portfolio_value
        } else {
            positions.values().map(|p| p.market_value()).sum()
        };

        let post_weights = Self::post_trade_weights(&positions, post_value);

        let target_annual_return = self.settings.get_f64("target_annual_return");
        let mut sub_scores = QualitySubScores {
            diversification: Self::diversification(&post_weights, &request.securities, &request.allocation_targets),
            optimizer_alignment: Self::optimizer_alignment(&post_weights, &request.target_weights),
            expected_return: Self::expected_return(&post_weights, &request.scores, target_annual_return),
            risk_adjusted: Self::risk_adjusted(&post_weights, &request.securities),
            quality: Self::quality(&post_weights, &request.scores),
        };
        sub_scores.diversification = sub_scores.diversification.clamp(0.0, 1.0);

        let cost_penalty_factor = self.settings.get_f64("cost_penalty_factor");
        let cost_ratio = if post_value > Decimal::ZERO {
            (total_cost / post_value).to_string().parse::<f64>().unwrap_or(0.0)
        } else {
            0.0
        };

        let mut end_state_score = 0.30 * sub_scores.diversification
            + 0.25 * sub_scores.optimizer_alignment
            + 0.25 * sub_scores.expected_return
            + 0.10 * sub_scores.risk_adjusted
            + 0.10 * sub_scores.quality
            - cost_penalty_factor * cost_ratio;

        if self.settings.get_bool("regime_aware_evaluation_enabled") {
            end_state_score += Self::regime_adjustment(request.regime.label, &sub_scores);
        }

        let mut result = EvaluationResult {
            end_state_score,
            sub_scores,
            transaction_cost: total_cost,
            cash_feasible: feasible,
            portfolio_hash: request.portfolio_hash,
            sequence_hash: request.sequence.sequence_hash(),
        };
        result.clamp_end_state();
        Ok(result)
    }
}
