//! Output of the evaluator: end-state score breakdown for one sequence.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QualitySubScores {
    pub diversification: f64,
    pub optimizer_alignment: f64,
    pub expected_return: f64,
    pub risk_adjusted: f64,
    pub quality: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub end_state_score: f64,
    pub sub_scores: QualitySubScores,
    pub transaction_cost: rust_decimal::Decimal,
    pub cash_feasible: bool,
    pub portfolio_hash: String,
    pub sequence_hash: String,
}

impl EvaluationResult {
    pub fn clamp_end_state(&mut self) {
        self.end_state_score = self.end_state_score.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_end_state_bounds_to_unit_interval() {
        let mut result = EvaluationResult {
            end_state_score: 1.5,
            sub_scores: QualitySubScores::default(),
            transaction_cost: rust_decimal::Decimal::ZERO,
            cash_feasible: true,
            portfolio_hash: "h".to_string(),
            sequence_hash: "s".to_string(),
        };
        result.clamp_end_state();
        assert_eq!(result.end_state_score, 1.0);
    }
}
