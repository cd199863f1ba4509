//! Persisted recommendation: a plan attached to a portfolio-state
//! fingerprint, superseded when that fingerprint changes.

use crate::domain::action::ActionSequence;
use crate::domain::evaluation::EvaluationResult;
use crate::domain::ids::Isin;
use crate::domain::position::Position;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Fixed portfolio_hash used for the emergency negative-balance workflow
/// (spec.md §4.G, scenario S3), distinct from any routine portfolio-state
/// fingerprint so it is never superseded by a routine plan.
pub const EMERGENCY_PORTFOLIO_HASH: &str = "EMERGENCY:negative_balance_rebalancing";

/// Deterministic fingerprint of a portfolio state (positions + cash),
/// canonically sorted before hashing so the same state always yields the
/// same hash regardless of map iteration order.
pub fn compute_portfolio_hash(positions: &HashMap<Isin, Position>, cash: &HashMap<String, Decimal>) -> String {
    let mut hasher = DefaultHasher::new();

    let mut position_rows: Vec<(&Isin, i64)> = positions
        .iter()
        .map(|(isin, p)| (isin, (p.quantity * Decimal::from(1_000_000)).round().to_i64().unwrap_or(0)))
        .collect();
    position_rows.sort_by_key(|(isin, _)| (*isin).clone());
    for (isin, qty) in position_rows {
        isin.as_str().hash(&mut hasher);
        qty.hash(&mut hasher);
    }

    let mut cash_rows: Vec<(&String, i64)> = cash
        .iter()
        .map(|(ccy, amount)| (ccy, (*amount * Decimal::from(100)).round().to_i64().unwrap_or(0)))
        .collect();
    cash_rows.sort_by_key(|(ccy, _)| (*ccy).clone());
    for (ccy, amount) in cash_rows {
        ccy.hash(&mut hasher);
        amount.hash(&mut hasher);
    }

    format!("{:x}", hasher.finish())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub portfolio_hash: String,
    pub sequence: ActionSequence,
    pub evaluation: EvaluationResult,
    pub created_at: DateTime<Utc>,
    pub executed: bool,
}

impl Recommendation {
    pub fn sequence_id(&self) -> String {
        self.sequence.sequence_hash()
    }

    pub fn is_emergency(&self) -> bool {
        self.portfolio_hash == EMERGENCY_PORTFOLIO_HASH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::evaluation::QualitySubScores;

    fn recommendation(portfolio_hash: &str) -> Recommendation {
        Recommendation {
            portfolio_hash: portfolio_hash.to_string(),
            sequence: ActionSequence::new(vec![]),
            evaluation: EvaluationResult {
                end_state_score: 0.8,
                sub_scores: QualitySubScores::default(),
                transaction_cost: rust_decimal::Decimal::ZERO,
                cash_feasible: true,
                portfolio_hash: portfolio_hash.to_string(),
                sequence_hash: "h".to_string(),
            },
            created_at: Utc::now(),
            executed: false,
        }
    }

    #[test]
    fn emergency_hash_is_recognized() {
        assert!(recommendation(EMERGENCY_PORTFOLIO_HASH).is_emergency());
        assert!(!recommendation("routine-hash").is_emergency());
    }

    #[test]
    fn portfolio_hash_is_order_independent() {
        let mut positions_a = HashMap::new();
        positions_a.insert(
            Isin::from("A"),
            Position {
                isin: Isin::from("A"),
                bucket_id: crate::domain::ids::BucketId::from("core"),
                quantity: rust_decimal_macros::dec!(10),
                average_cost: rust_decimal_macros::dec!(100),
                last_price: rust_decimal_macros::dec!(110),
                currency: "EUR".to_string(),
                as_of: Utc::now(),
            },
        );
        let mut cash_a = HashMap::new();
        cash_a.insert("EUR".to_string(), rust_decimal_macros::dec!(500));
        let mut cash_b = cash_a.clone();
        cash_b.insert("USD".to_string(), Decimal::ZERO);
        cash_b.remove("USD");

        assert_eq!(
            compute_portfolio_hash(&positions_a, &cash_a),
            compute_portfolio_hash(&positions_a, &cash_b)
        );
    }

    #[test]
    fn portfolio_hash_changes_with_quantity() {
        let mut positions = HashMap::new();
        positions.insert(
            Isin::from("A"),
            Position {
                isin: Isin::from("A"),
                bucket_id: crate::domain::ids::BucketId::from("core"),
                quantity: rust_decimal_macros::dec!(10),
                average_cost: rust_decimal_macros::dec!(100),
                last_price: rust_decimal_macros::dec!(110),
                currency: "EUR".to_string(),
                as_of: Utc::now(),
            },
        );
        let cash = HashMap::new();
        let hash_before = compute_portfolio_hash(&positions, &cash);
        positions.get_mut(&Isin::from("A")).unwrap().quantity = rust_decimal_macros::dec!(11);
        let hash_after = compute_portfolio_hash(&positions, &cash);
        assert_ne!(hash_before, hash_after);
    }
}
