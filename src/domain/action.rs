//! Action candidates, the sequences built from them, and the deterministic
//! sequence hash used as a cache/dedup key (spec.md §4.B, §4.E.6).

use crate::domain::ids::Isin;
use crate::domain::security::Tag;
use crate::domain::trade::Side;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCandidate {
    pub side: Side,
    pub isin: Isin,
    pub quantity: Decimal,
    pub estimated_price: Decimal,
    pub currency: String,
    pub priority: f64,
    pub reason: String,
    pub tags: Vec<Tag>,
}

impl ActionCandidate {
    pub fn estimated_value(&self) -> Decimal {
        self.quantity * self.estimated_price
    }

    /// Rounds used purely for canonical-sort/hash stability, not for actual
    /// order sizing.
    fn canonical_quantity(&self) -> i64 {
        (self.quantity * Decimal::from(100)).round().to_i64().unwrap_or(0)
    }

    fn canonical_price(&self) -> i64 {
        (self.estimated_price * Decimal::from(100))
            .round()
            .to_i64()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSequence {
    pub actions: Vec<ActionCandidate>,
}

impl ActionSequence {
    pub fn new(mut actions: Vec<ActionCandidate>) -> Self {
        // Sells before buys whenever both are present, per spec.md §3.
        actions.sort_by_key(|a| match a.side {
            Side::Sell => 0,
            Side::Buy => 1,
        });
        Self { actions }
    }

    pub fn sells(&self) -> impl Iterator<Item = &ActionCandidate> {
        self.actions.iter().filter(|a| a.side == Side::Sell)
    }

    pub fn buys(&self) -> impl Iterator<Item = &ActionCandidate> {
        self.actions.iter().filter(|a| a.side == Side::Buy)
    }

    /// `hash(sequence) = hash(canonical_sort(actions))`, canonical sort by
    /// (side, isin, rounded quantity, rounded price) — spec.md §4.E.6.
    pub fn sequence_hash(&self) -> String {
        let mut canonical: Vec<&ActionCandidate> = self.actions.iter().collect();
        canonical.sort_by(|a, b| {
            let side_key = |s: Side| match s {
                Side::Sell => 0,
                Side::Buy => 1,
            };
            side_key(a.side)
                .cmp(&side_key(b.side))
                .then_with(|| a.isin.cmp(&b.isin))
                .then_with(|| a.canonical_quantity().cmp(&b.canonical_quantity()))
                .then_with(|| a.canonical_price().cmp(&b.canonical_price()))
        });

        let mut hasher = DefaultHasher::new();
        for action in &canonical {
            side_discriminant(action.side).hash(&mut hasher);
            action.isin.hash(&mut hasher);
            action.canonical_quantity().hash(&mut hasher);
            action.canonical_price().hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }
}

fn side_discriminant(side: Side) -> u8 {
    match side {
        Side::Sell => 0,
        Side::Buy => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candidate(side: Side, isin: &str, qty: Decimal, price: Decimal) -> ActionCandidate {
        ActionCandidate {
            side,
            isin: Isin::from(isin),
            quantity: qty,
            estimated_price: price,
            currency: "EUR".to_string(),
            priority: 0.5,
            reason: "test".to_string(),
            tags: vec![],
        }
    }

    #[test]
    fn sells_ordered_before_buys() {
        let seq = ActionSequence::new(vec![
            candidate(Side::Buy, "AAA", dec!(1), dec!(1)),
            candidate(Side::Sell, "BBB", dec!(1), dec!(1)),
        ]);
        assert_eq!(seq.actions[0].side, Side::Sell);
        assert_eq!(seq.actions[1].side, Side::Buy);
    }

    #[test]
    fn hash_is_stable_regardless_of_input_order() {
        let a = candidate(Side::Buy, "AAA", dec!(10), dec!(100));
        let b = candidate(Side::Sell, "BBB", dec!(5), dec!(50));

        let seq1 = ActionSequence::new(vec![a.clone(), b.clone()]);
        let seq2 = ActionSequence::new(vec![b, a]);

        assert_eq!(seq1.sequence_hash(), seq2.sequence_hash());
    }

    #[test]
    fn hash_differs_for_different_sequences() {
        let seq1 = ActionSequence::new(vec![candidate(Side::Buy, "AAA", dec!(10), dec!(100))]);
        let seq2 = ActionSequence::new(vec![candidate(Side::Buy, "AAA", dec!(20), dec!(100))]);
        assert_ne!(seq1.sequence_hash(), seq2.sequence_hash());
    }

    #[test]
    fn empty_sequence_hashes_deterministically() {
        let seq1 = ActionSequence::new(vec![]);
        let seq2 = ActionSequence::new(vec![]);
        assert_eq!(seq1.sequence_hash(), seq2.sequence_hash());
    }
}
