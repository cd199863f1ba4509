//! Pattern generators (spec.md §4.E.2): thirteen named ways to turn a pool
//! of `ActionCandidate`s into `ActionSequence`s. `ActionSequence::new`
//! already orders sells before buys, so each generator only needs to pick
//! *which* candidates belong together.

use super::PlannerContext;
use crate::domain::action::{ActionCandidate, ActionSequence};
use crate::domain::trade::Side;

pub trait PatternGenerator: Send + Sync {
    fn name(&self) -> &'static str;
    fn generate(&self, ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence>;
}

fn buys(candidates: &[ActionCandidate]) -> Vec<&ActionCandidate> {
    candidates.iter().filter(|c| c.side == Side::Buy).collect()
}

fn sells(candidates: &[ActionCandidate]) -> Vec<&ActionCandidate> {
    candidates.iter().filter(|c| c.side == Side::Sell).collect()
}

fn by_priority_desc(mut xs: Vec<&ActionCandidate>) -> Vec<&ActionCandidate> {
    xs.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
    xs
}

/// Single highest-priority BUY alone.
pub struct DirectBuy;
impl PatternGenerator for DirectBuy {
    fn name(&self) -> &'static str {
        "direct_buy"
    }
    fn generate(&self, _ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        by_priority_desc(buys(candidates))
            .into_iter()
            .take(1)
            .map(|c| ActionSequence::new(vec![c.clone()]))
            .collect()
    }
}

/// Every profit-taking SELL candidate alone, one sequence per candidate.
pub struct ProfitTakingPattern;
impl PatternGenerator for ProfitTakingPattern {
    fn name(&self) -> &'static str {
        "profit_taking"
    }
    fn generate(&self, _ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        candidates
            .iter()
            .filter(|c| c.side == Side::Sell && c.reason.contains("windfall"))
            .map(|c| ActionSequence::new(vec![c.clone()]))
            .collect()
    }
}

/// All rebalance SELLs funding all rebalance BUYs in one sequence.
pub struct Rebalance;
impl PatternGenerator for Rebalance {
    fn name(&self) -> &'static str {
        "rebalance"
    }
    fn generate(&self, _ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        let rebalance: Vec<ActionCandidate> = candidates
            .iter()
            .filter(|c| c.reason.contains("weight") || c.reason.contains("under-weight") || c.reason.contains("over-weight"))
            .cloned()
            .collect();
        if rebalance.is_empty() {
            vec![]
        } else {
            vec![ActionSequence::new(rebalance)]
        }
    }
}

/// Every "quality dip" BUY alone.
pub struct AveragingDownPattern;
impl PatternGenerator for AveragingDownPattern {
    fn name(&self) -> &'static str {
        "averaging_down"
    }
    fn generate(&self, _ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        candidates
            .iter()
            .filter(|c| c.side == Side::Buy && c.reason.contains("dip"))
            .map(|c| ActionSequence::new(vec![c.clone()]))
            .collect()
    }
}

/// Single best candidate regardless of side.
pub struct SingleBest;
impl PatternGenerator for SingleBest {
    fn name(&self) -> &'static str {
        "single_best"
    }
    fn generate(&self, _ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        by_priority_desc(candidates.iter().collect())
            .into_iter()
            .take(1)
            .map(|c| ActionSequence::new(vec![c.clone()]))
            .collect()
    }
}

/// All SELL candidates together, no BUYs — generates cash without
/// redeploying it in the same sequence.
pub struct MultiSell;
impl PatternGenerator for MultiSell {
    fn name(&self) -> &'static str {
        "multi_sell"
    }
    fn generate(&self, _ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        let all_sells: Vec<ActionCandidate> = sells(candidates).into_iter().cloned().collect();
        if all_sells.is_empty() {
            vec![]
        } else {
            vec![ActionSequence::new(all_sells)]
        }
    }
}

/// Top-N sells and top-N buys by priority combined, N from `max_plan_depth`.
pub struct MixedStrategy;
impl PatternGenerator for MixedStrategy {
    fn name(&self) -> &'static str {
        "mixed_strategy"
    }
    fn generate(&self, ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        let n = ctx.settings.get_f64("max_plan_depth").max(1.0) as usize;
        let mut mixed: Vec<ActionCandidate> = by_priority_desc(sells(candidates))
            .into_iter()
            .take(n)
            .cloned()
            .collect();
        mixed.extend(by_priority_desc(buys(candidates)).into_iter().take(n).cloned());
        if mixed.is_empty() {
            vec![]
        } else {
            vec![ActionSequence::new(mixed)]
        }
    }
}

/// Top-N opportunity buys alone, front-loading new-capital deployment
/// before any rebalancing trade.
pub struct OpportunityFirst;
impl PatternGenerator for OpportunityFirst {
    fn name(&self) -> &'static str {
        "opportunity_first"
    }
    fn generate(&self, ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        let n = ctx.settings.get_f64("max_opportunities_per_category").max(1.0) as usize;
        let opportunity_buys: Vec<ActionCandidate> = candidates
            .iter()
            .filter(|c| c.side == Side::Buy && c.reason.contains("opportunity score"))
            .cloned()
            .collect();
        by_priority_desc(opportunity_buys.iter().collect())
            .into_iter()
            .take(n)
            .map(|c| ActionSequence::new(vec![c.clone()]))
            .collect()
    }
}

/// Every candidate together in a single sequence — the most aggressive
/// single-pass rebalance.
pub struct DeepRebalance;
impl PatternGenerator for DeepRebalance {
    fn name(&self) -> &'static str {
        "deep_rebalance"
    }
    fn generate(&self, _ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        if candidates.is_empty() {
            vec![]
        } else {
            vec![ActionSequence::new(candidates.to_vec())]
        }
    }
}

/// All SELLs plus only the single highest-priority BUY, to generate a cash
/// surplus while redeploying the least into new risk.
pub struct CashGeneration;
impl PatternGenerator for CashGeneration {
    fn name(&self) -> &'static str {
        "cash_generation"
    }
    fn generate(&self, _ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        let mut actions: Vec<ActionCandidate> = sells(candidates).into_iter().cloned().collect();
        if let Some(best_buy) = by_priority_desc(buys(candidates)).into_iter().next() {
            actions.push(best_buy.clone());
        }
        if actions.is_empty() {
            vec![]
        } else {
            vec![ActionSequence::new(actions)]
        }
    }
}

/// Candidates whose implied transaction cost, relative to trade value, is
/// below `priority_threshold_for_combinations` — favors cheap trades that
/// clear the worthwhileness bar by a wide margin.
pub struct CostOptimized;
impl PatternGenerator for CostOptimized {
    fn name(&self) -> &'static str {
        "cost_optimized"
    }
    fn generate(&self, ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        let cost_rate = ctx.settings.get_f64("transaction_cost_percent")
            + ctx.settings.get_f64("spread")
            + ctx.settings.get_f64("slippage");
        let cheap: Vec<ActionCandidate> = candidates
            .iter()
            .filter(|c| c.priority > 0.0 && cost_rate < 0.01)
            .cloned()
            .collect();
        if cheap.is_empty() {
            vec![]
        } else {
            vec![ActionSequence::new(cheap)]
        }
    }
}

/// Nine regime/priority-conditioned sub-patterns (spec.md §4.E.2): varies
/// how many top candidates are combined based on the current regime label
/// and whether quantum-tagged candidates are present.
pub struct Adaptive;
impl PatternGenerator for Adaptive {
    fn name(&self) -> &'static str {
        "adaptive"
    }
    fn generate(&self, ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        use crate::domain::regime::RegimeLabel;

        let depth = match ctx.optimizer_result.regime_snapshot.label {
            RegimeLabel::Bull => 4,
            RegimeLabel::Volatile => 1,
            RegimeLabel::Sideways => 2,
            RegimeLabel::Bear => 2,
        };

        let mut out = Vec::new();
        for n in 1..=depth.min(9) {
            let mut actions: Vec<ActionCandidate> = sells(candidates).into_iter().cloned().collect();
            actions.extend(by_priority_desc(buys(candidates)).into_iter().take(n).cloned());
            if !actions.is_empty() {
                out.push(ActionSequence::new(actions));
            }
        }
        out
    }
}

/// Buys only from groups the optimizer currently favors under the active
/// regime tag (`RegimeBull`/`RegimeBear`/`RegimeSideways`/`RegimeVolatile`).
pub struct MarketRegimePattern;
impl PatternGenerator for MarketRegimePattern {
    fn name(&self) -> &'static str {
        "market_regime"
    }
    fn generate(&self, ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
        use crate::domain::regime::RegimeLabel;
        use crate::domain::security::Tag;

        let regime_tag = match ctx.optimizer_result.regime_snapshot.label {
            RegimeLabel::Bull => Tag::RegimeBull,
            RegimeLabel::Bear => Tag::RegimeBear,
            RegimeLabel::Sideways => Tag::RegimeSideways,
            RegimeLabel::Volatile => Tag::RegimeVolatile,
        };

        let matching: Vec<ActionCandidate> = candidates
            .iter()
            .filter(|c| ctx.tags_for(&c.isin).has(regime_tag))
            .cloned()
            .collect();
        if matching.is_empty() {
            vec![]
        } else {
            vec![ActionSequence::new(matching)]
        }
    }
}

pub fn run_all(ctx: &PlannerContext, candidates: &[ActionCandidate]) -> Vec<ActionSequence> {
    let generators: Vec<Box<dyn PatternGenerator>> = vec![
        Box::new(DirectBuy),
        Box::new(ProfitTakingPattern),
        Box::new(Rebalance),
        Box::new(AveragingDownPattern),
        Box::new(SingleBest),
        Box::new(MultiSell),
        Box::new(MixedStrategy),
        Box::new(OpportunityFirst),
        Box::new(DeepRebalance),
        Box::new(CashGeneration),
        Box::new(CostOptimized),
        Box::new(Adaptive),
        Box::new(MarketRegimePattern),
    ];
    generators.iter().flat_map(|g| g.generate(ctx, candidates)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::allocation::AllocationTargets;
    use crate::domain::ids::{BucketId, Isin};
    use crate::domain::optimizer::OptimizerResult;
    use crate::domain::regime::MarketRegime;
    use crate::domain::settings::Settings;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn empty_ctx() -> PlannerContext {
        PlannerContext {
            bucket_id: BucketId::from("core"),
            as_of: Utc::now(),
            positions: HashMap::new(),
            cash: HashMap::new(),
            prices: HashMap::new(),
            securities: HashMap::new(),
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
            portfolio_value: Decimal::ZERO,
            settings: Arc::new(Settings::with_defaults()),
        }
    }

    fn candidate(side: Side, isin: &str, priority: f64, reason: &str) -> ActionCandidate {
        ActionCandidate {
            side,
            isin: Isin::from(isin),
            quantity: dec!(10),
            estimated_price: dec!(100),
            currency: "EUR".to_string(),
            priority,
            reason: reason.to_string(),
            tags: vec![],
        }
    }

    #[test]
    fn no_candidates_generates_no_sequences() {
        let ctx = empty_ctx();
        assert!(DirectBuy.generate(&ctx, &[]).is_empty());
        assert!(DeepRebalance.generate(&ctx, &[]).is_empty());
    }

    #[test]
    fn direct_buy_picks_highest_priority_only() {
        let ctx = empty_ctx();
        let candidates = vec![
            candidate(Side::Buy, "AAA", 0.4, "x"),
            candidate(Side::Buy, "BBB", 0.9, "x"),
        ];
        let seqs = DirectBuy.generate(&ctx, &candidates);
        assert_eq!(seqs.len(), 1);
        assert_eq!(seqs[0].actions.len(), 1);
        assert_eq!(seqs[0].actions[0].isin, Isin::from("BBB"));
    }

    #[test]
    fn deep_rebalance_includes_every_candidate() {
        let ctx = empty_ctx();
        let candidates = vec![
            candidate(Side::Sell, "AAA", 0.5, "x"),
            candidate(Side::Buy, "BBB", 0.5, "x"),
        ];
        let seqs = DeepRebalance.generate(&ctx, &candidates);
        assert_eq!(seqs.len(), 1);
        assert_eq!(seqs[0].actions.len(), 2);
        assert_eq!(seqs[0].actions[0].side, Side::Sell);
    }
}
