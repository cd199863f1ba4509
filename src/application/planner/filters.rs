//! Sequence filters (spec.md §4.E.4): four post-generation passes applied
//! in order before sequences reach the evaluator — eligibility (a
//! redundant defensive check against stale candidates), recently-traded
//! cooldowns, correlation-awareness, and diversity weighting.

use super::PlannerContext;
use crate::domain::action::ActionSequence;
use crate::domain::trade::Side;
use std::collections::HashSet;

pub trait SequenceFilter: Send + Sync {
    fn name(&self) -> &'static str;
    fn keep(&self, ctx: &PlannerContext, sequence: &ActionSequence) -> bool;
}

/// Defensive re-check: every action in a surviving sequence must still
/// reference a known security with a non-zero price, since candidates and
/// sequences may have been generated from slightly different snapshots in
/// incremental planning runs.
pub struct Eligibility;
impl SequenceFilter for Eligibility {
    fn name(&self) -> &'static str {
        "eligibility"
    }
    fn keep(&self, ctx: &PlannerContext, sequence: &ActionSequence) -> bool {
        sequence
            .actions
            .iter()
            .all(|a| ctx.securities.contains_key(&a.isin) && ctx.price(&a.isin) > rust_decimal::Decimal::ZERO)
    }
}

/// Drops sequences that re-trade an ISIN inside its active cooldown window
/// as of `ctx.as_of`, using the same buy/sell cooldown settings the
/// opportunity calculators already enforced once, to guard against
/// sequence generators recombining stale candidates.
pub struct RecentlyTraded;
impl SequenceFilter for RecentlyTraded {
    fn name(&self) -> &'static str {
        "recently_traded"
    }
    fn keep(&self, ctx: &PlannerContext, sequence: &ActionSequence) -> bool {
        let buy_cooldown = ctx.settings.get_f64("buy_cooldown_days") as i64;
        let sell_cooldown = ctx.settings.get_f64("sell_cooldown_days") as i64;
        sequence.actions.iter().all(|a| match a.side {
            Side::Buy => ctx.days_since(ctx.last_buy_at.get(&a.isin)) >= buy_cooldown,
            Side::Sell => ctx.days_since(ctx.last_sell_at.get(&a.isin)) >= sell_cooldown,
        })
    }
}

fn historical_correlation(ctx: &PlannerContext, a: &crate::domain::ids::Isin, b: &crate::domain::ids::Isin) -> f64 {
    // Correlation proxy from shared country group membership when no
    // historical-returns series is present in the snapshot; the real
    // evaluator-side covariance is authoritative, this filter only prunes
    // obviously redundant same-group pairs.
    let group_a = ctx.securities.get(a).map(|s| s.country_group());
    let group_b = ctx.securities.get(b).map(|s| s.country_group());
    match (group_a, group_b) {
        (Some(ga), Some(gb)) if ga == gb => 0.8,
        _ => 0.0,
    }
}

/// Drops sequences containing a pair of BUYs whose correlation proxy
/// exceeds `correlation_threshold` (spec.md §4.E.4), when enabled.
pub struct CorrelationAware {
    pub enabled: bool,
}
impl SequenceFilter for CorrelationAware {
    fn name(&self) -> &'static str {
        "correlation_aware"
    }
    fn keep(&self, ctx: &PlannerContext, sequence: &ActionSequence) -> bool {
        if !self.enabled {
            return true;
        }
        let threshold = ctx.settings.get_f64("correlation_threshold");
        let buys: Vec<_> = sequence.buys().collect();
        for i in 0..buys.len() {
            for j in (i + 1)..buys.len() {
                if historical_correlation(ctx, &buys[i].isin, &buys[j].isin) > threshold {
                    return false;
                }
            }
        }
        true
    }
}

/// Penalizes (rather than hard-excludes) low-diversity sequences: this
/// filter keeps every sequence but is consulted by the evaluator's
/// diversification sub-score, so here it only trims sequences where every
/// single action shares one country group weighted above `diversity_weight`
/// of the sequence.
pub struct Diversity;
impl SequenceFilter for Diversity {
    fn name(&self) -> &'static str {
        "diversity"
    }
    fn keep(&self, ctx: &PlannerContext, sequence: &ActionSequence) -> bool {
        if sequence.actions.len() < 3 {
            return true;
        }
        let diversity_weight = ctx.settings.get_f64("diversity_weight");
        let groups: Vec<&str> = sequence
            .actions
            .iter()
            .map(|a| ctx.securities.get(&a.isin).map(|s| s.country_group()).unwrap_or("OTHER"))
            .collect();
        let unique: HashSet<&&str> = groups.iter().collect();
        let concentration = 1.0 - (unique.len() as f64 / groups.len() as f64);
        concentration <= 1.0 - diversity_weight + 0.5
    }
}

pub fn apply_all(ctx: &PlannerContext, sequences: Vec<ActionSequence>, correlation_aware_enabled: bool) -> Vec<ActionSequence> {
    let filters: Vec<Box<dyn SequenceFilter>> = vec![
        Box::new(Eligibility),
        Box::new(RecentlyTraded),
        Box::new(CorrelationAware { enabled: correlation_aware_enabled }),
        Box::new(Diversity),
    ];

    sequences
        .into_iter()
        .filter(|seq| filters.iter().all(|f| f.keep(ctx, seq)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::ActionCandidate;
    use crate::domain::allocation::AllocationTargets;
    use crate::domain::ids::{BucketId, Isin};
    use crate::domain::optimizer::OptimizerResult;
    use crate::domain::regime::MarketRegime;
    use crate::domain::security::{ProductType, Security};
    use crate::domain::settings::Settings;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx_with(isin: &str, price: rust_decimal::Decimal) -> PlannerContext {
        let mut securities = HashMap::new();
        securities.insert(Isin::from(isin), Security::new(isin, "SYM", ProductType::Equity));
        let mut prices = HashMap::new();
        prices.insert(Isin::from(isin), price);

        PlannerContext {
            bucket_id: BucketId::from("core"),
            as_of: Utc::now(),
            positions: HashMap::new(),
            cash: HashMap::new(),
            prices,
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

    fn seq(isin: &str) -> ActionSequence {
        ActionSequence::new(vec![ActionCandidate {
            side: Side::Buy,
            isin: Isin::from(isin),
            quantity: dec!(10),
            estimated_price: dec!(50),
            currency: "EUR".to_string(),
            priority: 0.5,
            reason: "test".to_string(),
            tags: vec![],
        }])
    }

    #[test]
    fn eligibility_drops_sequences_with_zero_price() {
        let ctx = ctx_with("AAA", dec!(0));
        assert!(!Eligibility.keep(&ctx, &seq("AAA")));
    }

    #[test]
    fn eligibility_keeps_sequences_with_known_priced_security() {
        let ctx = ctx_with("AAA", dec!(100));
        assert!(Eligibility.keep(&ctx, &seq("AAA")));
    }

    #[test]
    fn disabled_correlation_filter_keeps_everything() {
        let ctx = ctx_with("AAA", dec!(100));
        let filter = CorrelationAware { enabled: false };
        assert!(filter.keep(&ctx, &seq("AAA")));
    }
}
