//! Opportunity calculators (spec.md §4.E.1): six variants sharing a common
//! `Calculate(ctx) -> [ActionCandidate]` interface, reused as trait objects
//! rather than an inheritance hierarchy (spec.md §9 design note).

use super::PlannerContext;
use crate::domain::action::ActionCandidate;
use crate::domain::ids::Isin;
use crate::domain::trade::Side;
use rust_decimal::Decimal;

pub trait OpportunityCalculator: Send + Sync {
    fn name(&self) -> &'static str;
    fn calculate(&self, ctx: &PlannerContext, max_per_category: usize) -> Vec<ActionCandidate>;
}

fn transaction_cost(ctx: &PlannerContext, value: Decimal) -> Decimal {
    let fixed = Decimal::try_from(ctx.settings.get_f64("transaction_cost_fixed")).unwrap_or(Decimal::ZERO);
    let variable = Decimal::try_from(ctx.settings.get_f64("transaction_cost_percent")).unwrap_or(Decimal::ZERO);
    let spread = Decimal::try_from(ctx.settings.get_f64("spread")).unwrap_or(Decimal::ZERO);
    let slippage = Decimal::try_from(ctx.settings.get_f64("slippage")).unwrap_or(Decimal::ZERO);
    let value_abs = value.abs();
    fixed + (variable + spread + slippage) * value_abs
}

fn worthwhile(ctx: &PlannerContext, value: Decimal) -> bool {
    let cost = transaction_cost(ctx, value);
    value.abs() >= cost * Decimal::from(2)
}

/// Eligibility per spec.md §4.E.1(a): min-hold / cooldown / max-loss.
fn eligible_for_buy(ctx: &PlannerContext, isin: &Isin) -> bool {
    let buy_cooldown_days = ctx.settings.get_f64("buy_cooldown_days") as i64;
    ctx.days_since(ctx.last_buy_at.get(isin)) >= buy_cooldown_days
}

fn eligible_for_sell(ctx: &PlannerContext, isin: &Isin) -> bool {
    let min_hold_days = ctx.settings.get_f64("min_hold_days") as i64;
    let sell_cooldown_days = ctx.settings.get_f64("sell_cooldown_days") as i64;
    let max_loss = ctx.settings.get_f64("max_loss_threshold");

    if ctx.days_since(ctx.position_opened_at.get(isin)) < min_hold_days {
        return false;
    }
    if ctx.days_since(ctx.last_sell_at.get(isin)) < sell_cooldown_days {
        return false;
    }
    if let Some(position) = ctx.positions.get(isin) {
        if position.average_cost > Decimal::ZERO {
            let pnl_pct = ((position.last_price - position.average_cost) / position.average_cost)
                .to_string()
                .parse::<f64>()
                .unwrap_or(0.0);
            if pnl_pct < max_loss {
                return false;
            }
        }
    }
    true
}

fn quality_gated_out(ctx: &PlannerContext, isin: &Isin) -> bool {
    ctx.tags_for(isin).blocks_buy()
}

fn priority_multiplier(ctx: &PlannerContext, isin: &Isin) -> f64 {
    ctx.tags_for(isin).priority_multiplier()
}

fn candidate(
    ctx: &PlannerContext,
    side: Side,
    isin: &Isin,
    quantity: Decimal,
    reason: impl Into<String>,
    priority: f64,
) -> Option<ActionCandidate> {
    let price = ctx.price(isin);
    if price <= Decimal::ZERO || quantity <= Decimal::ZERO {
        return None;
    }
    let value = quantity * price;
    if !worthwhile(ctx, value) {
        return None;
    }
    let currency = ctx
        .securities
        .get(isin)
        .map(|s| s.currency.clone())
        .unwrap_or_else(|| "EUR".to_string());
    Some(ActionCandidate {
        side,
        isin: isin.clone(),
        quantity,
        estimated_price: price,
        currency,
        priority: priority.clamp(0.0, 1.0),
        reason: reason.into(),
        tags: vec![],
    })
}

/// Score-based BUY candidates, gated by the target-return floor implicitly
/// (securities failing it never receive a target weight from the
/// optimizer, so `target_weight` is 0 and `WeightBased` won't buy them
/// either — this calculator additionally requires a minimum composite
/// score).
pub struct OpportunityBuys;
impl OpportunityCalculator for OpportunityBuys {
    fn name(&self) -> &'static str {
        "opportunity_buys"
    }

    fn calculate(&self, ctx: &PlannerContext, max_per_category: usize) -> Vec<ActionCandidate> {
        let mut scored: Vec<(&Isin, f64)> = ctx
            .scores
            .iter()
            .filter(|(isin, score)| {
                !quality_gated_out(ctx, isin) && score.composite > 0.6 && eligible_for_buy(ctx, isin)
            })
            .map(|(isin, score)| (isin, score.composite))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(max_per_category)
            .filter_map(|(isin, score)| {
                let available_cash = ctx.cash.values().cloned().sum::<Decimal>();
                let price = ctx.price(isin);
                if price <= Decimal::ZERO {
                    return None;
                }
                let budget = (available_cash * Decimal::new(1, 1)).min(Decimal::from(1000));
                let quantity = (budget / price).floor();
                let priority = score * priority_multiplier(ctx, isin);
                candidate(ctx, Side::Buy, isin, quantity, "opportunity score above threshold", priority)
            })
            .collect()
    }
}

/// Sell a fraction of positions whose unrealized return exceeds the
/// configured "windfall" thresholds.
pub struct ProfitTaking;
impl OpportunityCalculator for ProfitTaking {
    fn name(&self) -> &'static str {
        "profit_taking"
    }

    fn calculate(&self, ctx: &PlannerContext, max_per_category: usize) -> Vec<ActionCandidate> {
        let low = ctx.settings.get_f64("windfall_threshold_low");
        let high = ctx.settings.get_f64("windfall_threshold_high");
        let sell_low = ctx.settings.get_f64("profit_take_pct_low");
        let sell_high = ctx.settings.get_f64("profit_take_pct_high");

        let mut out = Vec::new();
        for (isin, position) in &ctx.positions {
            if out.len() >= max_per_category {
                break;
            }
            if position.average_cost <= Decimal::ZERO || !eligible_for_sell(ctx, isin) {
                continue;
            }
            let pnl_pct = ((position.last_price - position.average_cost) / position.average_cost)
                .to_string()
                .parse::<f64>()
                .unwrap_or(0.0);

            let sell_fraction = if pnl_pct >= high {
                sell_high
            } else if pnl_pct >= low {
                sell_low
            } else {
                continue;
            };

            let sell_fraction_dec = Decimal::try_from(sell_fraction).unwrap_or(Decimal::ZERO);
            let quantity = (position.quantity * sell_fraction_dec).floor();
            if let Some(c) = candidate(ctx, Side::Sell, isin, quantity, "windfall profit-take", 0.6) {
                out.push(c);
            }
        }
        out
    }
}

/// Buy more of positions trading below average cost that still pass the
/// quality gate ("quality dip").
pub struct AveragingDown;
impl OpportunityCalculator for AveragingDown {
    fn name(&self) -> &'static str {
        "averaging_down"
    }

    fn calculate(&self, ctx: &PlannerContext, max_per_category: usize) -> Vec<ActionCandidate> {
        let mut out = Vec::new();
        for (isin, position) in &ctx.positions {
            if out.len() >= max_per_category {
                break;
            }
            if quality_gated_out(ctx, isin) || !eligible_for_buy(ctx, isin) {
                continue;
            }
            if position.last_price >= position.average_cost || position.average_cost <= Decimal::ZERO {
                continue;
            }
            let quality_pass = ctx.tags_for(isin).has(crate::domain::security::Tag::QualityGatePass);
            if !quality_pass {
                continue;
            }
            let quantity = (position.quantity * Decimal::new(2, 1)).floor();
            let priority = 0.5 * priority_multiplier(ctx, isin);
            if let Some(c) = candidate(ctx, Side::Buy, isin, quantity, "quality dip averaging", priority) {
                out.push(c);
            }
        }
        out
    }
}

fn allocation_drift(
    ctx: &PlannerContext,
    dimension: crate::domain::allocation::Dimension,
) -> Vec<(String, f64)> {
    use crate::domain::security::OTHER_GROUP;
    use std::collections::HashMap;

    let mut group_value: HashMap<String, Decimal> = HashMap::new();
    for (isin, position) in &ctx.positions {
        let group = match (ctx.securities.get(isin), dimension) {
            (Some(sec), crate::domain::allocation::Dimension::Country) => sec.country_group().to_string(),
            (Some(sec), crate::domain::allocation::Dimension::Industry) => sec.industry_group().to_string(),
            (Some(sec), crate::domain::allocation::Dimension::ProductType) => sec.product_type.to_string(),
            (None, _) => OTHER_GROUP.to_string(),
        };
        *group_value.entry(group).or_insert(Decimal::ZERO) += position.market_value();
    }

    let mut drift = Vec::new();
    let groups: std::collections::HashSet<String> = group_value
        .keys()
        .cloned()
        .chain(match dimension {
            crate::domain::allocation::Dimension::Country => ctx.allocation_targets.country.keys().cloned().collect::<Vec<_>>(),
            crate::domain::allocation::Dimension::Industry => ctx.allocation_targets.industry.keys().cloned().collect::<Vec<_>>(),
            crate::domain::allocation::Dimension::ProductType => ctx.allocation_targets.product_type.keys().cloned().collect::<Vec<_>>(),
        })
        .collect();

    for group in groups {
        if ctx.portfolio_value <= Decimal::ZERO {
            continue;
        }
        let current_weight = (group_value.get(&group).copied().unwrap_or(Decimal::ZERO) / ctx.portfolio_value)
            .to_string()
            .parse::<f64>()
            .unwrap_or(0.0);
        let band = ctx.allocation_targets.band_for(dimension, &group);
        let target_mid = band.map(|b| (b.min + b.max) / 2.0).unwrap_or(current_weight);
        drift.push((group, target_mid - current_weight));
    }
    drift
}

/// Largest under-weight country/industry groups drive BUY candidates.
pub struct RebalanceBuys;
impl OpportunityCalculator for RebalanceBuys {
    fn name(&self) -> &'static str {
        "rebalance_buys"
    }

    fn calculate(&self, ctx: &PlannerContext, max_per_category: usize) -> Vec<ActionCandidate> {
        let mut drift = allocation_drift(ctx, crate::domain::allocation::Dimension::Country);
        drift.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut out = Vec::new();
        for (group, gap) in drift.into_iter().take(max_per_category) {
            if gap <= 0.0 {
                continue;
            }
            if let Some((isin, _)) = ctx
                .securities
                .iter()
                .filter(|(isin, sec)| {
                    sec.country_group() == group && !quality_gated_out(ctx, isin) && eligible_for_buy(ctx, isin)
                })
                .max_by(|a, b| {
                    let sa = ctx.score_for(a.0).map(|s| s.composite).unwrap_or(0.0);
                    let sb = ctx.score_for(b.0).map(|s| s.composite).unwrap_or(0.0);
                    sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
                })
            {
                let target_value = Decimal::try_from(gap).unwrap_or(Decimal::ZERO) * ctx.portfolio_value;
                let price = ctx.price(isin);
                if price > Decimal::ZERO {
                    let quantity = (target_value / price).floor();
                    if let Some(c) = candidate(ctx, Side::Buy, isin, quantity, "country under-weight", 0.55) {
                        out.push(c);
                    }
                }
            }
        }
        out
    }
}

/// Largest over-weight country/industry groups drive SELL candidates.
pub struct RebalanceSells;
impl OpportunityCalculator for RebalanceSells {
    fn name(&self) -> &'static str {
        "rebalance_sells"
    }

    fn calculate(&self, ctx: &PlannerContext, max_per_category: usize) -> Vec<ActionCandidate> {
        let mut drift = allocation_drift(ctx, crate::domain::allocation::Dimension::Country);
        drift.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut out = Vec::new();
        for (group, gap) in drift.into_iter().take(max_per_category) {
            if gap >= 0.0 {
                continue;
            }
            if let Some((isin, position)) = ctx
                .positions
                .iter()
                .filter(|(isin, _)| {
                    ctx.securities
                        .get(*isin)
                        .map(|s| s.country_group() == group)
                        .unwrap_or(false)
                        && eligible_for_sell(ctx, isin)
                })
                .max_by_key(|(_, p)| p.market_value())
            {
                let target_value = Decimal::try_from(-gap).unwrap_or(Decimal::ZERO) * ctx.portfolio_value;
                let price = ctx.price(isin);
                if price > Decimal::ZERO {
                    let quantity = (target_value / price).floor().min(position.quantity);
                    if let Some(c) = candidate(ctx, Side::Sell, isin, quantity, "country over-weight", 0.55) {
                        out.push(c);
                    }
                }
            }
        }
        out
    }
}

/// Sizes a BUY or SELL per security from `|current - target| * portfolio_value`,
/// boosting priority when a deviation is both undersized and carries an
/// opportunity tag (opportunistic deviation logic, spec.md §4.E.1).
pub struct WeightBased;
impl OpportunityCalculator for WeightBased {
    fn name(&self) -> &'static str {
        "weight_based"
    }

    fn calculate(&self, ctx: &PlannerContext, max_per_category: usize) -> Vec<ActionCandidate> {
        let mut deviations: Vec<(Isin, f64)> = ctx
            .optimizer_result
            .weights
            .keys()
            .map(|isin| {
                let dev = ctx.target_weight(isin) - ctx.current_weight(isin);
                (isin.clone(), dev)
            })
            .collect();
        deviations.sort_by(|a, b| b.1.abs().partial_cmp(&a.1.abs()).unwrap_or(std::cmp::Ordering::Equal));

        let mut out = Vec::new();
        for (isin, deviation) in deviations.into_iter().take(max_per_category) {
            if deviation.abs() < 1e-6 {
                continue;
            }
            let price = ctx.price(&isin);
            if price <= Decimal::ZERO {
                continue;
            }
            let value = Decimal::try_from(deviation.abs()).unwrap_or(Decimal::ZERO) * ctx.portfolio_value;
            let quantity = (value / price).floor();

            let undersized = deviation > 0.0;
            let has_opportunity_tag = ctx.score_for(&isin).map(|s| s.sub_scores.opportunity > 0.6).unwrap_or(false);
            let mut priority = 0.5;
            if undersized && has_opportunity_tag {
                priority = (priority * 1.3).min(1.0);
            }

            if undersized {
                if quality_gated_out(ctx, &isin) || !eligible_for_buy(ctx, &isin) {
                    continue;
                }
                if let Some(c) = candidate(ctx, Side::Buy, &isin, quantity, "optimizer under-weight", priority) {
                    out.push(c);
                }
            } else {
                if !eligible_for_sell(ctx, &isin) {
                    continue;
                }
                let owned = ctx.positions.get(&isin).map(|p| p.quantity).unwrap_or(Decimal::ZERO);
                let quantity = quantity.min(owned);
                if let Some(c) = candidate(ctx, Side::Sell, &isin, quantity, "optimizer over-weight", priority) {
                    out.push(c);
                }
            }
        }
        out
    }
}

pub fn run_all(ctx: &PlannerContext, max_per_category: usize) -> Vec<ActionCandidate> {
    let calculators: Vec<Box<dyn OpportunityCalculator>> = vec![
        Box::new(OpportunityBuys),
        Box::new(ProfitTaking),
        Box::new(AveragingDown),
        Box::new(RebalanceBuys),
        Box::new(RebalanceSells),
        Box::new(WeightBased),
    ];
    calculators
        .iter()
        .flat_map(|c| c.calculate(ctx, max_per_category))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::security::{Security, Tag};
    use rust_decimal_macros::dec;

    fn ctx_with_security(isin: &str, quality_pass: bool) -> PlannerContext {
        use crate::domain::optimizer::OptimizerResult;
        use crate::domain::regime::MarketRegime;
        use crate::domain::score::SecurityScore;
        use std::collections::HashMap;

        let mut scores = HashMap::new();
        scores.insert(
            Isin::from(isin),
            SecurityScore {
                isin: Isin::from(isin),
                composite: 0.85,
                sub_scores: Default::default(),
                computed_at: chrono::Utc::now(),
            },
        );

        let mut tags = HashMap::new();
        let mut tag_set = crate::domain::security::TagSet::new();
        if quality_pass {
            tag_set.set(Tag::QualityGatePass, chrono::Utc::now());
        } else {
            tag_set.set(Tag::EnsembleBubbleRisk, chrono::Utc::now());
        }
        tags.insert(Isin::from(isin), tag_set);

        let mut prices = HashMap::new();
        prices.insert(Isin::from(isin), dec!(100));

        let mut securities = HashMap::new();
        securities.insert(Isin::from(isin), Security::new(isin, "SYM", crate::domain::security::ProductType::Equity));

        let mut cash = HashMap::new();
        cash.insert("EUR".to_string(), dec!(10000));

        PlannerContext {
            bucket_id: crate::domain::ids::BucketId::from("core"),
            as_of: chrono::Utc::now(),
            positions: HashMap::new(),
            cash,
            prices,
            securities,
            scores,
            tags,
            optimizer_result: OptimizerResult {
                weights: HashMap::new(),
                computed_at: chrono::Utc::now(),
                regime_snapshot: MarketRegime::from_score(0.0, 0.1, chrono::Utc::now()),
                blend_ratio: 0.5,
            },
            allocation_targets: crate::domain::allocation::AllocationTargets::new(),
            last_buy_at: HashMap::new(),
            last_sell_at: HashMap::new(),
            position_opened_at: HashMap::new(),
            portfolio_value: dec!(20000),
            settings: std::sync::Arc::new(crate::domain::settings::Settings::with_defaults()),
        }
    }

    #[test]
    fn blocked_security_produces_no_opportunity_buy() {
        let ctx = ctx_with_security("XXX0000000", false);
        let out = OpportunityBuys.calculate(&ctx, 5);
        assert!(out.iter().all(|c| c.isin != Isin::from("XXX0000000")));
    }

    #[test]
    fn quality_pass_security_can_be_bought() {
        let ctx = ctx_with_security("AAA0000000", true);
        let out = OpportunityBuys.calculate(&ctx, 5);
        assert!(out.iter().any(|c| c.side == Side::Buy));
    }
}
