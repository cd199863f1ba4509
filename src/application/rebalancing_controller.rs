//! Negative-balance emergency workflow and routine drift detection
//! (spec.md §4.G).

use crate::domain::action::ActionCandidate;
use crate::domain::ids::Isin;
use crate::domain::position::Position;
use crate::domain::recommendation::EMERGENCY_PORTFOLIO_HASH;
use crate::domain::security::{ProductType, Security};
use crate::domain::settings::Settings;
use crate::domain::trade::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct FxLeg {
    pub from_currency: String,
    pub to_currency: String,
    pub amount_from: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct EmergencyPlan {
    pub fx_legs: Vec<FxLeg>,
    pub forced_sells: Vec<ActionCandidate>,
}

impl EmergencyPlan {
    pub fn is_empty(&self) -> bool {
        self.fx_legs.is_empty() && self.forced_sells.is_empty()
    }
}

/// Routes FX from surplus to deficit currencies via EUR as hub, up to
/// `max_iterations`, each leg inflated by `slippage_buffer` to leave a
/// margin against quote movement. Stops once no currency is in deficit or
/// no further surplus can be found.
pub fn plan_fx_legs(
    balances: &HashMap<String, Decimal>,
    rates_to_eur: &HashMap<String, Decimal>,
    max_iterations: usize,
    slippage_buffer: Decimal,
) -> Vec<FxLeg> {
    let mut working = balances.clone();
    let mut legs = Vec::new();

    for _ in 0..max_iterations {
        let deficit_ccy = match working
            .iter()
            .find(|(_, bal)| **bal < Decimal::ZERO)
            .map(|(c, _)| c.clone())
        {
            Some(c) => c,
            None => break,
        };
        let deficit_amount = -working[&deficit_ccy];

        let surplus_ccy = working
            .iter()
            .filter(|(c, bal)| *c != &deficit_ccy && **bal > Decimal::ZERO)
            .max_by(|a, b| a.1.cmp(b.1))
            .map(|(c, _)| c.clone());
        let surplus_ccy = match surplus_ccy {
            Some(c) => c,
            None => break,
        };

        let rate_surplus = rates_to_eur.get(&surplus_ccy).copied().unwrap_or(Decimal::ONE);
        let rate_deficit = rates_to_eur.get(&deficit_ccy).copied().unwrap_or(Decimal::ONE);

        let needed_deficit = deficit_amount * (Decimal::ONE + slippage_buffer);
        let needed_eur = needed_deficit / rate_deficit;
        let needed_surplus = needed_eur * rate_surplus;

        let surplus_available = working[&surplus_ccy];
        let move_surplus = needed_surplus.min(surplus_available);
        if move_surplus <= Decimal::ZERO {
            break;
        }
        let move_eur = move_surplus / rate_surplus;
        let move_deficit = move_eur * rate_deficit / (Decimal::ONE + slippage_buffer);

        legs.push(FxLeg {
            from_currency: surplus_ccy.clone(),
            to_currency: deficit_ccy.clone(),
            amount_from: move_surplus,
        });

        *working.get_mut(&surplus_ccy).unwrap() -= move_surplus;
        *working.get_mut(&deficit_ccy).unwrap() += move_deficit;
    }

    legs
}

fn sellable(security: &Security) -> bool {
    security.active && security.product_type != ProductType::Cash
}

fn unrealized_pnl_pct(position: &Position) -> f64 {
    if position.average_cost.is_zero() {
        return 0.0;
    }
    ((position.last_price - position.average_cost) / position.average_cost)
        .to_f64()
        .unwrap_or(0.0)
}

/// Selects forced sells, largest position first, to close a remaining FX
/// shortfall. Skips positions that violate min-hold or max-loss unless
/// `emergency_override` is set, matching spec.md §4.G step 2.
#[allow(clippy::too_many_arguments)]
pub fn plan_forced_sells(
    positions: &[Position],
    securities: &HashMap<Isin, Security>,
    position_opened_at: &HashMap<Isin, DateTime<Utc>>,
    remaining_deficit_eur: Decimal,
    rates_to_eur: &HashMap<String, Decimal>,
    settings: &Settings,
    as_of: DateTime<Utc>,
    emergency_override: bool,
) -> Vec<ActionCandidate> {
    let min_hold_days = settings.get_f64("min_hold_days") as i64;
    let max_loss_threshold = settings.get_f64("max_loss_threshold");

    let mut ranked: Vec<&Position> = positions.iter().filter(|p| !p.is_flat()).collect();
    ranked.sort_by(|a, b| {
        let rate_a = rates_to_eur.get(&a.currency).copied().unwrap_or(Decimal::ONE);
        let rate_b = rates_to_eur.get(&b.currency).copied().unwrap_or(Decimal::ONE);
        let value_a = a.market_value() / rate_a;
        let value_b = b.market_value() / rate_b;
        value_b.cmp(&value_a)
    });

    let mut remaining = remaining_deficit_eur;
    let mut sells = Vec::new();

    for position in ranked {
        if remaining <= Decimal::ZERO {
            break;
        }
        let Some(security) = securities.get(&position.isin) else {
            continue;
        };
        if !sellable(security) {
            continue;
        }
        if !emergency_override {
            if let Some(opened_at) = position_opened_at.get(&position.isin) {
                if (as_of - *opened_at).num_days() < min_hold_days {
                    continue;
                }
            }
            if unrealized_pnl_pct(position) < max_loss_threshold {
                continue;
            }
        }

        let rate = rates_to_eur.get(&position.currency).copied().unwrap_or(Decimal::ONE);
        let value_eur = position.market_value() / rate;
        let sell_value_eur = value_eur.min(remaining);
        let fraction = if value_eur.is_zero() {
            Decimal::ZERO
        } else {
            sell_value_eur / value_eur
        };
        let quantity = (position.quantity * fraction).round_dp(4);
        if quantity.is_zero() {
            continue;
        }

        sells.push(ActionCandidate {
            side: Side::Sell,
            isin: position.isin.clone(),
            quantity,
            estimated_price: position.last_price,
            currency: position.currency.clone(),
            priority: 1.0,
            reason: "emergency negative-balance forced sell".to_string(),
            tags: vec![],
        });

        remaining -= sell_value_eur;
    }

    sells
}

/// True once any currency balance is below its EUR-equivalent reserve,
/// per spec.md §4.G's default €5 floor.
pub fn has_negative_balance_trigger(
    balances: &HashMap<String, Decimal>,
    rates_to_eur: &HashMap<String, Decimal>,
    min_reserve_eur: Decimal,
) -> bool {
    balances.iter().any(|(ccy, bal)| {
        let rate = rates_to_eur.get(ccy).copied().unwrap_or(Decimal::ONE);
        let reserve_in_ccy = min_reserve_eur * rate;
        *bal < reserve_in_ccy
    })
}

/// Builds the full emergency plan: FX legs first, then forced sells for
/// whatever shortfall FX alone cannot close.
#[allow(clippy::too_many_arguments)]
pub fn build_emergency_plan(
    balances: &HashMap<String, Decimal>,
    positions: &[Position],
    securities: &HashMap<Isin, Security>,
    position_opened_at: &HashMap<Isin, DateTime<Utc>>,
    rates_to_eur: &HashMap<String, Decimal>,
    settings: &Settings,
    as_of: DateTime<Utc>,
    emergency_override: bool,
) -> EmergencyPlan {
    let max_iterations = settings.get_f64("emergency_fx_max_iterations") as usize;
    let slippage_buffer =
        Decimal::try_from(settings.get_f64("emergency_fx_slippage_buffer")).unwrap_or(Decimal::new(2, 2));

    let fx_legs = plan_fx_legs(balances, rates_to_eur, max_iterations, slippage_buffer);

    let mut projected = balances.clone();
    for leg in &fx_legs {
        *projected.get_mut(&leg.from_currency).unwrap() -= leg.amount_from;
        let rate_from = rates_to_eur.get(&leg.from_currency).copied().unwrap_or(Decimal::ONE);
        let rate_to = rates_to_eur.get(&leg.to_currency).copied().unwrap_or(Decimal::ONE);
        let eur = leg.amount_from / rate_from;
        *projected.entry(leg.to_currency.clone()).or_insert(Decimal::ZERO) += eur * rate_to;
    }

    let remaining_deficit_eur: Decimal = projected
        .iter()
        .filter(|(_, bal)| **bal < Decimal::ZERO)
        .map(|(ccy, bal)| {
            let rate = rates_to_eur.get(ccy).copied().unwrap_or(Decimal::ONE);
            -*bal / rate
        })
        .sum();

    let forced_sells = if remaining_deficit_eur > Decimal::ZERO {
        plan_forced_sells(
            positions,
            securities,
            position_opened_at,
            remaining_deficit_eur,
            rates_to_eur,
            settings,
            as_of,
            emergency_override,
        )
    } else {
        Vec::new()
    };

    EmergencyPlan { fx_legs, forced_sells }
}

pub fn emergency_portfolio_hash() -> &'static str {
    EMERGENCY_PORTFOLIO_HASH
}

/// Routine drift: total absolute deviation from optimizer target weights,
/// summed across securities, compared against `drift_threshold`.
pub fn routine_drift_exceeded(
    current_weights: &HashMap<Isin, f64>,
    target_weights: &HashMap<Isin, f64>,
    drift_threshold: f64,
) -> bool {
    let total_drift: f64 = target_weights
        .iter()
        .map(|(isin, target)| {
            let current = current_weights.get(isin).copied().unwrap_or(0.0);
            (current - target).abs()
        })
        .sum();
    total_drift > drift_threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::BucketId;
    use rust_decimal_macros::dec;

    fn rates() -> HashMap<String, Decimal> {
        let mut m = HashMap::new();
        m.insert("EUR".to_string(), dec!(1));
        m.insert("USD".to_string(), dec!(1.08));
        m.insert("GBP".to_string(), dec!(0.85));
        m
    }

    #[test]
    fn fx_legs_close_a_simple_deficit() {
        let mut balances = HashMap::new();
        balances.insert("USD".to_string(), dec!(-100));
        balances.insert("EUR".to_string(), dec!(500));
        let legs = plan_fx_legs(&balances, &rates(), 20, dec!(0.02));
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].from_currency, "EUR");
        assert_eq!(legs[0].to_currency, "USD");
    }

    #[test]
    fn no_deficit_produces_no_legs() {
        let mut balances = HashMap::new();
        balances.insert("EUR".to_string(), dec!(500));
        let legs = plan_fx_legs(&balances, &rates(), 20, dec!(0.02));
        assert!(legs.is_empty());
    }

    #[test]
    fn negative_balance_trigger_detects_below_reserve() {
        let mut balances = HashMap::new();
        balances.insert("EUR".to_string(), dec!(2));
        assert!(has_negative_balance_trigger(&balances, &rates(), dec!(5)));
    }

    #[test]
    fn routine_drift_flags_large_deviation() {
        let mut current = HashMap::new();
        let mut target = HashMap::new();
        let isin = Isin::from("DE0000000000");
        current.insert(isin.clone(), 0.10);
        target.insert(isin, 0.20);
        assert!(routine_drift_exceeded(&current, &target, 0.03));
    }

    #[test]
    fn forced_sells_skip_positions_under_min_hold() {
        let settings = Settings::with_defaults();
        let isin = Isin::from("DE0000000000");
        let security = Security::new(isin.clone(), "ABC", ProductType::Equity);
        let mut securities = HashMap::new();
        securities.insert(isin.clone(), security);
        let position = Position {
            isin: isin.clone(),
            bucket_id: BucketId::from("core"),
            quantity: dec!(10),
            average_cost: dec!(100),
            last_price: dec!(110),
            currency: "EUR".to_string(),
            as_of: Utc::now(),
        };
        let mut opened_at = HashMap::new();
        opened_at.insert(isin, Utc::now());
        let sells = plan_forced_sells(
            &[position],
            &securities,
            &opened_at,
            dec!(500),
            &rates(),
            &settings,
            Utc::now(),
            false,
        );
        assert!(sells.is_empty());
    }
}
