//! Key-value settings store with declared defaults and schema validation.
//! Unknown keys are rejected, as spec.md §3/§9 requires — no duck typing.

use crate::domain::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SettingValue {
    fn same_variant(&self, other: &SettingValue) -> bool {
        matches!(
            (self, other),
            (SettingValue::Bool(_), SettingValue::Bool(_))
                | (SettingValue::Number(_), SettingValue::Number(_))
                | (SettingValue::Text(_), SettingValue::Text(_))
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Declared default table. ~80 keys spanning scoring weights, optimizer
/// constraints, planner eligibility/cost thresholds, quantum layer
/// parameters, rebalancing/satellite thresholds, scheduler timeouts, and
/// the global trading mode toggle (spec.md §6).
pub fn default_table() -> HashMap<String, SettingValue> {
    use SettingValue::{Bool, Number, Text};
    let entries: Vec<(&str, SettingValue)> = vec![
        ("target_annual_return", Number(0.11)),
        ("target_return_threshold_pct", Number(0.80)),
        ("target_return_hard_floor_pct", Number(0.50)),
        ("target_return_hard_floor_min", Number(0.06)),
        ("high_quality_threshold_1", Number(0.80)),
        ("high_quality_threshold_2", Number(0.75)),
        ("high_quality_penalty_reduction_1", Number(0.35)),
        ("high_quality_penalty_reduction_2", Number(0.20)),
        ("max_plan_depth", Number(5.0)),
        ("max_opportunities_per_category", Number(5.0)),
        ("transaction_cost_fixed", Number(2.0)),
        ("transaction_cost_percent", Number(0.002)),
        ("spread", Number(0.001)),
        ("slippage", Number(0.0015)),
        ("market_impact", Number(0.0)),
        ("cost_penalty_factor", Number(1.0)),
        ("evaluation_worthwhile_multiplier", Number(2.0)),
        ("priority_threshold_for_combinations", Number(0.3)),
        ("batch_size", Number(100.0)),
        ("combinatorial_max_combinations_per_depth", Number(50.0)),
        ("min_hold_days", Number(90.0)),
        ("sell_cooldown_days", Number(180.0)),
        ("buy_cooldown_days", Number(30.0)),
        ("max_loss_threshold", Number(-0.20)),
        ("diversity_weight", Number(0.3)),
        ("correlation_threshold", Number(0.7)),
        ("etc_max_concentration", Number(0.12)),
        ("etf_max_concentration", Number(0.30)),
        ("equity_max_concentration", Number(0.20)),
        ("trading_mode", Text("research".to_string())),
        ("bubble_risk_threshold", Number(0.7)),
        ("bubble_warning_threshold", Number(0.5)),
        ("value_trap_pe_discount", Number(0.20)),
        ("quantum_mu", Number(0.15)),
        ("quantum_lambda_bear", Number(0.2)),
        ("quantum_lambda_sideways", Number(0.2)),
        ("quantum_lambda_volatile", Number(0.3)),
        ("quantum_lambda_bull", Number(0.4)),
        ("quantum_min_returns_interference", Number(2.0)),
        ("quantum_min_returns_multimodal", Number(10.0)),
        ("total_return_boost_threshold_1", Number(0.10)),
        ("total_return_boost_threshold_2", Number(0.12)),
        ("total_return_boost_threshold_3", Number(0.15)),
        ("total_return_boost_cap", Number(0.20)),
        ("quality_gate_opportunity_threshold", Number(0.7)),
        ("quality_gate_fundamentals_threshold", Number(0.6)),
        ("quality_gate_long_term_threshold", Number(0.5)),
        ("quality_gate_penalty", Number(0.7)),
        ("opportunity_52w_weight_equity", Number(0.50)),
        ("opportunity_52w_weight_diversified", Number(0.25)),
        ("windfall_threshold_low", Number(0.25)),
        ("windfall_threshold_high", Number(0.50)),
        ("profit_take_pct_low", Number(0.20)),
        ("profit_take_pct_high", Number(0.40)),
        ("optimizer_blend_ratio", Number(0.5)),
        ("optimizer_gradual_adjustment_trigger_pct", Number(0.30)),
        ("optimizer_covariance_window_days", Number(365.0)),
        ("optimizer_condition_number_shrink_threshold", Number(100.0)),
        ("drift_threshold", Number(0.03)),
        ("scoring_lookback_days", Number(365.0)),
        ("emergency_min_reserve_eur", Number(5.0)),
        ("emergency_fx_max_iterations", Number(20.0)),
        ("emergency_fx_slippage_buffer", Number(0.02)),
        ("bucket_hibernation_drawdown", Number(0.35)),
        ("bucket_circuit_breaker_loss_streak", Number(3.0)),
        ("bucket_reawakening_steps", Number(3.0)),
        ("bucket_reconciliation_tolerance_eur", Number(5.0)),
        ("bucket_cooldown_days", Number(30.0)),
        ("portfolio_balance_tolerance_eur", Number(5.0)),
        ("worker_count", Number(8.0)),
        ("brokerage_timeout_secs", Number(30.0)),
        ("market_data_timeout_secs", Number(15.0)),
        ("evaluator_timeout_secs", Number(60.0)),
        ("optimizer_timeout_secs", Number(90.0)),
        ("retry_max_attempts", Number(3.0)),
        ("retry_base_ms", Number(500.0)),
        ("retry_max_ms", Number(5000.0)),
        ("partial_execution_fill_50", Number(0.50)),
        ("partial_execution_fill_75", Number(0.75)),
        ("partial_execution_fill_100", Number(1.0)),
        ("adaptive_optimization_enabled", Bool(true)),
        ("multi_objective_evaluation_enabled", Bool(false)),
        ("regime_aware_evaluation_enabled", Bool(false)),
        ("correlation_aware_filter_enabled", Bool(true)),
        ("risk_profile", Text("balanced".to_string())),
    ];
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Settings {
    defaults: HashMap<String, SettingValue>,
    overrides: HashMap<String, SettingValue>,
}

impl Settings {
    pub fn with_defaults() -> Self {
        Self {
            defaults: default_table(),
            overrides: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.overrides.get(key).or_else(|| self.defaults.get(key))
    }

    pub fn get_f64(&self, key: &str) -> f64 {
        self.get(key).and_then(SettingValue::as_f64).unwrap_or(0.0)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(SettingValue::as_bool).unwrap_or(false)
    }

    pub fn get_str(&self, key: &str) -> String {
        self.get(key)
            .and_then(SettingValue::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Validated update: the key must already be declared (in defaults or
    /// a prior override) and the new value's type must match the
    /// currently-declared value's type.
    pub fn update(&mut self, key: &str, value: SettingValue) -> EngineResult<()> {
        let current = self
            .get(key)
            .ok_or_else(|| EngineError::validation(format!("unknown setting key: {key}")))?;

        if !current.same_variant(&value) {
            return Err(EngineError::validation(format!(
                "type mismatch updating {key}"
            )));
        }

        self.overrides.insert(key.to_string(), value);
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_default_is_readable() {
        let settings = Settings::with_defaults();
        assert_eq!(settings.get_f64("target_annual_return"), 0.11);
        assert_eq!(settings.get_str("trading_mode"), "research");
    }

    #[test]
    fn unknown_key_rejected_on_update() {
        let mut settings = Settings::with_defaults();
        let result = settings.update("not_a_real_key", SettingValue::Number(1.0));
        assert!(result.is_err());
    }

    #[test]
    fn type_mismatch_rejected_on_update() {
        let mut settings = Settings::with_defaults();
        let result = settings.update("trading_mode", SettingValue::Number(1.0));
        assert!(result.is_err());
    }

    #[test]
    fn valid_update_overrides_default() {
        let mut settings = Settings::with_defaults();
        settings
            .update("trading_mode", SettingValue::Text("live".to_string()))
            .unwrap();
        assert_eq!(settings.get_str("trading_mode"), "live");
    }

    #[test]
    fn default_table_has_roughly_eighty_keys() {
        let table = default_table();
        assert!(table.len() >= 75, "expected ~80 declared keys, got {}", table.len());
    }
}
