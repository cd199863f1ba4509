//! Result of the external convex-optimizer call: target weights plus
//! provenance.

use crate::domain::ids::Isin;
use crate::domain::regime::MarketRegime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerResult {
    pub weights: HashMap<Isin, f64>,
    pub computed_at: DateTime<Utc>,
    pub regime_snapshot: MarketRegime,
    pub blend_ratio: f64,
}

impl OptimizerResult {
    /// Invariant (iv): sum of target weights <= 1.0 + 1e-6 (remainder cash).
    pub fn weights_sum(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn is_within_budget(&self) -> bool {
        self.weights_sum() <= 1.0 + 1e-6
    }

    pub fn weight_for(&self, isin: &Isin) -> f64 {
        self.weights.get(isin).copied().unwrap_or(0.0)
    }
}
