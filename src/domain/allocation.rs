//! Per-dimension allocation targets (country, industry, product-type) with
//! min/max bands, used by both the optimizer's constraint builder and the
//! planner's rebalance calculators.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, weight: f64) -> bool {
        weight >= self.min && weight <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    Country,
    Industry,
    ProductType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocationTargets {
    pub country: HashMap<String, Band>,
    pub industry: HashMap<String, Band>,
    pub product_type: HashMap<String, Band>,
}

impl AllocationTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn band_for(&self, dimension: Dimension, group: &str) -> Option<Band> {
        let map = match dimension {
            Dimension::Country => &self.country,
            Dimension::Industry => &self.industry,
            Dimension::ProductType => &self.product_type,
        };
        map.get(group).copied()
    }

    /// Declared bands (excluding the implicit OTHER bucket) sum to at most
    /// 1.0 within a dimension, per spec.md §4.D.
    pub fn declared_weight_sum(&self, dimension: Dimension) -> f64 {
        let map = match dimension {
            Dimension::Country => &self.country,
            Dimension::Industry => &self.industry,
            Dimension::ProductType => &self.product_type,
        };
        map.iter()
            .filter(|(group, _)| group.as_str() != crate::domain::security::OTHER_GROUP)
            .map(|(_, band)| band.max)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_contains_checks_inclusive_range() {
        let band = Band::new(0.05, 0.15);
        assert!(band.contains(0.05));
        assert!(band.contains(0.15));
        assert!(!band.contains(0.16));
    }

    #[test]
    fn missing_group_has_no_band() {
        let targets = AllocationTargets::new();
        assert!(targets.band_for(Dimension::Country, "US").is_none());
    }
}
