//! Security master data: identity, product type, and the tag set that
//! scoring and the planner's quality gates read.

use crate::domain::ids::Isin;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    Equity,
    Etf,
    Etc,
    MutualFund,
    Cash,
    Unknown,
}

impl ProductType {
    /// Max concentration per security, per spec.md §4.D.
    pub fn max_concentration(self) -> f64 {
        match self {
            ProductType::Equity => 0.20,
            ProductType::Etf | ProductType::MutualFund => 0.30,
            ProductType::Etc => 0.12,
            ProductType::Cash | ProductType::Unknown => 1.0,
        }
    }

    /// True for ETF/MutualFund, which share a diversified-product scoring
    /// weight profile and opportunity-score proximity weighting.
    pub fn is_diversified(self) -> bool {
        matches!(self, ProductType::Etf | ProductType::MutualFund)
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProductType::Equity => "EQUITY",
            ProductType::Etf => "ETF",
            ProductType::Etc => "ETC",
            ProductType::MutualFund => "MUTUALFUND",
            ProductType::Cash => "CASH",
            ProductType::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Synthetic grouping bucket used when a security has no declared country
/// or industry. Included in optimization, never itself band-constrained.
pub const OTHER_GROUP: &str = "OTHER";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagUpdateFrequency {
    TenMin,
    Hourly,
    Daily,
    Weekly,
}

impl TagUpdateFrequency {
    pub fn duration(&self) -> Duration {
        match self {
            TagUpdateFrequency::TenMin => Duration::minutes(10),
            TagUpdateFrequency::Hourly => Duration::hours(1),
            TagUpdateFrequency::Daily => Duration::days(1),
            TagUpdateFrequency::Weekly => Duration::weeks(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    QualityGatePass,
    QualityGateFail,
    QualityValue,
    BubbleRisk,
    ValueTrap,
    EnsembleBubbleRisk,
    QuantumBubbleWarning,
    EnsembleValueTrap,
    QuantumValueWarning,
    TotalReturnBoosted,
    OptimizerAligned,
    TargetReturnHardFiltered,
    RegimeBull,
    RegimeBear,
    RegimeSideways,
    RegimeVolatile,
}

impl Tag {
    pub fn update_frequency(self) -> TagUpdateFrequency {
        match self {
            Tag::BubbleRisk
            | Tag::ValueTrap
            | Tag::EnsembleBubbleRisk
            | Tag::QuantumBubbleWarning
            | Tag::EnsembleValueTrap
            | Tag::QuantumValueWarning => TagUpdateFrequency::TenMin,
            Tag::QualityGatePass
            | Tag::QualityGateFail
            | Tag::QualityValue
            | Tag::TargetReturnHardFiltered => TagUpdateFrequency::Hourly,
            Tag::TotalReturnBoosted | Tag::OptimizerAligned => TagUpdateFrequency::Daily,
            Tag::RegimeBull | Tag::RegimeBear | Tag::RegimeSideways | Tag::RegimeVolatile => {
                TagUpdateFrequency::Weekly
            }
        }
    }

    /// Tags that, if present, hard-exclude a security from any BUY candidate
    /// in every opportunity calculator (spec.md §4.E.1).
    pub fn blocks_buy(self) -> bool {
        matches!(
            self,
            Tag::QualityGateFail
                | Tag::ValueTrap
                | Tag::BubbleRisk
                | Tag::EnsembleBubbleRisk
                | Tag::EnsembleValueTrap
                | Tag::TargetReturnHardFiltered
        )
    }

    /// Tags whose presence dampens (but does not block) priority: ×0.7.
    pub fn dampens_priority(self) -> bool {
        matches!(self, Tag::QuantumBubbleWarning | Tag::QuantumValueWarning)
    }
}

/// Per-security tag state, carrying when each tag was last (re)computed so
/// the adaptive refresh scheduler can skip tags whose frequency has not
/// elapsed yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagSet {
    pub updated_at: HashMap<Tag, DateTime<Utc>>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, tag: Tag) -> bool {
        self.updated_at.contains_key(&tag)
    }

    pub fn set(&mut self, tag: Tag, now: DateTime<Utc>) {
        self.updated_at.insert(tag, now);
    }

    pub fn clear(&mut self, tag: Tag) {
        self.updated_at.remove(&tag);
    }

    /// True if `tag`'s declared frequency has elapsed since it was last set,
    /// or if it was never set at all.
    pub fn due_for_refresh(&self, tag: Tag, now: DateTime<Utc>) -> bool {
        match self.updated_at.get(&tag) {
            Some(last) => now - *last >= tag.update_frequency().duration(),
            None => true,
        }
    }

    /// Replace only the named tags, preserving every other tag's state.
    /// Mirrors spec.md's `UpdateSpecificTags()`.
    pub fn update_specific(&mut self, tags: &[(Tag, bool)], now: DateTime<Utc>) {
        for &(tag, present) in tags {
            if present {
                self.set(tag, now);
            } else {
                self.clear(tag);
            }
        }
    }

    pub fn blocks_buy(&self) -> bool {
        self.updated_at.keys().any(|t| t.blocks_buy())
    }

    pub fn priority_multiplier(&self) -> f64 {
        if self.updated_at.keys().any(|t| t.dampens_priority()) {
            0.7
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub isin: Isin,
    pub symbol: String,
    pub product_type: ProductType,
    pub currency: String,
    pub country: Option<String>,
    pub industry: Option<String>,
    pub exchange: Option<String>,
    pub active: bool,
}

impl Security {
    pub fn new(isin: impl Into<Isin>, symbol: impl Into<String>, product_type: ProductType) -> Self {
        Self {
            isin: isin.into(),
            symbol: symbol.into(),
            product_type,
            currency: "EUR".to_string(),
            country: None,
            industry: None,
            exchange: None,
            active: true,
        }
    }

    pub fn country_group(&self) -> &str {
        self.country.as_deref().unwrap_or(OTHER_GROUP)
    }

    pub fn industry_group(&self) -> &str {
        self.industry.as_deref().unwrap_or(OTHER_GROUP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concentration_caps_match_spec() {
        assert_eq!(ProductType::Equity.max_concentration(), 0.20);
        assert_eq!(ProductType::Etf.max_concentration(), 0.30);
        assert_eq!(ProductType::MutualFund.max_concentration(), 0.30);
        assert_eq!(ProductType::Etc.max_concentration(), 0.12);
    }

    #[test]
    fn missing_country_groups_into_other() {
        let sec = Security::new("XX0000000000", "XXX", ProductType::Equity);
        assert_eq!(sec.country_group(), OTHER_GROUP);
        assert_eq!(sec.industry_group(), OTHER_GROUP);
    }

    #[test]
    fn blocking_tags_hard_exclude_from_buys() {
        let mut tags = TagSet::new();
        assert!(!tags.blocks_buy());
        tags.set(Tag::EnsembleBubbleRisk, Utc::now());
        assert!(tags.blocks_buy());
    }

    #[test]
    fn quantum_warning_dampens_but_does_not_block() {
        let mut tags = TagSet::new();
        tags.set(Tag::QuantumBubbleWarning, Utc::now());
        assert!(!tags.blocks_buy());
        assert_eq!(tags.priority_multiplier(), 0.7);
    }

    #[test]
    fn adaptive_refresh_respects_frequency() {
        let mut tags = TagSet::new();
        let t0 = Utc::now();
        tags.set(Tag::QualityGatePass, t0);
        assert!(!tags.due_for_refresh(Tag::QualityGatePass, t0 + Duration::minutes(30)));
        assert!(tags.due_for_refresh(Tag::QualityGatePass, t0 + Duration::hours(2)));
    }

    #[test]
    fn update_specific_preserves_other_tags() {
        let mut tags = TagSet::new();
        let t0 = Utc::now();
        tags.set(Tag::QualityGatePass, t0);
        tags.set(Tag::RegimeBull, t0);
        tags.update_specific(&[(Tag::QualityGatePass, false)], t0 + Duration::hours(1));
        assert!(!tags.has(Tag::QualityGatePass));
        assert!(tags.has(Tag::RegimeBull));
    }
}
