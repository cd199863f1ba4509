//! Per-security composite score and its sub-score breakdown.

use crate::domain::ids::Isin;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SubScores {
    pub long_term: f64,
    pub fundamentals: f64,
    pub dividends: f64,
    pub opportunity: f64,
    pub short_term: f64,
    pub technicals: f64,
    pub opinion: f64,
    pub diversification: f64,
    pub quantum: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityScore {
    pub isin: Isin,
    pub composite: f64,
    pub sub_scores: SubScores,
    pub computed_at: DateTime<Utc>,
}

impl SecurityScore {
    pub fn clamp_composite(&mut self) {
        self.composite = self.composite.clamp(0.0, 1.0);
    }
}

/// Weight profile for combining sub-scores into the composite, per spec.md
/// §4.C. ETC uses the EQUITY profile (its difference from EQUITY is the
/// concentration cap, handled in `ProductType`, not here).
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub long_term: f64,
    pub fundamentals: f64,
    pub dividends: f64,
    pub opportunity: f64,
    pub short_term: f64,
    pub technicals: f64,
    pub opinion: f64,
    pub diversification: f64,
}

impl ScoreWeights {
    pub const EQUITY: ScoreWeights = ScoreWeights {
        long_term: 0.25,
        fundamentals: 0.20,
        dividends: 0.18,
        opportunity: 0.12,
        short_term: 0.08,
        technicals: 0.07,
        opinion: 0.05,
        diversification: 0.05,
    };

    pub const DIVERSIFIED: ScoreWeights = ScoreWeights {
        long_term: 0.35,
        fundamentals: 0.10,
        dividends: 0.18,
        opportunity: 0.12,
        short_term: 0.08,
        technicals: 0.07,
        opinion: 0.05,
        diversification: 0.05,
    };

    pub fn for_product(product: crate::domain::security::ProductType) -> ScoreWeights {
        if product.is_diversified() {
            ScoreWeights::DIVERSIFIED
        } else {
            ScoreWeights::EQUITY
        }
    }

    pub fn weighted_sum(&self, s: &SubScores) -> f64 {
        self.long_term * s.long_term
            + self.fundamentals * s.fundamentals
            + self.dividends * s.dividends
            + self.opportunity * s.opportunity
            + self.short_term * s.short_term
            + self.technicals * s.technicals
            + self.opinion * s.opinion
            + self.diversification * s.diversification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::security::ProductType;

    #[test]
    fn equity_weights_sum_to_one() {
        let w = ScoreWeights::EQUITY;
        let sum = w.long_term
            + w.fundamentals
            + w.dividends
            + w.opportunity
            + w.short_term
            + w.technicals
            + w.opinion
            + w.diversification;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn diversified_weights_sum_to_one() {
        let w = ScoreWeights::DIVERSIFIED;
        let sum = w.long_term
            + w.fundamentals
            + w.dividends
            + w.opportunity
            + w.short_term
            + w.technicals
            + w.opinion
            + w.diversification;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn etf_gets_diversified_profile() {
        let w = ScoreWeights::for_product(ProductType::Etf);
        assert_eq!(w.long_term, 0.35);
        assert_eq!(w.fundamentals, 0.10);
    }

    #[test]
    fn equity_and_etc_get_equity_profile() {
        assert_eq!(
            ScoreWeights::for_product(ProductType::Equity).long_term,
            0.25
        );
        assert_eq!(ScoreWeights::for_product(ProductType::Etc).long_term, 0.25);
    }
}
