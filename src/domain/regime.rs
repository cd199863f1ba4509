//! Continuous market regime score mapped to a discrete label.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeLabel {
    Bear,
    Sideways,
    Bull,
    Volatile,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketRegime {
    pub score: f64,
    pub label: RegimeLabel,
    pub computed_at: DateTime<Utc>,
}

impl MarketRegime {
    /// Maps a continuous index-derived score in [-1, 1] to a discrete
    /// label. Volatility is a separate signal layered on top by the caller
    /// (high realized volatility overrides the directional label).
    pub fn from_score(score: f64, realized_volatility: f64, now: DateTime<Utc>) -> Self {
        let score = score.clamp(-1.0, 1.0);
        let label = if realized_volatility > 0.35 {
            RegimeLabel::Volatile
        } else if score > 0.2 {
            RegimeLabel::Bull
        } else if score < -0.2 {
            RegimeLabel::Bear
        } else {
            RegimeLabel::Sideways
        };
        MarketRegime {
            score,
            label,
            computed_at: now,
        }
    }

    /// Adaptive lambda for the quantum bubble layer (spec.md §4.C):
    /// {0.2, 0.3, 0.4} depending on how bullish the regime is.
    pub fn quantum_lambda(&self) -> f64 {
        match self.label {
            RegimeLabel::Bull => 0.4,
            RegimeLabel::Volatile => 0.3,
            RegimeLabel::Sideways | RegimeLabel::Bear => 0.2,
        }
    }

    /// Multiplicative dampening applied to expected returns, bounded to
    /// [0.5, 1.1] per spec.md §4.D.
    pub fn expected_return_dampening(&self) -> f64 {
        let raw = match self.label {
            RegimeLabel::Bull => 1.1,
            RegimeLabel::Sideways => 1.0,
            RegimeLabel::Bear => 0.7,
            RegimeLabel::Volatile => 0.6,
        };
        raw.clamp(0.5, 1.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_volatility_overrides_directional_label() {
        let regime = MarketRegime::from_score(0.8, 0.5, Utc::now());
        assert_eq!(regime.label, RegimeLabel::Volatile);
    }

    #[test]
    fn bull_bear_sideways_thresholds() {
        assert_eq!(
            MarketRegime::from_score(0.5, 0.1, Utc::now()).label,
            RegimeLabel::Bull
        );
        assert_eq!(
            MarketRegime::from_score(-0.5, 0.1, Utc::now()).label,
            RegimeLabel::Bear
        );
        assert_eq!(
            MarketRegime::from_score(0.0, 0.1, Utc::now()).label,
            RegimeLabel::Sideways
        );
    }

    #[test]
    fn dampening_is_bounded() {
        for label_score in [-1.0, -0.5, 0.0, 0.5, 1.0] {
            let regime = MarketRegime::from_score(label_score, 0.1, Utc::now());
            let d = regime.expected_return_dampening();
            assert!((0.5..=1.1).contains(&d));
        }
    }
}
