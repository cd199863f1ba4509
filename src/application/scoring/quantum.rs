//! Quantum-inspired bubble/value-trap detection (spec.md §4.C).
//!
//! Each security is modeled as a superposition of a `|value⟩` state and a
//! `|bubble⟩` state with quantized energy levels drawn from
//! `{-π, -π/2, 0, π/2, π}`. The two state probabilities are estimated from
//! independent classical signals (recent momentum for `|bubble⟩`, P/E
//! discount to the market average for `|value⟩`), then normalized to sum
//! to 1 before any `sqrt` is taken — dividing by zero never happens because
//! the degenerate (zero-sum, or too few samples) case short-circuits to
//! `(0.5, 0.5)`.

use std::f64::consts::PI;

const ENERGY_LEVELS: [f64; 5] = [-PI, -PI / 2.0, 0.0, PI / 2.0, PI];
const MIN_RETURNS_FOR_INTERFERENCE: usize = 2;
const MIN_RETURNS_FOR_MULTIMODAL: usize = 10;
pub const MU: f64 = 0.15;

#[derive(Debug, Clone, Copy, Default)]
pub struct QuantumAssessment {
    pub bubble_probability: f64,
    pub value_trap_probability: f64,
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn quantize_energy(probability: f64) -> f64 {
    let tier = (probability.clamp(0.0, 1.0) * 4.0).round() as usize;
    ENERGY_LEVELS[tier.min(4)]
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn std_dev(xs: &[f64], mu: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

/// Excess kurtosis of `xs`, 0.0 when there are too few samples to estimate
/// the fourth moment meaningfully.
fn excess_kurtosis(xs: &[f64], mu: f64, sigma: f64) -> f64 {
    if xs.len() < MIN_RETURNS_FOR_MULTIMODAL || sigma <= 0.0 {
        return 0.0;
    }
    let n = xs.len() as f64;
    let m4 = xs.iter().map(|x| (x - mu).powi(4)).sum::<f64>() / n;
    (m4 / sigma.powi(4)) - 3.0
}

/// Raw (un-normalized) bubble-state probability from recent momentum
/// relative to volatility.
fn raw_bubble_probability(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.5;
    }
    let mu = mean(returns);
    let sigma = std_dev(returns, mu);
    let window = returns.len().min(5);
    let recent = &returns[returns.len() - window..];
    let recent_momentum = mean(recent);
    let ratio = if sigma > 0.0 {
        recent_momentum / sigma
    } else {
        0.0
    };
    logistic(ratio)
}

/// Raw (un-normalized) value-state probability from P/E discount to the
/// market average; 0.5 (neutral) when fundamentals are unavailable.
fn raw_value_probability(pe_ratio: Option<f64>, market_avg_pe: Option<f64>) -> f64 {
    match (pe_ratio, market_avg_pe) {
        (Some(pe), Some(avg)) if avg > 0.0 => logistic((avg - pe) / avg),
        _ => 0.5,
    }
}

/// Computes both quantum probabilities for one security. `lambda` is the
/// regime-adaptive interference weight from `MarketRegime::quantum_lambda`.
/// Returns `(0.5, 0.5)` — never NaN — when the normalization sum is zero or
/// when there are fewer than two return observations (testable property 9).
pub fn assess(
    returns: &[f64],
    pe_ratio: Option<f64>,
    market_avg_pe: Option<f64>,
    lambda: f64,
) -> QuantumAssessment {
    if returns.len() < MIN_RETURNS_FOR_INTERFERENCE {
        return QuantumAssessment {
            bubble_probability: 0.5,
            value_trap_probability: 0.5,
        };
    }

    let raw_bubble = raw_bubble_probability(returns);
    let raw_value = raw_value_probability(pe_ratio, market_avg_pe);
    let sum = raw_bubble + raw_value;
    if sum <= 0.0 {
        return QuantumAssessment {
            bubble_probability: 0.5,
            value_trap_probability: 0.5,
        };
    }

    let p_bubble = raw_bubble / sum;
    let p_value = raw_value / sum;

    let e_bubble = quantize_energy(p_bubble);
    let e_value = quantize_energy(p_value);
    let delta_e = e_bubble - e_value;
    let t = 1.0;

    let interference = 2.0 * (p_value * p_bubble).sqrt() * (delta_e * t).cos();

    let mu_ret = mean(returns);
    let sigma_ret = std_dev(returns, mu_ret);
    let kurtosis = excess_kurtosis(returns, mu_ret, sigma_ret);
    let multimodal = (kurtosis / 10.0).clamp(-0.1, 0.1);

    let bubble_probability = (p_bubble + lambda * interference + MU * multimodal).clamp(0.0, 1.0);

    // Value-trap is gated: only meaningful when the security actually looks
    // cheap on paper (P/E more than 20% below the market average).
    let pe_gate = matches!(
        (pe_ratio, market_avg_pe),
        (Some(pe), Some(avg)) if avg > 0.0 && pe < avg * 0.8
    );
    let value_trap_probability = if pe_gate {
        (p_value + lambda * interference + MU * multimodal).clamp(0.0, 1.0)
    } else {
        0.0
    };

    QuantumAssessment {
        bubble_probability,
        value_trap_probability,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_input_returns_half_half() {
        let result = assess(&[], None, None, 0.2);
        assert_eq!(result.bubble_probability, 0.5);
        assert_eq!(result.value_trap_probability, 0.5);

        let result = assess(&[0.01], None, None, 0.2);
        assert_eq!(result.bubble_probability, 0.5);
        assert_eq!(result.value_trap_probability, 0.5);
    }

    #[test]
    fn probability_is_bounded_with_sufficient_samples() {
        let returns: Vec<f64> = (0..15).map(|i| 0.01 * (i as f64 % 3.0 - 1.0)).collect();
        let result = assess(&returns, Some(10.0), Some(20.0), 0.3);
        assert!((0.0..=1.0).contains(&result.bubble_probability));
        assert!((0.0..=1.0).contains(&result.value_trap_probability));
        assert!(!result.bubble_probability.is_nan());
        assert!(!result.value_trap_probability.is_nan());
    }

    #[test]
    fn value_trap_gated_by_pe_discount() {
        let returns: Vec<f64> = (0..12).map(|i| 0.005 * i as f64).collect();
        // P/E above the market average: gate should close, trap prob is 0.
        let result = assess(&returns, Some(25.0), Some(20.0), 0.2);
        assert_eq!(result.value_trap_probability, 0.0);
    }

    #[test]
    fn strong_uptrend_skews_bubble_probability_high() {
        let returns: Vec<f64> = (0..12).map(|_| 0.05).collect();
        let result = assess(&returns, None, None, 0.4);
        assert!(result.bubble_probability > 0.5);
    }
}
