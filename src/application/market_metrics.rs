//! Derived return statistics (CAGR, volatility, Sharpe, Sortino) computed
//! from the raw daily-return series a `MarketDataAdapter` hands back, so
//! the sync/scoring jobs can populate `SecurityMarketData` without every
//! caller re-deriving the same annualization arithmetic.

use crate::domain::regime::MarketRegime;

/// Trading days per year used to annualize a daily-return series.
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Expected-return input feeding the optimizer's covariance-weighted
/// allocation, per spec.md §4.D: 0.7·cagr + 0.3·score-adjusted-target,
/// dampened by the current regime and floored/excluded against the same
/// hard floor the scoring layer's target-return filter enforces.
///
/// Returns `None` when the blended return falls below the exclusion floor
/// (`max(target × threshold_pct, max(0.06, 0.5 × target))`), meaning the
/// security should not enter the optimizer's feasible set at all.
pub fn expected_return(
    cagr: f64,
    composite_score: f64,
    target: f64,
    threshold_pct: f64,
    regime: &MarketRegime,
) -> Option<f64> {
    let score_adjusted_target = composite_score * target;
    let blended = 0.7 * cagr + 0.3 * score_adjusted_target;
    let dampened = blended * regime.expected_return_dampening();

    let hard_floor = (0.5 * target).max(0.06);
    let soft_floor = target * threshold_pct;
    let floor = hard_floor.max(soft_floor);

    if dampened < floor { None } else { Some(dampened) }
}

fn mean(returns: &[f64]) -> f64 {
    returns.iter().sum::<f64>() / returns.len() as f64
}

fn std_dev(returns: &[f64], mean_return: f64) -> f64 {
    let variance = returns.iter().map(|r| (r - mean_return).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}

/// Compounds the series and annualizes assuming each entry is one trading
/// day, i.e. `(prod(1+r))^(252/n) - 1`.
pub fn cagr(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let growth: f64 = returns.iter().fold(1.0, |acc, r| acc * (1.0 + r));
    if growth <= 0.0 {
        return -1.0;
    }
    growth.powf(TRADING_DAYS_PER_YEAR / returns.len() as f64) - 1.0
}

/// Annualized standard deviation of daily returns.
pub fn volatility(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    std_dev(returns, mean(returns)) * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Annualized mean return over annualized total standard deviation,
/// risk-free rate assumed zero.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean_return = mean(returns);
    let dev = std_dev(returns, mean_return);
    if dev > 0.0 {
        mean_return * TRADING_DAYS_PER_YEAR.sqrt() / dev
    } else {
        0.0
    }
}

/// Like `sharpe_ratio` but only penalizes downside deviation (returns
/// below zero).
pub fn sortino_ratio(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mean_return = mean(returns);
    let downside: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).copied().collect();
    if downside.is_empty() {
        return if mean_return > 0.0 { f64::INFINITY } else { 0.0 };
    }
    let downside_dev = (downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64).sqrt();
    if downside_dev > 0.0 {
        mean_return * TRADING_DAYS_PER_YEAR.sqrt() / downside_dev
    } else {
        0.0
    }
}

/// Sample covariance between two daily-return series of equal length,
/// annualized the same way `volatility` is. Used to build the optimizer
/// request's covariance matrix from cached per-security return series.
pub fn covariance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let a = &a[..n];
    let b = &b[..n];
    let mean_a = mean(a);
    let mean_b = mean(b);
    let sum: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - mean_a) * (y - mean_b)).sum();
    (sum / n as f64) * TRADING_DAYS_PER_YEAR
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::domain::regime::RegimeLabel;

    fn regime(label: RegimeLabel) -> MarketRegime {
        MarketRegime {
            score: 0.0,
            label,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn blends_cagr_and_score_adjusted_target() {
        let r = expected_return(0.10, 0.8, 0.08, 0.5, &regime(RegimeLabel::Sideways)).unwrap();
        assert!((r - (0.7 * 0.10 + 0.3 * 0.8 * 0.08)).abs() < 1e-9);
    }

    #[test]
    fn bear_regime_dampens_the_blend() {
        let bull = expected_return(0.10, 0.8, 0.08, 0.5, &regime(RegimeLabel::Bull)).unwrap();
        let bear = expected_return(0.10, 0.8, 0.08, 0.5, &regime(RegimeLabel::Bear)).unwrap();
        assert!(bear < bull);
    }

    #[test]
    fn below_floor_is_excluded() {
        assert!(expected_return(-0.5, 0.1, 0.08, 0.5, &regime(RegimeLabel::Bear)).is_none());
    }

    #[test]
    fn flat_returns_have_zero_volatility() {
        let returns = vec![0.001; 30];
        assert!(volatility(&returns) < 1e-9);
    }

    #[test]
    fn positive_drift_gives_positive_cagr() {
        let returns = vec![0.001; 252];
        assert!(cagr(&returns) > 0.0);
    }

    #[test]
    fn sortino_ignores_upside_swings() {
        let mut returns = vec![0.01; 100];
        returns.extend(vec![-0.001; 5]);
        let sortino = sortino_ratio(&returns);
        let sharpe = sharpe_ratio(&returns);
        assert!(sortino > sharpe);
    }

    #[test]
    fn empty_series_is_neutral() {
        assert_eq!(cagr(&[]), 0.0);
        assert_eq!(volatility(&[]), 0.0);
        assert_eq!(sharpe_ratio(&[]), 0.0);
        assert_eq!(sortino_ratio(&[]), 0.0);
    }

    #[test]
    fn covariance_of_identical_series_equals_variance() {
        let series = vec![0.01, -0.02, 0.015, 0.0, -0.005];
        let cov = covariance(&series, &series);
        let vol = volatility(&series);
        assert!((cov - vol * vol).abs() < 1e-9);
    }
}
