//! Push-based metrics reporter: periodically renders a JSON snapshot of
//! positions and cash to stdout (for Loki/Fluentd/CloudWatch ingestion)
//! and updates the Prometheus gauges in `metrics.rs`. No HTTP server, no
//! incoming requests — this module only sends data.

use crate::domain::position::Position;
use crate::infrastructure::observability::metrics::Metrics;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub portfolio: PortfolioSnapshot,
}

#[derive(Serialize)]
pub struct PortfolioSnapshot {
    pub cash_eur: f64,
    pub total_value_eur: f64,
    pub positions_count: usize,
    pub positions: Vec<PositionSnapshot>,
}

#[derive(Serialize)]
pub struct PositionSnapshot {
    pub isin: String,
    pub quantity: f64,
    pub average_cost: f64,
    pub current_value: f64,
}

/// Shared view the reporter reads each tick: positions keyed by ISIN and
/// cash balances already converted to EUR by the caller.
#[derive(Default)]
pub struct PortfolioView {
    pub positions: HashMap<String, Position>,
    pub cash_eur: Decimal,
}

pub struct MetricsReporter {
    portfolio: Arc<RwLock<PortfolioView>>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(portfolio: Arc<RwLock<PortfolioView>>, metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            portfolio,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    pub async fn run(self) {
        info!(interval = ?self.interval, "metrics reporter starting");

        loop {
            tokio::time::sleep(self.interval).await;

            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("METRICS_JSON:{json}");
                        info!(
                            total_value_eur = snapshot.portfolio.total_value_eur,
                            positions = snapshot.portfolio.positions_count,
                            uptime_seconds = snapshot.uptime_seconds,
                            "metrics snapshot"
                        );
                    }
                    Err(e) => warn!(error = %e, "failed to serialize metrics snapshot"),
                },
                Err(e) => warn!(error = %e, "failed to collect metrics snapshot"),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let portfolio = self.portfolio.read().await;
        let uptime = self.start_time.elapsed().as_secs();

        let cash = portfolio.cash_eur.to_f64().unwrap_or(0.0);
        let positions_value: f64 = portfolio.positions.values().map(|p| p.market_value().to_f64().unwrap_or(0.0)).sum();

        let positions: Vec<PositionSnapshot> = portfolio
            .positions
            .values()
            .map(|p| PositionSnapshot {
                isin: p.isin.as_str().to_string(),
                quantity: p.quantity.to_f64().unwrap_or(0.0),
                average_cost: p.average_cost.to_f64().unwrap_or(0.0),
                current_value: p.market_value().to_f64().unwrap_or(0.0),
            })
            .collect();

        self.metrics.portfolio_cash_eur.set(cash);
        self.metrics.portfolio_value_eur.set(cash + positions_value);
        self.metrics.positions_count.set(portfolio.positions.len() as f64);
        self.metrics.uptime_seconds.set(uptime as f64);
        for position in positions.iter() {
            self.metrics.set_position_value(&position.isin, position.current_value);
        }

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            portfolio: PortfolioSnapshot {
                cash_eur: cash,
                total_value_eur: cash + positions_value,
                positions_count: portfolio.positions.len(),
                positions,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_an_empty_snapshot() {
        let portfolio = Arc::new(RwLock::new(PortfolioView::default()));
        let metrics = Metrics::new().expect("failed to create metrics");
        let reporter = MetricsReporter::new(portfolio, metrics, 60);

        let snapshot = reporter.collect_snapshot().await.expect("failed to collect snapshot");
        assert_eq!(snapshot.portfolio.positions_count, 0);
        assert!(!snapshot.timestamp.is_empty());
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let snapshot = MetricsSnapshot {
            timestamp: "2026-01-10T10:00:00Z".to_string(),
            uptime_seconds: 3600,
            version: "0.1.0".to_string(),
            portfolio: PortfolioSnapshot {
                cash_eur: 50000.0,
                total_value_eur: 75000.0,
                positions_count: 1,
                positions: vec![PositionSnapshot {
                    isin: "DE0000000001".to_string(),
                    quantity: 100.0,
                    average_cost: 150.0,
                    current_value: 15000.0,
                }],
            },
        };

        let json = serde_json::to_string(&snapshot).expect("failed to serialize snapshot");
        assert!(json.contains("DE0000000001"));
        assert!(json.contains("50000"));
    }
}
