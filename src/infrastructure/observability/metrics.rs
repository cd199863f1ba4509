//! Prometheus metric definitions for the rebalancing engine.
//!
//! All metrics use the `rebalancer_` prefix and are read-only from the
//! engine's perspective — nothing in this module scrapes or serves; it
//! only registers gauges/counters that `reporter.rs` pushes and that an
//! operator's Prometheus Pushgateway or `/metrics` endpoint can expose.

use prometheus::{
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Total portfolio value in EUR.
    pub portfolio_value_eur: GenericGauge<AtomicF64>,
    /// Available cash in EUR, summed across currencies via FX.
    pub portfolio_cash_eur: GenericGauge<AtomicF64>,
    pub positions_count: GenericGauge<AtomicF64>,
    pub position_value_eur: GenericGaugeVec<AtomicF64>,
    /// Total absolute drift of current weights vs optimizer targets.
    pub drift_total: GenericGauge<AtomicF64>,
    /// Orders placed, by side and outcome (executed/recorded_only/rejected).
    pub orders_total: CounterVec,
    /// Satellite bucket state, one gauge per bucket (0=ACTIVE, 1=HIBERNATING, 2=COOLING_DOWN, 3=CIRCUIT_BROKEN).
    pub bucket_state: GenericGaugeVec<AtomicF64>,
    /// Scheduled job runs, by job name and outcome.
    pub scheduled_jobs_total: CounterVec,
    /// Scheduled job lock contention, by job name.
    pub scheduled_job_skipped_total: CounterVec,
    pub uptime_seconds: GenericGauge<AtomicF64>,
    /// External adapter call latency, by adapter and endpoint.
    pub adapter_latency_seconds: HistogramVec,
    /// Emergency rebalancing triggers, by kind (negative_balance/drift).
    pub emergency_triggers_total: CounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let portfolio_value_eur = Gauge::with_opts(Opts::new(
            "rebalancer_portfolio_value_eur",
            "Total portfolio value in EUR",
        ))?;
        registry.register(Box::new(portfolio_value_eur.clone()))?;

        let portfolio_cash_eur = Gauge::with_opts(Opts::new(
            "rebalancer_portfolio_cash_eur",
            "Available cash in EUR",
        ))?;
        registry.register(Box::new(portfolio_cash_eur.clone()))?;

        let positions_count = Gauge::with_opts(Opts::new(
            "rebalancer_positions_count",
            "Number of open positions",
        ))?;
        registry.register(Box::new(positions_count.clone()))?;

        let position_value_eur = GaugeVec::new(
            Opts::new("rebalancer_position_value_eur", "Position value per ISIN in EUR"),
            &["isin"],
        )?;
        registry.register(Box::new(position_value_eur.clone()))?;

        let drift_total = Gauge::with_opts(Opts::new(
            "rebalancer_drift_total",
            "Total absolute deviation of current weights from optimizer targets",
        ))?;
        registry.register(Box::new(drift_total.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("rebalancer_orders_total", "Total orders by side and outcome"),
            &["side", "outcome"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let bucket_state = GaugeVec::new(
            Opts::new("rebalancer_bucket_state", "Satellite bucket state by bucket id"),
            &["bucket_id"],
        )?;
        registry.register(Box::new(bucket_state.clone()))?;

        let scheduled_jobs_total = CounterVec::new(
            Opts::new("rebalancer_scheduled_jobs_total", "Scheduled job runs by job and outcome"),
            &["job", "outcome"],
        )?;
        registry.register(Box::new(scheduled_jobs_total.clone()))?;

        let scheduled_job_skipped_total = CounterVec::new(
            Opts::new(
                "rebalancer_scheduled_job_skipped_total",
                "Scheduled job runs skipped due to lock contention",
            ),
            &["job"],
        )?;
        registry.register(Box::new(scheduled_job_skipped_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "rebalancer_uptime_seconds",
            "Server uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let adapter_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "rebalancer_adapter_latency_seconds",
                "External adapter call latency in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["adapter", "endpoint"],
        )?;
        registry.register(Box::new(adapter_latency_seconds.clone()))?;

        let emergency_triggers_total = CounterVec::new(
            Opts::new(
                "rebalancer_emergency_triggers_total",
                "Emergency rebalancing triggers by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(emergency_triggers_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            portfolio_value_eur,
            portfolio_cash_eur,
            positions_count,
            position_value_eur,
            drift_total,
            orders_total,
            bucket_state,
            scheduled_jobs_total,
            scheduled_job_skipped_total,
            uptime_seconds,
            adapter_latency_seconds,
            emergency_triggers_total,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn set_position_value(&self, isin: &str, value_eur: f64) {
        self.position_value_eur.with_label_values(&[isin]).set(value_eur);
    }

    pub fn inc_orders(&self, side: &str, outcome: &str) {
        self.orders_total.with_label_values(&[side, outcome]).inc();
    }

    pub fn set_bucket_state(&self, bucket_id: &str, state_code: f64) {
        self.bucket_state.with_label_values(&[bucket_id]).set(state_code);
    }

    pub fn inc_scheduled_job(&self, job: &str, outcome: &str) {
        self.scheduled_jobs_total.with_label_values(&[job, outcome]).inc();
    }

    pub fn inc_scheduled_job_skipped(&self, job: &str) {
        self.scheduled_job_skipped_total.with_label_values(&[job]).inc();
    }

    pub fn observe_adapter_latency(&self, adapter: &str, endpoint: &str, latency: f64) {
        self.adapter_latency_seconds
            .with_label_values(&[adapter, endpoint])
            .observe(latency);
    }

    pub fn inc_emergency_trigger(&self, kind: &str) {
        self.emergency_triggers_total.with_label_values(&[kind]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to build default Metrics registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_creation_registers_the_prefix() {
        let metrics = Metrics::new().expect("failed to create metrics");
        assert!(metrics.render().contains("rebalancer_"));
    }

    #[test]
    fn portfolio_value_round_trips_through_render() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.portfolio_value_eur.set(50000.0);
        let output = metrics.render();
        assert!(output.contains("rebalancer_portfolio_value_eur 50000"));
    }

    #[test]
    fn position_value_is_labeled_per_isin() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.set_position_value("DE0000000001", 10000.0);
        metrics.set_position_value("US0000000002", 8000.0);
        let output = metrics.render();
        assert!(output.contains("rebalancer_position_value_eur"));
        assert!(output.contains("DE0000000001"));
        assert!(output.contains("US0000000002"));
    }

    #[test]
    fn order_counter_increments() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.inc_orders("buy", "executed");
        metrics.inc_orders("sell", "rejected");
        let output = metrics.render();
        assert!(output.contains("rebalancer_orders_total"));
    }
}
