//! Rebalancer engine server - headless, no UI, no incoming HTTP
//! connections. Drives all eleven scheduled jobs plus the opportunistic
//! negative-balance/drift checks, and pushes metrics as structured JSON
//! logs to stdout.
//!
//! # Usage
//! ```sh
//! TRADING_MODE=research cargo run --bin rebalancer-server
//! ```
//!
//! See `config::EngineConfig` for the full list of environment variables.

use anyhow::Result;
use rebalancer_engine::application::cancellation::CancellationToken;
use rebalancer_engine::application::evaluator::Evaluator;
use rebalancer_engine::application::execution::Executor;
use rebalancer_engine::application::jobs::{
    check_rebalance_triggers, check_routine_drift, DividendReinvestmentJob, HealthCheckJob, JobContext,
    PlanningJob, SatelliteMaintenanceJob, SatelliteReconciliationJob, ScoringJob, SyncCycleJob,
    TagUpdate10MinJob, TagUpdateDailyJob, TagUpdateHourlyJob, TagUpdateWeeklyJob,
};
use rebalancer_engine::application::planner::PlannerFactory;
use rebalancer_engine::application::satellite_controller::SatelliteController;
use rebalancer_engine::application::scheduler::{Job, Scheduler};
use rebalancer_engine::config::EngineConfig;
use rebalancer_engine::domain::ports::{
    BrokerageAdapter, EvaluatorAdapter, FxRateProvider, MarketDataAdapter, OptimizerAdapter,
};
use rebalancer_engine::domain::repositories::{
    BucketRepository, CashFlowRepository, PositionRepository, RecommendationRepository, ScoreRepository,
    SecurityRepository, SettingsRepository, TradeRepository, UnitOfWorkFactory,
};
use rebalancer_engine::infrastructure::brokerage::CanonicalBrokerageClient;
use rebalancer_engine::infrastructure::evaluator_adapter::HttpEvaluatorClient;
use rebalancer_engine::infrastructure::fx::RestFxRateProvider;
use rebalancer_engine::infrastructure::http_client_factory::HttpClientFactory;
use rebalancer_engine::infrastructure::market_data::RestMarketDataClient;
use rebalancer_engine::infrastructure::observability::{Metrics, MetricsReporter, PortfolioView};
use rebalancer_engine::infrastructure::optimizer_adapter::HttpOptimizerClient;
use rebalancer_engine::infrastructure::{InMemoryStore, SqliteLedger, SqliteUnitOfWorkFactory};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn, Level};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::from_env()?;

    let log_level: Level = config.log_level.parse().unwrap_or(Level::INFO);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("rebalancer engine {} starting", env!("CARGO_PKG_VERSION"));
    info!(mode = ?config.trading_mode, "configuration loaded");

    let http = HttpClientFactory::create_client_with(config.http_timeout_secs, config.http_max_retries);

    let store = InMemoryStore::new();
    let ledger = SqliteLedger::new(&config.database_url).await?;

    let settings_repo: Arc<dyn SettingsRepository> = Arc::new(store.clone());
    let security_repo: Arc<dyn SecurityRepository> = Arc::new(store.clone());
    let position_repo: Arc<dyn PositionRepository> = Arc::new(store.clone());
    let score_repo: Arc<dyn ScoreRepository> = Arc::new(store.clone());
    let recommendation_repo: Arc<dyn RecommendationRepository> = Arc::new(store.clone());
    let bucket_repo: Arc<dyn BucketRepository> = Arc::new(store.clone());
    let trade_repo: Arc<dyn TradeRepository> = Arc::new(ledger.clone());
    let cash_flow_repo: Arc<dyn CashFlowRepository> = Arc::new(ledger.clone());
    let uow_factory: Arc<dyn UnitOfWorkFactory> =
        Arc::new(SqliteUnitOfWorkFactory::new(ledger.clone(), position_repo.clone()));

    let settings = Arc::new(settings_repo.load().await?);

    let brokerage: Arc<dyn BrokerageAdapter> = Arc::new(CanonicalBrokerageClient::new(
        http.clone(),
        config.brokerage.base_url.clone(),
        config.brokerage.api_key.clone(),
        config.brokerage.api_secret.clone(),
    ));
    let market_data: Arc<dyn MarketDataAdapter> =
        Arc::new(RestMarketDataClient::new(http.clone(), config.market_data_base_url.clone()));
    let optimizer: Arc<dyn OptimizerAdapter> =
        Arc::new(HttpOptimizerClient::new(http.clone(), config.optimizer_base_url.clone()));
    let fx: Arc<dyn FxRateProvider> = Arc::new(RestFxRateProvider::new(http.clone(), config.fx_base_url.clone()));

    let evaluator: Arc<dyn EvaluatorAdapter> = match &config.evaluator_base_url {
        Some(base_url) => Arc::new(HttpEvaluatorClient::new(http.clone(), base_url.clone())),
        None => Arc::new(Evaluator::new(settings.clone())),
    };

    let executor = Arc::new(Executor::new(brokerage.clone(), settings.clone()));
    let planners = Arc::new(PlannerFactory::new(evaluator.clone()));
    let satellites = Arc::new(SatelliteController::new(
        settings.clone(),
        bucket_repo.clone(),
        fx.clone(),
        PlannerFactory::new(evaluator.clone()),
    ));

    let metrics = Metrics::new()?;
    let portfolio = Arc::new(RwLock::new(PortfolioView::default()));

    let ctx = Arc::new(JobContext {
        settings_repo,
        security_repo,
        position_repo,
        trade_repo,
        cash_flow_repo,
        score_repo,
        recommendation_repo,
        bucket_repo,
        brokerage,
        market_data,
        optimizer,
        fx,
        executor,
        uow_factory,
        planners,
        satellites,
        metrics: metrics.clone(),
        portfolio: portfolio.clone(),
        tag_store: RwLock::new(HashMap::new()),
        market_data_cache: RwLock::new(HashMap::new()),
        last_dividend_sync: RwLock::new(chrono::Utc::now()),
        last_dividend_fetch: RwLock::new(chrono::Utc::now()),
        last_optimizer_result: RwLock::new(None),
    });

    let jobs: Vec<Arc<dyn Job>> = vec![
        Arc::new(SyncCycleJob(ctx.clone())),
        Arc::new(TagUpdate10MinJob(ctx.clone())),
        Arc::new(TagUpdateHourlyJob(ctx.clone())),
        Arc::new(TagUpdateDailyJob(ctx.clone())),
        Arc::new(TagUpdateWeeklyJob(ctx.clone())),
        Arc::new(ScoringJob(ctx.clone())),
        Arc::new(PlanningJob(ctx.clone())),
        Arc::new(DividendReinvestmentJob(ctx.clone())),
        Arc::new(SatelliteMaintenanceJob(ctx.clone())),
        Arc::new(SatelliteReconciliationJob(ctx.clone())),
        Arc::new(HealthCheckJob(ctx.clone())),
    ];
    let scheduler = Arc::new(Scheduler::new(jobs));

    let cancellation = CancellationToken::new();

    let scheduler_handle = {
        let scheduler = scheduler.clone();
        let cancellation = cancellation.clone();
        tokio::spawn(async move { scheduler.run(cancellation).await })
    };

    // Opportunistic emergency/drift checks: not one of the eleven named
    // jobs (spec.md §4.G frames both as condition-triggered), so they run
    // on their own short interval instead of through the named-lock
    // scheduler.
    let trigger_handle = {
        let ctx = ctx.clone();
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = check_rebalance_triggers(&ctx).await {
                            warn!(error = %err, "rebalance trigger check failed");
                        }
                        match check_routine_drift(&ctx).await {
                            Ok(true) => info!("routine drift threshold exceeded"),
                            Ok(false) => {}
                            Err(err) => warn!(error = %err, "routine drift check failed"),
                        }
                    }
                    _ = cancellation.cancelled() => break,
                }
            }
        })
    };

    if config.metrics_interval_secs > 0 {
        let reporter = MetricsReporter::new(portfolio.clone(), metrics, config.metrics_interval_secs);
        tokio::spawn(async move { reporter.run().await });
        info!(interval = config.metrics_interval_secs, "metrics reporter started");
    }

    info!("engine running, press ctrl+c to shut down");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    cancellation.cancel();

    let _ = scheduler_handle.await;
    let _ = trigger_handle.await;
    info!("shutdown complete");
    Ok(())
}
