//! One-shot planning run: sync, score, and plan once against whatever
//! state the configured store already holds, then print the resulting
//! recommendation (if any) as JSON and exit. Useful for manual
//! invocation and for exercising the planning pipeline outside the
//! scheduler loop.
//!
//! # Usage
//! ```sh
//! planrun --skip-sync --skip-scoring
//! ```

use anyhow::Result;
use clap::Parser;
use rebalancer_engine::application::evaluator::Evaluator;
use rebalancer_engine::application::execution::Executor;
use rebalancer_engine::application::jobs::{JobContext, PlanningJob, ScoringJob, SyncCycleJob};
use rebalancer_engine::application::planner::PlannerFactory;
use rebalancer_engine::application::satellite_controller::SatelliteController;
use rebalancer_engine::application::scheduler::Job;
use rebalancer_engine::config::EngineConfig;
use rebalancer_engine::domain::ports::{
    BrokerageAdapter, EvaluatorAdapter, FxRateProvider, MarketDataAdapter, OptimizerAdapter,
};
use rebalancer_engine::domain::recommendation::compute_portfolio_hash;
use rebalancer_engine::domain::repositories::{
    BucketRepository, CashFlowRepository, PositionRepository, RecommendationRepository, ScoreRepository,
    SecurityRepository, SettingsRepository, TradeRepository, UnitOfWorkFactory,
};
use rebalancer_engine::infrastructure::brokerage::CanonicalBrokerageClient;
use rebalancer_engine::infrastructure::evaluator_adapter::HttpEvaluatorClient;
use rebalancer_engine::infrastructure::fx::RestFxRateProvider;
use rebalancer_engine::infrastructure::http_client_factory::HttpClientFactory;
use rebalancer_engine::infrastructure::market_data::RestMarketDataClient;
use rebalancer_engine::infrastructure::observability::{Metrics, PortfolioView};
use rebalancer_engine::infrastructure::optimizer_adapter::HttpOptimizerClient;
use rebalancer_engine::infrastructure::{InMemoryStore, SqliteLedger, SqliteUnitOfWorkFactory};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Run one planning cycle and print the recommendation", long_about = None)]
struct Cli {
    /// Skip the sync-cycle step and plan against the store's existing positions/securities.
    #[arg(long)]
    skip_sync: bool,

    /// Skip the scoring step and plan against the store's existing scores/tags.
    #[arg(long)]
    skip_scoring: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
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

    let ctx = Arc::new(JobContext {
        settings_repo,
        security_repo,
        position_repo: position_repo.clone(),
        trade_repo,
        cash_flow_repo,
        score_repo,
        recommendation_repo: recommendation_repo.clone(),
        bucket_repo,
        brokerage: brokerage.clone(),
        market_data,
        optimizer,
        fx,
        executor,
        uow_factory,
        planners,
        satellites,
        metrics: Metrics::new()?,
        portfolio: Arc::new(RwLock::new(PortfolioView::default())),
        tag_store: RwLock::new(HashMap::new()),
        market_data_cache: RwLock::new(HashMap::new()),
        last_dividend_sync: RwLock::new(chrono::Utc::now()),
        last_dividend_fetch: RwLock::new(chrono::Utc::now()),
        last_optimizer_result: RwLock::new(None),
    });

    if !cli.skip_sync {
        info!("running sync cycle");
        SyncCycleJob(ctx.clone()).run().await?;
    }
    if !cli.skip_scoring {
        info!("running scoring pass");
        ScoringJob(ctx.clone()).run().await?;
    }
    info!("running planning pass");
    PlanningJob(ctx.clone()).run().await?;

    let positions = position_repo.all().await?;
    let cash = brokerage.get_cash_balances().await?;
    let positions_by_isin = positions.into_iter().map(|p| (p.isin.clone(), p)).collect();
    let portfolio_hash = compute_portfolio_hash(&positions_by_isin, &cash);

    match recommendation_repo.latest_for(&portfolio_hash).await? {
        Some(recommendation) => {
            println!("{}", serde_json::to_string_pretty(&recommendation)?);
        }
        None => {
            info!(portfolio_hash = %portfolio_hash, "no recommendation produced for this portfolio state");
        }
    }

    Ok(())
}
