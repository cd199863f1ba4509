//! Concrete `Job` implementations for all eleven scheduler cadences
//! (spec.md §4.I). Each job is a thin orchestration layer: it reads
//! through the repository/adapter ports and calls into the pure
//! domain/application logic already built for scoring, planning, the
//! rebalancing controller, and the satellite lifecycle.

use crate::application::cancellation::CancellationToken;
use crate::application::execution::{Executor, GateContext};
use crate::application::market_metrics;
use crate::application::planner::{PlannerContext, PlannerFactory};
use crate::application::rebalancing_controller::{
    build_emergency_plan, has_negative_balance_trigger, routine_drift_exceeded,
};
use crate::application::satellite_controller::{bucket_value_eur, SatelliteController};
use crate::application::scheduler::{Job, JobName};
use crate::application::scoring::{ScoringEngine, SecurityMarketData};
use crate::domain::bucket::BucketState;
use crate::domain::errors::{EngineError, EngineResult, ErrorKind};
use crate::domain::ids::{BucketId, Isin};
use crate::domain::optimizer::OptimizerResult;
use crate::domain::position::Position;
use crate::domain::ports::{
    BrokerageAdapter, FxRateProvider, MarketDataAdapter, OptimizerAdapter, OptimizerRequest,
};
use crate::domain::recommendation::{compute_portfolio_hash, Recommendation};
use crate::domain::regime::MarketRegime;
use crate::domain::repositories::{
    BucketRepository, CashFlowRepository, PositionRepository, RecommendationRepository, ScoreRepository,
    SecurityRepository, SettingsRepository, TradeRepository, UnitOfWorkFactory,
};
use crate::domain::security::{Security, Tag, TagSet, TagUpdateFrequency};
use crate::domain::trade::{CashFlowKind, Side};
use crate::infrastructure::observability::{Metrics, PortfolioView};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared, cross-job state: every repository and external adapter a job
/// might need, plus two in-process caches with no dedicated repository of
/// their own.
///
/// `tag_store` and `market_data_cache` are deliberately NOT persisted:
/// `TagSet` has no field on `Security` and no repository (spec.md names no
/// tag-storage operation beyond `UpdateSpecificTags`), and the per-security
/// market snapshot computed during scoring is pure derived data the
/// planning job reuses within the same process lifetime. Losing both on
/// restart only means the next scoring tick recomputes them from scratch,
/// which every adaptive-refresh tag is due for anyway the first time a
/// fresh process sees it (`TagSet::due_for_refresh` treats "never set" as
/// due).
pub struct JobContext {
    pub settings_repo: Arc<dyn SettingsRepository>,
    pub security_repo: Arc<dyn SecurityRepository>,
    pub position_repo: Arc<dyn PositionRepository>,
    pub trade_repo: Arc<dyn TradeRepository>,
    pub cash_flow_repo: Arc<dyn CashFlowRepository>,
    pub score_repo: Arc<dyn ScoreRepository>,
    pub recommendation_repo: Arc<dyn RecommendationRepository>,
    pub bucket_repo: Arc<dyn BucketRepository>,
    pub brokerage: Arc<dyn BrokerageAdapter>,
    pub market_data: Arc<dyn MarketDataAdapter>,
    pub optimizer: Arc<dyn OptimizerAdapter>,
    pub fx: Arc<dyn FxRateProvider>,
    pub executor: Arc<Executor>,
    pub uow_factory: Arc<dyn UnitOfWorkFactory>,
    pub planners: Arc<PlannerFactory>,
    pub satellites: Arc<SatelliteController>,
    pub metrics: Metrics,
    pub portfolio: Arc<RwLock<PortfolioView>>,
    pub tag_store: RwLock<HashMap<Isin, TagSet>>,
    pub market_data_cache: RwLock<HashMap<Isin, SecurityMarketData>>,
    pub last_dividend_sync: RwLock<chrono::DateTime<Utc>>,
    /// High-water mark for `BrokerageAdapter::get_dividends`, separate from
    /// `last_dividend_sync` (which tracks how far `DividendReinvestmentJob`
    /// has processed the recorded `CashFlowEntry` rows, not how far the sync
    /// cycle has pulled from the brokerage).
    pub last_dividend_fetch: RwLock<chrono::DateTime<Utc>>,
    pub last_optimizer_result: RwLock<Option<OptimizerResult>>,
}

impl JobContext {
    async fn tags_for(&self, isin: &Isin) -> TagSet {
        self.tag_store.read().await.get(isin).cloned().unwrap_or_default()
    }

    /// Computes a regime score as the average daily return across the
    /// supplied universe's cached return series, annualized the same way
    /// `market_metrics::cagr` is. There is no dedicated market-index feed
    /// in this engine's external interfaces (spec.md §6 names only
    /// per-security quotes/history), so the investable universe itself
    /// stands in for a broad index.
    fn infer_regime(market_data: &HashMap<Isin, SecurityMarketData>) -> MarketRegime {
        if market_data.is_empty() {
            return MarketRegime::from_score(0.0, 0.0, Utc::now());
        }
        let avg_cagr = market_data.values().map(|d| d.cagr).sum::<f64>() / market_data.len() as f64;
        let avg_vol = market_data.values().map(|d| d.volatility).sum::<f64>() / market_data.len() as f64;
        MarketRegime::from_score(avg_cagr, avg_vol, Utc::now())
    }
}

async fn fetch_market_data(
    ctx: &JobContext,
    isin: &Isin,
    product_type: crate::domain::security::ProductType,
    lookback_days: u32,
    market_avg_pe: Option<f64>,
) -> EngineResult<SecurityMarketData> {
    let snapshot = ctx.market_data.get_fundamentals(isin).await?;
    let quotes = ctx.market_data.get_quotes(std::slice::from_ref(isin)).await?;
    let returns = ctx.market_data.get_historical_returns(isin, lookback_days).await?;

    let current_price = quotes.get(isin).copied().unwrap_or(Decimal::ZERO).to_f64().unwrap_or(0.0);
    let dividend_yield = snapshot.dividend_yield.unwrap_or(0.0);

    Ok(SecurityMarketData {
        isin: isin.clone(),
        product_type,
        current_price,
        week_52_high: snapshot.week_52_high.and_then(|d| d.to_f64()).unwrap_or(current_price),
        week_52_low: snapshot.week_52_low.and_then(|d| d.to_f64()).unwrap_or(current_price),
        pe_ratio: snapshot.pe_ratio,
        market_avg_pe,
        cagr: market_metrics::cagr(&returns),
        dividend_yield,
        dividend_yield_history: vec![dividend_yield],
        payout_ratio: 0.5,
        sharpe: market_metrics::sharpe_ratio(&returns),
        sortino: market_metrics::sortino_ratio(&returns),
        volatility: market_metrics::volatility(&returns),
        historical_returns: returns,
    })
}

/// Runs one scoring pass over every active security. When `tier` is
/// `Some`, only tags whose `update_frequency()` matches are written back to
/// the tag store (the adaptive-refresh jobs); `None` (the daily `Scoring`
/// job) writes every tag the engine returns. The composite score is always
/// persisted, since score recomputation itself runs on the daily cadence
/// in spec.md's schedule table regardless of which tags changed.
async fn run_scoring_pass(ctx: &JobContext, tier: Option<TagUpdateFrequency>) -> EngineResult<usize> {
    let settings = ctx.settings_repo.load().await?;
    let securities = ctx.security_repo.all_active().await?;
    let lookback_days = settings.get_f64("scoring_lookback_days").max(1.0) as u32;

    let mut fresh_market_data = HashMap::with_capacity(securities.len());
    let avg_pe = {
        let cache = ctx.market_data_cache.read().await;
        if cache.is_empty() {
            None
        } else {
            let pes: Vec<f64> = cache.values().filter_map(|d| d.pe_ratio).collect();
            if pes.is_empty() {
                None
            } else {
                Some(pes.iter().sum::<f64>() / pes.len() as f64)
            }
        }
    };

    for security in &securities {
        match fetch_market_data(ctx, &security.isin, security.product_type, lookback_days, avg_pe).await {
            Ok(data) => {
                fresh_market_data.insert(security.isin.clone(), data);
            }
            Err(err) => warn!(isin = %security.isin, error = %err, "failed to fetch market data for scoring"),
        }
    }

    let regime = JobContext::infer_regime(&fresh_market_data);
    let engine = ScoringEngine::new(&settings);
    let now = Utc::now();
    let mut scored = 0usize;

    for security in &securities {
        let Some(data) = fresh_market_data.get(&security.isin) else {
            continue;
        };
        let current_tags = ctx.tags_for(&security.isin).await;
        let (mut score, tag_diffs) = engine.score(data, &regime, &current_tags);
        score.clamp_composite();
        ctx.score_repo.upsert(&score).await?;

        let relevant: Vec<(Tag, bool)> = match tier {
            Some(tier) => tag_diffs.into_iter().filter(|(tag, _)| tag.update_frequency() == tier).collect(),
            None => tag_diffs,
        };
        if !relevant.is_empty() {
            let mut store = ctx.tag_store.write().await;
            let tags = store.entry(security.isin.clone()).or_default();
            tags.update_specific(&relevant, now);
        }
        scored += 1;
    }

    *ctx.market_data_cache.write().await = fresh_market_data;
    Ok(scored)
}

pub struct SyncCycleJob(pub Arc<JobContext>);

#[async_trait]
impl Job for SyncCycleJob {
    fn name(&self) -> JobName {
        JobName::SyncCycle
    }

    async fn run(&self) -> EngineResult<()> {
        let ctx = &self.0;

        for security in ctx.market_data.get_security_master().await? {
            ctx.security_repo.upsert(&security).await?;
        }

        for position in ctx.brokerage.get_positions().await? {
            ctx.position_repo.upsert(&position).await?;
        }

        let dividend_since = *ctx.last_dividend_fetch.read().await;
        let fetch_started_at = Utc::now();
        for dividend in ctx.brokerage.get_dividends(dividend_since).await? {
            match ctx.cash_flow_repo.record(&dividend).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::Conflict => {
                    // Already recorded on a prior cycle; `since` windows overlap by design.
                }
                Err(err) => return Err(err),
            }
        }
        *ctx.last_dividend_fetch.write().await = fetch_started_at;

        let cash = ctx.brokerage.get_cash_balances().await?;
        {
            let mut view = ctx.portfolio.write().await;
            view.positions.clear();
            for position in ctx.position_repo.all().await? {
                view.positions.insert(position.isin.as_str().to_string(), position);
            }
            let mut total_eur = Decimal::ZERO;
            for (currency, amount) in &cash {
                total_eur += *amount / ctx.fx.rate_to_eur(currency).await.unwrap_or(Decimal::ONE);
            }
            view.cash_eur = total_eur;
        }

        ctx.metrics.inc_scheduled_job("sync", "ok");
        info!("sync cycle completed");
        Ok(())
    }
}

macro_rules! tag_update_job {
    ($struct_name:ident, $job_name:expr, $tier:expr) => {
        pub struct $struct_name(pub Arc<JobContext>);

        #[async_trait]
        impl Job for $struct_name {
            fn name(&self) -> JobName {
                $job_name
            }

            async fn run(&self) -> EngineResult<()> {
                let count = run_scoring_pass(&self.0, Some($tier)).await?;
                self.0.metrics.inc_scheduled_job($job_name.lock_name(), "ok");
                info!(tier = ?$tier, securities = count, "tag update tick completed");
                Ok(())
            }
        }
    };
}

tag_update_job!(TagUpdate10MinJob, JobName::TagUpdate10Min, TagUpdateFrequency::TenMin);
tag_update_job!(TagUpdateHourlyJob, JobName::TagUpdateHourly, TagUpdateFrequency::Hourly);
tag_update_job!(TagUpdateDailyJob, JobName::TagUpdateDaily, TagUpdateFrequency::Daily);
tag_update_job!(TagUpdateWeeklyJob, JobName::TagUpdateWeekly, TagUpdateFrequency::Weekly);

pub struct ScoringJob(pub Arc<JobContext>);

#[async_trait]
impl Job for ScoringJob {
    fn name(&self) -> JobName {
        JobName::Scoring
    }

    async fn run(&self) -> EngineResult<()> {
        let count = run_scoring_pass(&self.0, None).await?;
        self.0.metrics.inc_scheduled_job("scoring", "ok");
        info!(securities = count, "daily scoring pass completed");
        Ok(())
    }
}

pub struct PlanningJob(pub Arc<JobContext>);

impl PlanningJob {
    /// Builds the optimizer request from the cached per-security market
    /// data the scoring pass last populated. Expected returns blend CAGR
    /// with the score-adjusted target return and regime dampening
    /// (spec.md §4.D); covariance comes from the cached daily-return
    /// series.
    async fn build_optimizer_result(&self, ctx: &JobContext) -> EngineResult<OptimizerResult> {
        let settings = ctx.settings_repo.load().await?;
        let target = settings.get_f64("target_annual_return");
        let threshold_pct = settings.get_f64("target_return_threshold_pct");
        let scores = ctx.score_repo.all().await?;
        let scores_map: HashMap<Isin, f64> =
            scores.into_iter().map(|s| (s.isin, s.composite)).collect();

        let cache = ctx.market_data_cache.read().await;
        let regime = JobContext::infer_regime(&cache);

        let mut expected_returns = HashMap::with_capacity(cache.len());
        for (isin, data) in cache.iter() {
            let composite_score = scores_map.get(isin).copied().unwrap_or(0.5);
            if let Some(expected) =
                market_metrics::expected_return(data.cagr, composite_score, target, threshold_pct, &regime)
            {
                expected_returns.insert(isin.clone(), expected);
            }
        }

        let mut covariance = HashMap::new();
        let entries: Vec<(&Isin, &SecurityMarketData)> =
            cache.iter().filter(|(isin, _)| expected_returns.contains_key(*isin)).collect();
        for (i, (isin_a, data_a)) in entries.iter().enumerate() {
            for (isin_b, data_b) in entries.iter().skip(i) {
                let cov = market_metrics::covariance(&data_a.historical_returns, &data_b.historical_returns);
                covariance.insert(((*isin_a).clone(), (*isin_b).clone()), cov);
                covariance.insert(((*isin_b).clone(), (*isin_a).clone()), cov);
            }
        }

        let allocation_targets = ctx
            .bucket_repo
            .get(&BucketId::from("core"))
            .await?
            .map(|b| b.allocation_targets)
            .unwrap_or_default();

        let request = OptimizerRequest {
            expected_returns,
            covariance,
            allocation_targets,
            regime,
            blend_ratio: settings.get_f64("optimizer_blend_ratio"),
        };
        ctx.optimizer.optimize(request).await
    }
}

#[async_trait]
impl Job for PlanningJob {
    fn name(&self) -> JobName {
        JobName::Planning
    }

    async fn run(&self) -> EngineResult<()> {
        let ctx = &self.0;
        let settings = Arc::new(ctx.settings_repo.load().await?);

        let positions_vec = ctx.position_repo.all().await?;
        let cash = ctx.brokerage.get_cash_balances().await?;
        let securities = ctx.security_repo.all_active().await?;
        let scores = ctx.score_repo.all().await?;

        let mut positions = HashMap::with_capacity(positions_vec.len());
        for p in positions_vec {
            positions.insert(p.isin.clone(), p);
        }
        let mut securities_map = HashMap::with_capacity(securities.len());
        for s in securities {
            securities_map.insert(s.isin.clone(), s);
        }
        let mut scores_map = HashMap::with_capacity(scores.len());
        for s in scores {
            scores_map.insert(s.isin.clone(), s);
        }

        let mut tags = HashMap::new();
        {
            let store = ctx.tag_store.read().await;
            for isin in securities_map.keys() {
                tags.insert(isin.clone(), store.get(isin).cloned().unwrap_or_default());
            }
        }

        let optimizer_result = self.build_optimizer_result(ctx).await?;
        *ctx.last_optimizer_result.write().await = Some(optimizer_result.clone());

        let rate_cache = {
            let mut rates = HashMap::new();
            for currency in cash.keys() {
                rates.insert(currency.clone(), ctx.fx.rate_to_eur(currency).await.unwrap_or(Decimal::ONE));
            }
            rates
        };
        let portfolio_value = positions.values().map(|p| p.market_value()).sum::<Decimal>()
            + cash.iter().map(|(c, a)| *a / rate_cache.get(c).copied().unwrap_or(Decimal::ONE)).sum::<Decimal>();

        let mut prices = HashMap::with_capacity(positions.len());
        for (isin, p) in &positions {
            prices.insert(isin.clone(), p.last_price);
        }

        let portfolio_hash = compute_portfolio_hash(&positions, &cash);

        let allocation_targets = ctx
            .bucket_repo
            .get(&BucketId::from("core"))
            .await?
            .map(|b| b.allocation_targets)
            .unwrap_or_default();

        let planner_ctx = PlannerContext {
            bucket_id: BucketId::from("core"),
            as_of: Utc::now(),
            positions,
            cash,
            prices,
            securities: securities_map,
            scores: scores_map,
            tags,
            optimizer_result,
            allocation_targets,
            last_buy_at: HashMap::new(),
            last_sell_at: HashMap::new(),
            position_opened_at: HashMap::new(),
            portfolio_value,
            settings: settings.clone(),
        };

        let planner = ctx.planners.default_planner(&settings);
        let worker_count = settings.get_f64("worker_count").max(1.0) as usize;
        let outcome = planner
            .plan(&planner_ctx, &portfolio_hash, worker_count, &CancellationToken::new())
            .await?;

        if let Some(recommendation) = outcome.recommendation {
            ctx.recommendation_repo.save(&recommendation).await?;
            info!(
                portfolio_hash = %portfolio_hash,
                sequences_generated = outcome.sequences_generated,
                sequences_evaluated = outcome.sequences_evaluated,
                "planning run produced a recommendation"
            );
            execute_recommendation(ctx, &recommendation).await?;
        }

        ctx.metrics.inc_scheduled_job("planning", "ok");
        Ok(())
    }
}

pub struct DividendReinvestmentJob(pub Arc<JobContext>);

#[async_trait]
impl Job for DividendReinvestmentJob {
    fn name(&self) -> JobName {
        JobName::DividendReinvestment
    }

    async fn run(&self) -> EngineResult<()> {
        let ctx = &self.0;
        let since = *ctx.last_dividend_sync.read().await;
        let entries = ctx.cash_flow_repo.since(since).await?;
        let dividends: Vec<_> = entries.into_iter().filter(|e| e.kind == CashFlowKind::Dividend).collect();

        if dividends.is_empty() {
            ctx.metrics.inc_scheduled_job("drip", "noop");
            *ctx.last_dividend_sync.write().await = Utc::now();
            return Ok(());
        }

        let settings = Arc::new(ctx.settings_repo.load().await?);
        let positions = ctx.position_repo.all().await?;
        let securities = ctx.security_repo.all_active().await?;
        let securities_by_currency: HashMap<String, Isin> =
            securities.iter().map(|s| (s.currency.clone(), s.isin.clone())).collect();

        let mut reinvested = 0usize;
        for dividend in &dividends {
            let Some(isin) = securities_by_currency.get(&dividend.currency) else {
                continue;
            };
            let Some(position) = positions.iter().find(|p| &p.isin == isin) else {
                continue;
            };
            if position.last_price.is_zero() {
                continue;
            }
            let Some(security) = securities.iter().find(|s| &s.isin == isin) else {
                continue;
            };

            let quantity = (dividend.amount / position.last_price).round_dp(4);
            if quantity.is_zero() {
                continue;
            }

            let candidate = crate::domain::action::ActionCandidate {
                side: Side::Buy,
                isin: isin.clone(),
                quantity,
                estimated_price: position.last_price,
                currency: dividend.currency.clone(),
                priority: 0.5,
                reason: "dividend reinvestment".to_string(),
                tags: vec![],
            };

            let pending = Default::default();
            let gate_ctx = GateContext {
                as_of: Utc::now(),
                market_open: true,
                bucket_id: position.bucket_id.clone(),
                security: Some(security),
                position: Some(position),
                last_buy_at: None,
                position_opened_at: None,
                pending_order_isins: &pending,
                available_cash: dividend.amount,
                symbol: Some(security.symbol.as_str()),
            };

            let mut uow = ctx.uow_factory.begin();
            match ctx
                .executor
                .execute(&candidate, format!("drip-{}", dividend.transaction_id), gate_ctx, uow.as_mut())
                .await
            {
                Ok(_) => match uow.commit().await {
                    Ok(()) => reinvested += 1,
                    Err(err) if err.kind() == ErrorKind::Conflict => {
                        // This dividend was already reinvested on a prior tick
                        // (the `since` window can overlap runs); not an error.
                    }
                    Err(err) => return Err(err),
                },
                Err(err) => warn!(isin = %isin, error = %err, "DRIP reinvestment blocked by safety gate"),
            }
        }

        let _ = settings;
        ctx.metrics.inc_scheduled_job("drip", "ok");
        *ctx.last_dividend_sync.write().await = Utc::now();
        info!(reinvested, "dividend reinvestment pass completed");
        Ok(())
    }
}

pub struct SatelliteMaintenanceJob(pub Arc<JobContext>);

#[async_trait]
impl Job for SatelliteMaintenanceJob {
    fn name(&self) -> JobName {
        JobName::SatelliteMaintenance
    }

    async fn run(&self) -> EngineResult<()> {
        let ctx = &self.0;
        let positions = ctx.position_repo.all().await?;
        let cash = ctx.brokerage.get_cash_balances().await?;
        let now = Utc::now();
        let core = BucketId::from("core");

        for bucket in ctx.bucket_repo.all().await? {
            let bucket_positions: Vec<_> =
                positions.iter().filter(|p| p.bucket_id == bucket.id).cloned().collect();
            // Brokerage cash balances are not reported per sub-account; only
            // the core bucket is credited with the portfolio's free cash.
            let empty_cash = HashMap::new();
            let bucket_cash = if bucket.id == core { &cash } else { &empty_cash };
            let result = ctx.satellites.run_maintenance(&bucket.id, &bucket_positions, bucket_cash, now).await;
            match result {
                Ok(updated) => {
                    let state_code = match updated.state {
                        BucketState::Active => 0.0,
                        BucketState::Hibernating => 1.0,
                        BucketState::CoolingDown => 2.0,
                        BucketState::CircuitBroken => 3.0,
                    };
                    ctx.metrics.set_bucket_state(bucket.id.as_str(), state_code);
                }
                Err(err) => warn!(bucket = %bucket.id, error = %err, "satellite maintenance failed"),
            }
        }

        ctx.metrics.inc_scheduled_job("sat_maint", "ok");
        Ok(())
    }
}

pub struct SatelliteReconciliationJob(pub Arc<JobContext>);

#[async_trait]
impl Job for SatelliteReconciliationJob {
    fn name(&self) -> JobName {
        JobName::SatelliteReconciliation
    }

    async fn run(&self) -> EngineResult<()> {
        let ctx = &self.0;
        let positions = ctx.position_repo.all().await?;
        let cash = ctx.brokerage.get_cash_balances().await?;
        let core = BucketId::from("core");

        for bucket in ctx.bucket_repo.all().await? {
            let bucket_positions: Vec<_> =
                positions.iter().filter(|p| p.bucket_id == bucket.id).cloned().collect();
            let empty_cash = HashMap::new();
            let bucket_cash = if bucket.id == core { &cash } else { &empty_cash };
            let locally_tracked = bucket_value_eur(&bucket_positions, bucket_cash, ctx.fx.as_ref()).await?;

            let mut brokerage_reported = Decimal::ZERO;
            for (currency, amount) in bucket_cash.iter() {
                brokerage_reported += *amount / ctx.fx.rate_to_eur(currency).await.unwrap_or(Decimal::ONE);
            }
            for position in &bucket_positions {
                brokerage_reported += position.market_value()
                    / ctx.fx.rate_to_eur(&position.currency).await.unwrap_or(Decimal::ONE);
            }

            match ctx.satellites.reconcile(&bucket.id, locally_tracked, brokerage_reported).await {
                Ok(outcome) => info!(bucket = %bucket.id, ?outcome, "satellite reconciliation completed"),
                Err(err) => warn!(bucket = %bucket.id, error = %err, "satellite reconciliation failed"),
            }
        }

        ctx.metrics.inc_scheduled_job("sat_recon", "ok");
        Ok(())
    }
}

pub struct HealthCheckJob(pub Arc<JobContext>);

#[async_trait]
impl Job for HealthCheckJob {
    fn name(&self) -> JobName {
        JobName::HealthCheck
    }

    async fn run(&self) -> EngineResult<()> {
        let ctx = &self.0;
        match ctx.brokerage.get_cash_balances().await {
            Ok(_) => {
                ctx.metrics.inc_scheduled_job("health", "ok");
                Ok(())
            }
            Err(err) => {
                ctx.metrics.inc_scheduled_job("health", "failed");
                Err(EngineError::unavailable(format!("health check failed: {err}")))
            }
        }
    }
}

/// Runs every action in `recommendation.sequence` through the safety gate
/// and, in live mode, the brokerage — then marks the recommendation
/// executed so a second call with the same portfolio_hash is a no-op
/// (spec.md §8: `Execute(plan); Execute(plan)` is idempotent). Research
/// mode still marks the recommendation executed once the gate passes for
/// every action, since nothing further will ever happen to it.
async fn execute_recommendation(ctx: &JobContext, recommendation: &Recommendation) -> EngineResult<()> {
    if let Some(existing) = ctx.recommendation_repo.latest_for(&recommendation.portfolio_hash).await? {
        if existing.executed && existing.sequence_id() == recommendation.sequence_id() {
            return Ok(());
        }
    }

    let positions = ctx.position_repo.all().await?;
    let positions_by_isin: HashMap<Isin, Position> = positions.into_iter().map(|p| (p.isin.clone(), p)).collect();
    let securities = ctx.security_repo.all_active().await?;
    let securities_map: HashMap<Isin, Security> = securities.into_iter().map(|s| (s.isin.clone(), s)).collect();
    let cash = ctx.brokerage.get_cash_balances().await?;
    let pending_order_isins = HashSet::new();

    let mut uow = ctx.uow_factory.begin();
    for candidate in &recommendation.sequence.actions {
        let position = positions_by_isin.get(&candidate.isin);
        let security = securities_map.get(&candidate.isin);
        let bucket_id = position.map(|p| p.bucket_id.clone()).unwrap_or_else(|| BucketId::from("core"));
        let available_cash = cash.get(&candidate.currency).copied().unwrap_or(Decimal::ZERO);
        let gate_ctx = GateContext {
            as_of: Utc::now(),
            market_open: true,
            bucket_id,
            security,
            position,
            last_buy_at: None,
            position_opened_at: None,
            pending_order_isins: &pending_order_isins,
            available_cash,
            symbol: security.map(|s| s.symbol.as_str()),
        };
        ctx.executor
            .execute(
                candidate,
                format!("plan-{}-{}", recommendation.sequence_id(), candidate.isin),
                gate_ctx,
                uow.as_mut(),
            )
            .await?;
    }
    uow.commit().await?;

    ctx.recommendation_repo
        .mark_executed(&recommendation.portfolio_hash, &recommendation.sequence_id())
        .await?;
    Ok(())
}

/// Emergency and routine rebalancing check, run opportunistically from the
/// same process (not itself one of the eleven cadenced jobs — spec.md
/// §4.G describes it as triggered by the negative-balance/drift
/// conditions, which the sync and planning jobs are best placed to
/// observe). Exposed so `server.rs` can call it after each sync tick.
pub async fn check_rebalance_triggers(ctx: &JobContext) -> EngineResult<Option<Recommendation>> {
    let settings = ctx.settings_repo.load().await?;
    let cash = ctx.brokerage.get_cash_balances().await?;
    let mut rates = HashMap::new();
    for currency in cash.keys() {
        rates.insert(currency.clone(), ctx.fx.rate_to_eur(currency).await.unwrap_or(Decimal::ONE));
    }

    let min_reserve = Decimal::try_from(settings.get_f64("emergency_min_reserve_eur")).unwrap_or(Decimal::ZERO);
    if !has_negative_balance_trigger(&cash, &rates, min_reserve) {
        return Ok(None);
    }

    let positions = ctx.position_repo.all().await?;
    let securities = ctx.security_repo.all_active().await?;
    let securities_map: HashMap<Isin, _> = securities.into_iter().map(|s| (s.isin.clone(), s)).collect();

    let plan = build_emergency_plan(&cash, &positions, &securities_map, &HashMap::new(), &rates, &settings, Utc::now(), true);
    if plan.is_empty() {
        return Ok(None);
    }

    // FX legs have no corresponding brokerage port (spec.md §6 names no FX
    // conversion operation) so they're surfaced as a log line for manual or
    // brokerage-side execution; only the forced sells run through the
    // executor's safety gate as part of the recommendation sequence.
    if !plan.fx_legs.is_empty() {
        warn!(legs = ?plan.fx_legs, "emergency plan includes FX legs with no automated execution path");
    }

    let sequence = crate::domain::action::ActionSequence::new(plan.forced_sells);
    let recommendation = Recommendation {
        portfolio_hash: crate::domain::recommendation::EMERGENCY_PORTFOLIO_HASH.to_string(),
        sequence: sequence.clone(),
        evaluation: crate::domain::evaluation::EvaluationResult {
            end_state_score: 0.0,
            sub_scores: Default::default(),
            transaction_cost: Decimal::ZERO,
            cash_feasible: true,
            portfolio_hash: crate::domain::recommendation::EMERGENCY_PORTFOLIO_HASH.to_string(),
            sequence_hash: sequence.sequence_hash(),
        },
        created_at: Utc::now(),
        executed: false,
    };
    ctx.recommendation_repo.save(&recommendation).await?;
    ctx.metrics.inc_emergency_trigger("negative_balance");
    warn!("emergency negative-balance recommendation created");
    execute_recommendation(ctx, &recommendation).await?;
    Ok(Some(recommendation))
}

/// Routine drift check, separate from the emergency path: compares current
/// weights against the last optimizer result cached during planning.
pub async fn check_routine_drift(ctx: &JobContext) -> EngineResult<bool> {
    let settings = ctx.settings_repo.load().await?;
    let drift_threshold = settings.get_f64("drift_threshold");

    let positions = ctx.position_repo.all().await?;
    let total_value: Decimal = positions.iter().map(|p| p.market_value()).sum();
    if total_value.is_zero() {
        return Ok(false);
    }

    let current_weights: HashMap<Isin, f64> = positions
        .iter()
        .map(|p| (p.isin.clone(), (p.market_value() / total_value).to_f64().unwrap_or(0.0)))
        .collect();

    let target_weights = match &*ctx.last_optimizer_result.read().await {
        Some(result) => result.weights.clone(),
        None => return Ok(false),
    };

    let exceeded = routine_drift_exceeded(&current_weights, &target_weights, drift_threshold);
    if exceeded {
        ctx.metrics.set_bucket_state("core", 4.0);
    }
    Ok(exceeded)
}

/// Generates a stable-enough client order id for one-off manual or DRIP
/// submissions that don't otherwise have a natural idempotency key.
pub fn new_client_order_id() -> String {
    Uuid::new_v4().to_string()
}
