//! End-to-end scenario coverage exercising the planner, evaluator,
//! emergency-fx workflow, trade dedup, and bucket lifecycle together,
//! through the same public API the scheduler jobs use rather than through
//! the jobs themselves (which need a live brokerage/market-data adapter).

use async_trait::async_trait;
use chrono::Utc;
use rebalancer_engine::application::cancellation::CancellationToken;
use rebalancer_engine::application::evaluator::Evaluator;
use rebalancer_engine::application::execution::{Executor, ExecutionOutcome, GateContext};
use rebalancer_engine::application::planner::{Planner, PlannerConfig, PlannerContext};
use rebalancer_engine::application::rebalancing_controller::build_emergency_plan;
use rebalancer_engine::application::satellite_controller::SatelliteController;
use rebalancer_engine::application::planner::PlannerFactory;
use rebalancer_engine::domain::allocation::AllocationTargets;
use rebalancer_engine::domain::bucket::{Bucket, BucketState};
use rebalancer_engine::domain::errors::EngineResult;
use rebalancer_engine::domain::ids::{BucketId, Isin, OrderId};
use rebalancer_engine::domain::optimizer::OptimizerResult;
use rebalancer_engine::domain::ports::{BrokerageAdapter, FxRateProvider, OrderAck, PendingOrder};
use rebalancer_engine::domain::position::Position;
use rebalancer_engine::domain::regime::MarketRegime;
use rebalancer_engine::domain::repositories::{BucketRepository, TradeRepository};
use rebalancer_engine::domain::score::{SecurityScore, SubScores};
use rebalancer_engine::domain::security::{ProductType, Security, Tag, TagSet};
use rebalancer_engine::domain::settings::{SettingValue, Settings};
use rebalancer_engine::domain::trade::{Side, Trade};
use rebalancer_engine::infrastructure::InMemoryStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

fn isin(s: &str) -> Isin {
    Isin::from(s)
}

fn flat_score(isin: Isin, composite: f64) -> SecurityScore {
    SecurityScore {
        isin,
        composite,
        sub_scores: SubScores::default(),
        computed_at: Utc::now(),
    }
}

fn regime() -> MarketRegime {
    MarketRegime::from_score(0.0, 0.1, Utc::now())
}

fn base_ctx(settings: Arc<Settings>) -> PlannerContext {
    PlannerContext {
        bucket_id: BucketId::from("core"),
        as_of: Utc::now(),
        positions: HashMap::new(),
        cash: HashMap::new(),
        prices: HashMap::new(),
        securities: HashMap::new(),
        scores: HashMap::new(),
        tags: HashMap::new(),
        optimizer_result: OptimizerResult {
            weights: HashMap::new(),
            computed_at: Utc::now(),
            regime_snapshot: regime(),
            blend_ratio: 0.5,
        },
        allocation_targets: AllocationTargets::new(),
        last_buy_at: HashMap::new(),
        last_sell_at: HashMap::new(),
        position_opened_at: HashMap::new(),
        portfolio_value: Decimal::ZERO,
        settings,
    }
}

// --- S1: simple rebalance, research mode -----------------------------

#[tokio::test]
async fn s1_simple_rebalance_produces_a_sell_aaa_buy_bbb_recommendation() {
    let settings = Arc::new(Settings::with_defaults());

    let aaa = isin("AAA0000000");
    let bbb = isin("BBB0000000");

    let mut ctx = base_ctx(settings.clone());
    ctx.positions.insert(
        aaa.clone(),
        Position {
            isin: aaa.clone(),
            bucket_id: BucketId::from("core"),
            quantity: dec!(100),
            average_cost: dec!(100),
            last_price: dec!(100),
            currency: "EUR".to_string(),
            as_of: Utc::now(),
        },
    );
    ctx.prices.insert(aaa.clone(), dec!(100));
    ctx.prices.insert(bbb.clone(), dec!(100));
    ctx.securities.insert(aaa.clone(), Security::new(aaa.clone(), "AAA", ProductType::Equity));
    ctx.securities.insert(bbb.clone(), Security::new(bbb.clone(), "BBB", ProductType::Equity));
    ctx.scores.insert(aaa.clone(), flat_score(aaa.clone(), 0.6));
    ctx.scores.insert(bbb.clone(), flat_score(bbb.clone(), 0.6));
    ctx.optimizer_result.weights.insert(aaa.clone(), 0.6);
    ctx.optimizer_result.weights.insert(bbb.clone(), 0.4);
    ctx.portfolio_value = dec!(10000);

    let evaluator = Arc::new(Evaluator::new(settings.clone()));
    let planner = Planner::new(PlannerConfig::from_settings(&settings), evaluator);

    let outcome = planner
        .plan(&ctx, "portfolio-s1", 4, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.sequences_generated > 0, "expected at least one candidate sequence");
    let recommendation = outcome.recommendation.expect("expected a recommendation for an under-allocated target");
    assert!(
        recommendation.sequence.actions.iter().any(|a| a.side == Side::Buy && a.isin == bbb),
        "expected a BUY action for the under-weight security BBB, got {:?}",
        recommendation.sequence.actions
    );
    assert!(!recommendation.executed);

    // Research mode: executing any action from the chosen sequence only
    // records a recommendation marker, it never reaches the brokerage.
    let executor = Executor::new(Arc::new(NoCallBrokerage), settings.clone());
    let store = InMemoryStore::new();
    let mut uow = store.begin();
    let buy = recommendation
        .sequence
        .actions
        .iter()
        .find(|a| a.side == Side::Buy)
        .unwrap();
    let pending = Default::default();
    let gate_ctx = GateContext {
        as_of: Utc::now(),
        market_open: true,
        bucket_id: BucketId::from("core"),
        security: ctx.securities.get(&buy.isin),
        position: ctx.positions.get(&buy.isin),
        last_buy_at: None,
        position_opened_at: None,
        pending_order_isins: &pending,
        available_cash: dec!(10000),
        symbol: Some("BBB"),
    };
    let outcome = executor
        .execute(buy, "client-1".to_string(), gate_ctx, uow.as_mut())
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::RecordedOnly));
}

struct NoCallBrokerage;

#[async_trait]
impl BrokerageAdapter for NoCallBrokerage {
    async fn place_order(&self, _order: &PendingOrder) -> EngineResult<OrderAck> {
        panic!("research mode must never place a live order");
    }
    async fn get_positions(&self) -> EngineResult<Vec<Position>> {
        Ok(vec![])
    }
    async fn get_cash_balances(&self) -> EngineResult<HashMap<String, Decimal>> {
        Ok(HashMap::new())
    }
    async fn get_dividends(
        &self,
        _since: chrono::DateTime<Utc>,
    ) -> EngineResult<Vec<rebalancer_engine::domain::trade::CashFlowEntry>> {
        Ok(vec![])
    }
}

// --- S2: quality gate blocks a buy candidate ---------------------------

#[tokio::test]
async fn s2_bubble_risk_tag_excludes_security_from_every_buy_candidate() {
    let settings = Arc::new(Settings::with_defaults());

    let aaa = isin("AAA0000000");
    let risky = isin("RSK0000000");

    let mut ctx = base_ctx(settings.clone());
    ctx.positions.insert(
        aaa.clone(),
        Position {
            isin: aaa.clone(),
            bucket_id: BucketId::from("core"),
            quantity: dec!(100),
            average_cost: dec!(100),
            last_price: dec!(100),
            currency: "EUR".to_string(),
            as_of: Utc::now(),
        },
    );
    ctx.prices.insert(aaa.clone(), dec!(100));
    ctx.prices.insert(risky.clone(), dec!(100));
    ctx.securities.insert(aaa.clone(), Security::new(aaa.clone(), "AAA", ProductType::Equity));
    ctx.securities.insert(risky.clone(), Security::new(risky.clone(), "RSK", ProductType::Equity));
    ctx.scores.insert(aaa.clone(), flat_score(aaa.clone(), 0.6));
    ctx.scores.insert(risky.clone(), flat_score(risky.clone(), 0.9));

    let mut blocked_tags = TagSet::new();
    blocked_tags.set(Tag::BubbleRisk, Utc::now());
    ctx.tags.insert(risky.clone(), blocked_tags);

    // The optimizer wants RSK heavily over-weight relative to its current
    // zero holding, which would normally generate a strong BUY candidate.
    ctx.optimizer_result.weights.insert(aaa.clone(), 0.2);
    ctx.optimizer_result.weights.insert(risky.clone(), 0.8);
    ctx.portfolio_value = dec!(10000);

    let evaluator = Arc::new(Evaluator::new(settings.clone()));
    let planner = Planner::new(PlannerConfig::from_settings(&settings), evaluator);

    let sequences = planner.generate_sequences(&ctx);
    for sequence in &sequences {
        assert!(
            !sequence.actions.iter().any(|a| a.side == Side::Buy && a.isin == risky),
            "a bubble-risk-tagged security must never appear in a BUY action"
        );
    }
}

// --- S3: emergency negative FX balance ---------------------------------

#[test]
fn s3_emergency_negative_usd_balance_is_closed_with_an_fx_leg() {
    let settings = Settings::with_defaults();

    let mut balances = HashMap::new();
    balances.insert("EUR".to_string(), dec!(5000));
    balances.insert("USD".to_string(), dec!(-200));

    let mut rates = HashMap::new();
    rates.insert("EUR".to_string(), dec!(1));
    rates.insert("USD".to_string(), dec!(1.08));

    let plan = build_emergency_plan(
        &balances,
        &[],
        &HashMap::new(),
        &HashMap::new(),
        &rates,
        &settings,
        Utc::now(),
        true,
    );

    assert!(!plan.is_empty());
    assert_eq!(plan.fx_legs.len(), 1);
    let leg = &plan.fx_legs[0];
    assert_eq!(leg.from_currency, "EUR");
    assert_eq!(leg.to_currency, "USD");
    // 200 USD deficit plus the 2% slippage buffer, expressed in EUR terms
    // (rate_to_eur USD=1.08 means 1 EUR buys 1.08 USD).
    let expected_eur = dec!(200) / dec!(1.08) * dec!(1.02);
    assert!(
        (leg.amount_from - expected_eur).abs() < dec!(0.01),
        "expected ~{expected_eur} EUR leg, got {}",
        leg.amount_from
    );
    assert!(plan.forced_sells.is_empty(), "the EUR surplus alone should cover the USD deficit");
}

#[test]
fn s3_no_negative_balance_triggers_nothing() {
    let mut balances = HashMap::new();
    balances.insert("EUR".to_string(), dec!(5000));
    let mut rates = HashMap::new();
    rates.insert("EUR".to_string(), dec!(1));

    let settings = Settings::with_defaults();
    let plan = build_emergency_plan(&balances, &[], &HashMap::new(), &HashMap::new(), &rates, &settings, Utc::now(), true);
    assert!(plan.is_empty());
    assert!(!rebalancer_engine::application::rebalancing_controller::has_negative_balance_trigger(
        &balances, &rates, dec!(5)
    ));
}

// --- S4: duplicate trade dedup through the execution path --------------

struct EchoBrokerage;

#[async_trait]
impl BrokerageAdapter for EchoBrokerage {
    async fn place_order(&self, order: &PendingOrder) -> EngineResult<OrderAck> {
        // A real brokerage is idempotent on client_order_id: the same key
        // submitted twice is acknowledged with the same order_id.
        Ok(OrderAck {
            order_id: OrderId::from(order.client_order_id.clone()),
            accepted_at: Utc::now(),
        })
    }
    async fn get_positions(&self) -> EngineResult<Vec<Position>> {
        Ok(vec![])
    }
    async fn get_cash_balances(&self) -> EngineResult<HashMap<String, Decimal>> {
        Ok(HashMap::new())
    }
    async fn get_dividends(
        &self,
        _since: chrono::DateTime<Utc>,
    ) -> EngineResult<Vec<rebalancer_engine::domain::trade::CashFlowEntry>> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn s4_duplicate_order_id_is_recorded_once_and_conflicts_on_retry() {
    let mut settings = Settings::with_defaults();
    settings.update("trading_mode", SettingValue::Text("live".to_string())).unwrap();
    let settings = Arc::new(settings);

    let isin = isin("AAA0000000");
    let security = Security::new(isin.clone(), "AAA", ProductType::Equity);
    let candidate = rebalancer_engine::domain::action::ActionCandidate {
        side: Side::Buy,
        isin: isin.clone(),
        quantity: dec!(10),
        estimated_price: dec!(100),
        currency: "EUR".to_string(),
        priority: 0.5,
        reason: "test".to_string(),
        tags: vec![],
    };

    let executor = Executor::new(Arc::new(EchoBrokerage), settings.clone());
    let store = InMemoryStore::new();

    let pending = Default::default();
    let gate_ctx = || GateContext {
        as_of: Utc::now(),
        market_open: true,
        bucket_id: BucketId::from("core"),
        security: Some(&security),
        position: None,
        last_buy_at: None,
        position_opened_at: None,
        pending_order_isins: &pending,
        available_cash: dec!(100000),
        symbol: Some("AAA"),
    };

    let mut uow1 = store.begin();
    let outcome1 = executor.execute(&candidate, "ORD-DUP".to_string(), gate_ctx(), uow1.as_mut()).await.unwrap();
    assert!(matches!(outcome1, ExecutionOutcome::Executed { .. }));
    uow1.commit().await.unwrap();

    let mut uow2 = store.begin();
    let outcome2 = executor.execute(&candidate, "ORD-DUP".to_string(), gate_ctx(), uow2.as_mut()).await.unwrap();
    assert!(matches!(outcome2, ExecutionOutcome::Executed { .. }), "the gate itself doesn't dedup");
    let commit_err = uow2.commit().await.unwrap_err();
    assert_eq!(commit_err.kind(), rebalancer_engine::domain::errors::ErrorKind::Conflict);

    assert_eq!(TradeRepository::all(&store).await.unwrap().len(), 1);
}

// --- S5: bucket hibernation on a large drawdown -------------------------

struct FixedFx;

#[async_trait]
impl FxRateProvider for FixedFx {
    async fn rate_to_eur(&self, _currency: &str) -> EngineResult<Decimal> {
        Ok(Decimal::ONE)
    }
}

#[tokio::test]
async fn s5_bucket_hibernates_once_drawdown_crosses_the_threshold() {
    let settings = Arc::new(Settings::with_defaults());
    let bucket_repo = Arc::new(InMemoryStore::new());
    let mut bucket = Bucket::core("EUR");
    bucket.high_water_mark = dec!(20000);
    BucketRepository::upsert(bucket_repo.as_ref(), &bucket).await.unwrap();

    let evaluator = Arc::new(Evaluator::new(settings.clone()));
    let controller = SatelliteController::new(
        settings.clone(),
        bucket_repo.clone(),
        Arc::new(FixedFx),
        PlannerFactory::new(evaluator),
    );

    // Peak EUR 20,000, current EUR 12,999 -> drawdown 35.005%, over the
    // 35% hibernation threshold.
    let cash: HashMap<String, Decimal> = HashMap::new();
    let positions = vec![Position {
        isin: isin("AAA0000000"),
        bucket_id: BucketId::from("core"),
        quantity: dec!(1),
        average_cost: dec!(12999),
        last_price: dec!(12999),
        currency: "EUR".to_string(),
        as_of: Utc::now(),
    }];

    let updated = controller
        .run_maintenance(&bucket.id, &positions, &cash, Utc::now())
        .await
        .unwrap();

    assert_eq!(updated.state, BucketState::Hibernating);
}

// --- S6 analog: best_result is monotonically non-decreasing across ticks

#[tokio::test]
async fn s6_incremental_planning_best_result_never_regresses() {
    let settings = Arc::new(Settings::with_defaults());

    let aaa = isin("AAA0000000");
    let bbb = isin("BBB0000000");
    let mut ctx = base_ctx(settings.clone());
    ctx.positions.insert(
        aaa.clone(),
        Position {
            isin: aaa.clone(),
            bucket_id: BucketId::from("core"),
            quantity: dec!(100),
            average_cost: dec!(100),
            last_price: dec!(100),
            currency: "EUR".to_string(),
            as_of: Utc::now(),
        },
    );
    ctx.prices.insert(aaa.clone(), dec!(100));
    ctx.prices.insert(bbb.clone(), dec!(100));
    ctx.securities.insert(aaa.clone(), Security::new(aaa.clone(), "AAA", ProductType::Equity));
    ctx.securities.insert(bbb.clone(), Security::new(bbb.clone(), "BBB", ProductType::Equity));
    ctx.scores.insert(aaa.clone(), flat_score(aaa.clone(), 0.6));
    ctx.scores.insert(bbb.clone(), flat_score(bbb.clone(), 0.6));
    ctx.optimizer_result.weights.insert(aaa.clone(), 0.55);
    ctx.optimizer_result.weights.insert(bbb.clone(), 0.45);
    ctx.portfolio_value = dec!(10000);

    let evaluator = Arc::new(Evaluator::new(settings.clone()));
    let mut config = PlannerConfig::from_settings(&settings);
    config.batch_size = 1; // force the run across several plan() calls
    let planner = Planner::new(config, evaluator);

    let token = CancellationToken::new();
    let mut last_score = f64::MIN;
    let mut ticks = 0;
    loop {
        let outcome = planner.plan(&ctx, "portfolio-s6", 2, &token).await.unwrap();
        if let Some(recommendation) = &outcome.recommendation {
            assert!(
                recommendation.evaluation.end_state_score >= last_score,
                "best_result regressed across ticks: {} -> {}",
                last_score,
                recommendation.evaluation.end_state_score
            );
            last_score = recommendation.evaluation.end_state_score;
        }
        ticks += 1;
        if planner.is_run_complete() || ticks > 50 {
            break;
        }
    }
    assert!(planner.is_run_complete(), "incremental planning should converge within a bounded number of ticks");
}
