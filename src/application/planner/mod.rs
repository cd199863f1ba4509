//! Planner: the core of the core (spec.md §4.E). Orchestrates a five-stage
//! pipeline — identify → generate → filter → evaluate → select — over a
//! `PlannerContext` snapshot, with multi-bucket support via `PlannerFactory`.

pub mod filters;
pub mod opportunity;
pub mod pattern;
pub mod sequence_gen;

use crate::application::cancellation::CancellationToken;
use crate::domain::action::ActionSequence;
use crate::domain::allocation::AllocationTargets;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::evaluation::EvaluationResult;
use crate::domain::ids::{BucketId, Isin};
use crate::domain::optimizer::OptimizerResult;
use crate::domain::ports::{EvaluationRequest, EvaluatorAdapter};
use crate::domain::position::Position;
use crate::domain::recommendation::Recommendation;
use crate::domain::regime::MarketRegime;
use crate::domain::score::SecurityScore;
use crate::domain::security::{Security, TagSet};
use crate::domain::settings::Settings;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Immutable snapshot the entire planning pipeline reads from. Built fresh
/// by the caller (rebalancing controller or scheduler job) for each run.
#[derive(Clone)]
pub struct PlannerContext {
    pub bucket_id: BucketId,
    pub as_of: DateTime<Utc>,
    pub positions: HashMap<Isin, Position>,
    pub cash: HashMap<String, Decimal>,
    pub prices: HashMap<Isin, Decimal>,
    pub securities: HashMap<Isin, Security>,
    pub scores: HashMap<Isin, SecurityScore>,
    pub tags: HashMap<Isin, TagSet>,
    pub optimizer_result: OptimizerResult,
    pub allocation_targets: AllocationTargets,
    pub last_buy_at: HashMap<Isin, DateTime<Utc>>,
    pub last_sell_at: HashMap<Isin, DateTime<Utc>>,
    pub position_opened_at: HashMap<Isin, DateTime<Utc>>,
    pub portfolio_value: Decimal,
    pub settings: Arc<Settings>,
}

impl PlannerContext {
    pub fn price(&self, isin: &Isin) -> Decimal {
        self.prices.get(isin).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn tags_for(&self, isin: &Isin) -> TagSet {
        self.tags.get(isin).cloned().unwrap_or_default()
    }

    pub fn score_for(&self, isin: &Isin) -> Option<&SecurityScore> {
        self.scores.get(isin)
    }

    pub fn current_weight(&self, isin: &Isin) -> f64 {
        if self.portfolio_value <= Decimal::ZERO {
            return 0.0;
        }
        let value = self
            .positions
            .get(isin)
            .map(|p| p.market_value())
            .unwrap_or(Decimal::ZERO);
        (value / self.portfolio_value).to_string().parse().unwrap_or(0.0)
    }

    pub fn target_weight(&self, isin: &Isin) -> f64 {
        self.optimizer_result.weight_for(isin)
    }

    pub fn days_since(&self, when: Option<&DateTime<Utc>>) -> i64 {
        match when {
            Some(t) => (self.as_of - *t).num_days(),
            None => i64::MAX,
        }
    }
}

/// Final product the planner hands back to its caller, alongside the
/// best-scoring sequence's evaluation.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub recommendation: Option<Recommendation>,
    pub sequences_generated: usize,
    pub sequences_evaluated: usize,
    pub cancelled: bool,
}

/// Per-bucket planner configuration: which calculators/patterns/filters
/// run, and the numeric knobs that parameterize them. Declarative and
/// TOML-deserializable in production; the in-memory defaults below mirror
/// spec.md §6.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub max_plan_depth: usize,
    pub max_opportunities_per_category: usize,
    pub batch_size: usize,
    pub correlation_aware_filter_enabled: bool,
    pub multi_objective_evaluation_enabled: bool,
}

impl PlannerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_plan_depth: settings.get_f64("max_plan_depth") as usize,
            max_opportunities_per_category: settings.get_f64("max_opportunities_per_category") as usize,
            batch_size: settings.get_f64("batch_size") as usize,
            correlation_aware_filter_enabled: settings.get_bool("correlation_aware_filter_enabled"),
            multi_objective_evaluation_enabled: settings.get_bool("multi_objective_evaluation_enabled"),
        }
    }
}

/// A sequence's position in the (end_score, risk_score, -cost) objective
/// space spec.md §4.F's multi-objective mode dominates over.
fn objectives(eval: &EvaluationResult) -> (f64, f64, f64) {
    let cost = eval.transaction_cost.to_string().parse::<f64>().unwrap_or(0.0);
    (eval.end_state_score, eval.sub_scores.risk_adjusted, -cost)
}

/// True if `a` Pareto-dominates `b`: at least as good on every objective,
/// strictly better on at least one.
fn dominates(a: &EvaluationResult, b: &EvaluationResult) -> bool {
    let (a0, a1, a2) = objectives(a);
    let (b0, b1, b2) = objectives(b);
    a0 >= b0 && a1 >= b1 && a2 >= b2 && (a0 > b0 || a1 > b1 || a2 > b2)
}

/// Work-queue row for incremental planning (spec.md §4.E.5): when the
/// number of candidate sequences exceeds `batch_size`, evaluation proceeds
/// across multiple scheduler ticks instead of blocking one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItemStatus {
    Pending,
    Evaluated,
}

#[derive(Debug, Clone)]
pub struct PlanningWorkItem {
    pub sequence_hash: String,
    pub priority: i64,
    pub status: WorkItemStatus,
}

pub struct Planner {
    config: PlannerConfig,
    evaluator: Arc<dyn EvaluatorAdapter>,
    work_queue: RwLock<HashMap<String, (ActionSequence, PlanningWorkItem)>>,
    best_result: RwLock<Option<(ActionSequence, EvaluationResult)>>,
    /// Non-dominated sequences accumulated so far, only populated when
    /// `multi_objective_evaluation_enabled` is set.
    frontier: RwLock<Vec<(ActionSequence, EvaluationResult)>>,
}

impl Planner {
    pub fn new(config: PlannerConfig, evaluator: Arc<dyn EvaluatorAdapter>) -> Self {
        Self {
            config,
            evaluator,
            work_queue: RwLock::new(HashMap::new()),
            best_result: RwLock::new(None),
            frontier: RwLock::new(Vec::new()),
        }
    }

    /// Inserts `(seq, eval)` into the Pareto frontier if nothing already
    /// there dominates it, dropping any existing members it in turn
    /// dominates.
    fn update_frontier(&self, seq: ActionSequence, eval: EvaluationResult) {
        let mut frontier = self.frontier.write().unwrap();
        if frontier.iter().any(|(_, existing)| dominates(existing, &eval)) {
            return;
        }
        frontier.retain(|(_, existing)| !dominates(&eval, existing));
        frontier.push((seq, eval));
    }

    /// Picks the frontier member with the best end-state score as the
    /// single recommendation to surface; every member is dominated by
    /// none, so this is just the deterministic tie-break spec.md §4.F
    /// leaves unspecified.
    fn select_from_frontier(&self) -> Option<(ActionSequence, EvaluationResult)> {
        self.frontier
            .read()
            .unwrap()
            .iter()
            .max_by(|(_, a), (_, b)| a.end_state_score.total_cmp(&b.end_state_score))
            .cloned()
    }

    /// Stage 1-2: identify candidates via the six opportunity calculators,
    /// then generate sequences via the thirteen pattern generators plus the
    /// four combinatorial/partial-execution/relaxation sequence generators.
    pub fn generate_sequences(&self, ctx: &PlannerContext) -> Vec<ActionSequence> {
        let candidates = opportunity::run_all(ctx, self.config.max_opportunities_per_category);
        let mut sequences = pattern::run_all(ctx, &candidates);
        sequences.extend(sequence_gen::run_all(ctx, &candidates, self.config.max_plan_depth));
        filters::apply_all(ctx, sequences, self.config.correlation_aware_filter_enabled)
    }

    /// Stage 3-5: evaluate and select. Runs entirely in-process against the
    /// provided evaluator port, bounded by `worker_count` concurrency and
    /// respecting `token`. When the number of sequences exceeds
    /// `batch_size`, only one batch is evaluated per call and the run is
    /// reported incomplete via `sequences_evaluated < sequences_generated`.
    pub async fn plan(
        &self,
        ctx: &PlannerContext,
        portfolio_hash: &str,
        worker_count: usize,
        token: &CancellationToken,
    ) -> EngineResult<PlanOutcome> {
        let sequences = self.generate_sequences(ctx);
        let total_generated = sequences.len();

        {
            let mut queue = self.work_queue.write().unwrap();
            for seq in &sequences {
                let hash = seq.sequence_hash();
                queue.entry(hash.clone()).or_insert_with(|| {
                    (
                        seq.clone(),
                        PlanningWorkItem {
                            sequence_hash: hash,
                            priority: 0,
                            status: WorkItemStatus::Pending,
                        },
                    )
                });
            }
        }

        let batch: Vec<ActionSequence> = {
            let queue = self.work_queue.read().unwrap();
            queue
                .values()
                .filter(|(_, item)| item.status == WorkItemStatus::Pending)
                .take(self.config.batch_size.max(1))
                .map(|(seq, _)| seq.clone())
                .collect()
        };

        let mut evaluated = 0usize;
        let semaphore = Arc::new(tokio::sync::Semaphore::new(worker_count.max(1)));
        let mut handles = Vec::new();

        for seq in batch {
            if token.is_cancelled() {
                break;
            }
            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                EngineError::internal(format!("semaphore closed: {e}"))
            })?;
            let evaluator = self.evaluator.clone();
            let request = EvaluationRequest {
                portfolio_hash: portfolio_hash.to_string(),
                sequence: seq.clone(),
                starting_positions: ctx.positions.values().cloned().collect(),
                starting_cash: ctx.cash.clone(),
                portfolio_value: ctx.portfolio_value,
                target_weights: ctx.optimizer_result.weights.clone(),
                allocation_targets: ctx.allocation_targets.clone(),
                securities: ctx.securities.clone(),
                scores: ctx.scores.clone(),
                regime: ctx.optimizer_result.regime_snapshot,
            };
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = evaluator.evaluate(request).await;
                (seq, result)
            }));
        }

        for handle in handles {
            let (seq, result) = handle
                .await
                .map_err(|e| EngineError::internal(format!("evaluator task panicked: {e}")))?;
            evaluated += 1;
            let hash = seq.sequence_hash();
            if let Ok(mut queue) = self.work_queue.write() {
                if let Some((_, item)) = queue.get_mut(&hash) {
                    item.status = WorkItemStatus::Evaluated;
                }
            }
            if let Ok(eval) = result {
                if self.config.multi_objective_evaluation_enabled {
                    self.update_frontier(seq, eval);
                } else {
                    let mut best = self.best_result.write().unwrap();
                    let should_replace = match best.as_ref() {
                        Some((_, current_best)) => eval.end_state_score > current_best.end_state_score,
                        None => true,
                    };
                    if should_replace {
                        *best = Some((seq, eval));
                    }
                }
            }
        }

        let cancelled = token.is_cancelled();
        let best = if self.config.multi_objective_evaluation_enabled {
            self.select_from_frontier()
        } else {
            self.best_result.read().unwrap().clone()
        };
        let recommendation = best.map(|(sequence, evaluation)| Recommendation {
            portfolio_hash: portfolio_hash.to_string(),
            sequence,
            evaluation,
            created_at: Utc::now(),
            executed: false,
        });

        Ok(PlanOutcome {
            recommendation,
            sequences_generated: total_generated,
            sequences_evaluated: evaluated,
            cancelled,
        })
    }

    pub fn is_run_complete(&self) -> bool {
        self.work_queue
            .read()
            .unwrap()
            .values()
            .all(|(_, item)| item.status == WorkItemStatus::Evaluated)
    }

    /// Invalidates the incremental work queue and best-result cache; called
    /// when the portfolio hash changes underneath a long-running search.
    pub fn invalidate(&self) {
        self.work_queue.write().unwrap().clear();
        *self.best_result.write().unwrap() = None;
        self.frontier.write().unwrap().clear();
    }
}

/// Loads and caches per-bucket `Planner` instances, backed by a
/// `RwLock<HashMap<BucketId, Arc<Planner>>>` guarded the same way the
/// scores cache is (spec.md §5, §4.H).
pub struct PlannerFactory {
    evaluator: Arc<dyn EvaluatorAdapter>,
    cache: RwLock<HashMap<BucketId, Arc<Planner>>>,
}

impl PlannerFactory {
    pub fn new(evaluator: Arc<dyn EvaluatorAdapter>) -> Self {
        Self {
            evaluator,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn load_for_bucket(&self, bucket_id: &BucketId, settings: &Settings) -> Arc<Planner> {
        if let Some(planner) = self.cache.read().unwrap().get(bucket_id) {
            return planner.clone();
        }
        let planner = Arc::new(Planner::new(
            PlannerConfig::from_settings(settings),
            self.evaluator.clone(),
        ));
        self.cache
            .write()
            .unwrap()
            .insert(bucket_id.clone(), planner.clone());
        planner
    }

    pub fn reload_for_bucket(&self, bucket_id: &BucketId, settings: &Settings) -> Arc<Planner> {
        self.cache.write().unwrap().remove(bucket_id);
        self.load_for_bucket(bucket_id, settings)
    }

    pub fn default_planner(&self, settings: &Settings) -> Arc<Planner> {
        self.load_for_bucket(&BucketId::from("core"), settings)
    }
}
