//! Narrow contracts the application layer depends on for every external
//! system (spec.md §6). Concrete adapters live in `crate::infrastructure`;
//! nothing in `domain` or `application` talks to a brokerage, a market-data
//! feed, or an HTTP optimizer service directly.

use crate::domain::allocation::AllocationTargets;
use crate::domain::errors::EngineResult;
use crate::domain::ids::Isin;
use crate::domain::optimizer::OptimizerResult;
use crate::domain::position::Position;
use crate::domain::regime::MarketRegime;
use crate::domain::security::Security;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub isin: Isin,
    pub side: crate::domain::trade::Side,
    pub quantity: Decimal,
    pub currency: String,
    /// Client-generated idempotency key; the adapter must make repeated
    /// submission of the same key a no-op against the brokerage.
    pub client_order_id: String,
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: crate::domain::ids::OrderId,
    pub accepted_at: DateTime<Utc>,
}

/// EUR-hub FX quotes for the rebalancing controller's currency-exchange
/// leg (spec.md §4.G). `rate_to_eur` returns units of `currency` per 1 EUR.
#[async_trait]
pub trait FxRateProvider: Send + Sync {
    async fn rate_to_eur(&self, currency: &str) -> EngineResult<Decimal>;
}

/// Brokerage gateway: order submission and account state. `place_order`
/// must be idempotent on `client_order_id` — the application layer never
/// retries a place-order call itself (spec.md §7), it relies on this.
#[async_trait]
pub trait BrokerageAdapter: Send + Sync {
    async fn place_order(&self, order: &PendingOrder) -> EngineResult<OrderAck>;
    async fn get_positions(&self) -> EngineResult<Vec<Position>>;
    async fn get_cash_balances(&self) -> EngineResult<HashMap<String, Decimal>>;
    /// Dividend cash events paid since `since`, for the sync cycle to fold
    /// into `CashFlowRepository` (spec.md §6).
    async fn get_dividends(&self, since: DateTime<Utc>) -> EngineResult<Vec<crate::domain::trade::CashFlowEntry>>;
}

#[derive(Debug, Clone, Default)]
pub struct SecuritySnapshot {
    pub pe_ratio: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub week_52_high: Option<Decimal>,
    pub week_52_low: Option<Decimal>,
}

/// Read-only market data: quotes, fundamentals, historical return series.
/// Safe to retry under the reqwest-middleware policy (spec.md §7).
#[async_trait]
pub trait MarketDataAdapter: Send + Sync {
    async fn get_quotes(&self, isins: &[Isin]) -> EngineResult<HashMap<Isin, Decimal>>;
    async fn get_fundamentals(&self, isin: &Isin) -> EngineResult<SecuritySnapshot>;
    async fn get_historical_returns(
        &self,
        isin: &Isin,
        lookback_days: u32,
    ) -> EngineResult<Vec<f64>>;
    async fn get_security_master(&self) -> EngineResult<Vec<Security>>;
}

#[derive(Debug, Clone)]
pub struct OptimizerRequest {
    pub expected_returns: HashMap<Isin, f64>,
    pub covariance: HashMap<(Isin, Isin), f64>,
    pub allocation_targets: AllocationTargets,
    pub regime: MarketRegime,
    pub blend_ratio: f64,
}

/// External convex-optimizer call (spec.md §4.D). The application layer
/// builds expected returns and the covariance matrix; the adapter owns the
/// HTTP round trip and response parsing.
#[async_trait]
pub trait OptimizerAdapter: Send + Sync {
    async fn optimize(&self, request: OptimizerRequest) -> EngineResult<OptimizerResult>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub portfolio_hash: String,
    pub sequence: crate::domain::action::ActionSequence,
    pub starting_positions: Vec<Position>,
    pub starting_cash: HashMap<String, Decimal>,
    pub portfolio_value: Decimal,
    pub target_weights: HashMap<Isin, f64>,
    pub allocation_targets: AllocationTargets,
    pub securities: HashMap<Isin, Security>,
    pub scores: HashMap<Isin, crate::domain::score::SecurityScore>,
    pub regime: MarketRegime,
}

/// Sequence scorer, potentially swapped for a remote evaluator service
/// without changing callers (spec.md §4.F).
#[async_trait]
pub trait EvaluatorAdapter: Send + Sync {
    async fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> EngineResult<crate::domain::evaluation::EvaluationResult>;
}
