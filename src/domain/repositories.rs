//! Repository Pattern abstractions for the engine's own persisted state
//! (spec.md §4.A). Two storage technologies back these traits in
//! `crate::infrastructure`: an in-memory `Arc<RwLock<_>>` store for
//! entities that are small and rebuilt from trades/positions on demand,
//! and SQLite for the append-only trade and cash-flow ledgers, where a
//! `UNIQUE` constraint gives idempotent dedup on `order_id`/`transaction_id`
//! for free.

use crate::domain::bucket::Bucket;
use crate::domain::errors::EngineResult;
use crate::domain::ids::{BucketId, Isin, OrderId, TransactionId};
use crate::domain::position::Position;
use crate::domain::recommendation::Recommendation;
use crate::domain::score::SecurityScore;
use crate::domain::security::Security;
use crate::domain::settings::Settings;
use crate::domain::trade::{CashFlowEntry, Trade};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait SecurityRepository: Send + Sync {
    async fn upsert(&self, security: &Security) -> EngineResult<()>;
    async fn get(&self, isin: &Isin) -> EngineResult<Option<Security>>;
    async fn all_active(&self) -> EngineResult<Vec<Security>>;
}

#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn upsert(&self, position: &Position) -> EngineResult<()>;
    async fn get(&self, isin: &Isin) -> EngineResult<Option<Position>>;
    async fn all(&self) -> EngineResult<Vec<Position>>;
}

/// Append-only trade ledger, keyed on `order_id`. `record` never produces a
/// duplicate row: a repeated call with an already-seen id returns
/// `Conflict` and leaves the existing row untouched (spec.md invariant (ii)
/// and scenario S4).
#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn record(&self, trade: &Trade) -> EngineResult<()>;
    async fn exists(&self, order_id: &OrderId) -> EngineResult<bool>;
    async fn history(&self, isin: &Isin) -> EngineResult<Vec<Trade>>;
    async fn all(&self) -> EngineResult<Vec<Trade>>;
}

/// Append-only cash-flow ledger, same idempotency contract as
/// `TradeRepository` but keyed on `transaction_id`.
#[async_trait]
pub trait CashFlowRepository: Send + Sync {
    async fn record(&self, entry: &CashFlowEntry) -> EngineResult<()>;
    async fn exists(&self, transaction_id: &TransactionId) -> EngineResult<bool>;
    async fn since(&self, start: DateTime<Utc>) -> EngineResult<Vec<CashFlowEntry>>;
}

#[async_trait]
pub trait ScoreRepository: Send + Sync {
    async fn upsert(&self, score: &SecurityScore) -> EngineResult<()>;
    async fn get(&self, isin: &Isin) -> EngineResult<Option<SecurityScore>>;
    async fn all(&self) -> EngineResult<Vec<SecurityScore>>;
}

#[async_trait]
pub trait RecommendationRepository: Send + Sync {
    async fn save(&self, recommendation: &Recommendation) -> EngineResult<()>;
    async fn latest_for(&self, portfolio_hash: &str) -> EngineResult<Option<Recommendation>>;
    async fn mark_executed(&self, portfolio_hash: &str, sequence_id: &str) -> EngineResult<()>;
}

#[async_trait]
pub trait BucketRepository: Send + Sync {
    async fn upsert(&self, bucket: &Bucket) -> EngineResult<()>;
    async fn get(&self, id: &BucketId) -> EngineResult<Option<Bucket>>;
    async fn all(&self) -> EngineResult<Vec<Bucket>>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn load(&self) -> EngineResult<Settings>;
    async fn save(&self, settings: &Settings) -> EngineResult<()>;
}

/// Scoped transaction boundary spanning the trade and cash-flow ledgers
/// plus any position updates made within them. Implementations commit on
/// `commit()`, and must roll back automatically if dropped (or if the
/// enclosing task panics) without a prior commit — callers never reason
/// about partial application of a routine or emergency rebalance.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn record_trade(&mut self, trade: &Trade) -> EngineResult<()>;
    async fn record_cash_flow(&mut self, entry: &CashFlowEntry) -> EngineResult<()>;
    async fn upsert_position(&mut self, position: &Position) -> EngineResult<()>;
    async fn commit(self: Box<Self>) -> EngineResult<()>;
}

/// Opens a fresh `UnitOfWork` against whichever storage backend is
/// configured, without the caller needing to know the concrete store type.
pub trait UnitOfWorkFactory: Send + Sync {
    fn begin(&self) -> Box<dyn UnitOfWork>;
}
