//! In-memory implementations of the repository traits in
//! `domain::repositories`, backed by `Arc<RwLock<_>>` maps. Suitable for
//! every entity that is small and fully rebuildable, per spec.md §4.A;
//! the trade and cash-flow ledgers get a SQLite-backed implementation
//! instead (`infrastructure::repositories::sqlite`) for durable,
//! idempotent append-only storage.

use crate::domain::bucket::Bucket;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ids::{BucketId, Isin, OrderId, TransactionId};
use crate::domain::position::Position;
use crate::domain::recommendation::Recommendation;
use crate::domain::repositories::{
    BucketRepository, CashFlowRepository, PositionRepository, RecommendationRepository,
    ScoreRepository, SecurityRepository, SettingsRepository, TradeRepository, UnitOfWork,
    UnitOfWorkFactory,
};
use crate::domain::score::SecurityScore;
use crate::domain::security::Security;
use crate::domain::settings::Settings;
use crate::domain::trade::{CashFlowEntry, Trade};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared in-memory backing store. Cloning is cheap (every field is an
/// `Arc`), so the same store can be handed to every repository struct and
/// to the unit-of-work factory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    securities: Arc<RwLock<HashMap<Isin, Security>>>,
    positions: Arc<RwLock<HashMap<Isin, Position>>>,
    trades: Arc<RwLock<Vec<Trade>>>,
    trade_ids: Arc<RwLock<HashSet<OrderId>>>,
    cash_flows: Arc<RwLock<Vec<CashFlowEntry>>>,
    cash_flow_ids: Arc<RwLock<HashSet<TransactionId>>>,
    scores: Arc<RwLock<HashMap<Isin, SecurityScore>>>,
    recommendations: Arc<RwLock<HashMap<String, Recommendation>>>,
    buckets: Arc<RwLock<HashMap<BucketId, Bucket>>>,
    settings: Arc<RwLock<Option<Settings>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `UnitOfWork` over this store: writes are staged locally and only
    /// applied to the shared maps on `commit()`. Dropping without
    /// committing discards the staged buffer, which is rollback for free
    /// since nothing was written to shared state yet.
    pub fn begin(&self) -> InMemoryUnitOfWork {
        InMemoryUnitOfWork {
            store: self.clone(),
            staged_trades: Vec::new(),
            staged_cash_flows: Vec::new(),
            staged_positions: Vec::new(),
        }
    }
}

impl UnitOfWorkFactory for InMemoryStore {
    fn begin(&self) -> Box<dyn UnitOfWork> {
        Box::new(InMemoryStore::begin(self))
    }
}

#[async_trait]
impl SecurityRepository for InMemoryStore {
    async fn upsert(&self, security: &Security) -> EngineResult<()> {
        self.securities.write().await.insert(security.isin.clone(), security.clone());
        Ok(())
    }

    async fn get(&self, isin: &Isin) -> EngineResult<Option<Security>> {
        Ok(self.securities.read().await.get(isin).cloned())
    }

    async fn all_active(&self) -> EngineResult<Vec<Security>> {
        Ok(self
            .securities
            .read()
            .await
            .values()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PositionRepository for InMemoryStore {
    async fn upsert(&self, position: &Position) -> EngineResult<()> {
        self.positions.write().await.insert(position.isin.clone(), position.clone());
        Ok(())
    }

    async fn get(&self, isin: &Isin) -> EngineResult<Option<Position>> {
        Ok(self.positions.read().await.get(isin).cloned())
    }

    async fn all(&self) -> EngineResult<Vec<Position>> {
        Ok(self.positions.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl TradeRepository for InMemoryStore {
    async fn record(&self, trade: &Trade) -> EngineResult<()> {
        let mut ids = self.trade_ids.write().await;
        if ids.contains(&trade.order_id) {
            return Err(EngineError::conflict(format!("trade with order_id {} already recorded", trade.order_id)));
        }
        ids.insert(trade.order_id.clone());
        self.trades.write().await.push(trade.clone());
        Ok(())
    }

    async fn exists(&self, order_id: &OrderId) -> EngineResult<bool> {
        Ok(self.trade_ids.read().await.contains(order_id))
    }

    async fn history(&self, isin: &Isin) -> EngineResult<Vec<Trade>> {
        Ok(self
            .trades
            .read()
            .await
            .iter()
            .filter(|t| &t.isin == isin)
            .cloned()
            .collect())
    }

    async fn all(&self) -> EngineResult<Vec<Trade>> {
        Ok(self.trades.read().await.clone())
    }
}

#[async_trait]
impl CashFlowRepository for InMemoryStore {
    async fn record(&self, entry: &CashFlowEntry) -> EngineResult<()> {
        let mut ids = self.cash_flow_ids.write().await;
        if ids.contains(&entry.transaction_id) {
            return Err(EngineError::conflict(format!(
                "cash flow with transaction_id {} already recorded",
                entry.transaction_id
            )));
        }
        ids.insert(entry.transaction_id.clone());
        self.cash_flows.write().await.push(entry.clone());
        Ok(())
    }

    async fn exists(&self, transaction_id: &TransactionId) -> EngineResult<bool> {
        Ok(self.cash_flow_ids.read().await.contains(transaction_id))
    }

    async fn since(&self, start: DateTime<Utc>) -> EngineResult<Vec<CashFlowEntry>> {
        Ok(self
            .cash_flows
            .read()
            .await
            .iter()
            .filter(|e| e.timestamp >= start)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScoreRepository for InMemoryStore {
    async fn upsert(&self, score: &SecurityScore) -> EngineResult<()> {
        self.scores.write().await.insert(score.isin.clone(), score.clone());
        Ok(())
    }

    async fn get(&self, isin: &Isin) -> EngineResult<Option<SecurityScore>> {
        Ok(self.scores.read().await.get(isin).cloned())
    }

    async fn all(&self) -> EngineResult<Vec<SecurityScore>> {
        Ok(self.scores.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl RecommendationRepository for InMemoryStore {
    async fn save(&self, recommendation: &Recommendation) -> EngineResult<()> {
        self.recommendations
            .write()
            .await
            .insert(recommendation.portfolio_hash.clone(), recommendation.clone());
        Ok(())
    }

    async fn latest_for(&self, portfolio_hash: &str) -> EngineResult<Option<Recommendation>> {
        Ok(self.recommendations.read().await.get(portfolio_hash).cloned())
    }

    async fn mark_executed(&self, portfolio_hash: &str, sequence_id: &str) -> EngineResult<()> {
        let mut recommendations = self.recommendations.write().await;
        match recommendations.get_mut(portfolio_hash) {
            Some(rec) if rec.sequence_id() == sequence_id => {
                rec.executed = true;
                Ok(())
            }
            Some(_) => Err(EngineError::conflict(format!(
                "recommendation for {portfolio_hash} no longer matches sequence {sequence_id}"
            ))),
            None => Err(EngineError::not_found(format!(
                "no recommendation for {portfolio_hash}"
            ))),
        }
    }
}

#[async_trait]
impl BucketRepository for InMemoryStore {
    async fn upsert(&self, bucket: &Bucket) -> EngineResult<()> {
        self.buckets.write().await.insert(bucket.id.clone(), bucket.clone());
        Ok(())
    }

    async fn get(&self, id: &BucketId) -> EngineResult<Option<Bucket>> {
        Ok(self.buckets.read().await.get(id).cloned())
    }

    async fn all(&self) -> EngineResult<Vec<Bucket>> {
        Ok(self.buckets.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl SettingsRepository for InMemoryStore {
    async fn load(&self) -> EngineResult<Settings> {
        let guard = self.settings.read().await;
        Ok(guard.clone().unwrap_or_else(Settings::with_defaults))
    }

    async fn save(&self, settings: &Settings) -> EngineResult<()> {
        *self.settings.write().await = Some(settings.clone());
        Ok(())
    }
}

pub struct InMemoryUnitOfWork {
    store: InMemoryStore,
    staged_trades: Vec<Trade>,
    staged_cash_flows: Vec<CashFlowEntry>,
    staged_positions: Vec<Position>,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn record_trade(&mut self, trade: &Trade) -> EngineResult<()> {
        self.staged_trades.push(trade.clone());
        Ok(())
    }

    async fn record_cash_flow(&mut self, entry: &CashFlowEntry) -> EngineResult<()> {
        self.staged_cash_flows.push(entry.clone());
        Ok(())
    }

    async fn upsert_position(&mut self, position: &Position) -> EngineResult<()> {
        self.staged_positions.push(position.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        for trade in &self.staged_trades {
            TradeRepository::record(&self.store, trade).await?;
        }
        for entry in &self.staged_cash_flows {
            CashFlowRepository::record(&self.store, entry).await?;
        }
        for position in &self.staged_positions {
            PositionRepository::upsert(&self.store, position).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(order_id: &str) -> Trade {
        Trade {
            order_id: OrderId::from(order_id),
            isin: Isin::from("DE0000000000"),
            side: crate::domain::trade::Side::Buy,
            quantity: dec!(1),
            price: dec!(100),
            currency: "EUR".to_string(),
            fees: dec!(0),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_order_id_is_recorded_once() {
        let store = InMemoryStore::new();
        TradeRepository::record(&store, &trade("ORD-1")).await.unwrap();
        let err = TradeRepository::record(&store, &trade("ORD-1")).await.unwrap_err();
        assert_eq!(err.kind(), crate::domain::errors::ErrorKind::Conflict);
        assert_eq!(TradeRepository::all(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unit_of_work_applies_only_on_commit() {
        let store = InMemoryStore::new();
        let mut uow = store.begin();
        uow.record_trade(&trade("ORD-2")).await.unwrap();
        assert_eq!(TradeRepository::all(&store).await.unwrap().len(), 0);
        Box::new(uow).commit().await.unwrap();
        assert_eq!(TradeRepository::all(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unit_of_work_dropped_without_commit_applies_nothing() {
        let store = InMemoryStore::new();
        {
            let mut uow = store.begin();
            uow.record_trade(&trade("ORD-3")).await.unwrap();
        }
        assert_eq!(TradeRepository::all(&store).await.unwrap().len(), 0);
    }
}
