//! SQLite-backed trade and cash-flow ledgers. Append-only tables with a
//! `UNIQUE` constraint on `order_id`/`transaction_id`; a second `record()`
//! with the same id is rejected with `Conflict` and leaves the row
//! untouched, matching the in-memory store's contract.

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ids::{Isin, OrderId, TransactionId};
use crate::domain::position::Position;
use crate::domain::repositories::{CashFlowRepository, PositionRepository, TradeRepository, UnitOfWork, UnitOfWorkFactory};
use crate::domain::trade::{CashFlowEntry, CashFlowKind, Side, Trade};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

fn to_engine_err(err: sqlx::Error) -> EngineError {
    EngineError::unavailable(format!("sqlite ledger error: {err}"))
}

impl SqliteLedger {
    pub async fn new(db_url: &str) -> EngineResult<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(to_engine_err)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(to_engine_err)?;

        let ledger = Self { pool };
        ledger.init().await?;
        Ok(ledger)
    }

    async fn init(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                order_id TEXT PRIMARY KEY,
                isin TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                currency TEXT NOT NULL,
                fees TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_isin ON trades (isin);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(to_engine_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cash_flows (
                transaction_id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                currency TEXT NOT NULL,
                amount TEXT NOT NULL,
                kind TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cash_flows_timestamp ON cash_flows (timestamp);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(to_engine_err)?;

        Ok(())
    }
}

fn side_to_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn side_from_str(s: &str) -> EngineResult<Side> {
    match s {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(EngineError::internal(format!("unknown trade side in storage: {other}"))),
    }
}

fn kind_to_str(kind: CashFlowKind) -> &'static str {
    match kind {
        CashFlowKind::Deposit => "DEPOSIT",
        CashFlowKind::Withdrawal => "WITHDRAWAL",
        CashFlowKind::Dividend => "DIVIDEND",
        CashFlowKind::Fee => "FEE",
        CashFlowKind::Interest => "INTEREST",
        CashFlowKind::Fx => "FX",
    }
}

fn kind_from_str(s: &str) -> EngineResult<CashFlowKind> {
    match s {
        "DEPOSIT" => Ok(CashFlowKind::Deposit),
        "WITHDRAWAL" => Ok(CashFlowKind::Withdrawal),
        "DIVIDEND" => Ok(CashFlowKind::Dividend),
        "FEE" => Ok(CashFlowKind::Fee),
        "INTEREST" => Ok(CashFlowKind::Interest),
        "FX" => Ok(CashFlowKind::Fx),
        other => Err(EngineError::internal(format!("unknown cash-flow kind in storage: {other}"))),
    }
}

#[async_trait]
impl TradeRepository for SqliteLedger {
    async fn record(&self, trade: &Trade) -> EngineResult<()> {
        let result = sqlx::query(
            "INSERT INTO trades (order_id, isin, side, quantity, price, currency, fees, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(order_id) DO NOTHING",
        )
        .bind(trade.order_id.as_str())
        .bind(trade.isin.as_str())
        .bind(side_to_str(trade.side))
        .bind(trade.quantity.to_string())
        .bind(trade.price.to_string())
        .bind(&trade.currency)
        .bind(trade.fees.to_string())
        .bind(trade.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(to_engine_err)?;
        if result.rows_affected() == 0 {
            return Err(EngineError::conflict(format!("trade with order_id {} already recorded", trade.order_id)));
        }
        Ok(())
    }

    async fn exists(&self, order_id: &OrderId) -> EngineResult<bool> {
        let row = sqlx::query("SELECT 1 FROM trades WHERE order_id = ?")
            .bind(order_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(to_engine_err)?;
        Ok(row.is_some())
    }

    async fn history(&self, isin: &Isin) -> EngineResult<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE isin = ? ORDER BY timestamp ASC")
            .bind(isin.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(to_engine_err)?;
        rows.into_iter().map(row_to_trade).collect()
    }

    async fn all(&self) -> EngineResult<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY timestamp ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(to_engine_err)?;
        rows.into_iter().map(row_to_trade).collect()
    }
}

fn row_to_trade(row: sqlx::sqlite::SqliteRow) -> EngineResult<Trade> {
    let quantity: String = row.try_get("quantity").map_err(to_engine_err)?;
    let price: String = row.try_get("price").map_err(to_engine_err)?;
    let fees: String = row.try_get("fees").map_err(to_engine_err)?;
    let timestamp: String = row.try_get("timestamp").map_err(to_engine_err)?;
    let side: String = row.try_get("side").map_err(to_engine_err)?;

    Ok(Trade {
        order_id: OrderId::from(row.try_get::<String, _>("order_id").map_err(to_engine_err)?),
        isin: Isin::from(row.try_get::<String, _>("isin").map_err(to_engine_err)?),
        side: side_from_str(&side)?,
        quantity: Decimal::from_str(&quantity).map_err(|e| EngineError::internal(e.to_string()))?,
        price: Decimal::from_str(&price).map_err(|e| EngineError::internal(e.to_string()))?,
        currency: row.try_get("currency").map_err(to_engine_err)?,
        fees: Decimal::from_str(&fees).map_err(|e| EngineError::internal(e.to_string()))?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| EngineError::internal(e.to_string()))?
            .with_timezone(&Utc),
    })
}

#[async_trait]
impl CashFlowRepository for SqliteLedger {
    async fn record(&self, entry: &CashFlowEntry) -> EngineResult<()> {
        let result = sqlx::query(
            "INSERT INTO cash_flows (transaction_id, timestamp, currency, amount, kind)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(transaction_id) DO NOTHING",
        )
        .bind(entry.transaction_id.as_str())
        .bind(entry.timestamp.to_rfc3339())
        .bind(&entry.currency)
        .bind(entry.amount.to_string())
        .bind(kind_to_str(entry.kind))
        .execute(&self.pool)
        .await
        .map_err(to_engine_err)?;
        if result.rows_affected() == 0 {
            return Err(EngineError::conflict(format!(
                "cash flow with transaction_id {} already recorded",
                entry.transaction_id
            )));
        }
        Ok(())
    }

    async fn exists(&self, transaction_id: &TransactionId) -> EngineResult<bool> {
        let row = sqlx::query("SELECT 1 FROM cash_flows WHERE transaction_id = ?")
            .bind(transaction_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(to_engine_err)?;
        Ok(row.is_some())
    }

    async fn since(&self, start: DateTime<Utc>) -> EngineResult<Vec<CashFlowEntry>> {
        let rows = sqlx::query("SELECT * FROM cash_flows WHERE timestamp >= ? ORDER BY timestamp ASC")
            .bind(start.to_rfc3339())
            .fetch_all(&self.pool)
            .await
            .map_err(to_engine_err)?;
        rows.into_iter().map(row_to_cash_flow).collect()
    }
}

fn row_to_cash_flow(row: sqlx::sqlite::SqliteRow) -> EngineResult<CashFlowEntry> {
    let amount: String = row.try_get("amount").map_err(to_engine_err)?;
    let timestamp: String = row.try_get("timestamp").map_err(to_engine_err)?;
    let kind: String = row.try_get("kind").map_err(to_engine_err)?;

    Ok(CashFlowEntry {
        transaction_id: TransactionId::from(row.try_get::<String, _>("transaction_id").map_err(to_engine_err)?),
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| EngineError::internal(e.to_string()))?
            .with_timezone(&Utc),
        currency: row.try_get("currency").map_err(to_engine_err)?,
        amount: Decimal::from_str(&amount).map_err(|e| EngineError::internal(e.to_string()))?,
        kind: kind_from_str(&kind)?,
    })
}

/// Unit-of-work factory pairing the durable SQLite trade/cash-flow ledger
/// with whichever `PositionRepository` holds the engine's position state
/// (spec.md invariant (ii): trades, cash flows, and positions commit
/// together or not at all). Positions are kept separately from the ledger
/// tables since they are small and fully rebuildable from trade history.
#[derive(Clone)]
pub struct SqliteUnitOfWorkFactory {
    ledger: SqliteLedger,
    position_repo: Arc<dyn PositionRepository>,
}

impl SqliteUnitOfWorkFactory {
    pub fn new(ledger: SqliteLedger, position_repo: Arc<dyn PositionRepository>) -> Self {
        Self { ledger, position_repo }
    }
}

impl UnitOfWorkFactory for SqliteUnitOfWorkFactory {
    fn begin(&self) -> Box<dyn UnitOfWork> {
        Box::new(SqliteUnitOfWork {
            ledger: self.ledger.clone(),
            position_repo: self.position_repo.clone(),
            staged_trades: Vec::new(),
            staged_cash_flows: Vec::new(),
            staged_positions: Vec::new(),
        })
    }
}

/// Stages writes locally and only applies them to the ledger/position
/// repository on `commit()`, mirroring `InMemoryUnitOfWork`'s rollback-by-
/// default-drop contract.
pub struct SqliteUnitOfWork {
    ledger: SqliteLedger,
    position_repo: Arc<dyn PositionRepository>,
    staged_trades: Vec<Trade>,
    staged_cash_flows: Vec<CashFlowEntry>,
    staged_positions: Vec<Position>,
}

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
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
            TradeRepository::record(&self.ledger, trade).await?;
        }
        for entry in &self.staged_cash_flows {
            CashFlowRepository::record(&self.ledger, entry).await?;
        }
        for position in &self.staged_positions {
            self.position_repo.upsert(position).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn ledger() -> SqliteLedger {
        SqliteLedger::new("sqlite::memory:").await.unwrap()
    }

    fn trade(order_id: &str) -> Trade {
        Trade {
            order_id: OrderId::from(order_id),
            isin: Isin::from("DE0000000000"),
            side: Side::Buy,
            quantity: dec!(10),
            price: dec!(55.5),
            currency: "EUR".to_string(),
            fees: dec!(1.5),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_order_id_conflicts_and_does_not_duplicate_row() {
        let ledger = ledger().await;
        ledger.record(&trade("ORD-1")).await.unwrap();
        let err = ledger.record(&trade("ORD-1")).await.unwrap_err();
        assert_eq!(err.kind(), crate::domain::errors::ErrorKind::Conflict);
        assert_eq!(TradeRepository::all(&ledger).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn round_trips_a_trade() {
        let ledger = ledger().await;
        let original = trade("ORD-2");
        ledger.record(&original).await.unwrap();
        let history = ledger.history(&original.isin).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].quantity, original.quantity);
        assert_eq!(history[0].price, original.price);
    }

    fn position() -> Position {
        use crate::domain::ids::BucketId;
        Position {
            isin: Isin::from("DE0000000000"),
            bucket_id: BucketId::from("core"),
            quantity: dec!(10),
            average_cost: dec!(50),
            last_price: dec!(55.5),
            currency: "EUR".to_string(),
            as_of: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unit_of_work_applies_only_on_commit() {
        let ledger = ledger().await;
        let position_repo: Arc<dyn PositionRepository> = Arc::new(crate::infrastructure::repositories::in_memory::InMemoryStore::new());
        let factory = SqliteUnitOfWorkFactory::new(ledger.clone(), position_repo.clone());

        let mut uow = factory.begin();
        let trade = trade("ORD-3");
        let pos = position();
        uow.record_trade(&trade).await.unwrap();
        uow.upsert_position(&pos).await.unwrap();

        assert!(!TradeRepository::exists(&ledger, &trade.order_id).await.unwrap());
        assert!(position_repo.get(&pos.isin).await.unwrap().is_none());

        uow.commit().await.unwrap();

        assert!(TradeRepository::exists(&ledger, &trade.order_id).await.unwrap());
        assert!(position_repo.get(&pos.isin).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unit_of_work_dropped_without_commit_applies_nothing() {
        let ledger = ledger().await;
        let position_repo: Arc<dyn PositionRepository> = Arc::new(crate::infrastructure::repositories::in_memory::InMemoryStore::new());
        let factory = SqliteUnitOfWorkFactory::new(ledger.clone(), position_repo.clone());

        let mut uow = factory.begin();
        let trade = trade("ORD-4");
        uow.record_trade(&trade).await.unwrap();
        drop(uow);

        assert!(!TradeRepository::exists(&ledger, &trade.order_id).await.unwrap());
    }
}
