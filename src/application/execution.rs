//! Trade execution and the seven-layer safety gate (spec.md §4.J). The gate
//! runs ahead of every manual or planner-originated trade; in research mode
//! execution stops after the gate and a `Recommendation` is written instead
//! of touching the brokerage.

use crate::domain::action::ActionCandidate;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ids::{BucketId, Isin, OrderId};
use crate::domain::ports::{BrokerageAdapter, PendingOrder};
use crate::domain::position::Position;
use crate::domain::repositories::UnitOfWork;
use crate::domain::security::{ProductType, Security};
use crate::domain::settings::Settings;
use crate::domain::trade::{Side, Trade};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;

/// Everything the safety gate needs to know about the world, assembled by
/// the caller (manual-trade API or planner-driven execution) from the
/// current repository state. Kept a plain struct, not trait objects, since
/// the gate itself performs no I/O.
pub struct GateContext<'a> {
    pub as_of: DateTime<Utc>,
    pub market_open: bool,
    pub bucket_id: BucketId,
    pub security: Option<&'a Security>,
    pub position: Option<&'a Position>,
    pub last_buy_at: Option<&'a DateTime<Utc>>,
    pub position_opened_at: Option<&'a DateTime<Utc>>,
    pub pending_order_isins: &'a HashSet<Isin>,
    pub available_cash: Decimal,
    pub symbol: Option<&'a str>,
}

/// Seven sequential checks; the first failure aborts with a descriptive
/// `EngineError::precondition`, matching spec.md §4.J's "any failure aborts
/// with a specific error kind" (the kind is uniformly `Precondition`, the
/// message names which of the seven checks failed).
pub struct SafetyGate {
    settings: Arc<Settings>,
}

impl SafetyGate {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    pub fn check(&self, candidate: &ActionCandidate, ctx: &GateContext<'_>) -> EngineResult<()> {
        self.check_market_hours(ctx)?;
        self.check_buy_cooldown(candidate, ctx)?;
        self.check_pending_order(candidate, ctx)?;
        self.check_min_hold(candidate, ctx)?;
        self.check_position_validity(candidate, ctx)?;
        self.check_cash_sufficiency(candidate, ctx)?;
        self.resolve_symbol(ctx)?;
        Ok(())
    }

    fn check_market_hours(&self, ctx: &GateContext<'_>) -> EngineResult<()> {
        if !ctx.market_open {
            return Err(EngineError::precondition("market is closed for this exchange"));
        }
        Ok(())
    }

    fn check_buy_cooldown(&self, candidate: &ActionCandidate, ctx: &GateContext<'_>) -> EngineResult<()> {
        if candidate.side != Side::Buy {
            return Ok(());
        }
        let cooldown_days = self.settings.get_f64("buy_cooldown_days") as i64;
        if let Some(last_buy) = ctx.last_buy_at {
            if (ctx.as_of - *last_buy).num_days() < cooldown_days {
                return Err(EngineError::precondition(format!(
                    "buy cooldown active for {}: {} days remain",
                    candidate.isin,
                    cooldown_days - (ctx.as_of - *last_buy).num_days()
                )));
            }
        }
        Ok(())
    }

    fn check_pending_order(&self, candidate: &ActionCandidate, ctx: &GateContext<'_>) -> EngineResult<()> {
        if ctx.pending_order_isins.contains(&candidate.isin) {
            return Err(EngineError::precondition(format!(
                "open order already pending for {}",
                candidate.isin
            )));
        }
        Ok(())
    }

    fn check_min_hold(&self, candidate: &ActionCandidate, ctx: &GateContext<'_>) -> EngineResult<()> {
        if candidate.side != Side::Sell {
            return Ok(());
        }
        let min_hold_days = self.settings.get_f64("min_hold_days") as i64;
        match ctx.position_opened_at {
            Some(opened_at) if (ctx.as_of - *opened_at).num_days() < min_hold_days => {
                Err(EngineError::precondition(format!(
                    "minimum hold period not elapsed for {}",
                    candidate.isin
                )))
            }
            _ => Ok(()),
        }
    }

    fn check_position_validity(&self, candidate: &ActionCandidate, ctx: &GateContext<'_>) -> EngineResult<()> {
        let security = ctx
            .security
            .ok_or_else(|| EngineError::precondition(format!("{} is not a recognized security", candidate.isin)))?;
        if !security.active {
            return Err(EngineError::precondition(format!("{} is not active for trading", candidate.isin)));
        }
        if security.product_type == ProductType::Unknown {
            return Err(EngineError::precondition(format!("{} has no permitted product type", candidate.isin)));
        }
        if candidate.side == Side::Sell {
            let owned = ctx.position.map(|p| p.quantity).unwrap_or(Decimal::ZERO);
            if owned < candidate.quantity {
                return Err(EngineError::precondition(format!(
                    "cannot sell {} of {}, only {owned} held",
                    candidate.quantity, candidate.isin
                )));
            }
        }
        Ok(())
    }

    fn check_cash_sufficiency(&self, candidate: &ActionCandidate, ctx: &GateContext<'_>) -> EngineResult<()> {
        if candidate.side != Side::Buy {
            return Ok(());
        }
        let needed = candidate.quantity * candidate.estimated_price;
        if ctx.available_cash < needed {
            return Err(EngineError::precondition(format!(
                "insufficient cash for {}: need {needed}, have {}",
                candidate.isin, ctx.available_cash
            )));
        }
        Ok(())
    }

    fn resolve_symbol(&self, ctx: &GateContext<'_>) -> EngineResult<()> {
        if ctx.symbol.is_none() {
            return Err(EngineError::precondition("no brokerage symbol mapping for this ISIN"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Research mode: the gate passed but no order was placed.
    RecordedOnly,
    Executed { order_id: OrderId },
}

/// Places orders through the brokerage adapter and records the resulting
/// trade within a single unit of work, so positions never diverge from the
/// trade ledger (spec.md invariant (ii)). The caller supplies a stable
/// client order id per candidate; if the brokerage echoes back an
/// `order_id` that has already been recorded, `commit()` fails with
/// `Conflict` rather than applying the fill twice.
pub struct Executor {
    brokerage: Arc<dyn BrokerageAdapter>,
    gate: SafetyGate,
    trading_mode_is_live: bool,
}

impl Executor {
    pub fn new(brokerage: Arc<dyn BrokerageAdapter>, settings: Arc<Settings>) -> Self {
        let trading_mode_is_live = settings.get_str("trading_mode") == "live";
        Self {
            brokerage,
            gate: SafetyGate::new(settings),
            trading_mode_is_live,
        }
    }

    /// Runs the safety gate, then either records a research-mode
    /// recommendation marker or places the order live and folds the fill
    /// into the provided unit of work.
    pub async fn execute(
        &self,
        candidate: &ActionCandidate,
        client_order_id: String,
        gate_ctx: GateContext<'_>,
        uow: &mut dyn UnitOfWork,
    ) -> EngineResult<ExecutionOutcome> {
        self.gate.check(candidate, &gate_ctx)?;

        if !self.trading_mode_is_live {
            return Ok(ExecutionOutcome::RecordedOnly);
        }

        let order = PendingOrder {
            isin: candidate.isin.clone(),
            side: candidate.side,
            quantity: candidate.quantity,
            currency: candidate.currency.clone(),
            client_order_id,
        };
        let ack = self.brokerage.place_order(&order).await?;

        let trade = Trade {
            order_id: ack.order_id.clone(),
            isin: candidate.isin.clone(),
            side: candidate.side,
            quantity: candidate.quantity,
            price: candidate.estimated_price,
            currency: candidate.currency.clone(),
            fees: Decimal::ZERO,
            timestamp: ack.accepted_at,
        };
        uow.record_trade(&trade).await?;

        let mut position = gate_ctx
            .position
            .cloned()
            .unwrap_or_else(|| Position {
                isin: candidate.isin.clone(),
                bucket_id: gate_ctx.bucket_id.clone(),
                quantity: Decimal::ZERO,
                average_cost: candidate.estimated_price,
                last_price: candidate.estimated_price,
                currency: candidate.currency.clone(),
                as_of: ack.accepted_at,
            });
        let prior_value = position.quantity * position.average_cost;
        position.quantity += trade.quantity_delta();
        if trade.side == Side::Buy && position.quantity > Decimal::ZERO {
            position.average_cost = (prior_value + trade.gross_value()) / position.quantity;
        }
        position.last_price = trade.price;
        position.as_of = ack.accepted_at;
        uow.upsert_position(&position).await?;

        Ok(ExecutionOutcome::Executed { order_id: ack.order_id })
    }
}
