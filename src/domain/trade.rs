//! Immutable, append-only trade records and the cash-flow ledger.

use crate::domain::ids::{Isin, OrderId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: OrderId,
    pub isin: Isin,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub currency: String,
    pub fees: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// Signed quantity delta this trade applies to a position: positive for
    /// BUY, negative for SELL.
    pub fn quantity_delta(&self) -> Decimal {
        self.quantity * self.side.sign()
    }

    pub fn gross_value(&self) -> Decimal {
        self.quantity * self.price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CashFlowKind {
    Deposit,
    Withdrawal,
    Dividend,
    Fee,
    Interest,
    Fx,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowEntry {
    pub transaction_id: TransactionId,
    pub timestamp: DateTime<Utc>,
    pub currency: String,
    pub amount: Decimal,
    pub kind: CashFlowKind,
}

/// Deterministic fold of a trade history into position state, per spec.md
/// invariant (i). Positions not present in `trades` are left untouched by
/// the caller; this function only folds the ISINs it sees.
pub fn reconstruct_positions(
    trades: &[Trade],
) -> std::collections::HashMap<Isin, (Decimal, Decimal)> {
    use std::collections::HashMap;
    let mut state: HashMap<Isin, (Decimal, Decimal)> = HashMap::new();

    for trade in trades {
        let entry = state
            .entry(trade.isin.clone())
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        let (qty, cost_basis) = *entry;

        match trade.side {
            Side::Buy => {
                let new_qty = qty + trade.quantity;
                let new_cost_basis = if new_qty > Decimal::ZERO {
                    (cost_basis * qty + trade.price * trade.quantity) / new_qty
                } else {
                    Decimal::ZERO
                };
                *entry = (new_qty, new_cost_basis);
            }
            Side::Sell => {
                let new_qty = qty - trade.quantity;
                // Average cost basis is unaffected by a sell.
                *entry = (new_qty, cost_basis);
            }
        }
    }

    state
}
