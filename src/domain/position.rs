//! Positions, derived deterministically from trade history (invariant (i)
//! in spec.md §3: never hand-edited except by reconciliation).

use crate::domain::ids::{BucketId, Isin};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub isin: Isin,
    /// Which bucket (core or a satellite) holds this position. Satellite
    /// lifecycle maintenance filters positions on this field so one
    /// bucket's drawdown/cooldown state is never driven by another
    /// bucket's holdings.
    pub bucket_id: BucketId,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub last_price: Decimal,
    pub currency: String,
    pub as_of: DateTime<Utc>,
}

impl Position {
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.last_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.last_price - self.average_cost) * self.quantity
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pos(qty: Decimal, avg: Decimal, last: Decimal) -> Position {
        Position {
            isin: Isin::from("DE0000000000"),
            bucket_id: BucketId::from("core"),
            quantity: qty,
            average_cost: avg,
            last_price: last,
            currency: "EUR".to_string(),
            as_of: Utc::now(),
        }
    }

    #[test]
    fn market_value_is_qty_times_last_price() {
        let p = pos(dec!(10), dec!(100), dec!(110));
        assert_eq!(p.market_value(), dec!(1100));
    }

    #[test]
    fn unrealized_pnl_profit_and_loss() {
        assert_eq!(pos(dec!(10), dec!(100), dec!(110)).unrealized_pnl(), dec!(100));
        assert_eq!(pos(dec!(5), dec!(200), dec!(180)).unrealized_pnl(), dec!(-100));
    }
}
