//! Satellite bucket lifecycle state machine (spec.md §4.H).

use crate::domain::allocation::AllocationTargets;
use crate::domain::ids::BucketId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketState {
    Active,
    Hibernating,
    CoolingDown,
    CircuitBroken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub id: BucketId,
    pub name: String,
    pub currency: String,
    pub allocation_targets: AllocationTargets,
    pub state: BucketState,
    pub high_water_mark: Decimal,
    pub consecutive_losing_evaluations: u32,
    pub cooling_down_since: Option<DateTime<Utc>>,
    pub reawaken_step: u8,
}

/// Drawdown fraction ([0,1]) at which an ACTIVE bucket hibernates.
pub const HIBERNATION_DRAWDOWN_THRESHOLD: f64 = 0.35;
/// Consecutive negative evaluations that trip the circuit breaker.
pub const CIRCUIT_BREAKER_LOSS_STREAK: u32 = 3;
/// Number of graduated steps a COOLING_DOWN bucket works through before
/// returning to ACTIVE.
pub const REAWAKENING_STEPS: u8 = 3;

impl Bucket {
    pub fn core(currency: impl Into<String>) -> Self {
        Self {
            id: BucketId::from("core"),
            name: "core".to_string(),
            currency: currency.into(),
            allocation_targets: AllocationTargets::new(),
            state: BucketState::Active,
            high_water_mark: Decimal::ZERO,
            consecutive_losing_evaluations: 0,
            cooling_down_since: None,
            reawaken_step: 0,
        }
    }

    pub fn drawdown(&self, current_value: Decimal) -> f64 {
        if self.high_water_mark <= Decimal::ZERO {
            return 0.0;
        }
        let dd = (self.high_water_mark - current_value) / self.high_water_mark;
        dd.max(Decimal::ZERO)
            .to_string()
            .parse::<f64>()
            .unwrap_or(0.0)
    }

    /// Maintenance-job tick: refresh high-water mark, evaluate drawdown,
    /// toggle lifecycle accordingly. Transitions are atomic with the
    /// balance update by virtue of taking `&mut self` in one call.
    pub fn apply_maintenance_tick(&mut self, current_value: Decimal, now: DateTime<Utc>) {
        if current_value > self.high_water_mark {
            self.high_water_mark = current_value;
            self.consecutive_losing_evaluations = 0;
        }

        if self.state == BucketState::Active {
            let dd = self.drawdown(current_value);
            if dd >= HIBERNATION_DRAWDOWN_THRESHOLD {
                self.state = BucketState::Hibernating;
                self.cooling_down_since = None;
            }
        }
    }

    /// Transition HIBERNATING -> COOLING_DOWN once the configured
    /// cooling-down period has elapsed.
    pub fn maybe_begin_cooldown(&mut self, cooldown_period: chrono::Duration, now: DateTime<Utc>) {
        if self.state != BucketState::Hibernating {
            return;
        }
        match self.cooling_down_since {
            None => self.cooling_down_since = Some(now),
            Some(since) if now - since >= cooldown_period => {
                self.state = BucketState::CoolingDown;
                self.reawaken_step = 0;
            }
            _ => {}
        }
    }

    /// One graduated reawakening step; transitions to ACTIVE once all
    /// steps have been completed.
    pub fn advance_reawakening(&mut self) {
        if self.state != BucketState::CoolingDown {
            return;
        }
        self.reawaken_step += 1;
        if self.reawaken_step >= REAWAKENING_STEPS {
            self.state = BucketState::Active;
            self.reawaken_step = 0;
            self.cooling_down_since = None;
        }
    }

    /// Record the outcome of one planner evaluation for this bucket; three
    /// consecutive losing evaluations trips the circuit breaker.
    pub fn record_evaluation(&mut self, was_losing: bool) {
        if self.state != BucketState::Active {
            return;
        }
        if was_losing {
            self.consecutive_losing_evaluations += 1;
            if self.consecutive_losing_evaluations >= CIRCUIT_BREAKER_LOSS_STREAK {
                self.state = BucketState::CircuitBroken;
            }
        } else {
            self.consecutive_losing_evaluations = 0;
        }
    }

    /// Manual reset: CIRCUIT_BROKEN -> COOLING_DOWN.
    pub fn manual_reset(&mut self) {
        if self.state == BucketState::CircuitBroken {
            self.state = BucketState::CoolingDown;
            self.reawaken_step = 0;
            self.consecutive_losing_evaluations = 0;
        }
    }

    /// No BUY sequences should be generated while hibernating or circuit
    /// broken.
    pub fn accepts_buys(&self) -> bool {
        matches!(self.state, BucketState::Active | BucketState::CoolingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn drawdown_of_exactly_threshold_hibernates() {
        let mut bucket = Bucket::core("EUR");
        bucket.high_water_mark = dec!(20000);
        bucket.apply_maintenance_tick(dec!(12999), Utc::now());
        // drawdown = (20000-12999)/20000 = 0.35005
        assert_eq!(bucket.state, BucketState::Hibernating);
    }

    #[test]
    fn new_high_resets_loss_counter() {
        let mut bucket = Bucket::core("EUR");
        bucket.high_water_mark = dec!(10000);
        bucket.consecutive_losing_evaluations = 2;
        bucket.apply_maintenance_tick(dec!(11000), Utc::now());
        assert_eq!(bucket.consecutive_losing_evaluations, 0);
        assert_eq!(bucket.high_water_mark, dec!(11000));
    }

    #[test]
    fn three_losing_evaluations_trip_circuit_breaker() {
        let mut bucket = Bucket::core("EUR");
        bucket.record_evaluation(true);
        bucket.record_evaluation(true);
        assert_eq!(bucket.state, BucketState::Active);
        bucket.record_evaluation(true);
        assert_eq!(bucket.state, BucketState::CircuitBroken);
    }

    #[test]
    fn full_lifecycle_round_trip() {
        let mut bucket = Bucket::core("EUR");
        bucket.high_water_mark = dec!(20000);
        bucket.apply_maintenance_tick(dec!(10000), Utc::now());
        assert_eq!(bucket.state, BucketState::Hibernating);
        assert!(!bucket.accepts_buys());

        let now = Utc::now();
        bucket.maybe_begin_cooldown(chrono::Duration::days(30), now);
        assert_eq!(bucket.cooling_down_since, Some(now));
        bucket.maybe_begin_cooldown(chrono::Duration::days(30), now + chrono::Duration::days(31));
        assert_eq!(bucket.state, BucketState::CoolingDown);

        bucket.advance_reawakening();
        bucket.advance_reawakening();
        assert_eq!(bucket.state, BucketState::CoolingDown);
        bucket.advance_reawakening();
        assert_eq!(bucket.state, BucketState::Active);
    }

    #[test]
    fn manual_reset_from_circuit_broken() {
        let mut bucket = Bucket::core("EUR");
        bucket.state = BucketState::CircuitBroken;
        bucket.manual_reset();
        assert_eq!(bucket.state, BucketState::CoolingDown);
    }
}
