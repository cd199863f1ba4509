//! Process-local event types published by the scheduler, planner, and
//! satellite controller (spec.md §4.K).

use crate::domain::bucket::BucketState;
use crate::domain::ids::BucketId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    SyncComplete {
        timestamp: i64,
        securities_updated: usize,
    },
    RecommendationReady {
        portfolio_hash: String,
        end_state_score: f64,
    },
    ExecutionOutcome {
        order_id: String,
        success: bool,
        reason: Option<String>,
    },
    SatelliteLifecycleChanged {
        bucket_id: BucketId,
        from: BucketState,
        to: BucketState,
    },
    SchedulerJobFailed {
        job_name: String,
        reason: String,
    },
    EmergencyRebalanceTriggered {
        currency: String,
        deficit: Decimal,
    },
}

/// Listener trait mirroring the teacher's `EventListener`: synchronous,
/// must never block the publisher (spec.md §5 ordering guarantee: FIFO
/// per subscriber, delivery happens inline on the publish call).
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn on_event(&self, event: &EngineEvent) {
        tracing::info!(?event, "engine event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_listener_does_not_panic() {
        let listener = LoggingListener;
        listener.on_event(&EngineEvent::SyncComplete {
            timestamp: 0,
            securities_updated: 3,
        });
    }
}
