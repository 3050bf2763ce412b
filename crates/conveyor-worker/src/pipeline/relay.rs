//! Dead-letter retry relay.
//!
//! Holds each dead letter until the retry delay has elapsed since it was
//! rejected, then returns it to the execution route with its death history.

use std::time::Duration;

use conveyor_nats::dead_letter::DeathRecord;
use conveyor_nats::stream::Delivery;
use conveyor_nats::{Route, Topology};
use conveyor_runtime::execution::StepExecution;
use jiff::Timestamp;

use super::{DeliveryHandler, WorkerState, rejection};
use crate::{Result, TRACING_TARGET_PIPELINE};

/// What the relay does with a dead letter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Not due yet; redeliver after the remaining delay.
    Hold(Duration),
    /// Due; republish to the execution route.
    Requeue(DeathRecord),
    /// No death history; cannot be retried safely.
    Park,
}

impl RelayAction {
    /// Decides the action for a dead letter with `record` at `now`.
    pub fn decide(record: Option<DeathRecord>, delay: Duration, now: Timestamp) -> Self {
        let Some(record) = record else {
            return Self::Park;
        };
        match record.remaining(delay, now) {
            remaining if remaining.is_zero() => Self::Requeue(record),
            remaining => Self::Hold(remaining),
        }
    }
}

/// Consumer of the dead-letter route.
pub struct RelayHandler;

impl DeliveryHandler for RelayHandler {
    type Message = StepExecution;

    const WORKER_NAME: &'static str = "relay";

    fn route(topology: &Topology) -> &Route {
        &topology.dead_letter
    }

    async fn handle(state: &WorkerState, delivery: &Delivery<StepExecution>) -> Result<()> {
        let record = DeathRecord::from_headers(delivery.headers());
        let delay = state.dead_letter.retry_delay();

        match RelayAction::decide(record, delay, Timestamp::now()) {
            RelayAction::Hold(remaining) => {
                tracing::trace!(
                    target: TRACING_TARGET_PIPELINE,
                    remaining_ms = remaining.as_millis(),
                    "Dead letter not due yet"
                );
                delivery.nack_with_delay(remaining).await?;
            }
            RelayAction::Requeue(record) => {
                rejection::forward(state, &state.topology.execution, delivery, &record).await?;
                delivery.ack().await?;
                tracing::info!(
                    target: TRACING_TARGET_PIPELINE,
                    death_count = record.count,
                    reason = %record.reason,
                    "Dead letter requeued"
                );
            }
            RelayAction::Park => {
                let record = DeathRecord::next(None, "missing_death_history");
                rejection::park(state, delivery, &record).await?;
                delivery.ack().await?;
            }
        }
        Ok(())
    }
}
