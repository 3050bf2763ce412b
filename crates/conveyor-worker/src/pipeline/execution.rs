//! Step execution consumer.

use conveyor_nats::stream::Delivery;
use conveyor_nats::{Route, Topology};
use conveyor_runtime::engine::Disposition;
use conveyor_runtime::execution::StepExecution;

use super::{DeliveryHandler, WorkerState, rejection};
use crate::{Result, TRACING_TARGET_PIPELINE};

/// Feeds step messages to the coordinator.
///
/// Every handled message is acknowledged, including steps whose handler
/// failed. Messages the coordinator cannot process are rejected onto the
/// dead-letter route.
pub struct ExecutionHandler;

impl DeliveryHandler for ExecutionHandler {
    type Message = StepExecution;

    const WORKER_NAME: &'static str = "execution";

    fn route(topology: &Topology) -> &Route {
        &topology.execution
    }

    async fn handle(state: &WorkerState, delivery: &Delivery<StepExecution>) -> Result<()> {
        match state.coordinator.handle_raw(delivery.payload()).await {
            Ok(disposition) => {
                log_disposition(disposition, delivery.delivery_count());
                delivery.ack().await?;
            }
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET_PIPELINE,
                    reason = err.reason(),
                    error = %err,
                    "Step message could not be processed"
                );
                rejection::reject(state, delivery, err.reason()).await?;
            }
        }
        Ok(())
    }
}

fn log_disposition(disposition: Disposition, delivery_count: u64) {
    match disposition {
        Disposition::Continued { published } => tracing::debug!(
            target: TRACING_TARGET_PIPELINE,
            published,
            "Step continued"
        ),
        Disposition::Finished { success } => tracing::debug!(
            target: TRACING_TARGET_PIPELINE,
            success,
            "Branch finished"
        ),
        Disposition::Duplicate => tracing::info!(
            target: TRACING_TARGET_PIPELINE,
            delivery_count,
            "Duplicate step message dropped"
        ),
        Disposition::Replayed => tracing::info!(
            target: TRACING_TARGET_PIPELINE,
            delivery_count,
            "Stored step effects republished"
        ),
    }
}
