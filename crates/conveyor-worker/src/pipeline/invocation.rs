//! Run invocation consumer.

use conveyor_nats::dead_letter::{DeathRecord, Rejection};
use conveyor_nats::stream::Delivery;
use conveyor_nats::{Route, Topology};
use conveyor_runtime::execution::{RunId, RunInvocation};

use super::{DeliveryHandler, WorkerState, rejection};
use crate::{Result, TRACING_TARGET_PIPELINE};

/// Starts runs by publishing the trigger step of each invocation.
///
/// Invocations are retried in place through delayed redelivery, since the
/// dead-letter relay only feeds the execution route. Undecodable payloads
/// and invocations that keep failing are parked.
pub struct InvocationHandler;

impl DeliveryHandler for InvocationHandler {
    type Message = RunInvocation;

    const WORKER_NAME: &'static str = "invocation";

    fn route(topology: &Topology) -> &Route {
        &topology.invoker
    }

    async fn handle(state: &WorkerState, delivery: &Delivery<RunInvocation>) -> Result<()> {
        let mut invocation = match delivery.decode() {
            Ok(invocation) => invocation,
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET_PIPELINE,
                    error = %err,
                    "Malformed run invocation"
                );
                let record = DeathRecord::next(None, "malformed");
                rejection::park(state, delivery, &record).await?;
                delivery.term().await?;
                return Ok(());
            }
        };

        let run_id = invocation.resolve_run_id(|| message_run_id(state, delivery));
        let workflow_id = invocation.workflow_id.clone();

        match state.coordinator.start_run(invocation).await {
            Ok(step) => {
                tracing::info!(
                    target: TRACING_TARGET_PIPELINE,
                    workflow_id = %workflow_id,
                    run_id = %run_id,
                    execution_id = %step.execution_id,
                    "Run invoked"
                );
                delivery.ack().await?;
            }
            Err(err) => {
                let record = attempt_record(delivery.delivery_count(), err.reason());
                tracing::warn!(
                    target: TRACING_TARGET_PIPELINE,
                    workflow_id = %workflow_id,
                    run_id = %run_id,
                    attempt = record.count,
                    error = %err,
                    "Run invocation failed"
                );

                match state.dead_letter.on_reject(&record) {
                    Rejection::Requeue => {
                        delivery
                            .nack_with_delay(state.dead_letter.retry_delay())
                            .await?;
                    }
                    Rejection::Park => {
                        rejection::park(state, delivery, &record).await?;
                        delivery.term().await?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Run id for an invocation that carries none, derived from the message's
/// stream position so that redeliveries resume the same run.
fn message_run_id(state: &WorkerState, delivery: &Delivery<RunInvocation>) -> RunId {
    match delivery.stream_sequence() {
        Some(sequence) => {
            RunId::for_message(InvocationHandler::route(&state.topology).stream_name(), sequence)
        }
        None => RunId::generate(),
    }
}

/// Death record of a failed invocation attempt, counted by deliveries.
fn attempt_record(delivery_count: u64, reason: &str) -> DeathRecord {
    let mut record = DeathRecord::next(None, reason);
    record.count = u32::try_from(delivery_count).unwrap_or(u32::MAX);
    record
}
