//! Moving rejected deliveries onto the dead-letter and parked routes.

use conveyor_nats::Route;
use conveyor_nats::dead_letter::{DeathRecord, Rejection};
use conveyor_nats::stream::{Delivery, StreamPublisher};
use conveyor_runtime::execution::StepExecution;

use super::WorkerState;
use crate::{Result, TRACING_TARGET_PIPELINE};

/// Republishes the raw payload of `delivery` to `route` with the death
/// history of `record`.
pub(crate) async fn forward<T>(
    state: &WorkerState,
    route: &Route,
    delivery: &Delivery<T>,
    record: &DeathRecord,
) -> Result<()> {
    let publisher: StreamPublisher<StepExecution> = state.nats.publisher(route);
    publisher
        .publish_raw(delivery.payload().clone(), Some(record.to_headers()))
        .await?;
    Ok(())
}

/// Publishes a delivery to the parked route and logs it.
pub(crate) async fn park<T>(
    state: &WorkerState,
    delivery: &Delivery<T>,
    record: &DeathRecord,
) -> Result<()> {
    forward(state, &state.topology.parked, delivery, record).await?;
    tracing::error!(
        target: TRACING_TARGET_PIPELINE,
        subject = %delivery.subject(),
        death_count = record.count,
        reason = %record.reason,
        "Message parked after exhausting retries"
    );
    Ok(())
}

/// Rejects a delivery that could not be processed.
///
/// The message is dead-lettered with an incremented death count, or parked
/// once the retry limit is exceeded. The original delivery is terminated
/// only after the copy is stored.
pub(crate) async fn reject<T>(
    state: &WorkerState,
    delivery: &Delivery<T>,
    reason: &str,
) -> Result<Rejection> {
    let previous = DeathRecord::from_headers(delivery.headers());
    let record = DeathRecord::next(previous.as_ref(), reason);
    let rejection = state.dead_letter.on_reject(&record);

    match rejection {
        Rejection::Requeue => {
            forward(state, &state.topology.dead_letter, delivery, &record).await?;
            tracing::warn!(
                target: TRACING_TARGET_PIPELINE,
                subject = %delivery.subject(),
                death_count = record.count,
                reason = %record.reason,
                retry_delay_secs = state.dead_letter.retry_delay_secs,
                "Message dead-lettered"
            );
        }
        Rejection::Park => park(state, delivery, &record).await?,
    }

    delivery.term().await?;
    Ok(rejection)
}
