//! Generic queue consumer.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use conveyor_nats::stream::{Delivery, DeliveryStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{DeliveryHandler, WorkerState};
use crate::{Error, Result, TRACING_TARGET_PIPELINE};

/// Pause after a failed receive before polling again.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// Queue consumer for one route.
///
/// Subscribes to the route's durable consumer, processes deliveries
/// concurrently up to the semaphore's permits and stops on cancellation.
/// In-flight deliveries are allowed to finish before the spawned task
/// completes.
pub struct Worker<H: DeliveryHandler> {
    state: WorkerState,
    cancel_token: CancellationToken,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    _marker: PhantomData<H>,
}

impl<H: DeliveryHandler> Worker<H> {
    /// Creates a new worker with the given handler type.
    pub fn new(
        state: WorkerState,
        cancel_token: CancellationToken,
        semaphore: Arc<Semaphore>,
    ) -> Self {
        Self {
            state,
            cancel_token,
            semaphore,
            tracker: TaskTracker::new(),
            _marker: PhantomData,
        }
    }

    /// Spawns the worker as a background task.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) -> Result<()> {
        let route = H::route(&self.state.topology).clone();
        tracing::info!(
            target: TRACING_TARGET_PIPELINE,
            worker = H::WORKER_NAME,
            route = %route,
            "Starting worker"
        );

        let subscriber = self
            .state
            .nats
            .subscriber::<H::Message>(&route, self.state.config.consumer_options());
        let mut stream = subscriber.subscribe().await?;

        let result = self.consume(&mut stream).await;

        self.tracker.close();
        self.tracker.wait().await;

        tracing::info!(
            target: TRACING_TARGET_PIPELINE,
            worker = H::WORKER_NAME,
            "Worker stopped"
        );
        result
    }

    async fn consume(&self, stream: &mut DeliveryStream<H::Message>) -> Result<()> {
        loop {
            let permit = tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => break,

                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::error!(
                            target: TRACING_TARGET_PIPELINE,
                            worker = H::WORKER_NAME,
                            "Semaphore closed, stopping worker"
                        );
                        break;
                    }
                },
            };

            let next = tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => break,

                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.process(delivery, permit),
                Some(Err(err)) => {
                    tracing::error!(
                        target: TRACING_TARGET_PIPELINE,
                        worker = H::WORKER_NAME,
                        error = %err,
                        "Failed to receive message"
                    );
                    tokio::time::sleep(RECEIVE_BACKOFF).await;
                }
                None => {
                    return Err(Error::external(
                        "nats",
                        format!("{} message stream closed", H::WORKER_NAME),
                    ));
                }
            }
        }

        tracing::info!(
            target: TRACING_TARGET_PIPELINE,
            worker = H::WORKER_NAME,
            "Shutdown requested, stopping worker"
        );
        Ok(())
    }

    fn process(&self, delivery: Delivery<H::Message>, permit: OwnedSemaphorePermit) {
        let state = self.state.clone();

        self.tracker.spawn(async move {
            // Hold permit until the delivery is settled
            let _permit = permit;

            if let Err(err) = H::handle(&state, &delivery).await {
                tracing::error!(
                    target: TRACING_TARGET_PIPELINE,
                    worker = H::WORKER_NAME,
                    subject = %delivery.subject(),
                    error = %err,
                    "Delivery handling failed, requesting redelivery"
                );
                if let Err(err) = delivery.nack().await {
                    tracing::error!(
                        target: TRACING_TARGET_PIPELINE,
                        worker = H::WORKER_NAME,
                        error = %err,
                        "Failed to nack message"
                    );
                }
            }
        });
    }
}
