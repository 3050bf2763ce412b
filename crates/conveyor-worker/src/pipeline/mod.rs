//! Queue consumers.
//!
//! - [`DeliveryHandler`]: per-route processing logic
//! - [`Worker`]: subscription, concurrency and shutdown around a handler
//! - [`WorkerHandles`]: the execution, invocation and relay workers of one
//!   process
//!
//! ## Routes
//!
//! - **Execution**: step messages fed to the coordinator
//! - **Invocation**: run requests turned into trigger steps
//! - **Relay**: dead letters held for the retry delay, then requeued

mod execution;
mod handler;
mod invocation;
mod rejection;
mod relay;
mod state;
mod worker;

pub use execution::ExecutionHandler;
pub use handler::DeliveryHandler;
pub use invocation::InvocationHandler;
pub use relay::{RelayAction, RelayHandler};
pub use state::{
    DEFAULT_ACK_WAIT_SECS, DEFAULT_DISPATCH_TIMEOUT_SECS, DEFAULT_MAX_CONCURRENT_STEPS,
    WorkerConfig, WorkerState,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
pub use worker::Worker;

use crate::{Error, Result, TRACING_TARGET_PIPELINE};

/// Type aliases for concrete worker types.
pub type ExecutionWorker = Worker<ExecutionHandler>;
pub type InvocationWorker = Worker<InvocationHandler>;
pub type RelayWorker = Worker<RelayHandler>;

/// Handles for background workers.
///
/// Holds join handles for all spawned workers, allowing graceful shutdown
/// and status monitoring.
pub struct WorkerHandles {
    execution: JoinHandle<Result<()>>,
    invocation: JoinHandle<Result<()>>,
    relay: JoinHandle<Result<()>>,
    cancel_token: CancellationToken,
}

impl WorkerHandles {
    /// Spawns the execution, invocation and relay workers.
    ///
    /// Workers bind to the durable consumers of their routes, so every
    /// process competes for the same messages. All workers share a single
    /// semaphore.
    pub fn spawn(state: &WorkerState) -> Self {
        let cancel_token = CancellationToken::new();
        let instance_id = Uuid::now_v7();
        let semaphore = state.config.create_semaphore();

        tracing::info!(
            target: TRACING_TARGET_PIPELINE,
            instance_id = %instance_id,
            max_concurrent_steps = state.config.max_concurrent_steps,
            "Starting workflow workers"
        );

        let execution =
            ExecutionWorker::new(state.clone(), cancel_token.clone(), semaphore.clone()).spawn();
        let invocation =
            InvocationWorker::new(state.clone(), cancel_token.clone(), semaphore.clone()).spawn();
        let relay = RelayWorker::new(state.clone(), cancel_token.clone(), semaphore).spawn();

        Self {
            execution,
            invocation,
            relay,
            cancel_token,
        }
    }

    /// Requests graceful shutdown of all workers.
    ///
    /// Workers stop pulling and finish the deliveries they hold.
    /// Use [`abort_all`](Self::abort_all) for immediate cancellation.
    pub fn shutdown(&self) {
        tracing::info!(
            target: TRACING_TARGET_PIPELINE,
            "Initiating graceful shutdown of workflow workers"
        );
        self.cancel_token.cancel();
    }

    /// Aborts all worker tasks immediately.
    ///
    /// Unsettled deliveries are redelivered after their ack wait.
    pub fn abort_all(&self) {
        tracing::warn!(
            target: TRACING_TARGET_PIPELINE,
            "Aborting all workflow workers immediately"
        );
        self.cancel_token.cancel();
        self.execution.abort();
        self.invocation.abort();
        self.relay.abort();
    }

    /// Checks if all workers are still running.
    pub fn all_running(&self) -> bool {
        !self.any_finished()
    }

    /// Checks if any worker has finished (possibly due to error).
    pub fn any_finished(&self) -> bool {
        self.execution.is_finished() || self.invocation.is_finished() || self.relay.is_finished()
    }

    /// Waits for all workers to complete.
    ///
    /// Returns the first error encountered, if any.
    pub async fn wait_all(&mut self) -> Result<()> {
        let (execution, invocation, relay) = tokio::join!(
            &mut self.execution,
            &mut self.invocation,
            &mut self.relay
        );

        for result in [execution, invocation, relay] {
            result.map_err(|e| Error::internal("pipeline", e.to_string()))??;
        }

        tracing::info!(
            target: TRACING_TARGET_PIPELINE,
            "All workflow workers stopped"
        );
        Ok(())
    }
}
