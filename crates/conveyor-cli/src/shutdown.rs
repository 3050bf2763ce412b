//! Stop triggers and worker draining for `conveyor serve`.

use std::future::pending;
use std::time::Duration;

use conveyor_worker::pipeline::WorkerHandles;

use crate::TRACING_TARGET_SHUTDOWN;

/// Interval at which worker liveness is checked.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Why the workers are being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// SIGINT or Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// A worker task returned on its own.
    WorkerExited,
}

impl StopCause {
    /// Whether the stop was caused by a failure rather than an operator.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::WorkerExited)
    }
}

/// Waits until an operator signal arrives or a worker stops by itself.
pub async fn stop_requested(workers: &WorkerHandles) -> StopCause {
    let cause = tokio::select! {
        cause = signal() => cause,
        () = any_worker_exit(workers) => StopCause::WorkerExited,
    };

    if cause.is_failure() {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            "Worker exited unexpectedly, stopping the remaining workers"
        );
    } else {
        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            cause = ?cause,
            "Stop signal received"
        );
    }
    cause
}

/// Cancels the workers and lets in-flight deliveries settle for up to
/// `timeout`.
///
/// Workers still busy after the timeout are aborted. Their unsettled
/// deliveries come back after the consumer's ack wait.
pub async fn drain(mut workers: WorkerHandles, timeout: Duration) -> anyhow::Result<()> {
    tracing::info!(
        target: TRACING_TARGET_SHUTDOWN,
        timeout_secs = timeout.as_secs(),
        "Draining in-flight deliveries"
    );
    workers.shutdown();

    match tokio::time::timeout(timeout, workers.wait_all()).await {
        Ok(result) => {
            result?;
            tracing::info!(target: TRACING_TARGET_SHUTDOWN, "Workers drained");
            Ok(())
        }
        Err(_) => {
            workers.abort_all();
            anyhow::bail!("workers did not drain within {}s", timeout.as_secs())
        }
    }
}

async fn signal() -> StopCause {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => StopCause::Interrupt,
            Err(e) => {
                tracing::error!(
                    target: TRACING_TARGET_SHUTDOWN,
                    error = %e,
                    "Failed to install Ctrl+C handler"
                );
                pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                StopCause::Terminate
            }
            Err(e) => {
                tracing::error!(
                    target: TRACING_TARGET_SHUTDOWN,
                    error = %e,
                    "Failed to install SIGTERM handler"
                );
                pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = pending::<StopCause>();

    tokio::select! {
        cause = interrupt => cause,
        cause = terminate => cause,
    }
}

async fn any_worker_exit(workers: &WorkerHandles) {
    let mut interval = tokio::time::interval(LIVENESS_INTERVAL);
    while workers.all_running() {
        interval.tick().await;
    }
}
