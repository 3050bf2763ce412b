//! Outbox publishing onto JetStream routes.

use conveyor_nats::stream::StreamPublisher;
use conveyor_nats::{NatsClient, Topology};
use conveyor_runtime::OutboxError;
use conveyor_runtime::engine::Outbox;
use conveyor_runtime::execution::{ExecutionResult, RunInvocation, StepExecution};
use serde::Serialize;

use crate::TRACING_TARGET_LEDGER;

/// [`Outbox`] backed by the execution, completion and invoker streams.
#[derive(Debug, Clone)]
pub struct NatsOutbox {
    steps: StreamPublisher<StepExecution>,
    results: StreamPublisher<ExecutionResult>,
    invocations: StreamPublisher<RunInvocation>,
}

impl NatsOutbox {
    /// Creates publishers for the routes of `topology`.
    pub fn new(nats: &NatsClient, topology: &Topology) -> Self {
        Self {
            steps: nats.publisher(&topology.execution),
            results: nats.publisher(&topology.completion),
            invocations: nats.publisher(&topology.invoker),
        }
    }
}

async fn publish<T>(publisher: &StreamPublisher<T>, message: &T) -> Result<(), OutboxError>
where
    T: Serialize + Send + Sync + 'static,
{
    publisher.publish(message).await.map_err(|err| {
        tracing::warn!(
            target: TRACING_TARGET_LEDGER,
            route = %publisher.route(),
            error = %err,
            "Outbox publish failed"
        );
        OutboxError::new(publisher.route().to_string(), err.to_string())
    })
}

#[async_trait::async_trait]
impl Outbox for NatsOutbox {
    async fn publish_step(&self, step: &StepExecution) -> Result<(), OutboxError> {
        publish(&self.steps, step).await
    }

    async fn publish_result(&self, result: &ExecutionResult) -> Result<(), OutboxError> {
        publish(&self.results, result).await
    }

    async fn publish_invocation(&self, invocation: &RunInvocation) -> Result<(), OutboxError> {
        publish(&self.invocations, invocation).await
    }
}
