//! Destination for continuation messages and terminal results.

use crate::error::OutboxError;
use crate::execution::{ExecutionResult, RunInvocation, StepExecution};

/// Publishes the messages a step produces.
///
/// Implementations must only return once the message is durably accepted
/// by the transport.
#[async_trait::async_trait]
pub trait Outbox: Send + Sync {
    /// Publishes a pending step onto the execution queue.
    async fn publish_step(&self, step: &StepExecution) -> Result<(), OutboxError>;

    /// Publishes a terminal result to the completion sink.
    async fn publish_result(&self, result: &ExecutionResult) -> Result<(), OutboxError>;

    /// Publishes a run invocation onto the invoker queue.
    async fn publish_invocation(&self, invocation: &RunInvocation) -> Result<(), OutboxError>;
}
