//! Workflow error types.

use std::time::Duration;

use thiserror::Error;

use crate::definition::{NodeId, StepType, WorkflowId};
use crate::dispatch::ActionError;
use crate::execution::{ExecutionId, RunId, StepStatus};

/// Result type for workflow definition operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised while building or validating workflow definitions.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Two nodes share the same identifier.
    #[error("duplicate node id '{0}'")]
    DuplicateNode(NodeId),

    /// The definition has no trigger node.
    #[error("workflow has no trigger node")]
    MissingTrigger,

    /// The definition has more than one trigger node.
    #[error("workflow has {} trigger nodes, expected exactly one", .0.len())]
    MultipleTriggers(Vec<NodeId>),

    /// Another node points back at the trigger.
    #[error("trigger node '{trigger}' is referenced by '{from}'")]
    TriggerReferenced {
        /// The trigger node.
        trigger: NodeId,
        /// The node listing the trigger as a next step.
        from: NodeId,
    },

    /// The version string does not match the requested requirement.
    #[error("workflow version '{version}' does not satisfy '{requirement}'")]
    IncompatibleVersion {
        /// Version declared by the definition.
        version: String,
        /// Requirement it was checked against.
        requirement: String,
    },

    /// The version string is not valid semver.
    #[error("invalid workflow version '{version}': {source}")]
    InvalidVersion {
        /// Version declared by the definition.
        version: String,
        /// Parse failure.
        #[source]
        source: semver::Error,
    },

    /// A step status change that the lifecycle does not allow.
    #[error("invalid step status transition {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: StepStatus,
        /// Requested status.
        to: StepStatus,
    },

    /// Definition file could not be read.
    #[error("failed to read workflow definition: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by the action dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler is registered for the step type.
    ///
    /// Fatal for the step: the graph references a handler that does not exist.
    #[error("no action handler registered for step type '{0}'")]
    UnknownActionType(StepType),

    /// The handler reported a failure.
    #[error(transparent)]
    Handler(#[from] ActionError),

    /// The handler did not finish within its timeout.
    #[error("action handler for '{step_type}' timed out after {timeout:?}")]
    Timeout {
        /// Step type whose handler timed out.
        step_type: StepType,
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

impl DispatchError {
    /// Returns whether this error is a legitimate step outcome
    /// (handler failure or timeout) rather than an engine fault.
    #[must_use]
    pub const fn is_handler_failure(&self) -> bool {
        matches!(self, Self::Handler(_) | Self::Timeout { .. })
    }
}

/// Errors raised by a [`DefinitionStore`](crate::engine::DefinitionStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// No definition exists for the identifier.
    #[error("workflow '{0}' not found")]
    NotFound(WorkflowId),

    /// The store backend failed.
    #[error("definition store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by a [`RunLedger`](crate::engine::RunLedger).
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No claim exists for the step being completed.
    #[error("no ledger record for run '{run_id}' step '{step_id}'")]
    MissingRecord {
        /// Run identifier.
        run_id: RunId,
        /// Step identifier.
        step_id: NodeId,
    },

    /// The record is owned by a different execution.
    #[error("ledger record is owned by execution {owner}, not {execution_id}")]
    NotOwner {
        /// Execution currently holding the claim.
        owner: ExecutionId,
        /// Execution that attempted the write.
        execution_id: ExecutionId,
    },

    /// The ledger backend failed.
    #[error("run ledger unavailable: {0}")]
    Backend(String),
}

/// Errors raised by an [`Outbox`](crate::engine::Outbox).
#[derive(Debug, Error)]
#[error("failed to publish to '{destination}': {reason}")]
pub struct OutboxError {
    /// Where the message was headed.
    pub destination: String,
    /// Why it failed.
    pub reason: String,
}

impl OutboxError {
    /// Creates a new outbox error.
    pub fn new(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            reason: reason.into(),
        }
    }
}

/// Failures that prevent the coordinator from attempting a step at all.
///
/// The message carrying the step is rejected onto the dead-letter path.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The payload is not a valid step execution message.
    #[error("malformed step message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The message is not in the `pending` state.
    #[error("execution {execution_id} arrived with status '{status}', expected 'pending'")]
    UnexpectedStatus {
        /// Execution identifier.
        execution_id: ExecutionId,
        /// Status carried by the message.
        status: StepStatus,
    },

    /// The workflow definition does not exist.
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(WorkflowId),

    /// The step is not part of the workflow definition.
    #[error("workflow '{workflow_id}' has no step '{step_id}'")]
    UnknownStep {
        /// Workflow identifier.
        workflow_id: WorkflowId,
        /// Step identifier.
        step_id: NodeId,
    },

    /// The message type disagrees with the definition.
    #[error("step '{step_id}' is '{expected}' in the definition but the message says '{actual}'")]
    StepTypeMismatch {
        /// Step identifier.
        step_id: NodeId,
        /// Type declared by the definition.
        expected: StepType,
        /// Type carried by the message.
        actual: StepType,
    },

    /// The dispatcher refused the step, typically `UnknownActionType`.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The workflow definition is unusable.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(#[from] WorkflowError),

    /// Definition store failure.
    #[error(transparent)]
    Store(StoreError),

    /// Run ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Publishing continuations or results failed.
    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

impl ProcessingError {
    /// Short machine-readable reason, used as the dead-letter reason.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::UnexpectedStatus { .. } => "unexpected_status",
            Self::UnknownWorkflow(_) => "unknown_workflow",
            Self::UnknownStep { .. } => "unknown_step",
            Self::StepTypeMismatch { .. } => "step_type_mismatch",
            Self::Dispatch(DispatchError::UnknownActionType(_)) => "unknown_action_type",
            Self::Dispatch(_) => "dispatch",
            Self::InvalidDefinition(_) => "invalid_definition",
            Self::Store(_) => "store",
            Self::Ledger(_) => "ledger",
            Self::Outbox(_) => "outbox",
        }
    }
}

impl From<StoreError> for ProcessingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::UnknownWorkflow(id),
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_unknown_workflow() {
        let err: ProcessingError = StoreError::NotFound(WorkflowId::from("wf-1")).into();
        assert!(matches!(err, ProcessingError::UnknownWorkflow(_)));
        assert_eq!(err.reason(), "unknown_workflow");
    }

    #[test]
    fn test_dispatch_error_classification() {
        let unknown = DispatchError::UnknownActionType(StepType::SlackAlert);
        assert!(!unknown.is_handler_failure());

        let timeout = DispatchError::Timeout {
            step_type: StepType::Enrich,
            timeout: Duration::from_secs(30),
        };
        assert!(timeout.is_handler_failure());
        assert!(timeout.to_string().contains("enrich"));

        let err = ProcessingError::from(unknown);
        assert_eq!(err.reason(), "unknown_action_type");
    }
}
