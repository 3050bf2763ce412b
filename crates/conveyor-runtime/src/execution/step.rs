//! The step execution message carried on the queue.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use super::{ExecutionId, RunContext, RunId};
use crate::definition::{NodeId, StepType, WorkflowId, WorkflowNode};
use crate::dispatch::ActionConfig;
use crate::error::{WorkflowError, WorkflowResult};

/// Lifecycle of a step execution: `pending -> running -> {success, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(AsRefStr, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StepStatus {
    /// Published, not yet picked up.
    Pending,
    /// Claimed by a coordinator.
    Running,
    /// The handler succeeded.
    Success,
    /// The handler failed.
    Failed,
}

impl StepStatus {
    /// Returns whether `next` is a legal successor of this status.
    #[must_use]
    pub const fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Success)
                | (Self::Running, Self::Failed)
        )
    }

    /// Returns whether this status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// One step's intended execution. The unit of work on the execution queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    /// Message identifier, stable across redeliveries.
    pub execution_id: ExecutionId,
    /// Workflow the step belongs to.
    pub workflow_id: WorkflowId,
    /// Run correlation id.
    pub run_id: RunId,
    /// Node to execute.
    pub step_id: NodeId,
    /// Type of the node.
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Current status.
    pub status: StepStatus,
    /// Resolved handler configuration.
    #[serde(default)]
    pub actions: ActionConfig,
    /// Handler results once the step has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Map<String, Value>>,
    /// Context accumulated along this path.
    #[serde(default)]
    pub context: RunContext,
}

impl StepExecution {
    /// Creates a pending execution of `node` within a run.
    pub fn pending(
        workflow_id: WorkflowId,
        run_id: RunId,
        node: &WorkflowNode,
        context: RunContext,
    ) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            workflow_id,
            run_id,
            step_id: node.id.clone(),
            step_type: node.step_type.clone(),
            status: StepStatus::Pending,
            actions: node.actions.clone(),
            results: None,
            context,
        }
    }

    /// Moves the step to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: StepStatus) -> WorkflowResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step() -> StepExecution {
        let node = WorkflowNode::new("enrich", StepType::Enrich);
        StepExecution::pending("wf".into(), "run-1".into(), &node, RunContext::default())
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut step = step();
        step.transition(StepStatus::Running).unwrap();
        step.transition(StepStatus::Success).unwrap();
        assert!(step.status.is_terminal());
        assert!(step.transition(StepStatus::Running).is_err());
    }

    #[test]
    fn test_pending_cannot_finish_directly() {
        let mut step = step();
        let err = step.transition(StepStatus::Failed).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                from: StepStatus::Pending,
                to: StepStatus::Failed
            }
        ));
        assert_eq!(step.status, StepStatus::Pending);
    }

    #[test]
    fn test_wire_format() {
        let value = serde_json::to_value(step()).unwrap();
        assert_eq!(value["workflowId"], "wf");
        assert_eq!(value["runId"], "run-1");
        assert_eq!(value["stepId"], "enrich");
        assert_eq!(value["type"], "enrich");
        assert_eq!(value["status"], "pending");
        assert!(value.get("results").is_none());
        assert!(value["executionId"].is_string());
    }
}
