//! Terminal artifacts of a run.

use std::collections::HashSet;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use super::{ExecutionLogEntry, RunContext, RunId};
use crate::definition::{WorkflowDefinition, WorkflowId};

/// State of a run as seen from outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(AsRefStr, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    /// Invoked, trigger not yet executed.
    Pending,
    /// At least one step is in flight.
    Running,
    /// A branch finished successfully.
    Succeeded,
    /// A branch finished with a non-tolerated failure.
    Failed,
}

impl RunStatus {
    /// Derives the status of a run from its reassembled execution log.
    ///
    /// The run is still running while a logged step has a successor that
    /// has not run yet. A failure the node does not tolerate, or a
    /// successor missing from the definition, fails the run. Entries of
    /// nodes the definition no longer has are ignored.
    pub fn from_log(definition: &WorkflowDefinition, log: &[ExecutionLogEntry]) -> Self {
        if log.is_empty() {
            return Self::Pending;
        }

        let logged: HashSet<_> = log.iter().map(|entry| &entry.node_id).collect();
        let mut open = false;
        for entry in log {
            let Some(node) = definition.node(&entry.node_id) else {
                continue;
            };
            if !entry.is_success() && !node.continue_on_failure {
                return Self::Failed;
            }
            for next in &node.next_steps {
                if definition.node(&next.id).is_none() {
                    return Self::Failed;
                }
                open |= !logged.contains(&next.id);
            }
        }

        if open { Self::Running } else { Self::Succeeded }
    }
}

/// Final outcome of one branch of a run, published to the completion sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Workflow the run belongs to.
    pub workflow_id: WorkflowId,
    /// Run correlation id.
    pub run_id: RunId,
    /// Whether the branch succeeded.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Final payload and full execution log of the branch.
    pub data: RunContext,
    /// When the result was assembled.
    pub completed_at: Timestamp,
}

impl ExecutionResult {
    /// Creates a successful result.
    pub fn succeeded(
        workflow_id: WorkflowId,
        run_id: RunId,
        message: impl Into<String>,
        data: RunContext,
    ) -> Self {
        Self {
            workflow_id,
            run_id,
            success: true,
            message: message.into(),
            data,
            completed_at: Timestamp::now(),
        }
    }

    /// Creates a failed result.
    pub fn failed(
        workflow_id: WorkflowId,
        run_id: RunId,
        message: impl Into<String>,
        data: RunContext,
    ) -> Self {
        Self {
            success: false,
            ..Self::succeeded(workflow_id, run_id, message, data)
        }
    }

    /// Returns the run status this result represents.
    #[inline]
    pub fn status(&self) -> RunStatus {
        if self.success {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        }
    }
}

/// Request to start a run, consumed from the invoker queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInvocation {
    /// Workflow to run.
    pub workflow_id: WorkflowId,
    /// Correlation id for the run.
    ///
    /// Invokers may leave it out; the consumer then derives one that is
    /// stable across redeliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Initial contact/business payload.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl RunInvocation {
    /// Creates an invocation with a freshly generated run id.
    pub fn new(workflow_id: impl Into<WorkflowId>, payload: Map<String, Value>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: Some(RunId::generate()),
            payload,
        }
    }

    /// Overrides the generated run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Returns the run id, filling it in from `fallback` if the invoker
    /// left it out.
    pub fn resolve_run_id(&mut self, fallback: impl FnOnce() -> RunId) -> RunId {
        self.run_id.get_or_insert_with(fallback).clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::definition::{NextStep, StepType, WorkflowNode};

    fn fan_out() -> WorkflowDefinition {
        WorkflowDefinition::new("wf", "Fan-out")
            .with_node(
                WorkflowNode::new("start", StepType::Trigger)
                    .with_next(NextStep::new("enrich", StepType::Enrich))
                    .with_next(NextStep::new("alert", StepType::SlackAlert)),
            )
            .with_node(WorkflowNode::new("enrich", StepType::Enrich))
            .with_node(WorkflowNode::new("alert", StepType::SlackAlert))
    }

    fn ok(node: &str, step_type: StepType) -> ExecutionLogEntry {
        ExecutionLogEntry::success(node.into(), step_type, Duration::ZERO)
    }

    #[test]
    fn test_status_from_log() {
        let definition = fan_out();
        let start = ok("start", StepType::Trigger);
        let enrich = ok("enrich", StepType::Enrich);
        let alert = ok("alert", StepType::SlackAlert);

        assert_eq!(RunStatus::from_log(&definition, &[]), RunStatus::Pending);
        assert_eq!(
            RunStatus::from_log(&definition, &[start.clone(), enrich.clone()]),
            RunStatus::Running
        );
        assert_eq!(
            RunStatus::from_log(&definition, &[start.clone(), enrich.clone(), alert]),
            RunStatus::Succeeded
        );

        let failed = ExecutionLogEntry::failure(
            "alert".into(),
            StepType::SlackAlert,
            Duration::ZERO,
            "rate_limited",
        );
        assert_eq!(
            RunStatus::from_log(&definition, &[start, enrich, failed]),
            RunStatus::Failed
        );
    }

    #[test]
    fn test_status_tolerated_failure_keeps_running() {
        let definition = WorkflowDefinition::new("wf", "Tolerant")
            .with_node(
                WorkflowNode::new("start", StepType::Trigger)
                    .with_next(NextStep::new("enrich", StepType::Enrich)),
            )
            .with_node(
                WorkflowNode::builder()
                    .with_id("enrich")
                    .with_step_type(StepType::Enrich)
                    .with_continue_on_failure(true)
                    .with_next_steps(vec![NextStep::new("end", StepType::Terminator)])
                    .build()
                    .unwrap(),
            )
            .with_node(WorkflowNode::new("end", StepType::Terminator));

        let log = [
            ok("start", StepType::Trigger),
            ExecutionLogEntry::failure("enrich".into(), StepType::Enrich, Duration::ZERO, "partial"),
        ];
        assert_eq!(RunStatus::from_log(&definition, &log), RunStatus::Running);
    }

    #[test]
    fn test_failed_result_status() {
        let result = ExecutionResult::failed(
            "wf".into(),
            "run".into(),
            "step failed",
            RunContext::default(),
        );
        assert!(!result.success);
        assert_eq!(result.status(), RunStatus::Failed);
        assert_eq!(result.status().to_string(), "failed");
    }

    #[test]
    fn test_invocation_without_run_id() {
        let raw = r#"{"workflowId":"wf","payload":{"email":"a@b.c"}}"#;
        let invocation: RunInvocation = serde_json::from_str(raw).unwrap();
        assert_eq!(invocation.run_id, None);
        assert_eq!(invocation.payload["email"], "a@b.c");

        let derived = RunId::for_message("invoker", 7);
        let mut filled = invocation.clone();
        assert_eq!(filled.resolve_run_id(|| derived.clone()), derived);
        assert_eq!(filled.run_id, Some(derived.clone()));

        let mut supplied = invocation.with_run_id("run-1");
        assert_eq!(supplied.resolve_run_id(|| derived), RunId::from("run-1"));
    }
}
