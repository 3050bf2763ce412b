//! Single step execution.

use std::time::Instant;

use tracing::instrument;

use crate::TRACING_TARGET_EXECUTOR;
use crate::definition::{NextStep, WorkflowNode};
use crate::dispatch::{ActionDispatcher, ActionOutput};
use crate::error::DispatchError;
use crate::execution::{ExecutionLogEntry, ExecutionResult, RunContext, StepExecution};

/// What happens to the run after a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Advance to each successor with the updated context.
    Continue {
        /// Successors of the node, in declaration order.
        next_steps: Vec<NextStep>,
        /// Context after this step.
        context: RunContext,
    },
    /// The branch is over.
    Finish(ExecutionResult),
}

/// Outcome of executing one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Audit record of the step.
    pub entry: ExecutionLogEntry,
    /// Handler results on success.
    pub results: Option<ActionOutput>,
    /// Continuation decision.
    pub transition: Transition,
}

/// Runs one step: dispatch, timing, log entry and continuation decision.
///
/// Never retries the handler. Retry belongs to the queue.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    dispatcher: ActionDispatcher,
}

impl StepExecutor {
    /// Creates an executor over a dispatcher.
    pub fn new(dispatcher: ActionDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Returns the dispatcher.
    #[inline]
    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Executes `node` with the context carried by `step`.
    ///
    /// Handler failures and timeouts become failed log entries. Only
    /// [`DispatchError::UnknownActionType`] is returned as an error.
    #[instrument(
        skip_all,
        fields(run_id = %step.run_id, step_id = %node.id, step_type = %node.step_type),
        target = TRACING_TARGET_EXECUTOR
    )]
    pub async fn execute(
        &self,
        step: &StepExecution,
        node: &WorkflowNode,
    ) -> Result<StepOutcome, DispatchError> {
        let mut context = step.context.clone();

        let start = Instant::now();
        let dispatched = self.dispatcher.dispatch(&node.step_type, &step.actions).await;
        let elapsed = start.elapsed();

        let outcome = match dispatched {
            Ok(results) => {
                let entry =
                    ExecutionLogEntry::success(node.id.clone(), node.step_type.clone(), elapsed);
                context.merge_results(results.clone());
                context.record(entry.clone());

                let transition = if node.is_terminal() {
                    Transition::Finish(ExecutionResult::succeeded(
                        step.workflow_id.clone(),
                        step.run_id.clone(),
                        "Workflow completed successfully",
                        context,
                    ))
                } else {
                    Transition::Continue {
                        next_steps: node.next_steps.clone(),
                        context,
                    }
                };

                StepOutcome {
                    entry,
                    results: Some(results),
                    transition,
                }
            }
            Err(err) if err.is_handler_failure() => {
                let entry = ExecutionLogEntry::failure(
                    node.id.clone(),
                    node.step_type.clone(),
                    elapsed,
                    err.to_string(),
                );
                context.record(entry.clone());

                let transition = match (node.continue_on_failure, node.is_terminal()) {
                    (true, false) => Transition::Continue {
                        next_steps: node.next_steps.clone(),
                        context,
                    },
                    (true, true) => Transition::Finish(ExecutionResult::succeeded(
                        step.workflow_id.clone(),
                        step.run_id.clone(),
                        format!("Workflow completed; step '{}' failed but was tolerated", node.id),
                        context,
                    )),
                    (false, _) => Transition::Finish(ExecutionResult::failed(
                        step.workflow_id.clone(),
                        step.run_id.clone(),
                        format!("Step '{}' ({}) failed: {err}", node.id, node.step_type),
                        context,
                    )),
                };

                StepOutcome {
                    entry,
                    results: None,
                    transition,
                }
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            target: TRACING_TARGET_EXECUTOR,
            status = %outcome.entry.status,
            elapsed_ms = elapsed.as_millis(),
            finished = matches!(outcome.transition, Transition::Finish(_)),
            "Step executed"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::definition::StepType;
    use crate::dispatch::ActionRegistry;
    use crate::execution::EntryStatus;
    use crate::mock::ScriptedHandler;

    fn executor(handler: ScriptedHandler) -> StepExecutor {
        let registry = ActionRegistry::with_builtins().with_handler(StepType::Enrich, handler);
        StepExecutor::new(ActionDispatcher::new(registry))
    }

    fn step_for(node: &WorkflowNode) -> StepExecution {
        StepExecution::pending("wf".into(), "run".into(), node, RunContext::default())
    }

    #[tokio::test]
    async fn test_success_merges_results_and_continues() {
        let handler = ScriptedHandler::returning(json!({ "company": "Acme" }));
        let node = WorkflowNode::new("enrich", StepType::Enrich)
            .with_next(NextStep::new("alert", StepType::SlackAlert));

        let outcome = executor(handler)
            .execute(&step_for(&node), &node)
            .await
            .unwrap();

        assert_eq!(outcome.entry.status, EntryStatus::Success);
        assert!(outcome.entry.execution_time.is_some());
        let Transition::Continue {
            next_steps,
            context,
        } = outcome.transition
        else {
            panic!("expected continuation");
        };
        assert_eq!(next_steps.len(), 1);
        assert_eq!(context.payload["company"], "Acme");
        assert_eq!(context.execution_log.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_success_finishes() {
        let node = WorkflowNode::new("enrich", StepType::Enrich);
        let outcome = executor(ScriptedHandler::succeeding())
            .execute(&step_for(&node), &node)
            .await
            .unwrap();

        let Transition::Finish(result) = outcome.transition else {
            panic!("expected finish");
        };
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_failure_ends_run_with_error_message() {
        let handler = ScriptedHandler::failing("upstream unavailable");
        let node = WorkflowNode::new("enrich", StepType::Enrich)
            .with_next(NextStep::new("alert", StepType::SlackAlert));

        let outcome = executor(handler.clone())
            .execute(&step_for(&node), &node)
            .await
            .unwrap();

        assert_eq!(outcome.entry.status, EntryStatus::Failed);
        assert_eq!(outcome.entry.error.as_deref(), Some("upstream unavailable"));
        let Transition::Finish(result) = outcome.transition else {
            panic!("expected finish");
        };
        assert!(!result.success);
        assert!(result.message.contains("upstream unavailable"));
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn test_tolerated_failure_continues() {
        let node = WorkflowNode::builder()
            .with_id("enrich")
            .with_step_type(StepType::Enrich)
            .with_continue_on_failure(true)
            .with_next_steps(vec![NextStep::new("alert", StepType::SlackAlert)])
            .build()
            .unwrap();

        let outcome = executor(ScriptedHandler::failing("partial data"))
            .execute(&step_for(&node), &node)
            .await
            .unwrap();

        assert_eq!(outcome.entry.status, EntryStatus::Failed);
        assert!(matches!(outcome.transition, Transition::Continue { .. }));
    }

    #[tokio::test]
    async fn test_unknown_type_is_an_error() {
        let node = WorkflowNode::new("alert", StepType::SlackAlert);
        let err = executor(ScriptedHandler::succeeding())
            .execute(&step_for(&node), &node)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownActionType(_)));
    }
}
