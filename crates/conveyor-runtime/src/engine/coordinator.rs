//! Workflow run coordinator.
//!
//! Consumes one step execution message at a time, runs the step and emits
//! either continuation messages for every successor or a terminal result.
//! The coordinator holds no per-run state in memory: everything a step
//! needs travels in the message, and redelivery is made safe by the
//! [`RunLedger`].

use std::sync::Arc;

use tracing::instrument;

use super::executor::{StepExecutor, Transition};
use super::ledger::{Claim, LedgerKey, RunLedger, StepEffects};
use super::outbox::Outbox;
use super::store::DefinitionStore;
use crate::TRACING_TARGET_COORDINATOR;
use crate::definition::{NextStep, WorkflowDefinition};
use crate::error::{DispatchError, ProcessingError, WorkflowError};
use crate::execution::{
    ExecutionResult, RunContext, RunId, RunInvocation, StepExecution, StepStatus,
};

/// What the coordinator did with a message. The caller acknowledges it in
/// every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The step ran and its successors were published.
    Continued {
        /// Number of continuation messages published.
        published: usize,
    },
    /// The step ran and a terminal result was published.
    Finished {
        /// Whether the branch succeeded.
        success: bool,
    },
    /// The step was already handled; nothing was published.
    Duplicate,
    /// The step had run before a crash; its stored effects were republished.
    Replayed,
}

/// Advances workflow runs one step message at a time.
#[derive(Clone)]
pub struct Coordinator {
    definitions: Arc<dyn DefinitionStore>,
    ledger: Arc<dyn RunLedger>,
    outbox: Arc<dyn Outbox>,
    executor: StepExecutor,
}

impl Coordinator {
    /// Creates a coordinator from its collaborators.
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        ledger: Arc<dyn RunLedger>,
        outbox: Arc<dyn Outbox>,
        executor: StepExecutor,
    ) -> Self {
        Self {
            definitions,
            ledger,
            outbox,
            executor,
        }
    }

    /// Returns the step executor.
    #[inline]
    pub fn executor(&self) -> &StepExecutor {
        &self.executor
    }

    /// Returns the run ledger.
    #[inline]
    pub fn ledger(&self) -> &Arc<dyn RunLedger> {
        &self.ledger
    }

    /// Decodes and handles a raw queue payload.
    pub async fn handle_raw(&self, payload: &[u8]) -> Result<Disposition, ProcessingError> {
        let step: StepExecution = serde_json::from_slice(payload)?;
        self.handle(step).await
    }

    /// Handles one step execution message.
    ///
    /// Returns `Ok` whenever the message is done with, including when the
    /// step's handler failed. Returns `Err` only when the step could not be
    /// attempted at all; such messages belong on the dead-letter path.
    #[instrument(
        skip_all,
        fields(
            execution_id = %step.execution_id,
            run_id = %step.run_id,
            step_id = %step.step_id,
        ),
        target = TRACING_TARGET_COORDINATOR
    )]
    pub async fn handle(&self, mut step: StepExecution) -> Result<Disposition, ProcessingError> {
        tracing::debug!(
            target: TRACING_TARGET_COORDINATOR,
            workflow_id = %step.workflow_id,
            step_type = %step.step_type,
            "Step message received"
        );

        if step.status != StepStatus::Pending {
            return Err(ProcessingError::UnexpectedStatus {
                execution_id: step.execution_id,
                status: step.status,
            });
        }

        let definition = self.definitions.get(&step.workflow_id).await?;
        let node = definition
            .node(&step.step_id)
            .ok_or_else(|| ProcessingError::UnknownStep {
                workflow_id: step.workflow_id.clone(),
                step_id: step.step_id.clone(),
            })?;
        if node.step_type != step.step_type {
            return Err(ProcessingError::StepTypeMismatch {
                step_id: node.id.clone(),
                expected: node.step_type.clone(),
                actual: step.step_type.clone(),
            });
        }
        if !self.executor.dispatcher().supports(&node.step_type) {
            return Err(DispatchError::UnknownActionType(node.step_type.clone()).into());
        }

        let key = LedgerKey::of(&step);
        match self.ledger.claim(&key, step.execution_id).await? {
            Claim::Acquired => {}
            Claim::Duplicate => {
                tracing::info!(
                    target: TRACING_TARGET_COORDINATOR,
                    "Step already handled, dropping message"
                );
                return Ok(Disposition::Duplicate);
            }
            Claim::Pending(effects) => {
                tracing::warn!(
                    target: TRACING_TARGET_COORDINATOR,
                    steps = effects.steps.len(),
                    "Republishing effects of a step that already ran"
                );
                self.publish(&effects).await?;
                self.ledger.confirm(&key).await?;
                return Ok(Disposition::Replayed);
            }
        }

        step.transition(StepStatus::Running)?;
        let outcome = self.executor.execute(&step, node).await?;
        step.transition(if outcome.entry.is_success() {
            StepStatus::Success
        } else {
            StepStatus::Failed
        })?;
        step.results = outcome.results;

        let effects = match outcome.transition {
            Transition::Continue {
                next_steps,
                context,
            } => self.continuations(&definition, &step, &next_steps, context),
            Transition::Finish(result) => StepEffects::finish(result),
        };

        self.ledger
            .complete(&key, step.execution_id, outcome.entry, effects.clone())
            .await?;
        self.publish(&effects).await?;
        self.ledger.confirm(&key).await?;

        let disposition = match &effects.result {
            Some(result) => Disposition::Finished {
                success: result.success,
            },
            None => Disposition::Continued {
                published: effects.steps.len(),
            },
        };

        tracing::info!(
            target: TRACING_TARGET_COORDINATOR,
            status = %step.status,
            disposition = ?disposition,
            "Step processed"
        );
        Ok(disposition)
    }

    /// Starts a run by publishing the pending trigger step.
    ///
    /// An invocation without a run id gets a fresh one. Queue consumers fill
    /// it in beforehand so that redeliveries map onto the same run.
    #[instrument(
        skip_all,
        fields(workflow_id = %invocation.workflow_id, run_id = ?invocation.run_id),
        target = TRACING_TARGET_COORDINATOR
    )]
    pub async fn start_run(
        &self,
        invocation: RunInvocation,
    ) -> Result<StepExecution, ProcessingError> {
        let definition = self.definitions.get(&invocation.workflow_id).await?;
        let trigger = definition.trigger().ok_or(WorkflowError::MissingTrigger)?;

        let run_id = invocation.run_id.unwrap_or_else(RunId::generate);
        let step = StepExecution::pending(
            invocation.workflow_id,
            run_id,
            trigger,
            RunContext::new(invocation.payload),
        );
        self.outbox.publish_step(&step).await?;

        tracing::info!(
            target: TRACING_TARGET_COORDINATOR,
            run_id = %step.run_id,
            execution_id = %step.execution_id,
            trigger = %step.step_id,
            "Run started"
        );
        Ok(step)
    }

    /// Builds one pending message per successor.
    ///
    /// A successor missing from the definition ends the branch with a
    /// failed result instead of publishing a partial fan-out.
    fn continuations(
        &self,
        definition: &WorkflowDefinition,
        step: &StepExecution,
        next_steps: &[NextStep],
        context: RunContext,
    ) -> StepEffects {
        let mut steps = Vec::with_capacity(next_steps.len());

        for next in next_steps {
            let Some(node) = definition.node(&next.id) else {
                tracing::error!(
                    target: TRACING_TARGET_COORDINATOR,
                    next_step = %next.id,
                    "Next step is not defined in the workflow"
                );
                return StepEffects::finish(ExecutionResult::failed(
                    step.workflow_id.clone(),
                    step.run_id.clone(),
                    format!(
                        "Step '{}' references unknown next step '{}'",
                        step.step_id, next.id
                    ),
                    context,
                ));
            };

            if node.step_type != next.step_type {
                tracing::warn!(
                    target: TRACING_TARGET_COORDINATOR,
                    next_step = %next.id,
                    declared = %next.step_type,
                    defined = %node.step_type,
                    "Next step type disagrees with its node, using the node type"
                );
            }

            steps.push(StepExecution::pending(
                step.workflow_id.clone(),
                step.run_id.clone(),
                node,
                context.clone(),
            ));
        }

        StepEffects::continue_with(steps)
    }

    /// Publishes continuations first, then the terminal result.
    async fn publish(&self, effects: &StepEffects) -> Result<(), ProcessingError> {
        for next in &effects.steps {
            self.outbox.publish_step(next).await?;
        }
        if let Some(result) = &effects.result {
            self.outbox.publish_result(result).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::definition::{NodeId, StepType, WorkflowNode};
    use crate::dispatch::{ActionDispatcher, ActionRegistry};
    use crate::engine::{InMemoryDefinitionStore, InMemoryRunLedger};
    use crate::execution::{EntryStatus, RunId};
    use crate::mock::{RecordingOutbox, ScriptedHandler};

    struct Harness {
        coordinator: Coordinator,
        outbox: Arc<RecordingOutbox>,
        ledger: Arc<InMemoryRunLedger>,
    }

    impl Harness {
        fn new(definition: WorkflowDefinition, registry: ActionRegistry) -> Self {
            let store = InMemoryDefinitionStore::new()
                .with_definition(definition)
                .unwrap();
            let outbox = Arc::new(RecordingOutbox::new());
            let ledger = Arc::new(InMemoryRunLedger::new());
            let executor = StepExecutor::new(ActionDispatcher::new(registry));
            let coordinator =
                Coordinator::new(Arc::new(store), ledger.clone(), outbox.clone(), executor);
            Self {
                coordinator,
                outbox,
                ledger,
            }
        }

        async fn start(&self, payload: serde_json::Value) -> StepExecution {
            let payload = payload.as_object().cloned().unwrap_or_default();
            let invocation =
                RunInvocation::new("meeting-follow-up", payload).with_run_id("run-1");
            self.coordinator.start_run(invocation).await.unwrap()
        }

        /// Feeds every published step back into the coordinator until the
        /// queue drains.
        async fn drain(&self) -> usize {
            let mut handled = 0;
            loop {
                let pending = self.outbox.take_steps();
                if pending.is_empty() {
                    return handled;
                }
                for step in pending {
                    self.coordinator.handle(step).await.unwrap();
                    handled += 1;
                }
            }
        }
    }

    fn linear() -> WorkflowDefinition {
        WorkflowDefinition::new("meeting-follow-up", "Meeting follow-up")
            .with_node(
                WorkflowNode::new("start", StepType::Trigger)
                    .with_next(NextStep::new("enrich", StepType::Enrich)),
            )
            .with_node(
                WorkflowNode::new("enrich", StepType::Enrich)
                    .with_next(NextStep::new("alert", StepType::SlackAlert)),
            )
            .with_node(
                WorkflowNode::new("alert", StepType::SlackAlert)
                    .with_next(NextStep::new("end", StepType::Terminator)),
            )
            .with_node(WorkflowNode::new("end", StepType::Terminator))
    }

    fn registry(enrich: ScriptedHandler, alert: ScriptedHandler) -> ActionRegistry {
        ActionRegistry::with_builtins()
            .with_handler(StepType::Enrich, enrich)
            .with_handler(StepType::SlackAlert, alert)
    }

    #[tokio::test]
    async fn test_linear_run_publishes_one_result() {
        let enrich = ScriptedHandler::returning(json!({ "company": "Acme" }));
        let alert = ScriptedHandler::succeeding();
        let harness = Harness::new(linear(), registry(enrich.clone(), alert.clone()));

        let trigger = harness.start(json!({ "email": "ada@example.com" })).await;
        assert_eq!(trigger.step_id, NodeId::from("start"));

        assert_eq!(harness.drain().await, 4);
        assert_eq!(enrich.calls(), 1);
        assert_eq!(alert.calls(), 1);

        let results = harness.outbox.results();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.success);
        assert_eq!(result.run_id, RunId::from("run-1"));
        assert_eq!(result.data.payload["email"], "ada@example.com");
        assert_eq!(result.data.payload["company"], "Acme");
        let order: Vec<&str> = result
            .data
            .execution_log
            .iter()
            .map(|entry| entry.node_id.as_str())
            .collect();
        assert_eq!(order, ["start", "enrich", "alert", "end"]);
        assert!(
            result
                .data
                .execution_log
                .iter()
                .all(|entry| entry.status == EntryStatus::Success)
        );
    }

    #[tokio::test]
    async fn test_redelivered_invocation_without_run_id_starts_one_run() {
        let enrich = ScriptedHandler::succeeding();
        let harness = Harness::new(
            linear(),
            registry(enrich.clone(), ScriptedHandler::succeeding()),
        );

        let raw = r#"{"workflowId":"meeting-follow-up","payload":{"email":"ada@example.com"}}"#;
        for _ in 0..2 {
            let mut invocation: RunInvocation = serde_json::from_str(raw).unwrap();
            invocation.resolve_run_id(|| RunId::for_message("workflow_invoker_exchange", 9));
            harness.coordinator.start_run(invocation).await.unwrap();
        }
        harness.drain().await;

        assert_eq!(enrich.calls(), 1);
        let results = harness.outbox.results();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].run_id,
            RunId::for_message("workflow_invoker_exchange", 9)
        );
    }

    #[tokio::test]
    async fn test_failed_step_ends_the_run() {
        let alert = ScriptedHandler::failing("rate_limited");
        let harness = Harness::new(linear(), registry(ScriptedHandler::succeeding(), alert));

        harness.start(json!({})).await;
        assert_eq!(harness.drain().await, 3);

        let results = harness.outbox.results();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(!result.success);
        assert!(result.message.contains("rate_limited"));

        let log = &result.data.execution_log;
        assert_eq!(log.len(), 3);
        assert_eq!(log[2].status, EntryStatus::Failed);
        assert_eq!(log[2].error.as_deref(), Some("rate_limited"));
    }

    #[tokio::test]
    async fn test_tolerated_failure_reaches_terminator() {
        let mut definition = linear();
        for node in &mut definition.nodes {
            if node.id == NodeId::from("alert") {
                node.continue_on_failure = true;
            }
        }
        let alert = ScriptedHandler::failing("rate_limited");
        let harness = Harness::new(definition, registry(ScriptedHandler::succeeding(), alert));

        harness.start(json!({})).await;
        assert_eq!(harness.drain().await, 4);

        let results = harness.outbox.results();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(
            results[0].data.last_failure().map(|entry| entry.node_id.clone()),
            Some(NodeId::from("alert"))
        );
    }

    #[tokio::test]
    async fn test_fan_out_publishes_every_successor() {
        let definition = WorkflowDefinition::new("meeting-follow-up", "Fan out")
            .with_node(
                WorkflowNode::new("start", StepType::Trigger)
                    .with_next(NextStep::new("enrich", StepType::Enrich))
                    .with_next(NextStep::new("alert", StepType::SlackAlert)),
            )
            .with_node(WorkflowNode::new("enrich", StepType::Enrich))
            .with_node(WorkflowNode::new("alert", StepType::SlackAlert));
        let harness = Harness::new(
            definition,
            registry(ScriptedHandler::succeeding(), ScriptedHandler::succeeding()),
        );

        let trigger = harness.start(json!({})).await;
        let _ = harness.outbox.take_steps();
        let disposition = harness.coordinator.handle(trigger).await.unwrap();
        assert_eq!(disposition, Disposition::Continued { published: 2 });

        let published = harness.outbox.steps();
        let ids: Vec<_> = published.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, ["enrich", "alert"]);
        assert!(published.iter().all(|s| s.status == StepStatus::Pending));
        assert_ne!(published[0].execution_id, published[1].execution_id);

        harness.drain().await;
        assert_eq!(harness.outbox.results().len(), 2);
    }

    #[tokio::test]
    async fn test_redelivery_does_not_reinvoke_handler() {
        let enrich = ScriptedHandler::succeeding();
        let harness = Harness::new(
            linear(),
            registry(enrich.clone(), ScriptedHandler::succeeding()),
        );

        let trigger = harness.start(json!({})).await;
        let _ = harness.outbox.take_steps();
        harness.coordinator.handle(trigger).await.unwrap();
        let enrich_step = harness.outbox.take_steps().remove(0);

        let first = harness.coordinator.handle(enrich_step.clone()).await.unwrap();
        assert_eq!(first, Disposition::Continued { published: 1 });
        let second = harness.coordinator.handle(enrich_step).await.unwrap();
        assert_eq!(second, Disposition::Duplicate);

        assert_eq!(enrich.calls(), 1);
        assert_eq!(harness.outbox.steps().len(), 1);
    }

    #[tokio::test]
    async fn test_unconfirmed_effects_are_republished() {
        let enrich = ScriptedHandler::succeeding();
        let harness = Harness::new(
            linear(),
            registry(enrich.clone(), ScriptedHandler::succeeding()),
        );

        let trigger = harness.start(json!({})).await;
        let _ = harness.outbox.take_steps();
        harness.coordinator.handle(trigger).await.unwrap();
        let enrich_step = harness.outbox.take_steps().remove(0);

        harness.outbox.fail_publishing(true);
        let err = harness
            .coordinator
            .handle(enrich_step.clone())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "outbox");

        harness.outbox.fail_publishing(false);
        let replay = harness.coordinator.handle(enrich_step).await.unwrap();
        assert_eq!(replay, Disposition::Replayed);
        assert_eq!(enrich.calls(), 1);
        assert_eq!(harness.outbox.steps().len(), 1);
    }

    #[tokio::test]
    async fn test_reconverging_branch_runs_once() {
        let definition = WorkflowDefinition::new("meeting-follow-up", "Diamond")
            .with_node(
                WorkflowNode::new("start", StepType::Trigger)
                    .with_next(NextStep::new("enrich", StepType::Enrich))
                    .with_next(NextStep::new("activity", StepType::FetchRecentActivity)),
            )
            .with_node(
                WorkflowNode::new("enrich", StepType::Enrich)
                    .with_next(NextStep::new("end", StepType::Terminator)),
            )
            .with_node(
                WorkflowNode::new("activity", StepType::FetchRecentActivity)
                    .with_next(NextStep::new("end", StepType::Terminator)),
            )
            .with_node(WorkflowNode::new("end", StepType::Terminator));
        let registry = ActionRegistry::with_builtins()
            .with_handler(StepType::Enrich, ScriptedHandler::succeeding())
            .with_handler(
                StepType::FetchRecentActivity,
                ScriptedHandler::succeeding(),
            );
        let harness = Harness::new(definition, registry);

        harness.start(json!({})).await;
        assert_eq!(harness.drain().await, 5);
        assert_eq!(harness.outbox.results().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_action_type_is_rejected() {
        let harness = Harness::new(
            linear(),
            ActionRegistry::with_builtins().with_handler(StepType::Enrich, ScriptedHandler::succeeding()),
        );

        let trigger = harness.start(json!({})).await;
        let _ = harness.outbox.take_steps();
        harness.coordinator.handle(trigger).await.unwrap();
        let enrich_step = harness.outbox.take_steps().remove(0);
        harness.coordinator.handle(enrich_step).await.unwrap();
        let alert_step = harness.outbox.take_steps().remove(0);

        let err = harness.coordinator.handle(alert_step.clone()).await.unwrap_err();
        assert_eq!(err.reason(), "unknown_action_type");
        assert!(
            harness
                .ledger
                .record(&LedgerKey::of(&alert_step))
                .await
                .is_none()
        );
        assert!(harness.outbox.results().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_rejected() {
        let harness = Harness::new(linear(), ActionRegistry::with_builtins());
        let node = WorkflowNode::new("start", StepType::Trigger);
        let step = StepExecution::pending(
            "does-not-exist".into(),
            "run-1".into(),
            &node,
            RunContext::default(),
        );

        let err = harness.coordinator.handle(step).await.unwrap_err();
        assert!(matches!(err, ProcessingError::UnknownWorkflow(_)));
    }

    #[tokio::test]
    async fn test_non_pending_message_is_rejected() {
        let harness = Harness::new(linear(), ActionRegistry::with_builtins());
        let mut trigger = harness.start(json!({})).await;
        trigger.status = StepStatus::Running;

        let err = harness.coordinator.handle(trigger).await.unwrap_err();
        assert_eq!(err.reason(), "unexpected_status");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected() {
        let harness = Harness::new(linear(), ActionRegistry::with_builtins());
        let err = harness.coordinator.handle_raw(b"{not json").await.unwrap_err();
        assert!(matches!(err, ProcessingError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_dangling_next_step_fails_the_branch() {
        let definition = WorkflowDefinition::new("meeting-follow-up", "Dangling").with_node(
            WorkflowNode::new("start", StepType::Trigger)
                .with_next(NextStep::new("ghost", StepType::Enrich)),
        );
        let harness = Harness::new(definition, ActionRegistry::with_builtins());

        harness.start(json!({})).await;
        harness.drain().await;

        let results = harness.outbox.results();
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].message.contains("ghost"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_step_fails_the_run() {
        let slow = ScriptedHandler::succeeding().with_delay(Duration::from_secs(120));
        let harness = Harness::new(linear(), registry(slow, ScriptedHandler::succeeding()));

        harness.start(json!({})).await;
        harness.drain().await;

        let results = harness.outbox.results();
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].message.contains("timed out"));
    }
}
