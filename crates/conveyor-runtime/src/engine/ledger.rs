//! Run ledger: per-step claim records that make redelivery idempotent.
//!
//! Records are keyed by `(run_id, step_id)`. The first execution to claim a
//! key owns it. Once the step has run, the continuation effects are stored
//! before they are published, so a crash between execution and publish is
//! recovered by republishing rather than re-invoking the handler.

use std::collections::HashMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::definition::NodeId;
use crate::error::LedgerError;
use crate::execution::{ExecutionId, ExecutionLogEntry, ExecutionResult, RunId, StepExecution};

/// Key of a ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedgerKey {
    /// Run correlation id.
    pub run_id: RunId,
    /// Step within the run.
    pub step_id: NodeId,
}

impl LedgerKey {
    /// Creates a ledger key.
    pub fn new(run_id: RunId, step_id: NodeId) -> Self {
        Self { run_id, step_id }
    }

    /// Returns the key for a step execution message.
    pub fn of(step: &StepExecution) -> Self {
        Self::new(step.run_id.clone(), step.step_id.clone())
    }
}

/// Messages that executing a step produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepEffects {
    /// Pending continuations, one per successor.
    #[serde(default)]
    pub steps: Vec<StepExecution>,
    /// Terminal result of the branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

impl StepEffects {
    /// Effects that only continue the run.
    pub fn continue_with(steps: Vec<StepExecution>) -> Self {
        Self {
            steps,
            result: None,
        }
    }

    /// Effects that finish the branch.
    pub fn finish(result: ExecutionResult) -> Self {
        Self {
            steps: Vec::new(),
            result: Some(result),
        }
    }
}

/// Progress of a claimed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RecordState {
    /// Claimed, handler not finished.
    Running,
    /// Handler finished, effects not yet published.
    Completed {
        /// Effects awaiting publish.
        effects: StepEffects,
    },
    /// Effects published.
    Published,
}

/// Ledger record of one step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// Execution that owns the claim.
    pub execution_id: ExecutionId,
    /// Progress.
    pub state: RecordState,
    /// Log entry once the step has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<ExecutionLogEntry>,
    /// Last state change.
    pub updated_at: Timestamp,
}

/// Result of trying to claim a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The caller owns the step and must execute it.
    Acquired,
    /// The step ran but its effects were never confirmed; republish them.
    Pending(StepEffects),
    /// Already handled, or claimed by another execution. Drop the message.
    Duplicate,
}

impl StepRecord {
    /// Creates a fresh claim.
    pub fn running(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            state: RecordState::Running,
            entry: None,
            updated_at: Timestamp::now(),
        }
    }

    /// Decides what a delivery of `execution_id` may do with this record.
    ///
    /// A different execution for the same step is a reconverging branch and
    /// is dropped: the first arrival wins.
    pub fn claim_by(&self, execution_id: ExecutionId) -> Claim {
        if self.execution_id != execution_id {
            return Claim::Duplicate;
        }
        match &self.state {
            RecordState::Running => Claim::Acquired,
            RecordState::Completed { effects } => Claim::Pending(effects.clone()),
            RecordState::Published => Claim::Duplicate,
        }
    }

    /// Stores the outcome of the owning execution.
    pub fn complete(
        &mut self,
        execution_id: ExecutionId,
        entry: ExecutionLogEntry,
        effects: StepEffects,
    ) -> Result<(), LedgerError> {
        if self.execution_id != execution_id {
            return Err(LedgerError::NotOwner {
                owner: self.execution_id,
                execution_id,
            });
        }
        self.state = RecordState::Completed { effects };
        self.entry = Some(entry);
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Marks the effects as published, dropping their payload.
    pub fn confirm(&mut self) {
        self.state = RecordState::Published;
        self.updated_at = Timestamp::now();
    }
}

/// Durable per-run step ledger.
#[async_trait::async_trait]
pub trait RunLedger: Send + Sync {
    /// Claims a step for an execution.
    async fn claim(&self, key: &LedgerKey, execution_id: ExecutionId)
    -> Result<Claim, LedgerError>;

    /// Stores the log entry and effects of a claimed step.
    async fn complete(
        &self,
        key: &LedgerKey,
        execution_id: ExecutionId,
        entry: ExecutionLogEntry,
        effects: StepEffects,
    ) -> Result<(), LedgerError>;

    /// Marks the effects of a step as published.
    async fn confirm(&self, key: &LedgerKey) -> Result<(), LedgerError>;

    /// Reassembles every recorded log entry of a run, oldest first.
    async fn entries(&self, run_id: &RunId) -> Result<Vec<ExecutionLogEntry>, LedgerError>;
}

/// Process-local ledger, for single-node deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryRunLedger {
    records: Mutex<HashMap<LedgerKey, StepRecord>>,
}

impl InMemoryRunLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of a record.
    pub async fn record(&self, key: &LedgerKey) -> Option<StepRecord> {
        self.records.lock().await.get(key).cloned()
    }
}

#[async_trait::async_trait]
impl RunLedger for InMemoryRunLedger {
    async fn claim(
        &self,
        key: &LedgerKey,
        execution_id: ExecutionId,
    ) -> Result<Claim, LedgerError> {
        let mut records = self.records.lock().await;
        match records.get(key) {
            Some(record) => Ok(record.claim_by(execution_id)),
            None => {
                records.insert(key.clone(), StepRecord::running(execution_id));
                Ok(Claim::Acquired)
            }
        }
    }

    async fn complete(
        &self,
        key: &LedgerKey,
        execution_id: ExecutionId,
        entry: ExecutionLogEntry,
        effects: StepEffects,
    ) -> Result<(), LedgerError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(key).ok_or_else(|| missing(key))?;
        record.complete(execution_id, entry, effects)
    }

    async fn confirm(&self, key: &LedgerKey) -> Result<(), LedgerError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(key).ok_or_else(|| missing(key))?;
        record.confirm();
        Ok(())
    }

    async fn entries(&self, run_id: &RunId) -> Result<Vec<ExecutionLogEntry>, LedgerError> {
        let records = self.records.lock().await;
        let mut entries: Vec<ExecutionLogEntry> = records
            .iter()
            .filter(|(key, _)| &key.run_id == run_id)
            .filter_map(|(_, record)| record.entry.clone())
            .collect();
        entries.sort_by_key(|entry| entry.timestamp);
        Ok(entries)
    }
}

/// Builds the error for a write to a key that was never claimed.
pub fn missing(key: &LedgerKey) -> LedgerError {
    LedgerError::MissingRecord {
        run_id: key.run_id.clone(),
        step_id: key.step_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::definition::StepType;

    fn key() -> LedgerKey {
        LedgerKey::new("run-1".into(), "enrich".into())
    }

    fn entry() -> ExecutionLogEntry {
        ExecutionLogEntry::success("enrich".into(), StepType::Enrich, Duration::from_millis(3))
    }

    #[tokio::test]
    async fn test_first_arrival_wins() {
        let ledger = InMemoryRunLedger::new();
        let first = ExecutionId::new();
        let second = ExecutionId::new();

        assert_eq!(ledger.claim(&key(), first).await.unwrap(), Claim::Acquired);
        assert_eq!(ledger.claim(&key(), second).await.unwrap(), Claim::Duplicate);
    }

    #[tokio::test]
    async fn test_redelivery_while_running_reacquires() {
        let ledger = InMemoryRunLedger::new();
        let id = ExecutionId::new();

        ledger.claim(&key(), id).await.unwrap();
        assert_eq!(ledger.claim(&key(), id).await.unwrap(), Claim::Acquired);
    }

    #[tokio::test]
    async fn test_unconfirmed_effects_are_replayed() {
        let ledger = InMemoryRunLedger::new();
        let id = ExecutionId::new();
        let effects = StepEffects::default();

        ledger.claim(&key(), id).await.unwrap();
        ledger
            .complete(&key(), id, entry(), effects.clone())
            .await
            .unwrap();
        assert_eq!(
            ledger.claim(&key(), id).await.unwrap(),
            Claim::Pending(effects)
        );

        ledger.confirm(&key()).await.unwrap();
        assert_eq!(ledger.claim(&key(), id).await.unwrap(), Claim::Duplicate);
    }

    #[tokio::test]
    async fn test_complete_requires_owner() {
        let ledger = InMemoryRunLedger::new();
        ledger.claim(&key(), ExecutionId::new()).await.unwrap();

        let err = ledger
            .complete(&key(), ExecutionId::new(), entry(), StepEffects::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotOwner { .. }));
    }

    #[tokio::test]
    async fn test_entries_are_scoped_to_run() {
        let ledger = InMemoryRunLedger::new();
        let other = LedgerKey::new("run-2".into(), "enrich".into());
        for key in [key(), other] {
            let id = ExecutionId::new();
            ledger.claim(&key, id).await.unwrap();
            ledger
                .complete(&key, id, entry(), StepEffects::default())
                .await
                .unwrap();
        }

        let entries = ledger.entries(&"run-1".into()).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_record_wire_format() {
        let mut record = StepRecord::running(ExecutionId::new());
        record.confirm();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["state"]["status"], "published");
    }
}
