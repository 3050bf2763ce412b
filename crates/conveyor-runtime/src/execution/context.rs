//! Run context and the execution log.

use std::time::Duration;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use crate::definition::{NodeId, StepType};

/// Outcome recorded for a step in the execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(AsRefStr, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntryStatus {
    /// The handler succeeded.
    Success,
    /// The handler failed or timed out.
    Failed,
}

/// Immutable audit record of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    /// Node that ran.
    pub node_id: NodeId,
    /// Type of the node.
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Outcome.
    pub status: EntryStatus,
    /// When the step finished.
    pub timestamp: Timestamp,
    /// Handler duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<u64>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionLogEntry {
    /// Records a successful step.
    pub fn success(node_id: NodeId, step_type: StepType, elapsed: Duration) -> Self {
        Self {
            node_id,
            step_type,
            status: EntryStatus::Success,
            timestamp: Timestamp::now(),
            execution_time: Some(millis(elapsed)),
            error: None,
        }
    }

    /// Records a failed step.
    pub fn failure(
        node_id: NodeId,
        step_type: StepType,
        elapsed: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            node_id,
            step_type,
            status: EntryStatus::Failed,
            timestamp: Timestamp::now(),
            execution_time: Some(millis(elapsed)),
            error: Some(error.into()),
        }
    }

    /// Returns whether the step succeeded.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == EntryStatus::Success
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// State accumulated along one path of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    /// The evolving contact/business payload.
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Entries for the steps executed so far on this path.
    #[serde(default)]
    pub execution_log: Vec<ExecutionLogEntry>,
}

impl RunContext {
    /// Creates a context around an initial payload.
    pub fn new(payload: Map<String, Value>) -> Self {
        Self {
            payload,
            execution_log: Vec::new(),
        }
    }

    /// Shallow-merges handler results into the payload.
    pub fn merge_results(&mut self, results: Map<String, Value>) {
        self.payload.extend(results);
    }

    /// Appends an entry to the log.
    pub fn record(&mut self, entry: ExecutionLogEntry) {
        self.execution_log.push(entry);
    }

    /// Returns the most recent failed entry, if any.
    pub fn last_failure(&self) -> Option<&ExecutionLogEntry> {
        self.execution_log.iter().rev().find(|entry| !entry.is_success())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_merge_results_overwrites_keys() {
        let mut context = RunContext::new(
            json!({ "email": "a@example.com", "score": 1 })
                .as_object()
                .cloned()
                .unwrap(),
        );
        context.merge_results(json!({ "score": 7, "company": "Acme" }).as_object().cloned().unwrap());

        assert_eq!(context.payload["score"], 7);
        assert_eq!(context.payload["company"], "Acme");
        assert_eq!(context.payload["email"], "a@example.com");
    }

    #[test]
    fn test_entry_wire_format() {
        let entry = ExecutionLogEntry::failure(
            "alert".into(),
            StepType::SlackAlert,
            Duration::from_millis(42),
            "rate_limited",
        );
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["nodeId"], "alert");
        assert_eq!(value["type"], "slack-alert");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["executionTime"], 42);
        assert_eq!(value["error"], "rate_limited");
    }
}
