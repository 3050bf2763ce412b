//! Workflow node definition types.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use super::{NodeId, Position, StepType};
use crate::dispatch::ActionConfig;

/// Reference from a node to one of its successors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NextStep {
    /// Target node.
    pub id: NodeId,
    /// Type of the target node, as declared by the referencing node.
    #[serde(rename = "type")]
    pub step_type: StepType,
}

impl NextStep {
    /// Creates a new successor reference.
    pub fn new(id: impl Into<NodeId>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            step_type,
        }
    }
}

/// A single step in a workflow definition.
///
/// A node with no `next_steps` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(
    name = "NodeBuilder",
    pattern = "owned",
    setter(into, strip_option, prefix = "with")
)]
pub struct WorkflowNode {
    /// Node identifier.
    pub id: NodeId,
    /// Kind of work this node performs.
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub name: Option<String>,
    /// Handler-specific configuration, opaque to the engine.
    #[serde(default)]
    #[builder(default)]
    pub actions: ActionConfig,
    /// Ordered successors.
    #[serde(default, alias = "nextSteps", skip_serializing_if = "Vec::is_empty")]
    #[builder(default)]
    pub next_steps: Vec<NextStep>,
    /// Position in the visual editor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub position: Option<Position>,
    /// Whether a handler failure still continues to `next_steps`.
    #[serde(default, alias = "continueOnFailure")]
    #[builder(default)]
    pub continue_on_failure: bool,
}

impl WorkflowNode {
    /// Creates a node with no actions and no successors.
    pub fn new(id: impl Into<NodeId>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            step_type,
            name: None,
            actions: ActionConfig::new(),
            next_steps: Vec::new(),
            position: None,
            continue_on_failure: false,
        }
    }

    /// Returns a builder for creating a node.
    pub fn builder() -> NodeBuilder {
        NodeBuilder::default()
    }

    /// Returns whether this node ends its branch.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.next_steps.is_empty()
    }

    /// Appends a successor.
    #[must_use]
    pub fn with_next(mut self, next: NextStep) -> Self {
        self.next_steps.push(next);
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_deserialize_node() {
        let node: WorkflowNode = serde_json::from_value(json!({
            "id": "enrich-1",
            "type": "enrich",
            "name": "Enrich contact",
            "actions": { "provider": "clearbit" },
            "next_steps": [{ "id": "alert-1", "type": "slack-alert" }],
            "position": { "x": 10.0, "y": 20.0 }
        }))
        .unwrap();

        assert_eq!(node.id.as_str(), "enrich-1");
        assert_eq!(node.step_type, StepType::Enrich);
        assert_eq!(node.next_steps.len(), 1);
        assert_eq!(node.next_steps[0].step_type, StepType::SlackAlert);
        assert!(!node.continue_on_failure);
        assert!(!node.is_terminal());
    }

    #[test]
    fn test_builder() {
        let node = WorkflowNode::builder()
            .with_id("alert")
            .with_step_type(StepType::SlackAlert)
            .with_continue_on_failure(true)
            .build()
            .unwrap();

        assert!(node.is_terminal());
        assert!(node.continue_on_failure);
        assert!(node.name.is_none());
    }
}
