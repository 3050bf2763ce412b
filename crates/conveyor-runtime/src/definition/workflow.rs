//! Workflow definition and structural validation.

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use super::{NodeId, WorkflowId, WorkflowNode};
use crate::error::{WorkflowError, WorkflowResult};

fn default_version() -> String {
    "1.0.0".to_owned()
}

/// A declarative graph of steps, read-only at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow identifier.
    pub id: WorkflowId,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Definition version, semver when compatibility checks are used.
    #[serde(default = "default_version")]
    pub version: String,
    /// Nodes in declaration order.
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
}

impl WorkflowDefinition {
    /// Creates an empty definition.
    pub fn new(id: impl Into<WorkflowId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            version: default_version(),
            nodes: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the version string.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Appends a node.
    #[must_use]
    pub fn with_node(mut self, node: WorkflowNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Looks up a node by identifier.
    pub fn node(&self, id: &NodeId) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// Returns the entry node, the first trigger in declaration order.
    pub fn trigger(&self) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|node| node.step_type.is_trigger())
    }

    /// Parses the version as semver.
    pub fn semver(&self) -> WorkflowResult<Version> {
        Version::parse(&self.version).map_err(|source| WorkflowError::InvalidVersion {
            version: self.version.clone(),
            source,
        })
    }

    /// Checks that the version satisfies a requirement such as `^1.2`.
    pub fn check_compatible(&self, requirement: &VersionReq) -> WorkflowResult<()> {
        if requirement.matches(&self.semver()?) {
            Ok(())
        } else {
            Err(WorkflowError::IncompatibleVersion {
                version: self.version.clone(),
                requirement: requirement.to_string(),
            })
        }
    }

    /// Validates the graph structure.
    ///
    /// Duplicate ids, a missing or repeated trigger, and edges back into the
    /// trigger are errors. Dangling successor references, unreachable nodes
    /// and cycles are reported as warnings: a dangling reference fails the
    /// run that reaches it rather than the whole definition.
    pub fn validate(&self) -> WorkflowResult<ValidationReport> {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !seen.insert(&node.id) {
                return Err(WorkflowError::DuplicateNode(node.id.clone()));
            }
        }

        let triggers: Vec<&WorkflowNode> = self
            .nodes
            .iter()
            .filter(|node| node.step_type.is_trigger())
            .collect();
        let trigger = match triggers.as_slice() {
            [] => return Err(WorkflowError::MissingTrigger),
            [trigger] => *trigger,
            many => {
                return Err(WorkflowError::MultipleTriggers(
                    many.iter().map(|node| node.id.clone()).collect(),
                ));
            }
        };

        let mut graph: DiGraph<&NodeId, ()> = DiGraph::with_capacity(self.nodes.len(), 0);
        let indices: HashMap<&NodeId, NodeIndex> = self
            .nodes
            .iter()
            .map(|node| (&node.id, graph.add_node(&node.id)))
            .collect();

        let mut report = ValidationReport::default();
        for node in &self.nodes {
            for next in &node.next_steps {
                if next.id == trigger.id {
                    return Err(WorkflowError::TriggerReferenced {
                        trigger: trigger.id.clone(),
                        from: node.id.clone(),
                    });
                }
                match indices.get(&next.id) {
                    Some(&target) => {
                        graph.add_edge(indices[&node.id], target, ());
                    }
                    None => report.warnings.push(ValidationWarning::DanglingNextStep {
                        from: node.id.clone(),
                        to: next.id.clone(),
                    }),
                }
            }
        }

        let mut reachable = HashSet::with_capacity(self.nodes.len());
        let mut bfs = Bfs::new(&graph, indices[&trigger.id]);
        while let Some(index) = bfs.next(&graph) {
            reachable.insert(index);
        }
        for node in &self.nodes {
            if !reachable.contains(&indices[&node.id]) {
                report
                    .warnings
                    .push(ValidationWarning::Unreachable(node.id.clone()));
            }
        }

        if is_cyclic_directed(&graph) {
            report.warnings.push(ValidationWarning::Cycle);
        }

        tracing::debug!(
            target: crate::TRACING_TARGET_DEFINITION,
            workflow_id = %self.id,
            node_count = self.nodes.len(),
            edge_count = graph.edge_count(),
            warnings = report.warnings.len(),
            "Validated workflow definition"
        );

        Ok(report)
    }
}

/// Non-fatal findings from [`WorkflowDefinition::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Findings in discovery order.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    /// Returns whether the definition produced no warnings.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// A structural problem that does not prevent loading a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// A successor id that no node declares.
    DanglingNextStep {
        /// Referencing node.
        from: NodeId,
        /// Missing target.
        to: NodeId,
    },
    /// A node the trigger cannot reach.
    Unreachable(NodeId),
    /// The graph loops. Revisits of a step within one run are dropped as
    /// duplicates by the run ledger.
    Cycle,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingNextStep { from, to } => {
                write!(f, "node '{from}' references unknown next step '{to}'")
            }
            Self::Unreachable(id) => write!(f, "node '{id}' is unreachable from the trigger"),
            Self::Cycle => f.write_str("workflow graph contains a cycle"),
        }
    }
}
