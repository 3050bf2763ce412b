//! Workflow definition types.
//!
//! A [`WorkflowDefinition`] is an ordered set of [`WorkflowNode`]s linked by
//! [`NextStep`] references, with exactly one trigger node as the entry point.

mod id;
mod node;
mod position;
mod step_type;
mod workflow;

pub use id::{NodeId, WorkflowId};
pub use node::{NextStep, NodeBuilder, NodeBuilderError, WorkflowNode};
pub use position::Position;
pub use step_type::StepType;
pub use workflow::{ValidationReport, ValidationWarning, WorkflowDefinition};
