//! Prelude module for convenient imports.
//!
//! ```rust
//! use conveyor_runtime::prelude::*;
//! ```

pub use crate::definition::{NextStep, NodeId, StepType, WorkflowDefinition, WorkflowId, WorkflowNode};
pub use crate::dispatch::{
    ActionConfig, ActionDispatcher, ActionError, ActionHandler, ActionOutput, ActionRegistry,
};
pub use crate::engine::{
    Coordinator, DefinitionStore, Disposition, InMemoryDefinitionStore, InMemoryRunLedger, Outbox,
    RunLedger, StepExecutor,
};
pub use crate::error::{DispatchError, ProcessingError, WorkflowError, WorkflowResult};
pub use crate::execution::{
    ExecutionResult, RunContext, RunId, RunInvocation, StepExecution, StepStatus,
};
