//! Runtime records: the queue message, the run context and terminal results.

mod context;
mod id;
mod result;
mod step;

pub use context::{EntryStatus, ExecutionLogEntry, RunContext};
pub use id::{ExecutionId, RunId};
pub use result::{ExecutionResult, RunInvocation, RunStatus};
pub use step::{StepExecution, StepStatus};
