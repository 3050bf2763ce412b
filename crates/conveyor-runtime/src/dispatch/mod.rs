//! Action dispatch: step type to handler resolution.
//!
//! - [`ActionHandler`]: the contract every handler implements
//! - [`ActionRegistry`]: type to handler map, built at startup
//! - [`ActionDispatcher`]: lookup plus timeout around each call

mod builtin;
mod dispatcher;
mod handler;
mod registry;

pub use builtin::{TerminatorHandler, TriggerHandler};
pub use dispatcher::{ActionDispatcher, DEFAULT_DISPATCH_TIMEOUT};
pub use handler::{ActionConfig, ActionError, ActionHandler, ActionOutcome, ActionOutput};
pub use registry::ActionRegistry;
