#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for workflow definition loading and validation.
pub const TRACING_TARGET_DEFINITION: &str = "conveyor_runtime::definition";

/// Tracing target for action dispatch.
pub const TRACING_TARGET_DISPATCH: &str = "conveyor_runtime::dispatch";

/// Tracing target for single step execution.
pub const TRACING_TARGET_EXECUTOR: &str = "conveyor_runtime::executor";

/// Tracing target for the run coordinator.
///
/// Use this target for message receipt, continuation publishing and
/// processing failures.
pub const TRACING_TARGET_COORDINATOR: &str = "conveyor_runtime::coordinator";

pub mod definition;
pub mod dispatch;
pub mod engine;
mod error;
pub mod execution;

#[cfg(any(test, feature = "test-utils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub mod mock;

#[doc(hidden)]
pub mod prelude;

pub use error::{
    DispatchError, LedgerError, OutboxError, ProcessingError, StoreError, WorkflowError,
    WorkflowResult,
};
