#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for queue consumers.
pub const TRACING_TARGET_PIPELINE: &str = "conveyor_worker::pipeline";

/// Tracing target for the NATS-backed run ledger and outbox.
pub const TRACING_TARGET_LEDGER: &str = "conveyor_worker::ledger";

/// Tracing target for HTTP action handlers.
pub const TRACING_TARGET_HTTP: &str = "conveyor_worker::http";

mod error;
pub mod http;
mod ledger;
mod outbox;
pub mod pipeline;

pub use crate::error::{BoxedError, Error, ErrorKind, Result};
pub use crate::ledger::KvRunLedger;
pub use crate::outbox::NatsOutbox;
