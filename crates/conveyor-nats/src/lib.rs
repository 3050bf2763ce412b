#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for NATS client operations.
///
/// Use this target for logging client initialization, configuration, and client-level errors.
pub const TRACING_TARGET_CLIENT: &str = "conveyor_nats::client";

/// Tracing target for NATS key-value store operations.
pub const TRACING_TARGET_KV: &str = "conveyor_nats::kv";

/// Tracing target for JetStream stream and consumer operations.
pub const TRACING_TARGET_STREAM: &str = "conveyor_nats::stream";

/// Tracing target for NATS connection operations.
///
/// Use this target for logging connection establishment, reconnection, and retries.
pub const TRACING_TARGET_CONNECTION: &str = "conveyor_nats::connection";

mod client;
pub mod dead_letter;
mod error;
pub mod kv;
mod retry;
pub mod stream;
mod topology;

// Re-export async_nats types needed by consumers
pub use async_nats::{HeaderMap, jetstream};
pub use client::{NatsClient, NatsConfig};
pub use error::{Error, Result};
pub use retry::RetryConfig;
pub use topology::{Route, Topology, TopologyConfig};
