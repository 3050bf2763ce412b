//! Typed NATS key-value buckets.
//!
//! - `KvStore<K, V, B>`: JSON values under typed keys
//! - `KvKey`: key encoding
//! - `KvBucket`: bucket name, description and TTL

mod kv_bucket;
mod kv_key;
mod kv_store;

pub use kv_bucket::{KvBucket, RunLedgerBucket};
pub use kv_key::{KvKey, StepKey};
pub use kv_store::{KvEntry, KvStore, KvValue};
