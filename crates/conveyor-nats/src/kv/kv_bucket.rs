//! Key-value bucket configuration.

use std::time::Duration;

/// Marker trait for KV bucket configuration.
pub trait KvBucket: Clone + Send + Sync + 'static {
    /// Bucket name used in NATS KV.
    const NAME: &'static str;

    /// Human-readable description for the bucket.
    const DESCRIPTION: &'static str;

    /// Entry TTL, `None` for entries that never expire.
    const TTL: Option<Duration>;
}

/// Bucket holding the per-step run ledger.
///
/// Entries outlive any redelivery window, then expire with the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RunLedgerBucket;

impl KvBucket for RunLedgerBucket {
    const NAME: &'static str = "conveyor_run_ledger";
    const DESCRIPTION: &'static str = "Per-step claims and effects of workflow runs";
    const TTL: Option<Duration> = Some(Duration::from_secs(7 * 24 * 60 * 60)); // 7 days
}
