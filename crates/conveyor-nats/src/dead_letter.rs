//! Dead-letter bookkeeping for rejected messages.
//!
//! A rejected message is republished to the dead-letter route carrying its
//! death history in headers. The relay holds it for the retry delay, then
//! returns it to its origin. Once the death count exceeds the retry limit
//! the message is parked instead.

use std::time::Duration;

use async_nats::HeaderMap;
#[cfg(feature = "config")]
use clap::Args;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of times the message has been dead-lettered.
pub const HEADER_DEATH_COUNT: &str = "Conveyor-Death-Count";

/// Reason of the latest rejection.
pub const HEADER_DEATH_REASON: &str = "Conveyor-Death-Reason";

/// RFC 3339 time of the latest rejection.
pub const HEADER_DEAD_LETTERED_AT: &str = "Conveyor-Dead-Lettered-At";

const DEFAULT_RETRY_DELAY_SECS: u64 = 10;
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Death history carried by a dead-lettered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathRecord {
    /// Rejections so far, including the latest.
    pub count: u32,
    /// Reason of the latest rejection.
    pub reason: String,
    /// Time of the latest rejection.
    pub dead_lettered_at: Timestamp,
}

impl DeathRecord {
    /// Reads the record from message headers.
    ///
    /// Returns `None` for a message that was never dead-lettered or whose
    /// headers are unreadable.
    pub fn from_headers(headers: Option<&HeaderMap>) -> Option<Self> {
        let headers = headers?;
        let count = headers.get(HEADER_DEATH_COUNT)?.as_str().parse().ok()?;
        let dead_lettered_at = headers
            .get(HEADER_DEAD_LETTERED_AT)?
            .as_str()
            .parse()
            .ok()?;
        let reason = headers
            .get(HEADER_DEATH_REASON)
            .map(|value| value.as_str().to_owned())
            .unwrap_or_default();

        Some(Self {
            count,
            reason,
            dead_lettered_at,
        })
    }

    /// Records one more rejection on top of `previous`.
    pub fn next(previous: Option<&Self>, reason: impl Into<String>) -> Self {
        Self {
            count: previous.map_or(0, |record| record.count).saturating_add(1),
            reason: reason.into(),
            dead_lettered_at: Timestamp::now(),
        }
    }

    /// Encodes the record as headers.
    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_DEATH_COUNT, self.count.to_string());
        headers.insert(HEADER_DEATH_REASON, self.reason.clone());
        headers.insert(HEADER_DEAD_LETTERED_AT, self.dead_lettered_at.to_string());
        headers
    }

    /// Time left before the message may be requeued.
    pub fn remaining(&self, delay: Duration, now: Timestamp) -> Duration {
        let elapsed = Duration::try_from(now.duration_since(self.dead_lettered_at))
            .unwrap_or_default();
        delay.saturating_sub(elapsed)
    }
}

/// What to do with a rejected message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Hold on the dead-letter route, then retry.
    Requeue,
    /// Retries exhausted. Move to the parked route.
    Park,
}

/// Dead-letter retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct DeadLetterConfig {
    /// Seconds a rejected message is held before it is retried
    #[cfg_attr(
        feature = "config",
        arg(long = "retry-delay-secs", env = "CONVEYOR_RETRY_DELAY_SECS", default_value_t = DEFAULT_RETRY_DELAY_SECS)
    )]
    pub retry_delay_secs: u64,

    /// Dead-letter cycles before a message is parked
    #[cfg_attr(
        feature = "config",
        arg(long = "max-retries", env = "CONVEYOR_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)
    )]
    pub max_retries: u32,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl DeadLetterConfig {
    /// Returns the retry delay.
    #[inline]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Sets the retry delay in seconds.
    #[must_use]
    pub fn with_retry_delay_secs(mut self, secs: u64) -> Self {
        self.retry_delay_secs = secs;
        self
    }

    /// Sets the retry limit.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Decides the fate of a message after its latest rejection.
    pub fn on_reject(&self, record: &DeathRecord) -> Rejection {
        if record.count > self.max_retries {
            Rejection::Park
        } else {
            Rejection::Requeue
        }
    }

    /// Validates the policy.
    pub fn validate(&self) -> Result<()> {
        if self.retry_delay_secs == 0 {
            return Err(Error::invalid_config("retry delay must be at least one second"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_round_trip() {
        let record = DeathRecord::next(None, "unknown_workflow");
        let headers = record.to_headers();
        assert_eq!(DeathRecord::from_headers(Some(&headers)), Some(record));
    }

    #[test]
    fn test_missing_or_garbled_headers() {
        assert_eq!(DeathRecord::from_headers(None), None);

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_DEATH_COUNT, "three");
        headers.insert(HEADER_DEAD_LETTERED_AT, "2025-01-01T00:00:00Z");
        assert_eq!(DeathRecord::from_headers(Some(&headers)), None);
    }

    #[test]
    fn test_count_accumulates() {
        let first = DeathRecord::next(None, "malformed");
        let second = DeathRecord::next(Some(&first), "malformed");
        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
    }

    #[test]
    fn test_parked_after_max_retries() {
        let config = DeadLetterConfig::default();
        let mut record = None;
        let mut fates = Vec::new();
        for _ in 0..4 {
            let next = DeathRecord::next(record.as_ref(), "unknown_action_type");
            fates.push(config.on_reject(&next));
            record = Some(next);
        }
        assert_eq!(
            fates,
            [
                Rejection::Requeue,
                Rejection::Requeue,
                Rejection::Requeue,
                Rejection::Park
            ]
        );
    }

    #[test]
    fn test_remaining_delay() {
        let at: Timestamp = "2025-01-01T00:00:00Z".parse().unwrap();
        let record = DeathRecord {
            count: 1,
            reason: "store".into(),
            dead_lettered_at: at,
        };
        let delay = Duration::from_secs(10);

        let later: Timestamp = "2025-01-01T00:00:04Z".parse().unwrap();
        assert_eq!(record.remaining(delay, later), Duration::from_secs(6));

        let expired: Timestamp = "2025-01-01T00:01:00Z".parse().unwrap();
        assert_eq!(record.remaining(delay, expired), Duration::ZERO);

        let skewed: Timestamp = "2024-12-31T23:59:59Z".parse().unwrap();
        assert_eq!(record.remaining(delay, skewed), delay);
    }

    #[test]
    fn test_validation() {
        assert!(DeadLetterConfig::default().validate().is_ok());
        assert!(
            DeadLetterConfig::default()
                .with_retry_delay_secs(0)
                .validate()
                .is_err()
        );
    }
}
