//! Identifiers that travel with every message of a run.

use derive_more::{Debug, Display, From, Into};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one step execution message.
///
/// Fresh for every published continuation, stable across redeliveries of
/// the same message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Debug, Display, From, Into)]
#[debug("{_0}")]
#[display("{_0}")]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    /// Creates a new time-ordered execution ID.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[inline]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Correlation identifier shared by every message of one workflow run.
///
/// Runs may be started by external systems, so any string is accepted.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Debug, Display, From, Into)]
#[debug("{_0}")]
#[display("{_0}")]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Creates a run ID from an existing correlation id.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh time-ordered run ID.
    #[inline]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Derives the run ID of an invocation message from its position in
    /// the stream.
    ///
    /// Every redelivery of the same message yields the same ID.
    pub fn for_message(stream: &str, sequence: u64) -> Self {
        let name = format!("{stream}/{sequence}");
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string())
    }

    /// Returns the identifier as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_run_id_is_stable() {
        let first = RunId::for_message("workflow_invoker_exchange", 42);
        let again = RunId::for_message("workflow_invoker_exchange", 42);
        let next = RunId::for_message("workflow_invoker_exchange", 43);

        assert_eq!(first, again);
        assert_ne!(first, next);
        assert!(Uuid::parse_str(first.as_str()).is_ok());
    }
}
