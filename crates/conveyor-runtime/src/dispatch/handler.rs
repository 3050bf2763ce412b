//! Action handler contract.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Handler-specific configuration of a node: action key to config value.
pub type ActionConfig = Map<String, Value>;

/// Results returned by a successful handler, merged into the run payload.
pub type ActionOutput = Map<String, Value>;

/// Failure reported by an action handler.
///
/// This is a legitimate step outcome: it is logged and the message is
/// still acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActionError {
    message: String,
}

impl ActionError {
    /// Creates a handler failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the failure message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Performs the work of one step type.
///
/// Handlers are black boxes to the engine. They may perform network I/O and
/// run for tens of seconds; the dispatcher bounds every call with a timeout.
#[async_trait::async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    /// Executes the node's actions.
    async fn execute(&self, config: &ActionConfig) -> Result<ActionOutput, ActionError>;

    /// Timeout for this handler. `None` uses the dispatcher default.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Wire shape of a handler response: `{success, results?, error?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether the handler succeeded.
    pub success: bool,
    /// Results on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<ActionOutput>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    /// Converts the wire shape into a handler result.
    pub fn into_result(self) -> Result<ActionOutput, ActionError> {
        if self.success {
            Ok(self.results.unwrap_or_default())
        } else {
            Err(ActionError::new(
                self.error
                    .unwrap_or_else(|| "action handler reported failure".to_owned()),
            ))
        }
    }
}

impl From<Result<ActionOutput, ActionError>> for ActionOutcome {
    fn from(result: Result<ActionOutput, ActionError>) -> Self {
        match result {
            Ok(results) => Self {
                success: true,
                results: Some(results),
                error: None,
            },
            Err(err) => Self {
                success: false,
                results: None,
                error: Some(err.message),
            },
        }
    }
}
