//! Handlers for the step types the engine itself understands.

use super::{ActionConfig, ActionError, ActionHandler, ActionOutput};

/// Entry point handler. Passes the invocation payload through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerHandler;

#[async_trait::async_trait]
impl ActionHandler for TriggerHandler {
    async fn execute(&self, _config: &ActionConfig) -> Result<ActionOutput, ActionError> {
        Ok(ActionOutput::new())
    }
}

/// Explicit end of a branch.
///
/// A `message` action, when present, is echoed as `terminationMessage`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminatorHandler;

#[async_trait::async_trait]
impl ActionHandler for TerminatorHandler {
    async fn execute(&self, config: &ActionConfig) -> Result<ActionOutput, ActionError> {
        let mut output = ActionOutput::new();
        if let Some(message) = config.get("message") {
            output.insert("terminationMessage".to_owned(), message.clone());
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_terminator_echoes_message() {
        let config = json!({ "message": "done" }).as_object().cloned().unwrap();
        let output = TerminatorHandler.execute(&config).await.unwrap();
        assert_eq!(output["terminationMessage"], "done");
    }

    #[tokio::test]
    async fn test_trigger_is_empty() {
        let output = TriggerHandler.execute(&ActionConfig::new()).await.unwrap();
        assert!(output.is_empty());
    }
}
