//! Timeout-bounded dispatch of step actions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::instrument;

use super::{ActionConfig, ActionOutput, ActionRegistry};
use crate::TRACING_TARGET_DISPATCH;
use crate::definition::StepType;
use crate::error::DispatchError;

/// Default timeout applied to handlers that do not declare their own.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves the handler for a step type and invokes it under a timeout.
///
/// Cheap to clone; the registry is shared and never mutated.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    registry: Arc<ActionRegistry>,
    default_timeout: Duration,
}

impl ActionDispatcher {
    /// Freezes a registry into a dispatcher.
    pub fn new(registry: ActionRegistry) -> Self {
        tracing::info!(
            target: TRACING_TARGET_DISPATCH,
            handlers = registry.len(),
            "Action dispatcher initialized"
        );

        Self {
            registry: Arc::new(registry),
            default_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Sets the timeout for handlers without their own.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Returns whether a handler exists for the step type.
    #[inline]
    pub fn supports(&self, step_type: &StepType) -> bool {
        self.registry.contains(step_type)
    }

    /// Returns the registry.
    #[inline]
    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Runs the handler for `step_type` with the node's actions.
    ///
    /// Timeouts are reported as [`DispatchError::Timeout`], a handler
    /// failure rather than an engine fault.
    #[instrument(skip(self, config), target = TRACING_TARGET_DISPATCH)]
    pub async fn dispatch(
        &self,
        step_type: &StepType,
        config: &ActionConfig,
    ) -> Result<ActionOutput, DispatchError> {
        let handler = self
            .registry
            .get(step_type)
            .ok_or_else(|| DispatchError::UnknownActionType(step_type.clone()))?;
        let timeout = handler.timeout().unwrap_or(self.default_timeout);

        let start = Instant::now();
        let result = tokio::time::timeout(timeout, handler.execute(config)).await;

        match result {
            Ok(Ok(output)) => {
                tracing::debug!(
                    target: TRACING_TARGET_DISPATCH,
                    step_type = %step_type,
                    elapsed_ms = start.elapsed().as_millis(),
                    result_keys = output.len(),
                    "Action handler succeeded"
                );
                Ok(output)
            }
            Ok(Err(err)) => {
                tracing::debug!(
                    target: TRACING_TARGET_DISPATCH,
                    step_type = %step_type,
                    error = %err,
                    "Action handler failed"
                );
                Err(err.into())
            }
            Err(_) => {
                tracing::warn!(
                    target: TRACING_TARGET_DISPATCH,
                    step_type = %step_type,
                    timeout_ms = timeout.as_millis(),
                    "Action handler timed out"
                );
                Err(DispatchError::Timeout {
                    step_type: step_type.clone(),
                    timeout,
                })
            }
        }
    }
}
