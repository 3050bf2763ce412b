//! Test doubles for handlers and transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;

use crate::dispatch::{ActionConfig, ActionError, ActionHandler, ActionOutput};
use crate::engine::Outbox;
use crate::error::OutboxError;
use crate::execution::{ExecutionResult, RunInvocation, StepExecution};

/// Handler with a fixed response, optional delay and a call counter.
///
/// Clones share the counter.
#[derive(Debug, Clone)]
pub struct ScriptedHandler {
    response: Result<ActionOutput, ActionError>,
    delay: Option<Duration>,
    timeout: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedHandler {
    fn new(response: Result<ActionOutput, ActionError>) -> Self {
        Self {
            response,
            delay: None,
            timeout: None,
            calls: Arc::default(),
        }
    }

    /// Succeeds with no results.
    pub fn succeeding() -> Self {
        Self::new(Ok(ActionOutput::new()))
    }

    /// Succeeds with the fields of a JSON object as results.
    pub fn returning(results: Value) -> Self {
        Self::new(Ok(results.as_object().cloned().unwrap_or_default()))
    }

    /// Fails with the given message.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(Err(ActionError::new(message)))
    }

    /// Sleeps before responding.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Declares a handler-specific timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of times the handler was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ActionHandler for ScriptedHandler {
    async fn execute(&self, _config: &ActionConfig) -> Result<ActionOutput, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Outbox that records everything published.
#[derive(Debug, Default)]
pub struct RecordingOutbox {
    steps: Mutex<Vec<StepExecution>>,
    results: Mutex<Vec<ExecutionResult>>,
    invocations: Mutex<Vec<RunInvocation>>,
    failing: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingOutbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail until switched off again.
    pub fn fail_publishing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Published steps.
    pub fn steps(&self) -> Vec<StepExecution> {
        lock(&self.steps).clone()
    }

    /// Removes and returns the published steps.
    pub fn take_steps(&self) -> Vec<StepExecution> {
        std::mem::take(&mut *lock(&self.steps))
    }

    /// Published results.
    pub fn results(&self) -> Vec<ExecutionResult> {
        lock(&self.results).clone()
    }

    /// Published invocations.
    pub fn invocations(&self) -> Vec<RunInvocation> {
        lock(&self.invocations).clone()
    }

    fn check(&self, destination: &str) -> Result<(), OutboxError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(OutboxError::new(destination, "publishing disabled"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Outbox for RecordingOutbox {
    async fn publish_step(&self, step: &StepExecution) -> Result<(), OutboxError> {
        self.check("execution")?;
        lock(&self.steps).push(step.clone());
        Ok(())
    }

    async fn publish_result(&self, result: &ExecutionResult) -> Result<(), OutboxError> {
        self.check("completion")?;
        lock(&self.results).push(result.clone());
        Ok(())
    }

    async fn publish_invocation(&self, invocation: &RunInvocation) -> Result<(), OutboxError> {
        self.check("invoker")?;
        lock(&self.invocations).push(invocation.clone());
        Ok(())
    }
}
