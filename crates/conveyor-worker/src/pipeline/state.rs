//! Worker state and configuration.

use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use conveyor_nats::dead_letter::DeadLetterConfig;
use conveyor_nats::stream::ConsumerOptions;
use conveyor_nats::{NatsClient, Topology};
use conveyor_runtime::dispatch::{ActionDispatcher, ActionRegistry};
use conveyor_runtime::engine::{Coordinator, DefinitionStore, StepExecutor};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::{Error, KvRunLedger, NatsOutbox, Result};

/// Default maximum concurrent steps per worker.
pub const DEFAULT_MAX_CONCURRENT_STEPS: usize = 10;

/// Default handler timeout in seconds.
pub const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 30;

/// Default acknowledgement deadline in seconds.
pub const DEFAULT_ACK_WAIT_SECS: u64 = 60;

/// Configuration for the queue consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct WorkerConfig {
    /// Maximum messages processed at once by each consumer
    #[cfg_attr(
        feature = "config",
        arg(long, env = "CONVEYOR_MAX_CONCURRENT_STEPS", default_value_t = DEFAULT_MAX_CONCURRENT_STEPS)
    )]
    pub max_concurrent_steps: usize,

    /// Timeout for handlers that do not declare their own, in seconds
    #[cfg_attr(
        feature = "config",
        arg(long, env = "CONVEYOR_DISPATCH_TIMEOUT_SECS", default_value_t = DEFAULT_DISPATCH_TIMEOUT_SECS)
    )]
    pub dispatch_timeout_secs: u64,

    /// Seconds the broker waits for an acknowledgement before redelivering
    #[cfg_attr(
        feature = "config",
        arg(long, env = "CONVEYOR_ACK_WAIT_SECS", default_value_t = DEFAULT_ACK_WAIT_SECS)
    )]
    pub ack_wait_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: DEFAULT_MAX_CONCURRENT_STEPS,
            dispatch_timeout_secs: DEFAULT_DISPATCH_TIMEOUT_SECS,
            ack_wait_secs: DEFAULT_ACK_WAIT_SECS,
        }
    }
}

impl WorkerConfig {
    /// Creates a worker configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum concurrent steps.
    #[must_use]
    pub fn with_max_concurrent_steps(mut self, max_concurrent_steps: usize) -> Self {
        self.max_concurrent_steps = max_concurrent_steps;
        self
    }

    /// Sets the default handler timeout in seconds.
    #[must_use]
    pub fn with_dispatch_timeout_secs(mut self, secs: u64) -> Self {
        self.dispatch_timeout_secs = secs;
        self
    }

    /// Sets the acknowledgement deadline in seconds.
    #[must_use]
    pub fn with_ack_wait_secs(mut self, secs: u64) -> Self {
        self.ack_wait_secs = secs;
        self
    }

    /// Returns the default handler timeout.
    #[inline]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    /// Returns the acknowledgement deadline.
    #[inline]
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    /// Returns the consumer options for every route.
    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions::default().with_ack_wait(self.ack_wait())
    }

    /// Creates a semaphore for limiting concurrent processing.
    pub fn create_semaphore(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(self.max_concurrent_steps))
    }

    /// Checks that a handler running for `timeout` is settled before the
    /// broker redelivers its message.
    pub fn check_handler_timeout(&self, timeout: Duration) -> Result<()> {
        if timeout >= self.ack_wait() {
            return Err(Error::config(format!(
                "handler timeout of {}s must be shorter than the ack wait of {}s",
                timeout.as_secs(),
                self.ack_wait_secs
            )));
        }
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_steps == 0 {
            return Err(Error::config("max concurrent steps must be at least 1"));
        }
        if self.dispatch_timeout_secs == 0 {
            return Err(Error::config("dispatch timeout must be at least 1 second"));
        }
        self.check_handler_timeout(self.dispatch_timeout())
    }
}

/// Shared state of the queue consumers.
#[derive(Clone)]
pub struct WorkerState {
    /// NATS messaging client.
    pub nats: NatsClient,
    /// Route names, read-only after startup.
    pub topology: Arc<Topology>,
    /// Step coordinator.
    pub coordinator: Coordinator,
    /// Dead-letter retry policy.
    pub dead_letter: DeadLetterConfig,
    /// Consumer configuration.
    pub config: WorkerConfig,
}

impl WorkerState {
    /// Assembles the coordinator over the NATS ledger and outbox.
    pub async fn build(
        nats: NatsClient,
        topology: Topology,
        definitions: Arc<dyn DefinitionStore>,
        registry: ActionRegistry,
        dead_letter: DeadLetterConfig,
        config: WorkerConfig,
    ) -> Result<Self> {
        config.validate()?;
        dead_letter.validate()?;
        topology.validate()?;

        let ledger = KvRunLedger::new(&nats).await?;
        let outbox = NatsOutbox::new(&nats, &topology);
        let dispatcher =
            ActionDispatcher::new(registry).with_default_timeout(config.dispatch_timeout());
        let coordinator = Coordinator::new(
            definitions,
            Arc::new(ledger),
            Arc::new(outbox),
            StepExecutor::new(dispatcher),
        );

        Ok(Self {
            nats,
            topology: Arc::new(topology),
            coordinator,
            dead_letter,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.create_semaphore().available_permits(), 10);
        assert_eq!(config.consumer_options().ack_wait, Duration::from_secs(60));
    }

    #[test]
    fn test_ack_wait_must_cover_dispatch_timeout() {
        let config = WorkerConfig::default()
            .with_dispatch_timeout_secs(60)
            .with_ack_wait_secs(60);
        assert!(config.validate().is_err());

        let config = WorkerConfig::default();
        assert!(config.check_handler_timeout(Duration::from_secs(90)).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = WorkerConfig::default().with_max_concurrent_steps(0);
        assert!(config.validate().is_err());
    }
}
