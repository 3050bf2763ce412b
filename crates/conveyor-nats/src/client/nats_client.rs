//! NATS client wrapper and connection management.
//!
//! `NatsClient` wraps the multiplexed `async-nats` client: one TCP
//! connection per process, shared by every publisher, subscriber and KV
//! store created from it. Cloning is an `Arc` clone.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::stream::{self, RetentionPolicy};
use async_nats::{Client, ConnectOptions, jetstream};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use super::nats_config::NatsConfig;
use crate::kv::{KvBucket, KvKey, KvStore};
use crate::stream::{ConsumerOptions, StreamPublisher, StreamSubscriber};
use crate::{
    Error, Result, RetryConfig, Route, TRACING_TARGET_CLIENT, TRACING_TARGET_CONNECTION,
    TRACING_TARGET_STREAM, Topology,
};

/// How long results and parked messages are retained for inspection.
const RETAINED_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// NATS client wrapper with connection management.
#[derive(Debug, Clone)]
pub struct NatsClient {
    inner: Arc<NatsClientInner>,
}

#[derive(Debug)]
struct NatsClientInner {
    client: Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Connects to the configured servers.
    #[tracing::instrument(skip(config), target = TRACING_TARGET_CONNECTION)]
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            servers = %config.nats_url,
            client_name = %config.name(),
            "Connecting to NATS"
        );

        let connect_timeout = config.connect_timeout();
        let mut connect_opts = ConnectOptions::new()
            .name(config.name())
            .ping_interval(config.ping_interval())
            .connection_timeout(connect_timeout)
            .max_reconnects(config.max_reconnects());

        if let Some(token) = &config.nats_token {
            connect_opts = connect_opts.token(token.clone());
        }

        let base_delay_ms = config.reconnect_delay().as_millis() as u64;
        connect_opts = connect_opts.reconnect_delay_callback(move |attempts| {
            let factor = 2_u64.saturating_pow(attempts.min(16) as u32);
            Duration::from_millis(base_delay_ms.saturating_mul(factor).min(30_000))
        });

        let client = timeout(
            connect_timeout,
            async_nats::connect_with_options(config.nats_url.as_str(), connect_opts),
        )
        .await
        .map_err(|_| Error::timeout(connect_timeout))?
        .map_err(|e| Error::Connection(Box::new(e)))?;

        let jetstream = jetstream::new(client.clone());

        let server_info = client.server_info();
        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            server_host = %server_info.host,
            server_version = %server_info.version,
            server_id = %server_info.server_id,
            max_payload = server_info.max_payload,
            "Connected to NATS"
        );

        Ok(Self {
            inner: Arc::new(NatsClientInner {
                client,
                jetstream,
                config,
            }),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &NatsConfig {
        &self.inner.config
    }

    /// Returns the JetStream context.
    #[must_use]
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.inner.jetstream
    }

    /// Round-trips a flush to the server.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CONNECTION)]
    pub async fn ping(&self) -> Result<Duration> {
        let start = std::time::Instant::now();
        let limit = Duration::from_secs(10);

        timeout(limit, self.inner.client.flush())
            .await
            .map_err(|_| Error::timeout(limit))?
            .map_err(|e| Error::Connection(Box::new(e)))?;

        let elapsed = start.elapsed();
        tracing::debug!(
            target: TRACING_TARGET_CLIENT,
            duration_ms = elapsed.as_millis(),
            "NATS ping successful"
        );
        Ok(elapsed)
    }
}

// Stream provisioning and typed endpoints
impl NatsClient {
    /// Creates every stream of the topology that does not exist yet.
    ///
    /// Work queues (execution, dead-letter, invoker) drop messages once
    /// acknowledged. Results and parked messages are kept for inspection.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_STREAM)]
    pub async fn ensure_topology(&self, topology: &Topology) -> Result<()> {
        topology.validate()?;

        for route in [&topology.execution, &topology.dead_letter, &topology.invoker] {
            self.ensure_stream(route, RetentionPolicy::WorkQueue, Duration::ZERO)
                .await?;
        }
        for route in [&topology.completion, &topology.parked] {
            self.ensure_stream(route, RetentionPolicy::Limits, RETAINED_MAX_AGE)
                .await?;
        }

        tracing::info!(
            target: TRACING_TARGET_STREAM,
            streams = topology.routes().len(),
            "Queue topology ready"
        );
        Ok(())
    }

    async fn ensure_stream(
        &self,
        route: &Route,
        retention: RetentionPolicy,
        max_age: Duration,
    ) -> Result<()> {
        let config = stream::Config {
            name: route.stream_name().to_owned(),
            description: Some(format!("Conveyor route {route}")),
            subjects: vec![route.subject().to_owned()],
            retention,
            max_age,
            ..Default::default()
        };

        self.inner
            .jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| Error::stream_error(route.stream_name(), e.to_string()))?;

        tracing::debug!(
            target: TRACING_TARGET_STREAM,
            stream = %route.stream_name(),
            subject = %route.subject(),
            retention = ?retention,
            "Stream ready"
        );
        Ok(())
    }

    /// Creates a typed publisher for a route.
    pub fn publisher<T>(&self, route: &Route) -> StreamPublisher<T>
    where
        T: Serialize + Send + Sync + 'static,
    {
        StreamPublisher::new(&self.inner.jetstream, route, RetryConfig::default())
    }

    /// Creates a typed subscriber for a route's durable consumer.
    pub fn subscriber<T>(&self, route: &Route, options: ConsumerOptions) -> StreamSubscriber<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        StreamSubscriber::new(&self.inner.jetstream, route, options)
    }

    /// Gets or creates the KV store for the given key, value and bucket types.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CLIENT)]
    pub async fn kv_store<K, V, B>(&self) -> Result<KvStore<K, V, B>>
    where
        K: KvKey,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        B: KvBucket,
    {
        KvStore::new(&self.inner.jetstream).await
    }
}
