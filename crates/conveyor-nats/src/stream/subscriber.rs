//! Durable pull consumers with explicit acknowledgement.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_nats::HeaderMap;
use async_nats::jetstream::consumer::{self, pull};
use async_nats::jetstream::{self, AckKind, Context};
use bytes::Bytes;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::{Error, Result, Route, TRACING_TARGET_STREAM};

const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ACK_PENDING: i64 = 1_000;

/// Durable consumer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Time the server waits for an ack before redelivering.
    ///
    /// Must exceed the longest step, handler timeout included.
    pub ack_wait: Duration,
    /// Unacknowledged messages the server hands out at once.
    pub max_ack_pending: i64,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            ack_wait: DEFAULT_ACK_WAIT,
            max_ack_pending: DEFAULT_MAX_ACK_PENDING,
        }
    }
}

impl ConsumerOptions {
    /// Sets the ack wait.
    #[must_use]
    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    /// Sets the maximum number of in-flight messages.
    #[must_use]
    pub fn with_max_ack_pending(mut self, max_ack_pending: i64) -> Self {
        self.max_ack_pending = max_ack_pending;
        self
    }
}

#[derive(Debug)]
struct StreamSubscriberInner {
    jetstream: Context,
    route: Route,
    options: ConsumerOptions,
}

/// Consumes `T` messages from a route's durable consumer.
///
/// Every worker subscribing to the same route competes for its messages.
#[derive(Debug)]
pub struct StreamSubscriber<T> {
    inner: Arc<StreamSubscriberInner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for StreamSubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> StreamSubscriber<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(jetstream: &Context, route: &Route, options: ConsumerOptions) -> Self {
        Self {
            inner: Arc::new(StreamSubscriberInner {
                jetstream: jetstream.clone(),
                route: route.clone(),
                options,
            }),
            _marker: PhantomData,
        }
    }

    /// Returns the route.
    #[inline]
    pub fn route(&self) -> &Route {
        &self.inner.route
    }

    /// Gets or creates the durable consumer and opens its message stream.
    #[instrument(skip(self), fields(route = %self.inner.route), target = TRACING_TARGET_STREAM)]
    pub async fn subscribe(&self) -> Result<DeliveryStream<T>> {
        let route = &self.inner.route;
        let options = &self.inner.options;

        let stream = self
            .inner
            .jetstream
            .get_stream(route.stream_name())
            .await
            .map_err(|e| Error::stream_error(route.stream_name(), e.to_string()))?;

        let config = pull::Config {
            durable_name: Some(route.consumer_name().to_owned()),
            description: Some(format!("Conveyor consumer for {}", route.subject())),
            ack_policy: consumer::AckPolicy::Explicit,
            ack_wait: options.ack_wait,
            max_ack_pending: options.max_ack_pending,
            filter_subject: route.subject().to_owned(),
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(route.consumer_name(), config)
            .await
            .map_err(|e| Error::consumer_error(route.consumer_name(), e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::consumer_error(route.consumer_name(), e.to_string()))?;

        debug!(
            target: TRACING_TARGET_STREAM,
            stream = %route.stream_name(),
            consumer = %route.consumer_name(),
            ack_wait_secs = options.ack_wait.as_secs(),
            "Subscribed to stream"
        );

        Ok(DeliveryStream {
            messages,
            consumer_name: route.consumer_name().to_owned(),
            _marker: PhantomData,
        })
    }
}

/// Open message stream of a durable consumer.
pub struct DeliveryStream<T> {
    messages: pull::Stream,
    consumer_name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DeliveryStream<T>
where
    T: DeserializeOwned,
{
    /// Waits for the next delivery. `None` once the stream has closed.
    pub async fn next(&mut self) -> Option<Result<Delivery<T>>> {
        let message = self.messages.next().await?;
        Some(
            message
                .map(Delivery::new)
                .map_err(|e| Error::consumer_error(&self.consumer_name, e.to_string())),
        )
    }
}

/// One delivered message, still awaiting acknowledgement.
///
/// The raw payload is kept so undecodable messages can still be
/// dead-lettered verbatim.
pub struct Delivery<T> {
    message: jetstream::Message,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Delivery<T>
where
    T: DeserializeOwned,
{
    fn new(message: jetstream::Message) -> Self {
        Self {
            message,
            _marker: PhantomData,
        }
    }

    /// Decodes the JSON payload.
    pub fn decode(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.message.payload)?)
    }
}

impl<T> Delivery<T> {
    /// Raw payload.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.message.payload
    }

    /// Message headers, if any.
    #[inline]
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.message.headers.as_ref()
    }

    /// Subject the message was published to.
    #[inline]
    pub fn subject(&self) -> &str {
        &self.message.subject
    }

    /// Sequence of the message in its stream, stable across redeliveries.
    pub fn stream_sequence(&self) -> Option<u64> {
        self.message.info().ok().map(|info| info.stream_sequence)
    }

    /// Number of times the server has delivered this message.
    pub fn delivery_count(&self) -> u64 {
        self.message
            .info()
            .map(|info| info.delivered.max(1) as u64)
            .unwrap_or(1)
    }

    /// Acknowledges the message; it will not be delivered again.
    pub async fn ack(&self) -> Result<()> {
        self.message.ack().await.map_err(Error::ack)
    }

    /// Requests immediate redelivery.
    pub async fn nack(&self) -> Result<()> {
        self.ack_with(AckKind::Nak(None)).await
    }

    /// Requests redelivery after `delay`.
    pub async fn nack_with_delay(&self, delay: Duration) -> Result<()> {
        self.ack_with(AckKind::Nak(Some(delay))).await
    }

    /// Stops redelivery without processing.
    pub async fn term(&self) -> Result<()> {
        self.ack_with(AckKind::Term).await
    }

    async fn ack_with(&self, kind: AckKind) -> Result<()> {
        self.message.ack_with(kind).await.map_err(Error::ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_options() {
        let options = ConsumerOptions::default()
            .with_ack_wait(Duration::from_secs(90))
            .with_max_ack_pending(10);
        assert_eq!(options.ack_wait, Duration::from_secs(90));
        assert_eq!(options.max_ack_pending, 10);
        assert_eq!(ConsumerOptions::default().ack_wait, DEFAULT_ACK_WAIT);
    }
}
