//! Typed publisher with acknowledged delivery.

use std::marker::PhantomData;
use std::sync::Arc;

use async_nats::HeaderMap;
use async_nats::jetstream::Context;
use bytes::Bytes;
use serde::Serialize;
use tracing::instrument;

use crate::{Error, Result, RetryConfig, Route, TRACING_TARGET_STREAM};

#[derive(Debug)]
struct StreamPublisherInner {
    jetstream: Context,
    route: Route,
    retry: RetryConfig,
}

/// Publishes `T` as JSON to one route.
///
/// `publish*` returns only after the server has stored the message.
#[derive(Debug)]
pub struct StreamPublisher<T> {
    inner: Arc<StreamPublisherInner>,
    _marker: PhantomData<fn(&T)>,
}

impl<T> Clone for StreamPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> StreamPublisher<T>
where
    T: Serialize + Send + Sync + 'static,
{
    pub(crate) fn new(jetstream: &Context, route: &Route, retry: RetryConfig) -> Self {
        Self {
            inner: Arc::new(StreamPublisherInner {
                jetstream: jetstream.clone(),
                route: route.clone(),
                retry,
            }),
            _marker: PhantomData,
        }
    }

    /// Returns the route.
    #[inline]
    pub fn route(&self) -> &Route {
        &self.inner.route
    }

    /// Publishes one message.
    pub async fn publish(&self, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.publish_raw(Bytes::from(payload), None).await
    }

    /// Publishes an already encoded payload, retrying transient failures.
    ///
    /// Used to forward messages that may not decode as `T`.
    #[instrument(skip(self, payload, headers), fields(subject = %self.inner.route.subject()), target = TRACING_TARGET_STREAM)]
    pub async fn publish_raw(&self, payload: Bytes, headers: Option<HeaderMap>) -> Result<()> {
        let subject = self.inner.route.subject();
        let size = payload.len();

        let sequence = self
            .inner
            .retry
            .retry(|| self.send(subject, payload.clone(), headers.clone()))
            .await?;

        tracing::debug!(
            target: TRACING_TARGET_STREAM,
            subject = %subject,
            sequence,
            payload_size = size,
            "Published message"
        );
        Ok(())
    }

    async fn send(&self, subject: &str, payload: Bytes, headers: Option<HeaderMap>) -> Result<u64> {
        let jetstream = &self.inner.jetstream;
        let pending = match headers {
            Some(headers) => {
                jetstream
                    .publish_with_headers(subject.to_owned(), headers, payload)
                    .await
            }
            None => jetstream.publish(subject.to_owned(), payload).await,
        }
        .map_err(|e| Error::delivery_failed(subject, e.to_string()))?;

        let ack = pending
            .await
            .map_err(|e| Error::delivery_failed(subject, e.to_string()))?;
        Ok(ack.sequence)
    }
}
