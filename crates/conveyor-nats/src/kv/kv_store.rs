//! Type-safe NATS KV store wrapper.

use std::marker::PhantomData;

use async_nats::jetstream::{self, kv};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{KvBucket, KvKey};
use crate::{Error, Result, TRACING_TARGET_KV};

/// Type-safe NATS KV store wrapper.
///
/// Generic over the key type `K`, the JSON value type `V` and the bucket
/// configuration `B`.
#[derive(Clone)]
pub struct KvStore<K, V, B>
where
    K: KvKey,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    B: KvBucket,
{
    store: kv::Store,
    _marker: PhantomData<fn() -> (K, V, B)>,
}

impl<K, V, B> KvStore<K, V, B>
where
    K: KvKey,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    B: KvBucket,
{
    /// Gets or creates the bucket.
    #[tracing::instrument(skip(jetstream), target = TRACING_TARGET_KV)]
    pub(crate) async fn new(jetstream: &jetstream::Context) -> Result<Self> {
        let store = match jetstream.get_key_value(B::NAME).await {
            Ok(store) => {
                tracing::debug!(
                    target: TRACING_TARGET_KV,
                    bucket = %B::NAME,
                    "Using existing KV bucket"
                );
                store
            }
            Err(_) => {
                let ttl = B::TTL.unwrap_or_default();
                tracing::debug!(
                    target: TRACING_TARGET_KV,
                    bucket = %B::NAME,
                    ttl_secs = ttl.as_secs(),
                    "Creating new KV bucket"
                );
                jetstream
                    .create_key_value(kv::Config {
                        bucket: B::NAME.to_owned(),
                        description: B::DESCRIPTION.to_owned(),
                        max_age: ttl,
                        history: 1,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| Error::operation("kv_create_bucket", e.to_string()))?
            }
        };

        Ok(Self {
            store,
            _marker: PhantomData,
        })
    }

    /// Returns the bucket name.
    #[inline]
    pub fn bucket_name(&self) -> &'static str {
        B::NAME
    }

    /// Writes a value only if the key does not exist.
    ///
    /// Returns `None` when another writer got there first.
    #[tracing::instrument(skip(self, value), target = TRACING_TARGET_KV)]
    pub async fn create(&self, key: &K, value: &V) -> Result<Option<KvEntry>> {
        let key_str = key.to_string();
        let json = serde_json::to_vec(value)?;
        let size = json.len();

        match self.store.create(&key_str, json.into()).await {
            Ok(revision) => {
                tracing::debug!(
                    target: TRACING_TARGET_KV,
                    key = %key_str,
                    revision,
                    "Created key in KV store"
                );
                Ok(Some(KvEntry::new(key_str, revision, size)))
            }
            Err(e) if matches!(e.kind(), kv::CreateErrorKind::AlreadyExists) => {
                tracing::debug!(
                    target: TRACING_TARGET_KV,
                    key = %key_str,
                    "Key already exists in KV store"
                );
                Ok(None)
            }
            Err(e) => Err(Error::operation("kv_create", e.to_string())),
        }
    }

    /// Reads a value with its revision.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    pub async fn get(&self, key: &K) -> Result<Option<KvValue<V>>> {
        let key_str = key.to_string();
        let entry = self
            .store
            .entry(&key_str)
            .await
            .map_err(|e| Error::operation("kv_get", e.to_string()))?;

        // Deleted and purged keys surface as tombstone entries.
        let Some(entry) = entry.filter(|entry| matches!(entry.operation, kv::Operation::Put))
        else {
            tracing::debug!(
                target: TRACING_TARGET_KV,
                key = %key_str,
                "Key not found in KV store"
            );
            return Ok(None);
        };

        let value = serde_json::from_slice(&entry.value)?;
        Ok(Some(KvValue {
            key: key_str,
            value,
            revision: entry.revision,
            size: entry.value.len() as u64,
        }))
    }

    /// Reads a value without metadata.
    pub async fn get_value(&self, key: &K) -> Result<Option<V>> {
        Ok(self.get(key).await?.map(|kv| kv.value))
    }

    /// Writes a value only if the key is still at `revision`.
    #[tracing::instrument(skip(self, value), target = TRACING_TARGET_KV)]
    pub async fn update(&self, key: &K, value: &V, revision: u64) -> Result<KvEntry> {
        let key_str = key.to_string();
        let json = serde_json::to_vec(value)?;
        let size = json.len();

        let new_revision = self
            .store
            .update(&key_str, json.into(), revision)
            .await
            .map_err(|e| match e.kind() {
                kv::UpdateErrorKind::WrongLastRevision => {
                    Error::kv_revision_mismatch(B::NAME, &key_str)
                }
                _ => Error::operation("kv_update", e.to_string()),
            })?;

        tracing::debug!(
            target: TRACING_TARGET_KV,
            key = %key_str,
            old_revision = revision,
            new_revision,
            "Updated value in KV store"
        );
        Ok(KvEntry::new(key_str, new_revision, size))
    }

    /// Lists every key that parses as `K`.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    pub async fn keys(&self) -> Result<Vec<K>> {
        let mut keys = Vec::new();
        let mut key_stream = self
            .store
            .keys()
            .await
            .map_err(|e| Error::operation("kv_keys", e.to_string()))?;

        while let Some(key_result) = key_stream.next().await {
            match key_result {
                Ok(key_str) => {
                    if let Ok(key) = key_str.parse::<K>() {
                        keys.push(key);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        target: TRACING_TARGET_KV,
                        error = %e,
                        "Error reading key from bucket"
                    );
                }
            }
        }

        tracing::debug!(
            target: TRACING_TARGET_KV,
            count = keys.len(),
            bucket = %B::NAME,
            "Listed bucket keys"
        );
        Ok(keys)
    }
}

/// Metadata of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvEntry {
    /// Stored key.
    pub key: String,
    /// Revision after the write.
    pub revision: u64,
    /// Encoded value size in bytes.
    pub size: u64,
}

impl KvEntry {
    fn new(key: String, revision: u64, size: usize) -> Self {
        Self {
            key,
            revision,
            size: size as u64,
        }
    }
}

/// A value together with the revision it was read at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvValue<V> {
    /// Stored key.
    pub key: String,
    /// Decoded value.
    pub value: V,
    /// Revision the value was read at, for [`KvStore::update`].
    pub revision: u64,
    /// Encoded value size in bytes.
    pub size: u64,
}
