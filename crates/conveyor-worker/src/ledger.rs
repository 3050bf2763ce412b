//! Run ledger stored in a NATS KV bucket.

use conveyor_nats::NatsClient;
use conveyor_nats::kv::{KvStore, RunLedgerBucket, StepKey};
use conveyor_runtime::LedgerError;
use conveyor_runtime::engine::{
    Claim, LedgerKey, RunLedger, StepEffects, StepRecord, missing,
};
use conveyor_runtime::execution::{ExecutionId, ExecutionLogEntry, RunId};

use crate::{Result, TRACING_TARGET_LEDGER};

type LedgerStore = KvStore<StepKey, StepRecord, RunLedgerBucket>;

/// [`RunLedger`] shared by every worker through the `conveyor_run_ledger`
/// bucket.
///
/// Claims use create-if-absent, and updates are guarded by the revision
/// they were read at, so two workers never both own a step.
#[derive(Clone)]
pub struct KvRunLedger {
    store: LedgerStore,
}

impl KvRunLedger {
    /// Opens or creates the ledger bucket.
    pub async fn new(nats: &NatsClient) -> Result<Self> {
        let store = nats.kv_store().await?;
        Ok(Self { store })
    }

    async fn update_record<F>(&self, key: &LedgerKey, apply: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut StepRecord) -> Result<(), LedgerError> + Send,
    {
        let step_key = step_key(key);
        let mut current = self
            .store
            .get(&step_key)
            .await
            .map_err(backend)?
            .ok_or_else(|| missing(key))?;

        apply(&mut current.value)?;
        self.store
            .update(&step_key, &current.value, current.revision)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

fn step_key(key: &LedgerKey) -> StepKey {
    StepKey::new(key.run_id.as_str(), key.step_id.as_str())
}

fn backend(err: conveyor_nats::Error) -> LedgerError {
    LedgerError::Backend(err.to_string())
}

#[async_trait::async_trait]
impl RunLedger for KvRunLedger {
    async fn claim(
        &self,
        key: &LedgerKey,
        execution_id: ExecutionId,
    ) -> Result<Claim, LedgerError> {
        let step_key = step_key(key);

        if let Some(existing) = self.store.get_value(&step_key).await.map_err(backend)? {
            return Ok(existing.claim_by(execution_id));
        }

        let created = self
            .store
            .create(&step_key, &StepRecord::running(execution_id))
            .await
            .map_err(backend)?;
        if created.is_some() {
            return Ok(Claim::Acquired);
        }

        // Lost the race to a concurrent claim.
        tracing::debug!(
            target: TRACING_TARGET_LEDGER,
            run_id = %key.run_id,
            step_id = %key.step_id,
            "Concurrent claim detected"
        );
        let existing = self
            .store
            .get_value(&step_key)
            .await
            .map_err(backend)?
            .ok_or_else(|| missing(key))?;
        Ok(existing.claim_by(execution_id))
    }

    async fn complete(
        &self,
        key: &LedgerKey,
        execution_id: ExecutionId,
        entry: ExecutionLogEntry,
        effects: StepEffects,
    ) -> Result<(), LedgerError> {
        self.update_record(key, |record| record.complete(execution_id, entry, effects))
            .await
    }

    async fn confirm(&self, key: &LedgerKey) -> Result<(), LedgerError> {
        self.update_record(key, |record| {
            record.confirm();
            Ok(())
        })
        .await
    }

    async fn entries(&self, run_id: &RunId) -> Result<Vec<ExecutionLogEntry>, LedgerError> {
        let keys = self.store.keys().await.map_err(backend)?;

        let mut entries = Vec::new();
        for step_key in keys.iter().filter(|k| k.run_id == run_id.as_str()) {
            let record = self.store.get_value(step_key).await.map_err(backend)?;
            if let Some(entry) = record.and_then(|record| record.entry) {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|entry| entry.timestamp);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_key_round_trips_ledger_key() {
        let key = LedgerKey::new("run.with.dots".into(), "slack alert".into());
        let encoded = step_key(&key).to_string();
        let decoded: StepKey = encoded.parse().unwrap();
        assert_eq!(decoded.run_id, "run.with.dots");
        assert_eq!(decoded.step_id, "slack alert");
    }

    #[test]
    fn test_backend_error_keeps_message() {
        let err = backend(conveyor_nats::Error::operation("kv_get", "bucket offline"));
        assert!(matches!(err, LedgerError::Backend(ref msg) if msg.contains("bucket offline")));
    }
}
