//! Workflow definition lookup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::TRACING_TARGET_DEFINITION;
use crate::definition::{ValidationReport, WorkflowDefinition, WorkflowId};
use crate::error::{StoreError, WorkflowResult};

/// Read-only source of workflow definitions, shared by all consumers.
#[async_trait::async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Fetches a definition by id.
    async fn get(&self, id: &WorkflowId) -> Result<Arc<WorkflowDefinition>, StoreError>;
}

/// Definitions validated and held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDefinitionStore {
    definitions: HashMap<WorkflowId, Arc<WorkflowDefinition>>,
}

impl InMemoryDefinitionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and adds a definition, replacing any with the same id.
    pub fn insert(&mut self, definition: WorkflowDefinition) -> WorkflowResult<ValidationReport> {
        let report = definition.validate()?;
        for warning in &report.warnings {
            tracing::warn!(
                target: TRACING_TARGET_DEFINITION,
                workflow_id = %definition.id,
                warning = %warning,
                "Workflow definition warning"
            );
        }
        self.definitions
            .insert(definition.id.clone(), Arc::new(definition));
        Ok(report)
    }

    /// Adds a definition (builder pattern).
    pub fn with_definition(mut self, definition: WorkflowDefinition) -> WorkflowResult<Self> {
        self.insert(definition)?;
        Ok(self)
    }

    /// Loads every `*.json` file in a directory.
    ///
    /// Each file holds one [`WorkflowDefinition`]. Any invalid file fails
    /// the whole load.
    pub async fn load_dir(dir: impl AsRef<Path>) -> WorkflowResult<Self> {
        let dir = dir.as_ref();
        let mut store = Self::new();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let definition: WorkflowDefinition = serde_json::from_slice(&bytes)?;

            tracing::debug!(
                target: TRACING_TARGET_DEFINITION,
                path = %path.display(),
                workflow_id = %definition.id,
                nodes = definition.nodes.len(),
                "Loaded workflow definition"
            );
            store.insert(definition)?;
        }

        tracing::info!(
            target: TRACING_TARGET_DEFINITION,
            dir = %dir.display(),
            count = store.len(),
            "Workflow definitions loaded"
        );
        Ok(store)
    }

    /// Returns the stored workflow ids.
    pub fn ids(&self) -> impl Iterator<Item = &WorkflowId> {
        self.definitions.keys()
    }

    /// Returns the number of stored definitions.
    #[inline]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns whether the store is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[async_trait::async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn get(&self, id: &WorkflowId) -> Result<Arc<WorkflowDefinition>, StoreError> {
        self.definitions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::WorkflowError;

    fn definition_json(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": "Meeting follow-up",
            "version": "1.0.0",
            "nodes": [
                { "id": "start", "type": "trigger", "next_steps": [{ "id": "end", "type": "terminator" }] },
                { "id": "end", "type": "terminator" }
            ]
        })
    }

    #[tokio::test]
    async fn test_load_dir_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("follow-up.json"),
            definition_json("follow-up").to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a workflow").unwrap();

        let store = InMemoryDefinitionStore::load_dir(dir.path()).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(&"follow-up".into()).await.is_ok());
    }

    #[tokio::test]
    async fn test_load_dir_rejects_invalid_definition() {
        let dir = tempfile::tempdir().unwrap();
        let mut invalid = definition_json("broken");
        invalid["nodes"][0]["type"] = json!("enrich");
        std::fs::write(dir.path().join("broken.json"), invalid.to_string()).unwrap();

        let err = InMemoryDefinitionStore::load_dir(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::MissingTrigger));
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let store = InMemoryDefinitionStore::new();
        assert!(matches!(
            store.get(&"missing".into()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
