//! In-memory state store, for tests and embedders that do not need restarts.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::StateStoreError;
use crate::traits::StateStore;
use crate::types::{StartPatternIntervalTrigger, SubmittedWorkflows, TriggerKey};

#[derive(Default)]
struct Snapshots {
    running: BTreeSet<TriggerKey>,
    submitted: SubmittedWorkflows,
    definitions: BTreeMap<TriggerKey, StartPatternIntervalTrigger>,
}

/// State store that keeps the latest snapshots behind a `RwLock`.
pub struct InMemoryStateStore {
    snapshots: RwLock<Snapshots>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(Snapshots::default()),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load_running(&self) -> Result<BTreeSet<TriggerKey>, StateStoreError> {
        Ok(self.snapshots.read().await.running.clone())
    }

    async fn save_running(&self, running: &BTreeSet<TriggerKey>) -> Result<(), StateStoreError> {
        self.snapshots.write().await.running = running.clone();
        Ok(())
    }

    async fn load_submitted(&self) -> Result<SubmittedWorkflows, StateStoreError> {
        Ok(self.snapshots.read().await.submitted.clone())
    }

    async fn save_submitted(&self, submitted: &SubmittedWorkflows) -> Result<(), StateStoreError> {
        self.snapshots.write().await.submitted = submitted.clone();
        Ok(())
    }

    async fn load_definitions(
        &self,
    ) -> Result<BTreeMap<TriggerKey, StartPatternIntervalTrigger>, StateStoreError> {
        Ok(self.snapshots.read().await.definitions.clone())
    }

    async fn save_definitions(
        &self,
        definitions: &BTreeMap<TriggerKey, StartPatternIntervalTrigger>,
    ) -> Result<(), StateStoreError> {
        self.snapshots.write().await.definitions = definitions.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_replaces_running_set() {
        let store = InMemoryStateStore::new();
        store
            .save_running(&[TriggerKey::new("e", "a")].into())
            .await
            .unwrap();
        store
            .save_running(&[TriggerKey::new("e", "b")].into())
            .await
            .unwrap();

        let running = store.load_running().await.unwrap();
        assert_eq!(running, [TriggerKey::new("e", "b")].into());
    }
}
