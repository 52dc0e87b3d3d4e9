//! Trigger lifecycle management.

use std::collections::{BTreeMap, BTreeSet};

use tokio::task::JoinHandle;
use tracing::Instrument;

use super::super::traits::Trigger;
use super::super::types::TriggerKey;
use super::handle::TriggerHandle;

/// A spawned trigger worker.
pub struct RunningTrigger {
    /// Control surface shared with the worker.
    pub handle: TriggerHandle,
    /// The tokio task driving [`Trigger::run`].
    pub task: JoinHandle<()>,
}

impl RunningTrigger {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Running trigger workers, keyed by [`TriggerKey`].
///
/// Each trigger runs in its own tokio task inside a `trigger` span. The
/// registry is owned by a single task; it is never shared.
#[derive(Default)]
pub struct TriggerRegistry {
    entries: BTreeMap<TriggerKey, RunningTrigger>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `trigger` on the runtime and return its worker record without
    /// registering it.
    pub fn spawn<T: Trigger + 'static>(mut trigger: T) -> RunningTrigger {
        let handle = trigger.handle().clone();
        let span = tracing::info_span!(
            "trigger",
            key = %handle.key(),
            trigger_type = %trigger.trigger_type(),
        );
        let task = tokio::spawn(async move { trigger.run().await }.instrument(span));
        RunningTrigger { handle, task }
    }

    /// Register a worker, returning the one it replaced.
    pub fn insert(&mut self, running: RunningTrigger) -> Option<RunningTrigger> {
        self.entries.insert(running.handle.key().clone(), running)
    }

    pub fn remove(&mut self, key: &str) -> Option<RunningTrigger> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&RunningTrigger> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> BTreeSet<TriggerKey> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unregister every worker whose task has already returned, including
    /// workers that panicked before checking out.
    pub fn reap_finished(&mut self) -> Vec<(TriggerKey, RunningTrigger)> {
        let finished: Vec<TriggerKey> = self
            .entries
            .iter()
            .filter(|(_, running)| running.is_finished())
            .map(|(key, _)| key.clone())
            .collect();

        finished
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|running| (key, running)))
            .collect()
    }

    /// Signal every worker to stop and await all of them.
    ///
    /// The registry is left empty. Worker panics are logged, not propagated.
    pub async fn shutdown_all(&mut self) {
        let entries = std::mem::take(&mut self.entries);

        for running in entries.values() {
            running.handle.shutdown();
        }

        for (key, running) in entries {
            if let Err(e) = running.task.await {
                tracing::error!(key = %key, "trigger task failed: {e}");
            }
        }
    }
}
