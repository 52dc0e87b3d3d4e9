//! Trigger dispatcher.
//!
//! The dispatcher is the single owner of the trigger registry and of every
//! durable snapshot. It consumes [`TriggerManagerMessage`]s from its inbox
//! and, before handling each one, reconciles what the workers reported since
//! the last wake: exited triggers first, then submitted workflows. Workers
//! never touch dispatcher state; they only send on the two channels carried
//! by their [`TriggerHandle`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::super::config::{DispatcherConfig, RecoveryPolicy};
use super::super::defaults::{CommandSubmitter, FileStateStore};
use super::super::errors::DispatchError;
use super::super::traits::{StateStore, Submitter};
use super::super::types::{
    MessageKind, Shutdown, StartPatternIntervalTrigger, StopTrigger, SubmissionRecord,
    SubmittedWorkflows, TriggerKey, TriggerManagerMessage, TriggerState,
};
use super::handle::TriggerHandle;
use super::pattern_interval::PatternIntervalTrigger;
use super::runner::TriggerRegistry;

/// Builder for a [`TriggerDispatcher`].
///
/// The state store defaults to a [`FileStateStore`] in the configured trigger
/// directory and the submitter to a [`CommandSubmitter`].
pub struct TriggerDispatcherBuilder {
    inbox: mpsc::Receiver<TriggerManagerMessage>,
    config: DispatcherConfig,
    store: Option<Arc<dyn StateStore>>,
    submitter: Option<Arc<dyn Submitter>>,
}

impl TriggerDispatcherBuilder {
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn submitter(mut self, submitter: Arc<dyn Submitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    /// Load prior submissions, apply the recovery policy and write the
    /// initial running-set snapshot.
    pub async fn build(self) -> Result<TriggerDispatcher, DispatchError> {
        let store: Arc<dyn StateStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileStateStore::new(&self.config.trigger_dir)?),
        };
        let submitter: Arc<dyn Submitter> = self
            .submitter
            .unwrap_or_else(|| Arc::new(CommandSubmitter::new()));

        let (checkout_tx, checkout_rx) = mpsc::unbounded_channel();
        let (submitted_tx, submitted_rx) = mpsc::unbounded_channel();

        let submitted = store.load_submitted().await?;

        let mut dispatcher = TriggerDispatcher {
            config: self.config,
            inbox: self.inbox,
            store,
            submitter,
            registry: TriggerRegistry::new(),
            definitions: BTreeMap::new(),
            submitted,
            checkout_tx,
            checkout_rx,
            submitted_tx,
            submitted_rx,
        };

        dispatcher.recover().await?;
        dispatcher.persist_running().await?;

        tracing::info!(
            trigger_dir = %dispatcher.config.trigger_dir.display(),
            recovery = %dispatcher.config.recovery,
            running = dispatcher.registry.len(),
            "trigger dispatcher ready"
        );
        Ok(dispatcher)
    }
}

/// Single-writer coordinator of trigger workers.
///
/// After any message has been processed, the persisted running set equals
/// [`running_keys()`](Self::running_keys).
pub struct TriggerDispatcher {
    config: DispatcherConfig,
    inbox: mpsc::Receiver<TriggerManagerMessage>,
    store: Arc<dyn StateStore>,
    submitter: Arc<dyn Submitter>,
    registry: TriggerRegistry,
    /// Start arguments of every registered trigger.
    definitions: BTreeMap<TriggerKey, StartPatternIntervalTrigger>,
    submitted: SubmittedWorkflows,
    checkout_tx: mpsc::UnboundedSender<TriggerKey>,
    checkout_rx: mpsc::UnboundedReceiver<TriggerKey>,
    submitted_tx: mpsc::UnboundedSender<SubmissionRecord>,
    submitted_rx: mpsc::UnboundedReceiver<SubmissionRecord>,
}

impl TriggerDispatcher {
    /// Start building a dispatcher that consumes `inbox`.
    pub fn builder(inbox: mpsc::Receiver<TriggerManagerMessage>) -> TriggerDispatcherBuilder {
        TriggerDispatcherBuilder {
            inbox,
            config: DispatcherConfig::default(),
            store: None,
            submitter: None,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn running_keys(&self) -> BTreeSet<TriggerKey> {
        self.registry.keys()
    }

    pub fn submitted(&self) -> &SubmittedWorkflows {
        &self.submitted
    }

    /// State last published by a registered trigger's worker.
    pub fn trigger_state(&self, key: &str) -> Option<TriggerState> {
        self.registry.get(key).map(|running| running.handle.state())
    }

    /// Sender half of the worker-exit channel.
    ///
    /// A key received here only unregisters a trigger whose stop has been
    /// requested; a checkout naming a live worker is ignored.
    pub fn exit_sender(&self) -> mpsc::UnboundedSender<TriggerKey> {
        self.checkout_tx.clone()
    }

    /// Sender half of the submission-record channel.
    pub fn submission_sender(&self) -> mpsc::UnboundedSender<SubmissionRecord> {
        self.submitted_tx.clone()
    }

    /// Process messages until a shutdown message arrives or every sender of
    /// the inbox is dropped.
    ///
    /// Returns the first fatal error. Non-fatal handler errors are logged and
    /// the loop continues.
    pub async fn run(&mut self) -> Result<(), DispatchError> {
        loop {
            let Some(message) = self.inbox.recv().await else {
                tracing::info!("inbox closed");
                break;
            };
            tracing::debug!(kind = %message.kind, "received message");

            let result = match self.reconcile().await {
                Ok(()) if message.kind == MessageKind::Shutdown => {
                    match message.parse_arguments::<Shutdown>() {
                        Ok(Shutdown {}) => break,
                        Err(e) => Err(e),
                    }
                }
                Ok(()) => self.handle(message).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "trigger dispatcher stopping");
                    return Err(e);
                }
                Err(e) => tracing::warn!(error = %e, "message rejected"),
            }
        }

        self.shutdown().await
    }

    /// Fold in worker exits, then submission records, persisting each
    /// snapshot that changed.
    pub async fn reconcile(&mut self) -> Result<(), DispatchError> {
        self.drain_checkouts().await?;
        self.drain_submissions().await
    }

    /// Dispatch one message to its handler. Does not reconcile first.
    pub async fn handle(&mut self, message: TriggerManagerMessage) -> Result<(), DispatchError> {
        match message.kind {
            MessageKind::StopTrigger => {
                let args: StopTrigger = message.parse_arguments()?;
                self.stop_trigger(&args.ensemble, &args.trigger_name)
            }
            MessageKind::StartPatternIntervalTrigger => {
                let args: StartPatternIntervalTrigger = message.parse_arguments()?;
                self.start_pattern_interval_trigger(args).await
            }
            MessageKind::Shutdown => {
                let Shutdown {} = message.parse_arguments()?;
                self.shutdown().await
            }
        }
    }

    /// [`reconcile`](Self::reconcile) followed by [`handle`](Self::handle).
    pub async fn process(&mut self, message: TriggerManagerMessage) -> Result<(), DispatchError> {
        self.reconcile().await?;
        self.handle(message).await
    }

    /// Request a running trigger to stop.
    ///
    /// The registry entry is removed by a later [`reconcile`](Self::reconcile)
    /// once the trigger's exit is seen on the worker-exit channel. The stop
    /// flag set here is what lets that checkout through.
    pub fn stop_trigger(&mut self, ensemble: &str, trigger_name: &str) -> Result<(), DispatchError> {
        let key = TriggerKey::new(ensemble, trigger_name);
        let Some(running) = self.registry.get(key.as_str()) else {
            return Err(DispatchError::TriggerNotFound { key });
        };

        running.handle.shutdown();
        tracing::info!(key = %key, "stop requested");
        Ok(())
    }

    /// Spawn a pattern trigger and persist the new running set.
    pub async fn start_pattern_interval_trigger(
        &mut self,
        args: StartPatternIntervalTrigger,
    ) -> Result<(), DispatchError> {
        self.spawn_pattern_interval_trigger(args)?;
        self.persist_running().await
    }

    /// Stop every worker and wait for all of them to exit.
    ///
    /// Submissions made while the workers wound down are recorded. The
    /// running-set snapshot keeps naming the triggers that were live so a
    /// restoring restart can respawn them.
    pub async fn shutdown(&mut self) -> Result<(), DispatchError> {
        let stopping = self.registry.len();
        self.registry.shutdown_all().await;
        self.definitions.clear();

        while self.checkout_rx.try_recv().is_ok() {}
        self.drain_submissions().await?;

        tracing::info!(stopped = stopping, "trigger dispatcher shut down");
        Ok(())
    }

    fn spawn_pattern_interval_trigger(
        &mut self,
        args: StartPatternIntervalTrigger,
    ) -> Result<(), DispatchError> {
        let key = args.key();
        if self.registry.contains(key.as_str()) {
            return Err(DispatchError::DuplicateTrigger { key });
        }

        let handle = TriggerHandle::new(
            args.ensemble.clone(),
            args.trigger_name.clone(),
            self.checkout_tx.clone(),
            self.submitted_tx.clone(),
        );
        let trigger = PatternIntervalTrigger::new(
            handle,
            &args,
            Arc::clone(&self.submitter),
            self.config.submit_tool.clone(),
        )
        .map_err(|source| DispatchError::InvalidTrigger {
            key: key.clone(),
            source,
        })?;

        self.registry.insert(TriggerRegistry::spawn(trigger));
        tracing::info!(
            key = %key,
            ensemble = %args.ensemble,
            interval_secs = args.interval.as_secs(),
            "started pattern interval trigger"
        );
        self.definitions.insert(key, args);
        Ok(())
    }

    async fn recover(&mut self) -> Result<(), DispatchError> {
        if self.config.recovery == RecoveryPolicy::StartClean {
            return Ok(());
        }

        let previous = self.store.load_running().await?;
        let mut stored = self.store.load_definitions().await?;

        for key in previous {
            let Some(args) = stored.remove(&key) else {
                tracing::warn!(key = %key, "no stored definition, not restoring");
                continue;
            };
            if let Err(e) = self.spawn_pattern_interval_trigger(args) {
                tracing::warn!(key = %key, error = %e, "failed to restore trigger");
            }
        }
        Ok(())
    }

    async fn drain_checkouts(&mut self) -> Result<(), DispatchError> {
        let mut changed = false;
        while let Ok(key) = self.checkout_rx.try_recv() {
            match self.registry.get(key.as_str()) {
                // Every real checkout is posted after the stop flag is set.
                // A same-key worker started since then has a clear flag.
                Some(running) if running.handle.is_stop_requested() => {
                    self.registry.remove(key.as_str());
                    self.definitions.remove(&key);
                    tracing::debug!(key = %key, "trigger checked out");
                    changed = true;
                }
                Some(_) => {
                    tracing::warn!(key = %key, "checkout for live trigger ignored");
                }
                None => {
                    tracing::debug!(key = %key, "checkout for unknown trigger ignored");
                }
            }
        }

        for (key, running) in self.registry.reap_finished() {
            self.definitions.remove(&key);
            changed = true;
            match running.task.await {
                Ok(()) => tracing::warn!(key = %key, "trigger exited without checking out"),
                Err(e) => tracing::error!(key = %key, "trigger task failed: {e}"),
            }
        }

        if changed {
            self.persist_running().await?;
        }
        Ok(())
    }

    async fn drain_submissions(&mut self) -> Result<(), DispatchError> {
        let mut batch = SubmittedWorkflows::new();
        while let Ok(record) = self.submitted_rx.try_recv() {
            tracing::debug!(
                ensemble = %record.ensemble,
                trigger = %record.trigger_name,
                workflow = %record.workflow_name,
                "recorded submission"
            );
            batch.record(&record);
        }

        if !batch.is_empty() {
            self.submitted.merge(batch);
            self.store.save_submitted(&self.submitted).await?;
        }
        Ok(())
    }

    async fn persist_running(&self) -> Result<(), DispatchError> {
        self.store.save_running(&self.registry.keys()).await?;
        self.store.save_definitions(&self.definitions).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Interval;
    use crate::test_support::RecordingSubmitter;
    use serde_json::{json, Map, Value};
    use std::path::Path;
    use std::time::Duration;

    struct Fixture {
        dispatcher: TriggerDispatcher,
        tx: mpsc::Sender<TriggerManagerMessage>,
        submitter: Arc<RecordingSubmitter>,
        dir: tempfile::TempDir,
    }

    async fn fixture_with(dir: tempfile::TempDir, recovery: RecoveryPolicy) -> Fixture {
        let (tx, rx) = mpsc::channel(16);
        let submitter = Arc::new(RecordingSubmitter::succeeding());
        let dispatcher = TriggerDispatcher::builder(rx)
            .config(DispatcherConfig::new(dir.path()).recovery(recovery))
            .submitter(submitter.clone())
            .build()
            .await
            .expect("build dispatcher");
        Fixture {
            dispatcher,
            tx,
            submitter,
            dir,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(tempfile::tempdir().unwrap(), RecoveryPolicy::StartClean).await
    }

    fn start_args(name: &str, watch_dir: &Path) -> StartPatternIntervalTrigger {
        StartPatternIntervalTrigger {
            ensemble: "ens".into(),
            trigger_name: name.into(),
            workflow_name_prefix: "wf".into(),
            file_patterns: vec![watch_dir.join("*.csv").to_string_lossy().into_owned()],
            workflow_script: "/workflow.py".into(),
            interval: Interval::from_secs(3600).unwrap(),
            timeout: None,
            additional_args: None,
        }
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn running_on_disk(dir: &Path) -> BTreeSet<TriggerKey> {
        serde_json::from_value(read_json(&dir.join("running.json"))).unwrap()
    }

    fn keys(names: &[&str]) -> BTreeSet<TriggerKey> {
        names.iter().map(|n| TriggerKey::new("ens", n)).collect()
    }

    #[tokio::test]
    async fn test_fresh_dispatcher_persists_empty_running_set() {
        let fx = fixture().await;
        assert_eq!(read_json(&fx.dir.path().join("running.json")), json!([]));
        assert!(fx.dispatcher.running_keys().is_empty());
    }

    #[tokio::test]
    async fn test_start_trigger_registers_and_persists() {
        let mut fx = fixture().await;
        let watch = tempfile::tempdir().unwrap();

        fx.dispatcher
            .process(TriggerManagerMessage::start_pattern_interval_trigger(
                start_args("t1", watch.path()),
            ))
            .await
            .unwrap();

        assert_eq!(fx.dispatcher.running_keys(), keys(&["t1"]));
        assert_eq!(
            read_json(&fx.dir.path().join("running.json")),
            json!(["ens::t1"])
        );
        let definitions = read_json(&fx.dir.path().join("triggers.json"));
        assert_eq!(definitions["ens::t1"]["trigger_name"], json!("t1"));
        assert_eq!(definitions["ens::t1"]["interval"], json!(3600));

        fx.dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_checkouts_remove_triggers() {
        let mut fx = fixture().await;
        let watch = tempfile::tempdir().unwrap();
        for name in ["t1", "t2", "t3"] {
            fx.dispatcher
                .start_pattern_interval_trigger(start_args(name, watch.path()))
                .await
                .unwrap();
        }

        // Workers check themselves out, e.g. on lifetime timeout.
        for key in ["ens::t1", "ens::t2"] {
            fx.dispatcher.registry.get(key).unwrap().handle.shutdown();
        }
        fx.dispatcher.reconcile().await.unwrap();

        assert_eq!(fx.dispatcher.running_keys(), keys(&["t3"]));
        assert_eq!(running_on_disk(fx.dir.path()), keys(&["t3"]));

        fx.dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_checkout_keeps_restarted_trigger() {
        let mut fx = fixture().await;
        let watch = tempfile::tempdir().unwrap();
        fx.dispatcher
            .start_pattern_interval_trigger(start_args("t1", watch.path()))
            .await
            .unwrap();
        fx.dispatcher.stop_trigger("ens", "t1").unwrap();
        fx.dispatcher.reconcile().await.unwrap();
        fx.dispatcher
            .start_pattern_interval_trigger(start_args("t1", watch.path()))
            .await
            .unwrap();

        // A late duplicate of the first worker's exit.
        fx.dispatcher
            .exit_sender()
            .send(TriggerKey::new("ens", "t1"))
            .unwrap();
        fx.dispatcher.reconcile().await.unwrap();

        assert_eq!(fx.dispatcher.running_keys(), keys(&["t1"]));
        assert_eq!(running_on_disk(fx.dir.path()), keys(&["t1"]));
        assert!(read_json(&fx.dir.path().join("triggers.json"))
            .get("ens::t1")
            .is_some());

        fx.dispatcher.shutdown().await.unwrap();
    }

    /// Panics on its first poll, without checking out.
    struct PanickingTrigger {
        handle: TriggerHandle,
    }

    #[async_trait::async_trait]
    impl crate::traits::Trigger for PanickingTrigger {
        fn trigger_type(&self) -> &str {
            "panicking"
        }
        fn handle(&self) -> &TriggerHandle {
            &self.handle
        }

        async fn run(&mut self) {
            panic!("scan exploded");
        }
    }

    #[tokio::test]
    async fn test_panicked_worker_reaped() {
        let mut fx = fixture().await;
        let watch = tempfile::tempdir().unwrap();
        fx.dispatcher
            .start_pattern_interval_trigger(start_args("t1", watch.path()))
            .await
            .unwrap();

        let handle = TriggerHandle::new(
            "ens",
            "boom",
            fx.dispatcher.exit_sender(),
            fx.dispatcher.submission_sender(),
        );
        fx.dispatcher
            .registry
            .insert(TriggerRegistry::spawn(PanickingTrigger { handle }));
        fx.dispatcher.persist_running().await.unwrap();
        assert_eq!(running_on_disk(fx.dir.path()), keys(&["boom", "t1"]));

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                fx.dispatcher.reconcile().await.unwrap();
                if !fx.dispatcher.running_keys().contains("ens::boom") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("panicked worker should be reaped");

        assert_eq!(fx.dispatcher.running_keys(), keys(&["t1"]));
        assert_eq!(running_on_disk(fx.dir.path()), keys(&["t1"]));

        fx.dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_state_observable() {
        let mut fx = fixture().await;
        let watch = tempfile::tempdir().unwrap();
        fx.dispatcher
            .start_pattern_interval_trigger(start_args("t1", watch.path()))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while fx.dispatcher.trigger_state("ens::t1") != Some(TriggerState::Polling) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker should start polling");

        let handle = fx.dispatcher.registry.get("ens::t1").unwrap().handle.clone();
        fx.dispatcher.shutdown().await.unwrap();
        assert_eq!(handle.state(), TriggerState::Terminated);
        assert_eq!(fx.dispatcher.trigger_state("ens::t1"), None);
    }

    #[tokio::test]
    async fn test_submissions_merge_across_wakes() {
        let mut fx = fixture().await;
        let submissions = fx.dispatcher.submission_sender();
        let record = |e: &str, t: &str, w: &str| SubmissionRecord {
            ensemble: e.into(),
            trigger_name: t.into(),
            workflow_name: w.into(),
        };

        submissions.send(record("ens1", "trigger", "wf1")).unwrap();
        fx.dispatcher.reconcile().await.unwrap();
        assert_eq!(
            read_json(&fx.dir.path().join("submitted.json")),
            json!({"ens1": {"trigger": ["wf1"]}})
        );

        submissions.send(record("ens1", "trigger", "wf2")).unwrap();
        submissions.send(record("ens2", "trigger", "wf1")).unwrap();
        fx.dispatcher.reconcile().await.unwrap();
        assert_eq!(
            read_json(&fx.dir.path().join("submitted.json")),
            json!({
                "ens1": {"trigger": ["wf1", "wf2"]},
                "ens2": {"trigger": ["wf1"]}
            })
        );
    }

    #[tokio::test]
    async fn test_submissions_merge_with_previous_process() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("submitted.json"),
            r#"{"ens1": {"trigger": ["wf0"]}}"#,
        )
        .unwrap();

        let mut fx = fixture_with(dir, RecoveryPolicy::StartClean).await;
        fx.dispatcher
            .submission_sender()
            .send(SubmissionRecord {
                ensemble: "ens1".into(),
                trigger_name: "trigger".into(),
                workflow_name: "wf1".into(),
            })
            .unwrap();
        fx.dispatcher.reconcile().await.unwrap();

        assert_eq!(
            read_json(&fx.dir.path().join("submitted.json")),
            json!({"ens1": {"trigger": ["wf0", "wf1"]}})
        );
    }

    #[tokio::test]
    async fn test_stop_is_eventual() {
        let mut fx = fixture().await;
        let watch = tempfile::tempdir().unwrap();
        fx.dispatcher
            .start_pattern_interval_trigger(start_args("t1", watch.path()))
            .await
            .unwrap();

        fx.dispatcher.stop_trigger("ens", "t1").unwrap();
        assert_eq!(fx.dispatcher.running_keys(), keys(&["t1"]));

        fx.dispatcher.reconcile().await.unwrap();
        assert!(fx.dispatcher.running_keys().is_empty());
        assert!(running_on_disk(fx.dir.path()).is_empty());
        assert_eq!(read_json(&fx.dir.path().join("triggers.json")), json!({}));
    }

    #[tokio::test]
    async fn test_stop_unknown_trigger() {
        let mut fx = fixture().await;
        let watch = tempfile::tempdir().unwrap();
        fx.dispatcher
            .start_pattern_interval_trigger(start_args("t1", watch.path()))
            .await
            .unwrap();

        let err = fx
            .dispatcher
            .process(TriggerManagerMessage::stop_trigger("ens", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::TriggerNotFound { .. }));
        assert!(!err.is_fatal());
        assert_eq!(fx.dispatcher.running_keys(), keys(&["t1"]));
        assert_eq!(running_on_disk(fx.dir.path()), keys(&["t1"]));

        fx.dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_start_rejected() {
        let mut fx = fixture().await;
        let watch = tempfile::tempdir().unwrap();
        fx.dispatcher
            .start_pattern_interval_trigger(start_args("t1", watch.path()))
            .await
            .unwrap();

        let mut second = start_args("t1", watch.path());
        second.workflow_name_prefix = "other".into();
        let err = fx
            .dispatcher
            .start_pattern_interval_trigger(second)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateTrigger { .. }));

        // The first worker and its definition are untouched.
        let running = fx.dispatcher.registry.get("ens::t1").unwrap();
        assert!(!running.handle.is_stop_requested());
        assert_eq!(
            read_json(&fx.dir.path().join("triggers.json"))["ens::t1"]["workflow_name_prefix"],
            json!("wf")
        );

        fx.dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_trigger_rejected() {
        let mut fx = fixture().await;
        let mut args = start_args("bad", Path::new("/data"));
        args.file_patterns = vec!["/data/[.csv".into()];

        let err = fx
            .dispatcher
            .process(TriggerManagerMessage::start_pattern_interval_trigger(args))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTrigger { .. }));
        assert!(!err.is_fatal());
        assert!(fx.dispatcher.running_keys().is_empty());
    }

    #[tokio::test]
    async fn test_stop_then_restart_same_key() {
        let mut fx = fixture().await;
        let watch = tempfile::tempdir().unwrap();
        fx.dispatcher
            .process(TriggerManagerMessage::start_pattern_interval_trigger(
                start_args("t1", watch.path()),
            ))
            .await
            .unwrap();
        fx.dispatcher
            .process(TriggerManagerMessage::stop_trigger("ens", "t1"))
            .await
            .unwrap();

        // The exit is reconciled before the new start is handled.
        fx.dispatcher
            .process(TriggerManagerMessage::start_pattern_interval_trigger(
                start_args("t1", watch.path()),
            ))
            .await
            .unwrap();

        let running = fx.dispatcher.registry.get("ens::t1").unwrap();
        assert!(!running.handle.is_stop_requested());
        assert_eq!(running_on_disk(fx.dir.path()), keys(&["t1"]));

        fx.dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_running_snapshot_tracks_registry() {
        let mut fx = fixture().await;
        let watch = tempfile::tempdir().unwrap();
        let start = |name: &str| {
            TriggerManagerMessage::start_pattern_interval_trigger(start_args(name, watch.path()))
        };

        let messages = vec![
            start("a"),
            start("b"),
            TriggerManagerMessage::stop_trigger("ens", "a"),
            start("c"),
            TriggerManagerMessage::stop_trigger("ens", "missing"),
            start("b"),
            TriggerManagerMessage::stop_trigger("ens", "b"),
            start("a"),
            TriggerManagerMessage::stop_trigger("ens", "c"),
        ];

        for message in messages {
            let _ = fx.dispatcher.process(message).await;
            assert_eq!(running_on_disk(fx.dir.path()), fx.dispatcher.running_keys());
        }

        fx.dispatcher.reconcile().await.unwrap();
        assert_eq!(fx.dispatcher.running_keys(), keys(&["a"]));
        assert_eq!(running_on_disk(fx.dir.path()), keys(&["a"]));

        fx.dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_message_is_fatal() {
        let mut fx = fixture().await;
        let mut arguments = Map::new();
        arguments.insert("ensemble".into(), json!("ens"));
        fx.tx
            .send(TriggerManagerMessage::new(MessageKind::StopTrigger, arguments))
            .await
            .unwrap();

        let err = fx.dispatcher.run().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, DispatchError::Protocol { .. }));
        assert!(err.to_string().contains("stop_trigger"), "got: {err}");
    }

    #[tokio::test]
    async fn test_unknown_fields_are_fatal() {
        let mut fx = fixture().await;
        let mut message = TriggerManagerMessage::stop_trigger("ens", "t1");
        message.arguments.insert("force".into(), json!(true));
        fx.tx.send(message).await.unwrap();

        let err = fx.dispatcher.run().await.unwrap_err();
        assert!(matches!(err, DispatchError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_with_arguments_is_fatal() {
        let mut fx = fixture().await;
        let mut message = TriggerManagerMessage::shutdown();
        message.arguments.insert("x".into(), json!(1));
        fx.tx.send(message.clone()).await.unwrap();

        let err = fx.dispatcher.run().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("shutdown"), "got: {err}");

        let err = fx.dispatcher.handle(message).await.unwrap_err();
        assert!(matches!(err, DispatchError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_run_continues_after_not_found() {
        let mut fx = fixture().await;
        let watch = tempfile::tempdir().unwrap();
        fx.tx
            .send(TriggerManagerMessage::stop_trigger("ens", "missing"))
            .await
            .unwrap();
        fx.tx
            .send(TriggerManagerMessage::start_pattern_interval_trigger(
                start_args("t1", watch.path()),
            ))
            .await
            .unwrap();
        fx.tx.send(TriggerManagerMessage::shutdown()).await.unwrap();

        fx.dispatcher.run().await.unwrap();

        // Shutdown keeps the last running set for a restoring restart.
        assert_eq!(running_on_disk(fx.dir.path()), keys(&["t1"]));
        assert!(fx.dispatcher.running_keys().is_empty());
    }

    #[tokio::test]
    async fn test_closed_inbox_ends_run() {
        let Fixture {
            mut dispatcher,
            tx,
            dir: _dir,
            ..
        } = fixture().await;
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), dispatcher.run())
            .await
            .expect("should not timeout")
            .unwrap();
    }

    #[tokio::test]
    async fn test_restore_respawns_previous_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let watch = tempfile::tempdir().unwrap();

        let (tx, rx) = mpsc::channel(16);
        let mut first = TriggerDispatcher::builder(rx)
            .config(DispatcherConfig::new(dir.path()))
            .submitter(Arc::new(RecordingSubmitter::succeeding()))
            .build()
            .await
            .unwrap();
        tx.send(TriggerManagerMessage::start_pattern_interval_trigger(
            start_args("t1", watch.path()),
        ))
        .await
        .unwrap();
        tx.send(TriggerManagerMessage::shutdown()).await.unwrap();
        first.run().await.unwrap();

        let fx = fixture_with(dir, RecoveryPolicy::Restore).await;
        assert_eq!(fx.dispatcher.running_keys(), keys(&["t1"]));
        assert_eq!(running_on_disk(fx.dir.path()), keys(&["t1"]));

        let mut dispatcher = fx.dispatcher;
        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_drops_keys_without_definition() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("running.json"), r#"["ens::ghost"]"#).unwrap();

        let fx = fixture_with(dir, RecoveryPolicy::Restore).await;
        assert!(fx.dispatcher.running_keys().is_empty());
        assert!(running_on_disk(fx.dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_start_clean_ignores_previous_triggers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("running.json"), r#"["ens::t1"]"#).unwrap();

        let fx = fixture_with(dir, RecoveryPolicy::StartClean).await;
        assert!(fx.dispatcher.running_keys().is_empty());
        assert_eq!(read_json(&fx.dir.path().join("running.json")), json!([]));
    }

    #[tokio::test]
    async fn test_worker_submission_recorded() {
        let mut fx = fixture().await;
        let watch = tempfile::tempdir().unwrap();
        std::fs::write(watch.path().join("f1.csv"), "rows").unwrap();

        fx.dispatcher
            .start_pattern_interval_trigger(start_args("t1", watch.path()))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                fx.dispatcher.reconcile().await.unwrap();
                if !fx.dispatcher.submitted().workflows("ens", "t1").is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("submission should be recorded");

        let argv = fx.submitter.last_call().expect("submitted");
        assert_eq!(argv[0], "pegasus-em");
        let workflow_name = argv[2].clone();
        assert_eq!(
            fx.dispatcher.submitted().workflows("ens", "t1"),
            [workflow_name.clone()]
        );
        assert_eq!(
            read_json(&fx.dir.path().join("submitted.json"))["ens"]["t1"],
            json!([workflow_name])
        );

        fx.dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let (_tx, rx) = mpsc::channel(1);
        let store = Arc::new(crate::defaults::InMemoryStateStore::new());
        let watch = tempfile::tempdir().unwrap();

        let mut dispatcher = TriggerDispatcher::builder(rx)
            .state_store(store.clone())
            .submitter(Arc::new(RecordingSubmitter::succeeding()))
            .build()
            .await
            .unwrap();
        dispatcher
            .start_pattern_interval_trigger(start_args("t1", watch.path()))
            .await
            .unwrap();

        assert_eq!(store.load_running().await.unwrap(), keys(&["t1"]));
        assert!(store.load_definitions().await.unwrap().contains_key("ens::t1"));

        dispatcher.shutdown().await.unwrap();
    }
}
