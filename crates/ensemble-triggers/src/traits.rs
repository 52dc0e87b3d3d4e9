//! Pluggable trait interfaces for the trigger dispatcher.
//!
//! Every seam is an async trait. Default implementations live in
//! [`defaults`](crate::defaults).

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use super::errors::*;
use super::triggers::TriggerHandle;
use super::types::*;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// An independently schedulable watch-and-submit unit.
///
/// A trigger runs as a long-lived task spawned by the
/// [`TriggerDispatcher`](crate::triggers::TriggerDispatcher). It talks back to
/// the dispatcher only through the channels inside its [`TriggerHandle`].
#[async_trait]
pub trait Trigger: Send {
    fn trigger_type(&self) -> &str;

    /// Shared control surface: identity, cancellation flag, outbound channels.
    fn handle(&self) -> &TriggerHandle;

    /// Current lifecycle state, as published on the handle.
    fn state(&self) -> TriggerState {
        self.handle().state()
    }

    /// Poll until the cancellation flag is observed or the trigger's own
    /// lifetime runs out.
    async fn run(&mut self);
}

// ---------------------------------------------------------------------------
// Submitter
// ---------------------------------------------------------------------------

/// Captured result of one submission tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SubmissionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Invokes the external workflow submission tool.
///
/// `argv[0]` is the program, the rest are its arguments. Implementations
/// return `Err` only when the tool could not be run at all.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, argv: &[String]) -> Result<SubmissionOutput, SubmitError>;
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Durable snapshots of the dispatcher's bookkeeping.
///
/// Each save replaces the whole record atomically. Loading a record that was
/// never saved yields an empty value.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_running(&self) -> Result<BTreeSet<TriggerKey>, StateStoreError>;

    async fn save_running(&self, running: &BTreeSet<TriggerKey>) -> Result<(), StateStoreError>;

    async fn load_submitted(&self) -> Result<SubmittedWorkflows, StateStoreError>;

    async fn save_submitted(&self, submitted: &SubmittedWorkflows) -> Result<(), StateStoreError>;

    /// Start arguments of every running trigger, used to respawn them.
    async fn load_definitions(
        &self,
    ) -> Result<BTreeMap<TriggerKey, StartPatternIntervalTrigger>, StateStoreError>;

    async fn save_definitions(
        &self,
        definitions: &BTreeMap<TriggerKey, StartPatternIntervalTrigger>,
    ) -> Result<(), StateStoreError>;
}
