//! Ensemble triggers: file-driven workflow submission.
//!
//! This crate runs named triggers that watch filesystem glob patterns on a
//! fixed interval and submit a workflow to an external orchestration tool
//! whenever new or changed files appear. A single [`TriggerDispatcher`] task
//! owns every trigger, applies start/stop commands received on its inbox and
//! persists the set of running triggers and the history of submitted
//! workflows so both survive a restart.
//!
//! The crate installs no tracing subscriber and spawns nothing outside the
//! caller's tokio runtime.

pub mod config;
pub mod defaults;
pub mod errors;
pub mod interval;
pub mod traits;
pub mod triggers;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

// Re-export public types at the crate level.

// config
pub use config::{DispatcherConfig, RecoveryPolicy, DEFAULT_SUBMIT_TOOL};

// defaults
pub use defaults::{CommandSubmitter, FileStateStore, InMemoryStateStore};

// errors
pub use errors::{
    ConfigError, DispatchError, IntervalError, StateStoreError, SubmitError, TriggerError,
};

// interval
pub use interval::{parse_interval, Interval};

// test_support
#[cfg(any(test, feature = "test-support"))]
pub use test_support::RecordingSubmitter;

// traits
pub use traits::{StateStore, SubmissionOutput, Submitter, Trigger};

// triggers
pub use triggers::{
    PatternIntervalTrigger, PollOutcome, RunningTrigger, TriggerDispatcher,
    TriggerDispatcherBuilder, TriggerHandle, TriggerRegistry,
};

// types
pub use types::{
    MessageKind, Shutdown, StartPatternIntervalTrigger, StopTrigger, SubmissionRecord,
    SubmittedWorkflows, TriggerKey, TriggerManagerMessage, TriggerState,
};
