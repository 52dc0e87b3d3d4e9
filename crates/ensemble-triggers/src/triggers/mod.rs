//! Trigger workers and the dispatcher that owns them.
//!
//! A [`PatternIntervalTrigger`] watches glob patterns on a timer and submits
//! workflows. The [`TriggerRegistry`] tracks the spawned worker tasks, and the
//! [`TriggerDispatcher`] applies control messages to the registry while
//! keeping the durable snapshots in step with it.

mod dispatcher;
mod handle;
mod pattern_interval;
mod runner;

pub use dispatcher::{TriggerDispatcher, TriggerDispatcherBuilder};
pub use handle::TriggerHandle;
pub use pattern_interval::{PatternIntervalTrigger, PollOutcome};
pub use runner::{RunningTrigger, TriggerRegistry};
