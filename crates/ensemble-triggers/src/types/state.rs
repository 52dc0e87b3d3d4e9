//! Durable bookkeeping values owned by the dispatcher.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A completed external submission, sent by a worker to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub ensemble: String,
    pub trigger_name: String,
    pub workflow_name: String,
}

/// Lifecycle of a trigger worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Idle,
    Polling,
    Submitting,
    ShuttingDown,
    Terminated,
}

/// Submitted workflow names: ensemble → trigger name → submissions in order.
///
/// Append-only. Recording or merging never drops or reorders an existing
/// entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmittedWorkflows(BTreeMap<String, BTreeMap<String, Vec<String>>>);

impl SubmittedWorkflows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: &SubmissionRecord) {
        self.0
            .entry(record.ensemble.clone())
            .or_default()
            .entry(record.trigger_name.clone())
            .or_default()
            .push(record.workflow_name.clone());
    }

    /// Append everything in `other` after the entries already held.
    pub fn merge(&mut self, other: SubmittedWorkflows) {
        for (ensemble, triggers) in other.0 {
            let target = self.0.entry(ensemble).or_default();
            for (trigger_name, workflows) in triggers {
                target.entry(trigger_name).or_default().extend(workflows);
            }
        }
    }

    pub fn workflows(&self, ensemble: &str, trigger_name: &str) -> &[String] {
        self.0
            .get(ensemble)
            .and_then(|triggers| triggers.get(trigger_name))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
