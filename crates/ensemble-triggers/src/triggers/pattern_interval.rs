//! File pattern trigger.
//!
//! Polls a set of glob patterns on a fixed interval and submits a workflow
//! whenever new or changed files match. Change detection keys on each matched
//! path's own modification time: a symbolic link is judged by the link's
//! metadata, so recreating or re-pointing a link is noticed even when its
//! target is untouched.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use super::super::errors::TriggerError;
use super::super::traits::{Submitter, Trigger};
use super::super::types::{StartPatternIntervalTrigger, TriggerState};
use super::handle::TriggerHandle;

/// Fixed marker separating the workflow arguments from the input files.
const INPUTS_FLAG: &str = "--inputs";

/// Shell matching rules: wildcards never match a leading dot.
const MATCH_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: true,
};

/// Result of a single polling cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing new or changed.
    Idle,
    /// The submission tool accepted a workflow for these inputs.
    Submitted {
        workflow_name: String,
        inputs: Vec<PathBuf>,
    },
    /// The scan or the submission failed; the same files are retried next
    /// cycle.
    Failed,
}

/// Pattern + interval trigger.
///
/// Each submission is reported on the submission-record channel; the
/// trigger's identity is posted on the checkout channel when it shuts down.
pub struct PatternIntervalTrigger {
    handle: TriggerHandle,
    workflow_name_prefix: String,
    file_patterns: Vec<String>,
    workflow_script: PathBuf,
    interval: Duration,
    timeout: Option<Duration>,
    additional_args: Vec<String>,
    submit_tool: String,
    submitter: Arc<dyn Submitter>,
    /// Currently matched path → last observed modification time of the path
    /// itself.
    seen: HashMap<PathBuf, SystemTime>,
}

impl PatternIntervalTrigger {
    /// Validate `args` and build an idle trigger.
    ///
    /// `handle` must carry the same ensemble and trigger name as `args`.
    pub fn new(
        handle: TriggerHandle,
        args: &StartPatternIntervalTrigger,
        submitter: Arc<dyn Submitter>,
        submit_tool: impl Into<String>,
    ) -> Result<Self, TriggerError> {
        if handle.key() != &args.key() {
            return Err(TriggerError::Config {
                message: format!(
                    "handle for '{}' cannot run trigger '{}'",
                    handle.key(),
                    args.key()
                ),
            });
        }

        if args.file_patterns.is_empty() {
            return Err(TriggerError::Config {
                message: "at least one file pattern is required".into(),
            });
        }
        for pattern in &args.file_patterns {
            glob::glob_with(pattern, MATCH_OPTIONS)
                .map(drop)
                .map_err(|e| TriggerError::Config {
                    message: format!("invalid file pattern '{pattern}': {e}"),
                })?;
        }

        let additional_args = match args.additional_args.as_deref() {
            Some(raw) => shell_words::split(raw).map_err(|e| TriggerError::Config {
                message: format!("invalid additional arguments '{raw}': {e}"),
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            handle,
            workflow_name_prefix: args.workflow_name_prefix.clone(),
            file_patterns: args.file_patterns.clone(),
            workflow_script: args.workflow_script.clone(),
            interval: args.interval.as_duration(),
            timeout: args.timeout.map(|t| t.as_duration()),
            additional_args,
            submit_tool: submit_tool.into(),
            submitter,
            seen: HashMap::new(),
        })
    }

    /// Run one polling cycle: scan, diff against the seen-set, submit.
    pub async fn poll_once(&mut self) -> PollOutcome {
        self.handle.set_state(TriggerState::Polling);

        let matched = match self.scan() {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(key = %self.handle.key(), error = %e, "scan failed, will retry next cycle");
                return PollOutcome::Failed;
            }
        };
        let inputs: Vec<PathBuf> = matched
            .iter()
            .filter(|(path, modified)| self.seen.get(path) != Some(modified))
            .map(|(path, _)| resolve_input(path))
            .collect();

        if inputs.is_empty() {
            tracing::debug!(key = %self.handle.key(), matched = matched.len(), "no new files");
            self.seen = matched.into_iter().collect();
            return PollOutcome::Idle;
        }

        let workflow_name = self.generate_workflow_name();
        let argv = self.submission_command(&workflow_name, &inputs);

        self.handle.set_state(TriggerState::Submitting);
        let outcome = match self.submitter.submit(&argv).await {
            Ok(output) if output.success() => {
                tracing::info!(
                    key = %self.handle.key(),
                    workflow = %workflow_name,
                    inputs = inputs.len(),
                    "submitted workflow"
                );
                self.handle.update_submitted_workflows(&workflow_name);
                self.seen = matched.into_iter().collect();
                PollOutcome::Submitted {
                    workflow_name,
                    inputs,
                }
            }
            Ok(output) => {
                tracing::warn!(
                    key = %self.handle.key(),
                    workflow = %workflow_name,
                    exit_code = ?output.exit_code,
                    "submission failed, will retry next cycle"
                );
                self.forget_unmatched(&matched);
                PollOutcome::Failed
            }
            Err(e) => {
                tracing::warn!(
                    key = %self.handle.key(),
                    error = %e,
                    "could not invoke submission tool, will retry next cycle"
                );
                self.forget_unmatched(&matched);
                PollOutcome::Failed
            }
        };
        self.handle.set_state(TriggerState::Polling);

        outcome
    }

    /// Command line handed to the submitter.
    pub fn submission_command(&self, workflow_name: &str, inputs: &[PathBuf]) -> Vec<String> {
        let mut argv = vec![
            self.submit_tool.clone(),
            "submit".to_string(),
            workflow_name.to_string(),
            self.workflow_script.to_string_lossy().into_owned(),
        ];
        argv.extend(self.additional_args.iter().cloned());
        argv.push(INPUTS_FLAG.to_string());
        argv.extend(inputs.iter().map(|p| p.to_string_lossy().into_owned()));
        argv
    }

    /// Every path matched by the configured patterns, in pattern order, with
    /// the modification time from the path's own (non-followed) metadata.
    ///
    /// A directory that cannot be read fails the whole scan, so an
    /// incomplete listing never prunes the seen-set. A matched path that
    /// vanishes before it can be stat'ed is skipped.
    fn scan(&self) -> Result<Vec<(PathBuf, SystemTime)>, TriggerError> {
        let mut found = Vec::new();
        let mut visited = HashSet::new();

        for pattern in &self.file_patterns {
            let paths =
                glob::glob_with(pattern, MATCH_OPTIONS).map_err(|e| TriggerError::Runtime {
                    message: format!("invalid file pattern '{pattern}': {e}"),
                })?;

            for entry in paths {
                let path = entry.map_err(|e| TriggerError::Runtime {
                    message: format!("cannot scan '{pattern}': {e}"),
                })?;
                if !visited.insert(path.clone()) {
                    continue;
                }
                match std::fs::symlink_metadata(&path).and_then(|meta| meta.modified()) {
                    Ok(modified) => found.push((path, modified)),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "cannot stat matched path");
                    }
                }
            }
        }

        Ok(found)
    }

    /// Drop seen-set entries for paths that no longer match.
    fn forget_unmatched(&mut self, matched: &[(PathBuf, SystemTime)]) {
        let current: HashSet<&PathBuf> = matched.iter().map(|(path, _)| path).collect();
        self.seen.retain(|path, _| current.contains(path));
    }

    fn generate_workflow_name(&self) -> String {
        format!(
            "{}.{}_{}",
            self.handle.ensemble(),
            self.workflow_name_prefix,
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        )
    }

    fn lifetime_exceeded(&self, started: Instant) -> bool {
        self.timeout
            .is_some_and(|timeout| started.elapsed() >= timeout)
    }

    /// Sleep for one interval, cut short by cancellation or by the end of
    /// the trigger's lifetime.
    async fn wait_for_next_cycle(&self, started: Instant) {
        let mut delay = self.interval;
        if let Some(timeout) = self.timeout {
            delay = delay.min(timeout.saturating_sub(started.elapsed()));
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.handle.stopped() => {}
        }
    }
}

/// Real path of a matched input. Dangling links are passed through as
/// matched.
fn resolve_input(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|e| {
        tracing::debug!(path = %path.display(), error = %e, "cannot resolve input, using matched path");
        path.to_path_buf()
    })
}

#[async_trait]
impl Trigger for PatternIntervalTrigger {
    fn trigger_type(&self) -> &str {
        "pattern_interval"
    }

    fn handle(&self) -> &TriggerHandle {
        &self.handle
    }

    async fn run(&mut self) {
        let started = Instant::now();
        tracing::info!(
            key = %self.handle.key(),
            patterns = ?self.file_patterns,
            interval_secs = self.interval.as_secs(),
            "pattern interval trigger started"
        );

        loop {
            if self.handle.is_stop_requested() {
                self.handle.set_state(TriggerState::ShuttingDown);
                break;
            }

            self.poll_once().await;

            if !self.lifetime_exceeded(started) {
                self.wait_for_next_cycle(started).await;
            }

            if self.lifetime_exceeded(started) && !self.handle.is_stop_requested() {
                tracing::info!(key = %self.handle.key(), "trigger timed out");
                self.handle.set_state(TriggerState::ShuttingDown);
                self.handle.shutdown();
                break;
            }
        }

        self.handle.set_state(TriggerState::Terminated);
        tracing::info!(key = %self.handle.key(), "pattern interval trigger stopped");
    }
}
