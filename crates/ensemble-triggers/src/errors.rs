//! Error types for the trigger dispatcher and its pluggable seams.

use thiserror::Error;

use crate::types::TriggerKey;

/// Errors from [`Trigger`](super::traits::Trigger) implementations.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("trigger config error: {message}")]
    Config { message: String },
    #[error("trigger runtime error: {message}")]
    Runtime { message: String },
}

/// Errors from [`Submitter`](super::traits::Submitter) implementations.
///
/// Only raised when the submission tool could not be invoked at all. A tool
/// that runs and exits non-zero is reported through
/// [`SubmissionOutput`](super::traits::SubmissionOutput).
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("submission command is empty")]
    EmptyCommand,
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from [`StateStore`](super::traits::StateStore) implementations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state store io error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("state store serialization error ({context}): {source}")]
    Serialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Raised when an interval string or value cannot be turned into seconds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntervalError {
    #[error("invalid interval: {input}")]
    Invalid { input: String },
}

/// Invalid dispatcher configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value for {key}: {message}")]
pub struct ConfigError {
    pub key: String,
    pub message: String,
}

/// Errors surfaced by the [`TriggerDispatcher`](crate::triggers::TriggerDispatcher).
///
/// Fatal errors end [`run()`](crate::triggers::TriggerDispatcher::run); the
/// rest are reported to the caller of the handler and logged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// Malformed or unrecognized message.
    #[error("malformed {kind} message: {message}")]
    Protocol { kind: String, message: String },
    #[error("trigger not found: {key}")]
    TriggerNotFound { key: TriggerKey },
    #[error("trigger already running: {key}")]
    DuplicateTrigger { key: TriggerKey },
    #[error("invalid trigger {key}: {source}")]
    InvalidTrigger {
        key: TriggerKey,
        #[source]
        source: TriggerError,
    },
    #[error("persistence failure: {0}")]
    Persistence(#[from] StateStoreError),
}

impl DispatchError {
    /// Whether the dispatcher must stop after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Persistence(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let key = TriggerKey::new("ens", "t");
        assert!(DispatchError::Protocol {
            kind: "stop_trigger".into(),
            message: "missing field".into(),
        }
        .is_fatal());
        assert!(DispatchError::Persistence(StateStoreError::Io {
            context: "running.json".into(),
            source: std::io::Error::other("disk full"),
        })
        .is_fatal());
        assert!(!DispatchError::TriggerNotFound { key: key.clone() }.is_fatal());
        assert!(!DispatchError::DuplicateTrigger { key }.is_fatal());
    }

    #[test]
    fn test_interval_error_display() {
        let err = IntervalError::Invalid {
            input: "1sd".into(),
        };
        assert_eq!(err.to_string(), "invalid interval: 1sd");
    }
}
