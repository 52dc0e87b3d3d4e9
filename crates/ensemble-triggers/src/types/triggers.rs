//! Trigger manager messages: the commands a control plane sends to the
//! dispatcher.

use std::fmt;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::DispatchError;
use crate::interval::Interval;

/// Identity of a trigger within one dispatcher: `{ensemble}::{trigger_name}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerKey(String);

impl TriggerKey {
    pub fn new(ensemble: &str, trigger_name: &str) -> Self {
        Self(format!("{ensemble}::{trigger_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TriggerKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl std::borrow::Borrow<str> for TriggerKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// What a [`TriggerManagerMessage`] asks the dispatcher to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum MessageKind {
    StopTrigger,
    StartPatternIntervalTrigger,
    /// Stop every worker and end the dispatcher loop.
    Shutdown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopTrigger => "stop_trigger",
            Self::StartPatternIntervalTrigger => "start_pattern_interval_trigger",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command envelope consumed exactly once by the dispatcher.
///
/// `arguments` is kept as a raw JSON object so producers that speak JSON can
/// forward it unchanged; the dispatcher decodes it into the typed argument
/// struct for `kind` with [`parse_arguments`](Self::parse_arguments).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TriggerManagerMessage {
    pub kind: MessageKind,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl TriggerManagerMessage {
    pub fn new(kind: MessageKind, arguments: Map<String, Value>) -> Self {
        Self { kind, arguments }
    }

    pub fn stop_trigger(ensemble: impl Into<String>, trigger_name: impl Into<String>) -> Self {
        let args = StopTrigger {
            ensemble: ensemble.into(),
            trigger_name: trigger_name.into(),
        };
        Self::new(MessageKind::StopTrigger, to_arguments(&args))
    }

    pub fn start_pattern_interval_trigger(args: StartPatternIntervalTrigger) -> Self {
        Self::new(MessageKind::StartPatternIntervalTrigger, to_arguments(&args))
    }

    pub fn shutdown() -> Self {
        Self::new(MessageKind::Shutdown, to_arguments(&Shutdown {}))
    }

    /// Decode a message sent as JSON. An unknown `kind` is a protocol error.
    pub fn from_json(raw: &str) -> Result<Self, DispatchError> {
        serde_json::from_str(raw).map_err(|e| DispatchError::Protocol {
            kind: "unknown".into(),
            message: e.to_string(),
        })
    }

    /// Decode `arguments` into the typed arguments for this message's kind.
    pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T, DispatchError> {
        serde_json::from_value(Value::Object(self.arguments.clone())).map_err(|e| {
            DispatchError::Protocol {
                kind: self.kind.to_string(),
                message: e.to_string(),
            }
        })
    }
}

fn to_arguments<T: Serialize>(args: &T) -> Map<String, Value> {
    // Argument structs are plain records; anything else leaves the map empty
    // and is rejected by `parse_arguments`.
    match serde_json::to_value(args) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Arguments of [`MessageKind::StopTrigger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopTrigger {
    pub ensemble: String,
    pub trigger_name: String,
}

impl StopTrigger {
    pub fn key(&self) -> TriggerKey {
        TriggerKey::new(&self.ensemble, &self.trigger_name)
    }
}

/// Arguments of [`MessageKind::Shutdown`]: none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Shutdown {}

/// Arguments of [`MessageKind::StartPatternIntervalTrigger`].
///
/// Also the durable definition of a running pattern trigger, used to
/// respawn it on restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartPatternIntervalTrigger {
    pub ensemble: String,
    pub trigger_name: String,
    pub workflow_name_prefix: String,
    pub file_patterns: Vec<String>,
    pub workflow_script: PathBuf,
    /// Poll period.
    pub interval: Interval,
    /// Total lifetime of the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Interval>,
    /// Extra tokens for the submission command, shell-word split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_args: Option<String>,
}

impl StartPatternIntervalTrigger {
    pub fn key(&self) -> TriggerKey {
        TriggerKey::new(&self.ensemble, &self.trigger_name)
    }
}
