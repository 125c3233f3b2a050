use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentRunError;

// ── Run status ───────────────────────────────────────────────

/// Status of an agent run as recorded in the authoritative store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        }
    }

    /// Statuses that end a run. A record carrying one of these ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = AgentRunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "stopped" => Ok(RunStatus::Stopped),
            other => Err(AgentRunError::UnknownStatus(other.to_string())),
        }
    }
}

// ── Lifecycle signals ────────────────────────────────────────

/// Out-of-band signal delivered on a control channel. Receipt ends a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleSignal {
    Stop,
    EndStream,
    Error,
}

impl LifecycleSignal {
    /// Wire form, as published on the control channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleSignal::Stop => "STOP",
            LifecycleSignal::EndStream => "END_STREAM",
            LifecycleSignal::Error => "ERROR",
        }
    }

    /// Parse a control-channel payload. Unknown payloads are ignored by listeners.
    pub fn parse(payload: &str) -> Option<Self> {
        match payload {
            "STOP" => Some(LifecycleSignal::Stop),
            "END_STREAM" => Some(LifecycleSignal::EndStream),
            "ERROR" => Some(LifecycleSignal::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Status frames ────────────────────────────────────────────

/// Terminal frame synthesized by the relay (never read from the log).
///
/// Serializes as `{"type":"status","status":..,"message"?:..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusFrame {
    fn new(status: impl Into<String>, message: Option<String>) -> Self {
        Self {
            kind: "status".to_string(),
            status: status.into(),
            message,
        }
    }

    pub fn completed() -> Self {
        Self::new(RunStatus::Completed.as_str(), None)
    }

    pub fn error() -> Self {
        Self::new("error", None)
    }

    pub fn error_with(message: impl Into<String>) -> Self {
        Self::new("error", Some(message.into()))
    }

    /// Frame forwarding a control signal under its raw name (e.g. `"STOP"`).
    pub fn signal(signal: LifecycleSignal) -> Self {
        Self::new(signal.as_str(), None)
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!(self)
    }
}

/// If `record` is a `{"type":"status"}` record with a terminal status, return it.
pub fn terminal_status(record: &Value) -> Option<RunStatus> {
    if record.get("type").and_then(Value::as_str) != Some("status") {
        return None;
    }
    record
        .get("status")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<RunStatus>().ok())
        .filter(RunStatus::is_terminal)
}
