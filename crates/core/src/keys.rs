//! Broker key and channel names for a run.
//!
//! The background worker and every API instance must agree on these names,
//! so they live in one place:
//!
//! ```text
//! agent_run:{run}:responses            list of JSON event records
//! agent_run:{run}:new_response         pub/sub, payload "new" per append
//! agent_run:{run}:control              pub/sub, global lifecycle signals
//! agent_run:{run}:control:{instance}   pub/sub, per-worker lifecycle signals
//! active_run:{instance}:{run}          marker set by the worker executing the run
//! ```

/// Payload the worker publishes on the response channel after each append.
pub const NEW_RESPONSE_PAYLOAD: &str = "new";

/// Names derived from a single run identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunKeys {
    run_id: String,
}

impl RunKeys {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn response_list(&self) -> String {
        format!("agent_run:{}:responses", self.run_id)
    }

    pub fn response_channel(&self) -> String {
        format!("agent_run:{}:new_response", self.run_id)
    }

    pub fn control_channel(&self) -> String {
        format!("agent_run:{}:control", self.run_id)
    }

    pub fn instance_control_channel(&self, instance_id: &str) -> String {
        format!("agent_run:{}:control:{}", self.run_id, instance_id)
    }

    /// Glob matching the `active_run` marker of every instance executing this run.
    pub fn active_run_pattern(&self) -> String {
        format!("active_run:*:{}", self.run_id)
    }
}

/// Marker key written by a worker instance while it executes a run.
pub fn active_run_key(instance_id: &str, run_id: &str) -> String {
    format!("active_run:{}:{}", instance_id, run_id)
}

/// Split an `active_run:{instance}:{run}` key into `(instance, run)`.
///
/// Returns `None` for anything that does not have exactly three segments.
pub fn parse_active_run_key(key: &str) -> Option<(&str, &str)> {
    let mut parts = key.split(':');
    let prefix = parts.next()?;
    let instance = parts.next()?;
    let run = parts.next()?;
    if prefix != "active_run" || parts.next().is_some() || instance.is_empty() || run.is_empty() {
        return None;
    }
    Some((instance, run))
}
