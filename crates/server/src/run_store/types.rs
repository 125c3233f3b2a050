//! Agent run row types and access outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use agentrun_core::RunStatus;

/// One row of `agent_runs`, as listed for a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct AgentRun {
    pub id: String,
    pub thread_id: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AgentRun {
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running.as_str()
    }
}

/// Final state written when a run is stopped.
#[derive(Debug, Clone)]
pub struct RunStatusUpdate {
    pub status: RunStatus,
    pub error: Option<String>,
    /// Snapshot of the response log at stop time.
    pub responses: Vec<Value>,
    pub completed_at: DateTime<Utc>,
}

impl RunStatusUpdate {
    /// `failed` when an error message is given, `stopped` otherwise.
    pub fn stopped(error: Option<String>, responses: Vec<Value>) -> Self {
        let status = if error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Stopped
        };
        Self {
            status,
            error,
            responses,
            completed_at: Utc::now(),
        }
    }
}

/// Result of checking whether a user may read a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAccess {
    NotFound,
    /// The thread's project is public.
    Public,
    /// The user belongs to the thread's account.
    Member,
    Denied,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("run store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the failure is the store being unreachable rather than a bad query.
    pub fn is_unavailable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
        }
    }
}
