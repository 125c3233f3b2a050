//! Authoritative agent run records.
//!
//! Runs, threads, projects and account memberships live in PostgreSQL and
//! are owned by other services. This module only reads them, plus the one
//! status write performed when a run is stopped. [`MemoryRunStore`] stands
//! in for the database in tests.

mod memory;
mod postgres;
mod types;


use std::sync::Arc;

use async_trait::async_trait;

use agentrun_relay::{RelayError, RunStatusRecord, RunStatusSource};

pub use memory::MemoryRunStore;
pub use postgres::PgRunStore;
pub use types::{AgentRun, RunStatusUpdate, StoreError, ThreadAccess};

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn get_run(&self, run_id: &str) -> Result<Option<AgentRun>, StoreError>;

    /// Runs of a thread, newest first.
    async fn list_thread_runs(&self, thread_id: &str) -> Result<Vec<AgentRun>, StoreError>;

    /// Returns `false` when no row matched.
    async fn update_run_status(
        &self,
        run_id: &str,
        update: &RunStatusUpdate,
    ) -> Result<bool, StoreError>;

    async fn thread_access(&self, thread_id: &str, user_id: &str) -> Result<ThreadAccess, StoreError>;
}

/// Exposes a [`RunStore`] as the relay's status lookup.
pub struct StoreStatusSource {
    store: Arc<dyn RunStore>,
}

impl StoreStatusSource {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RunStatusSource for StoreStatusSource {
    async fn run_status(&self, run_id: &str) -> Result<Option<RunStatusRecord>, RelayError> {
        let run = self
            .store
            .get_run(run_id)
            .await
            .map_err(|e| RelayError::Status(e.to_string()))?;
        Ok(run.map(|r| RunStatusRecord {
            status: r.status,
            thread_id: r.thread_id,
        }))
    }
}
