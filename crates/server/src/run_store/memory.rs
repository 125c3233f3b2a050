use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use super::types::{AgentRun, RunStatusUpdate, StoreError, ThreadAccess};
use super::RunStore;

#[derive(Debug, Clone)]
struct Thread {
    account_id: Option<String>,
    public: bool,
}

#[derive(Default)]
struct Inner {
    runs: HashMap<String, AgentRun>,
    threads: HashMap<String, Thread>,
    /// `(user_id, account_id)` pairs.
    members: HashSet<(String, String)>,
    updates: Vec<(String, RunStatusUpdate)>,
    unavailable: bool,
}

/// In-process [`RunStore`].
#[derive(Clone, Default)]
pub struct MemoryRunStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_thread(&self, thread_id: &str, account_id: Option<&str>, public: bool) {
        self.write().threads.insert(
            thread_id.to_string(),
            Thread {
                account_id: account_id.map(str::to_string),
                public,
            },
        );
    }

    pub fn add_member(&self, user_id: &str, account_id: &str) {
        self.write()
            .members
            .insert((user_id.to_string(), account_id.to_string()));
    }

    /// Insert a run started now.
    pub fn add_run(&self, run_id: &str, thread_id: &str, status: &str) {
        let now = Utc::now();
        self.write().runs.insert(
            run_id.to_string(),
            AgentRun {
                id: run_id.to_string(),
                thread_id: thread_id.to_string(),
                status: status.to_string(),
                started_at: Some(now),
                completed_at: None,
                error: None,
                created_at: Some(now),
                updated_at: Some(now),
            },
        );
    }

    /// Make every call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Status updates applied so far, in order.
    pub fn updates(&self) -> Vec<(String, RunStatusUpdate)> {
        self.read().updates.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.read().unavailable {
            return Err(StoreError::Unavailable("connection is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn get_run(&self, run_id: &str) -> Result<Option<AgentRun>, StoreError> {
        self.check()?;
        Ok(self.read().runs.get(run_id).cloned())
    }

    async fn list_thread_runs(&self, thread_id: &str) -> Result<Vec<AgentRun>, StoreError> {
        self.check()?;
        let mut runs: Vec<AgentRun> = self
            .read()
            .runs
            .values()
            .filter(|r| r.thread_id == thread_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(runs)
    }

    async fn update_run_status(
        &self,
        run_id: &str,
        update: &RunStatusUpdate,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.write();
        let Some(run) = inner.runs.get_mut(run_id) else {
            return Ok(false);
        };
        run.status = update.status.as_str().to_string();
        run.error = update.error.clone();
        run.completed_at = Some(update.completed_at);
        run.updated_at = Some(Utc::now());
        inner.updates.push((run_id.to_string(), update.clone()));
        Ok(true)
    }

    async fn thread_access(&self, thread_id: &str, user_id: &str) -> Result<ThreadAccess, StoreError> {
        self.check()?;
        let inner = self.read();
        let Some(thread) = inner.threads.get(thread_id) else {
            return Ok(ThreadAccess::NotFound);
        };
        if thread.public {
            return Ok(ThreadAccess::Public);
        }
        let member = thread
            .account_id
            .as_ref()
            .map(|account| inner.members.contains(&(user_id.to_string(), account.clone())))
            .unwrap_or(false);
        Ok(if member {
            ThreadAccess::Member
        } else {
            ThreadAccess::Denied
        })
    }
}
