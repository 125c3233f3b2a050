use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::types::{AgentRun, RunStatusUpdate, StoreError, ThreadAccess};
use super::RunStore;

const RUN_COLUMNS: &str = "id::text AS id, thread_id::text AS thread_id, status, started_at, \
                           completed_at, error, created_at, updated_at";

/// [`RunStore`] over the shared PostgreSQL schema.
#[derive(Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Row ids are UUIDs; anything else cannot match a row.
fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}

#[derive(sqlx::FromRow)]
struct ThreadRow {
    account_id: Option<Uuid>,
    is_public: bool,
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn get_run(&self, run_id: &str) -> Result<Option<AgentRun>, StoreError> {
        let Some(id) = parse_id(run_id) else {
            return Ok(None);
        };
        let run = sqlx::query_as::<_, AgentRun>(&format!(
            "SELECT {} FROM agent_runs WHERE id = $1",
            RUN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    async fn list_thread_runs(&self, thread_id: &str) -> Result<Vec<AgentRun>, StoreError> {
        let Some(id) = parse_id(thread_id) else {
            return Ok(Vec::new());
        };
        let runs = sqlx::query_as::<_, AgentRun>(&format!(
            "SELECT {} FROM agent_runs WHERE thread_id = $1 ORDER BY created_at DESC",
            RUN_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        debug!(thread_id = %thread_id, count = runs.len(), "listed agent runs");
        Ok(runs)
    }

    async fn update_run_status(
        &self,
        run_id: &str,
        update: &RunStatusUpdate,
    ) -> Result<bool, StoreError> {
        let Some(id) = parse_id(run_id) else {
            return Ok(false);
        };
        let result = sqlx::query(
            "UPDATE agent_runs
             SET status = $2, error = $3, responses = $4, completed_at = $5, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.status.as_str())
        .bind(&update.error)
        .bind(serde_json::Value::Array(update.responses.clone()))
        .bind(update.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn thread_access(&self, thread_id: &str, user_id: &str) -> Result<ThreadAccess, StoreError> {
        let Some(id) = parse_id(thread_id) else {
            return Ok(ThreadAccess::NotFound);
        };
        let thread = sqlx::query_as::<_, ThreadRow>(
            "SELECT t.account_id, COALESCE(p.is_public, false) AS is_public
             FROM threads t
             LEFT JOIN projects p ON p.project_id = t.project_id
             WHERE t.thread_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(thread) = thread else {
            return Ok(ThreadAccess::NotFound);
        };
        if thread.is_public {
            return Ok(ThreadAccess::Public);
        }
        let Some(account_id) = thread.account_id else {
            return Ok(ThreadAccess::Denied);
        };

        let (is_member,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(
                 SELECT 1 FROM basejump.account_user
                 WHERE user_id::text = $1 AND account_id = $2
             )",
        )
        .bind(user_id)
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(if is_member {
            ThreadAccess::Member
        } else {
            ThreadAccess::Denied
        })
    }
}
