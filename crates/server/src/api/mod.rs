//! HTTP endpoints.
//!
//! Shared error type and access checks live here; each sub-module owns one
//! area.

pub mod doc;
mod health;
mod runs;
mod stream;

use std::sync::Arc;

use axum::http::header::WWW_AUTHENTICATE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth::AuthError;
use crate::run_store::{AgentRun, RunStore, StoreError, ThreadAccess};
use crate::state::AppState;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Serialize, utoipa::ToSchema)]
pub struct QueryErrorResponse {
    pub error: String,
}

/// Request failure mapped to a status code and `{"error": ...}` body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(QueryErrorResponse {
            error: self.to_string(),
        });
        match self {
            ApiError::Unauthorized(_) => (status, [(WWW_AUTHENTICATE, "Bearer")], body).into_response(),
            _ => (status, body).into_response(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Unauthorized(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!(error = %e, "run store error");
        if e.is_unavailable() {
            ApiError::Unavailable("Run store unavailable".to_string())
        } else {
            ApiError::Internal(format!("Error verifying access: {}", e))
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ── Guards ───────────────────────────────────────────────────────

/// Return 503 if PostgreSQL is not configured.
pub(crate) fn require_runs(state: &AppState) -> ApiResult<&Arc<dyn RunStore>> {
    state
        .runs
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("PostgreSQL not configured".to_string()))
}

/// 404 for unknown threads, 403 unless the project is public or the user
/// belongs to the thread's account.
pub(crate) async fn verify_thread_access(
    runs: &dyn RunStore,
    thread_id: &str,
    user_id: &str,
) -> ApiResult<()> {
    match runs.thread_access(thread_id, user_id).await? {
        ThreadAccess::NotFound => Err(ApiError::NotFound("Thread not found".to_string())),
        ThreadAccess::Denied => Err(ApiError::Forbidden(
            "Not authorized to access this thread".to_string(),
        )),
        ThreadAccess::Public | ThreadAccess::Member => Ok(()),
    }
}

/// Load a run and check the user may read its thread.
pub(crate) async fn run_with_access_check(
    runs: &dyn RunStore,
    run_id: &str,
    user_id: &str,
) -> ApiResult<AgentRun> {
    let run = runs
        .get_run(run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Agent run not found".to_string()))?;
    verify_thread_access(runs, &run.thread_id, user_id).await?;
    Ok(run)
}

// ── Re-exports ───────────────────────────────────────────────────

pub use health::health;
pub use runs::{get_agent_run, list_thread_runs, stop_agent};
pub use stream::stream_agent_run;
