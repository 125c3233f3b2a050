//! Agent run lookup and stop endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::auth;
use crate::run_store::{AgentRun, RunStore};
use crate::runs::stop_agent_run;
use crate::state::AppState;

use super::{require_runs, run_with_access_check, verify_thread_access, ApiResult, QueryErrorResponse};

#[derive(Serialize, utoipa::ToSchema)]
pub struct StopResponse {
    pub status: &'static str,
}

/// Run details as returned by `GET /agent-run/{run_id}`.
#[derive(Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunDetails {
    pub id: String,
    pub thread_id: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<AgentRun> for AgentRunDetails {
    fn from(run: AgentRun) -> Self {
        Self {
            id: run.id,
            thread_id: run.thread_id,
            status: run.status,
            started_at: run.started_at,
            completed_at: run.completed_at,
            error: run.error,
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct AgentRunsResponse {
    pub agent_runs: Vec<AgentRun>,
}

/// Stop a running agent
///
/// Records the stop, signals the stream relays and the executing workers,
/// and schedules the response log for expiry.
#[utoipa::path(
    post,
    path = "/agent-run/{run_id}/stop",
    tag = "Agent Runs",
    params(("run_id" = String, Path, description = "Agent run ID")),
    responses(
        (status = 200, description = "Stop initiated", body = StopResponse),
        (status = 401, description = "Missing or invalid token", body = QueryErrorResponse),
        (status = 403, description = "No access to the run's thread", body = QueryErrorResponse),
        (status = 404, description = "Run not found", body = QueryErrorResponse)
    )
)]
pub async fn stop_agent(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<StopResponse>> {
    let user_id = auth::user_id_from_header(&state.verifier, &headers)?;
    info!(run_id = %run_id, user_id = %user_id, "stop requested");
    let runs = require_runs(&state)?;
    run_with_access_check(runs.as_ref(), &run_id, &user_id).await?;
    stop_agent_run(&state, &run_id, None).await;
    Ok(Json(StopResponse { status: "stopped" }))
}

/// Get agent run status
#[utoipa::path(
    get,
    path = "/agent-run/{run_id}",
    tag = "Agent Runs",
    params(("run_id" = String, Path, description = "Agent run ID")),
    responses(
        (status = 200, description = "Run details", body = AgentRunDetails),
        (status = 401, description = "Missing or invalid token", body = QueryErrorResponse),
        (status = 403, description = "No access to the run's thread", body = QueryErrorResponse),
        (status = 404, description = "Run not found", body = QueryErrorResponse)
    )
)]
pub async fn get_agent_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<AgentRunDetails>> {
    let user_id = auth::user_id_from_header(&state.verifier, &headers)?;
    let runs = require_runs(&state)?;
    let run = run_with_access_check(runs.as_ref(), &run_id, &user_id).await?;
    Ok(Json(run.into()))
}

/// List a thread's agent runs, newest first
#[utoipa::path(
    get,
    path = "/thread/{thread_id}/agent-runs",
    tag = "Agent Runs",
    params(("thread_id" = String, Path, description = "Thread ID")),
    responses(
        (status = 200, description = "Runs of the thread", body = AgentRunsResponse),
        (status = 401, description = "Missing or invalid token", body = QueryErrorResponse),
        (status = 403, description = "No access to the thread", body = QueryErrorResponse),
        (status = 404, description = "Thread not found", body = QueryErrorResponse)
    )
)]
pub async fn list_thread_runs(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<AgentRunsResponse>> {
    let user_id = auth::user_id_from_header(&state.verifier, &headers)?;
    let runs = require_runs(&state)?;
    verify_thread_access(runs.as_ref(), &thread_id, &user_id).await?;
    let agent_runs = runs.list_thread_runs(&thread_id).await?;
    Ok(Json(AgentRunsResponse { agent_runs }))
}
