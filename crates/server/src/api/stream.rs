//! SSE stream of an agent run's responses.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONNECTION};
use axum::http::{HeaderMap, HeaderName};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, Instrument};

use agentrun_relay::{Frame, RelayOptions, StreamRelay};

use crate::auth;
use crate::run_store::StoreStatusSource;
use crate::state::AppState;

use super::{require_runs, run_with_access_check, ApiResult, QueryErrorResponse};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct StreamParams {
    /// JWT for clients that cannot set headers (EventSource).
    pub token: Option<String>,
}

fn to_event(frame: Frame) -> Result<Event, Infallible> {
    Ok(Event::default().data(frame.to_string()))
}

/// Stream an agent run
///
/// Replays every response recorded so far, then follows the run live until
/// it reaches a terminal status, receives a control signal, or fails. Each
/// SSE `data:` line carries one JSON record; the last one is a
/// `{"type":"status",...}` frame.
#[utoipa::path(
    get,
    path = "/agent-run/{run_id}/stream",
    tag = "Agent Runs",
    params(
        ("run_id" = String, Path, description = "Agent run ID"),
        StreamParams
    ),
    responses(
        (status = 200, description = "SSE event stream", content_type = "text/event-stream"),
        (status = 401, description = "Missing or invalid token", body = QueryErrorResponse),
        (status = 403, description = "No access to the run's thread", body = QueryErrorResponse),
        (status = 404, description = "Run not found", body = QueryErrorResponse)
    )
)]
pub async fn stream_agent_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth::user_id_from_stream_auth(&state.verifier, params.token.as_deref(), &headers)?;
    let runs = require_runs(&state)?;
    let run = run_with_access_check(runs.as_ref(), &run_id, &user_id).await?;
    info!(run_id = %run_id, user_id = %user_id, thread_id = %run.thread_id, "starting stream");

    let relay = StreamRelay::new(
        run_id.clone(),
        state.log.clone(),
        state.subscriber.clone(),
        Arc::new(StoreStatusSource::new(runs.clone())),
        RelayOptions {
            cleanup_grace: state.config.stream.cleanup_grace(),
        },
    )
    .with_shutdown(state.shutdown_receiver());

    let (tx, rx) = mpsc::channel::<Frame>(state.config.stream.frame_buffer);
    let span = tracing::info_span!("stream", run_id = %run_id, user_id = %user_id);
    tokio::spawn(
        async move {
            let summary = relay.run(tx).await;
            debug!(exit = ?summary.exit, frames = summary.frames_sent, "stream closed");
        }
        .instrument(span),
    );

    let stream = ReceiverStream::new(rx).map(to_event);
    Ok((
        [
            (CACHE_CONTROL, "no-cache, no-transform"),
            (CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Sse::new(stream),
    ))
}
