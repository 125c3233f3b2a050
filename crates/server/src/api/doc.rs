//! OpenAPI documentation aggregator.
//!
//! Collects all `#[utoipa::path]`-annotated handlers and `ToSchema`-derived
//! types into a single OpenAPI 3.1 spec, served via Scalar UI at `/docs`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "agentrun API",
        version = "0.1.0",
        description = "Live streaming, lookup and stopping of agent runs.",
    ),
    tags(
        (name = "Health", description = "Server liveness"),
        (name = "Agent Runs", description = "Run streaming over SSE, run details, and stop requests"),
    ),
    paths(
        crate::api::health::health,
        crate::api::stream::stream_agent_run,
        crate::api::runs::stop_agent,
        crate::api::runs::get_agent_run,
        crate::api::runs::list_thread_runs,
    ),
    components(schemas(
        crate::api::QueryErrorResponse,
        crate::api::health::HealthResponse,
        crate::api::runs::StopResponse,
        crate::api::runs::AgentRunDetails,
        crate::api::runs::AgentRunsResponse,
        crate::run_store::AgentRun,
    ))
)]
pub struct ApiDoc;
