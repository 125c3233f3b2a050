//! Agent run streaming API.
//!
//! Serves live agent run output over SSE ([`api::stream_agent_run`]), run
//! lookups, and stop requests. The binary in `main.rs` wires these to Redis
//! and PostgreSQL; tests wire them to the in-memory backends.

pub mod api;
pub mod auth;
pub mod cli;
pub mod db;
pub mod router;
pub mod run_store;
pub mod runs;
pub mod state;

pub use router::build_router;
pub use state::AppState;
