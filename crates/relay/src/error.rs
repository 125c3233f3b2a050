//! Relay error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("invalid event record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("status lookup failed: {0}")]
    Status(String),

    #[error("client disconnected")]
    ClientGone,
}
