use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentRunError {
    #[error("Unknown run status: {0}")]
    UnknownStatus(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
