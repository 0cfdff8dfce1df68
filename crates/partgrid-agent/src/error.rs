use thiserror::Error;

use partgrid_placement::PlacementError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("capability source failed: {0:#}")]
    Capabilities(anyhow::Error),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error("placement task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("publish of pool {pool} failed")]
    Publish { pool: String },
}

pub type AgentResult<T> = Result<T, AgentError>;
