use quarry_protocol::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorError>;

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("vector store task failed: {0}")]
    Join(String),
}

impl From<VectorError> for EngineError {
    fn from(err: VectorError) -> Self {
        EngineError::backend_unavailable("vector", err.to_string())
    }
}
