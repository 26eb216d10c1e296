use quarry_protocol::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LexicalError>;

#[derive(Error, Debug)]
pub enum LexicalError {
    #[error("lexical index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("failed to open lexical index directory: {0}")]
    OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lexical index task failed: {0}")]
    Join(String),
}

impl From<LexicalError> for EngineError {
    fn from(err: LexicalError) -> Self {
        EngineError::backend_unavailable("lexical", err.to_string())
    }
}
