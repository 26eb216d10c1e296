use quarry_protocol::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata store error: {0}")]
    Metadata(#[from] quarry_metadata_store::MetadataError),

    #[error("lexical writer error: {0}")]
    Lexical(#[from] quarry_lexical_index::LexicalError),

    #[error("vector writer error: {0}")]
    Vector(#[from] quarry_vector_store::VectorError),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("watcher error: {0}")]
    Watch(String),

    #[error("{0}")]
    Other(String),
}

impl From<IndexerError> for EngineError {
    fn from(err: IndexerError) -> Self {
        match err {
            IndexerError::Metadata(e) => e.into(),
            IndexerError::Lexical(e) => e.into(),
            IndexerError::Vector(e) => e.into(),
            IndexerError::Io(e) => EngineError::TransientIo(e.to_string()),
            IndexerError::InvalidPattern(msg) => EngineError::InvalidArgument(msg),
            IndexerError::Watch(msg) | IndexerError::Other(msg) => EngineError::Fatal(msg),
        }
    }
}
