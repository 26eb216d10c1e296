use quarry_protocol::EngineError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("metadata store {path}: {cause}")]
    Sqlite { path: PathBuf, cause: String },

    #[error("metadata store task failed: {0}")]
    Join(String),

    #[error("corrupt row for {file_path}: {cause}")]
    CorruptRow { file_path: String, cause: String },
}

impl MetadataError {
    pub fn sqlite(path: &std::path::Path, err: rusqlite::Error) -> Self {
        Self::Sqlite {
            path: path.to_path_buf(),
            cause: err.to_string(),
        }
    }
}

impl From<MetadataError> for EngineError {
    fn from(err: MetadataError) -> Self {
        EngineError::Fatal(err.to_string())
    }
}
