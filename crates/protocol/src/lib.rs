//! # Quarry Protocol
//!
//! Shared wire types for the quarry search engine: search requests and
//! responses, indexing jobs and progress, repository configuration, and the
//! engine-level error taxonomy. Everything here is plain data; the behavior
//! lives in the subsystem crates.

mod error;
mod job;
mod repo;
mod search;

pub use error::{EngineError, EngineResult};
pub use job::{
    BulkAction, IndexJob, IndexMode, IndexingStatus, PipelineProgress, PipelineState, RunStats,
};
pub use repo::{Priority, RepositoryConfig, RepositoryStatSummary, RepositoryUpdate};
pub use search::{
    Degraded, QueryResult, SearchFilter, SearchMode, SearchRequest, SearchResponse, DEFAULT_LIMIT,
    MAX_LIMIT,
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which index a document lives in. A file indexed by both pipelines has a
/// metadata record with the merged `both` kind, but jobs and writers always
/// address one kind at a time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Lexical,
    Vector,
}

impl IndexKind {
    pub const ALL: [Self; 2] = [Self::Lexical, Self::Vector];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Vector => "vector",
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lexical" => Ok(Self::Lexical),
            "vector" => Ok(Self::Vector),
            other => Err(format!("unknown index kind: {other}")),
        }
    }
}
