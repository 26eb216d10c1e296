use crate::IndexKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Consult the metadata store and rewrite only stale files.
    Incremental,
    /// Clear the repository's presence in the selected backends first, then
    /// index every candidate file.
    FullRebuild,
}

/// A request to run the indexing pipelines.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexJob {
    /// Repository names; empty means every registered repository.
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Which pipelines to run. Must be nonempty.
    pub kinds: BTreeSet<IndexKind>,
    pub mode: IndexMode,
    /// When set, `excluded` (locked) repositories are indexed anyway.
    #[serde(default)]
    pub override_excluded: bool,
}

impl IndexJob {
    /// Incremental job over the given repositories for every kind.
    #[must_use]
    pub fn incremental(repositories: Vec<String>) -> Self {
        Self {
            repositories,
            kinds: IndexKind::ALL.into_iter().collect(),
            mode: IndexMode::Incremental,
            override_excluded: false,
        }
    }

    /// Full rebuild over the given repositories for every kind.
    #[must_use]
    pub fn full_rebuild(repositories: Vec<String>) -> Self {
        Self {
            repositories,
            kinds: IndexKind::ALL.into_iter().collect(),
            mode: IndexMode::FullRebuild,
            override_excluded: false,
        }
    }
}

/// Pipeline lifecycle for one index kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Scanning,
    Indexing,
    Finalizing,
    Stopping,
    Failed,
}

impl PipelineState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Indexing => "indexing",
            Self::Finalizing => "finalizing",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }
}

/// Read-only snapshot of one pipeline's progress. Counters only ever advance
/// within a run; `files_total` is the best estimate accumulated as
/// repositories finish scanning.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineProgress {
    pub kind: IndexKind,
    pub is_running: bool,
    pub state: PipelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_repository: Option<String>,
    pub repositories_total: u64,
    pub repositories_completed: u64,
    pub files_total: u64,
    pub files_processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<IndexMode>,
}

/// Combined indexing status exposed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexingStatus {
    pub pipelines: Vec<PipelineProgress>,
    pub is_indexing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_index_time: Option<String>,
}

/// Outcome summary for one pipeline of a finished run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RunStats {
    pub files_indexed: u64,
    pub files_deleted: u64,
    pub chunks: u64,
    pub errors: Vec<String>,
    pub time_ms: u64,
}

impl RunStats {
    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// One of the registry's atomic bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    EnableAll,
    DisableAll,
    LockAll,
    UnlockAll,
}

impl std::str::FromStr for BulkAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enable-all" | "enable_all" => Ok(Self::EnableAll),
            "disable-all" | "disable_all" => Ok(Self::DisableAll),
            "lock-all" | "lock_all" => Ok(Self::LockAll),
            "unlock-all" | "unlock_all" => Ok(Self::UnlockAll),
            other => Err(format!("unknown bulk action: {other}")),
        }
    }
}
