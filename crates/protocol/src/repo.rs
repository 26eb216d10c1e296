use crate::IndexKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Indexing priority. High-priority repositories are processed first within
/// a pipeline.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Scheduling rank, lower runs first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// One registered repository.
///
/// `excluded` (a.k.a. locked) keeps ordinary indexing runs away from the
/// repository without hiding its already-indexed documents from search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RepositoryConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub excluded: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_true")]
    pub auto_reindex: bool,
    /// Overrides the global include patterns when non-empty.
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Merged with the global exclude patterns.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl RepositoryConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            enabled: true,
            excluded: false,
            priority: Priority::Medium,
            auto_reindex: true,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Partial update applied to a registered repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RepositoryUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_reindex: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_patterns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_patterns: Option<Vec<String>>,
}

/// Aggregate indexing stats for one (repository, kind), as surfaced through
/// the engine's `repositories()` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RepositoryStatSummary {
    pub index_kind: IndexKind,
    pub total_files_indexed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_run_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_run_ts: Option<i64>,
    pub last_run_seconds: f64,
    pub last_run_ts: i64,
    pub total_size_bytes: u64,
}
