use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Lexical,
    Semantic,
    #[default]
    Hybrid,
}

impl SearchMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lexical" => Ok(Self::Lexical),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown search mode: {other}")),
        }
    }
}

/// A search request. `repositories` and `file_types` are whitelists; empty
/// means unrestricted. `folder_filter` is a repository-relative path prefix.
/// `min_score` filters on the fused score and only applies to hybrid mode.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Extensions without the leading dot, e.g. `["rs", "md"]`.
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
}

impl SearchRequest {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: SearchMode::Hybrid,
            limit: DEFAULT_LIMIT,
            repositories: Vec::new(),
            file_types: Vec::new(),
            folder_filter: None,
            min_score: None,
        }
    }
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// Backend-agnostic filter, already resolved by the engine: repository
/// names, bare extensions, and absolute path prefixes derived from the
/// request's `folder_filter`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub repositories: Vec<String>,
    pub file_types: Vec<String>,
    pub path_prefixes: Vec<String>,
}

impl SearchFilter {
    /// True when the filter restricts nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty() && self.file_types.is_empty() && self.path_prefixes.is_empty()
    }

    /// Path-prefix check used by backends that post-filter.
    #[must_use]
    pub fn matches_path(&self, file_path: &str) -> bool {
        self.path_prefixes.is_empty()
            || self.path_prefixes.iter().any(|p| file_path.starts_with(p))
    }
}

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryResult {
    pub file_path: String,
    pub repository: String,
    pub relative_path: String,
    pub file_type: String,
    pub snippet: String,
    /// Fused score in hybrid mode, backend score otherwise.
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
}

/// Marker attached to a hybrid response when one backend failed and the
/// ranking was computed from the other alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Degraded {
    pub backend: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchResponse {
    pub results: Vec<QueryResult>,
    pub total_results: usize,
    pub search_type: SearchMode,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<Degraded>,
}
