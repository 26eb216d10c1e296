use quarry_protocol::RepositoryConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DEBOUNCE_SECONDS: u64 = 5;

const DEFAULT_MAX_FILE_BYTES: usize = 1_048_576;
const DEFAULT_CHUNK_SIZE: usize = 500;
const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Root of the YAML configuration file: the repository list plus global
/// defaults the repositories inherit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    /// File-name globs selecting indexable files, e.g. `*.rs`.
    #[serde(default = "default_include_patterns")]
    pub include_patterns: Vec<String>,
    /// Relative-path globs excluded everywhere, merged with per-repository
    /// exclusions. Exclusion wins over inclusion.
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: u64,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            include_patterns: default_include_patterns(),
            exclude_patterns: default_exclude_patterns(),
            debounce_seconds: DEFAULT_DEBOUNCE_SECONDS,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl GlobalConfig {
    /// Effective include patterns for one repository: its own when set,
    /// the global defaults otherwise.
    #[must_use]
    pub fn include_patterns_for(&self, repo: &RepositoryConfig) -> Vec<String> {
        if repo.include_patterns.is_empty() {
            self.include_patterns.clone()
        } else {
            repo.include_patterns.clone()
        }
    }

    /// Effective exclude patterns: global and per-repository merged.
    #[must_use]
    pub fn exclude_patterns_for(&self, repo: &RepositoryConfig) -> Vec<String> {
        let mut patterns = self.exclude_patterns.clone();
        patterns.extend(repo.exclude_patterns.iter().cloned());
        patterns
    }
}

fn default_include_patterns() -> Vec<String> {
    [
        "*.py", "*.js", "*.ts", "*.tsx", "*.jsx", "*.java", "*.go", "*.rs", "*.c", "*.cpp",
        "*.h", "*.hpp", "*.md", "*.txt", "*.rst", "*.yaml", "*.yml", "*.json", "*.toml", "*.sh",
        "*.sql", "*.dart", "*.swift", "*.kt",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_exclude_patterns() -> Vec<String> {
    [
        "**/node_modules/**",
        "**/target/**",
        "**/dist/**",
        "**/build/**",
        "**/.git/**",
        "**/__pycache__/**",
        "**/*.min.js",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_debounce_seconds() -> u64 {
    DEFAULT_DEBOUNCE_SECONDS
}

fn default_max_file_bytes() -> usize {
    DEFAULT_MAX_FILE_BYTES
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}
