use quarry_protocol::IndexKind;

/// Which pipelines have indexed a file. Merges monotonically: once a file is
/// covered by both kinds the record stays `Both` until a kind is explicitly
/// removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Lexical,
    Vector,
    Both,
}

impl RecordKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Vector => "vector",
            Self::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lexical" => Some(Self::Lexical),
            "vector" => Some(Self::Vector),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    #[must_use]
    pub const fn covers(self, kind: IndexKind) -> bool {
        matches!(
            (self, kind),
            (Self::Both, _)
                | (Self::Lexical, IndexKind::Lexical)
                | (Self::Vector, IndexKind::Vector)
        )
    }

    /// Monotonic merge used by upserts.
    #[must_use]
    pub const fn merge(self, kind: IndexKind) -> Self {
        match (self, kind) {
            (Self::Lexical, IndexKind::Vector) | (Self::Vector, IndexKind::Lexical) => Self::Both,
            (current, _) => current,
        }
    }

    /// Strip one kind component; `None` means the record has no kind left
    /// and should be deleted.
    #[must_use]
    pub const fn remove(self, kind: IndexKind) -> Option<Self> {
        match (self, kind) {
            (Self::Both, IndexKind::Lexical) => Some(Self::Vector),
            (Self::Both, IndexKind::Vector) => Some(Self::Lexical),
            (Self::Lexical, IndexKind::Lexical) | (Self::Vector, IndexKind::Vector) => None,
            (other, _) => Some(other),
        }
    }

    #[must_use]
    pub const fn from_kind(kind: IndexKind) -> Self {
        match kind {
            IndexKind::Lexical => Self::Lexical,
            IndexKind::Vector => Self::Vector,
        }
    }
}

/// One row of the `file_records` table, keyed by absolute path.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub file_path: String,
    pub repository: String,
    /// Unix seconds at index time; non-decreasing per path.
    pub last_indexed_ts: i64,
    /// Filesystem mtime observed at index time.
    pub last_modified_ts: i64,
    /// Reserved for content-based dedup.
    pub content_hash: Option<String>,
    pub file_size: u64,
    pub index_kind: RecordKind,
    pub created_ts: i64,
    pub updated_ts: i64,
}

/// Parameters for [`crate::MetadataStore::upsert`].
#[derive(Debug, Clone)]
pub struct FileUpsert {
    pub file_path: String,
    pub repository: String,
    pub file_mtime: i64,
    pub file_size: u64,
    pub kind: IndexKind,
    pub now: i64,
}

/// One row of the `repository_stats` table.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryStat {
    pub repository: String,
    pub index_kind: IndexKind,
    pub total_files_indexed: u64,
    pub initial_run_seconds: Option<f64>,
    pub initial_run_ts: Option<i64>,
    pub last_run_seconds: f64,
    pub last_run_ts: i64,
    pub total_size_bytes: u64,
}

/// Parameters for [`crate::MetadataStore::record_run`].
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub repository: String,
    pub kind: IndexKind,
    pub files_indexed: u64,
    pub duration_seconds: f64,
    pub total_size_bytes: u64,
    pub is_initial: bool,
    pub now: i64,
}
