//! # Quarry Metadata Store
//!
//! Durable per-file index state, per-(repository, kind) aggregate stats, and
//! process-wide key/value state, backed by an embedded SQLite database. This
//! store is what makes indexing incremental: the orchestrator asks it which
//! files are stale and records every successful write back into it.
//!
//! The connection is wrapped in `Arc<Mutex<_>>` and every operation runs on
//! the blocking pool, so the async pipelines never block a runtime worker on
//! database io.

mod error;
mod record;
mod store;

pub use error::{MetadataError, Result};
pub use record::{FileRecord, FileUpsert, RecordKind, RepositoryStat, RunRecord};
pub use store::MetadataStore;

/// SystemState key holding the ISO-8601 time of the last successful run.
pub const STATE_LAST_INDEX_TIME: &str = "last_index_time";
/// SystemState key counting searches served.
pub const STATE_TOTAL_SEARCHES: &str = "total_searches";
/// SystemState key accumulating search latency in milliseconds.
pub const STATE_TOTAL_SEARCH_TIME_MS: &str = "total_search_time_ms";
