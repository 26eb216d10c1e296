//! # Quarry Indexer
//!
//! The write side of the engine.
//!
//! ## Pipeline
//!
//! ```text
//! Repositories (registry, priority order)
//!     │
//!     ├──> File Scanner (.gitignore aware, include/exclude globs)
//!     │      └─> candidate files
//!     │
//!     ├──> Metadata Store (is this file stale for this kind?)
//!     │
//!     └──> per stale file, one pipeline per index kind, concurrently:
//!            ├─> Lexical Writer (whole-file document)
//!            └─> Vector Writer (chunk → embed → replace as unit)
//! ```
//!
//! Progress is exposed through atomic per-kind counters, cancellation is
//! cooperative between files, and the watcher turns file-system events into
//! debounced incremental runs over the same orchestrator.

mod error;
mod orchestrator;
mod progress;
mod scanner;
mod watcher;

pub use error::{IndexerError, Result};
pub use orchestrator::{IndexOrchestrator, IndexerContext, RunHandle};
pub use progress::PipelineProgressState;
pub use scanner::{FileScanner, PathMatcher};
pub use watcher::{RepositoryWatcher, WatcherOptions, WatcherStatusEntry};
