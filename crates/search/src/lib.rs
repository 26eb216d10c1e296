//! # Quarry Search
//!
//! The query side of the engine: three search modes over the lexical and
//! vector backends, Reciprocal Rank Fusion of the two rankings, and snippet
//! assembly from file content.

mod fusion;
mod hybrid;
mod snippet;

pub use fusion::{collapse_chunks, fuse, FusedFile, RankedFile, RRF_K0};
pub use hybrid::{HybridSearcher, SearcherConfig};
pub use snippet::{extract_snippet, snippet_for_file, SNIPPET_CHARS};
