//! # Quarry Lexical Index
//!
//! The BM25 side of hybrid search: a full-text index over whole files with
//! typo-tolerant matching and raw fields for repository/file-type filtering.
//! The [`LexicalBackend`] trait is the narrow seam the rest of the engine
//! talks through; [`TantivyBackend`] is the embedded implementation.

mod backend;
mod error;
mod tantivy_backend;
mod writer;

pub use backend::{LexicalBackend, LexicalDocument, LexicalHit};
pub use error::{LexicalError, Result};
pub use tantivy_backend::TantivyBackend;
pub use writer::LexicalWriter;

use sha2::{Digest, Sha256};

/// Stable 256-bit document id: SHA-256 of the absolute file path, hex
/// encoded. The raw path is stored alongside for filtering and display.
#[must_use]
pub fn document_id(file_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
