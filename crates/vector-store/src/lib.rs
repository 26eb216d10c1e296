//! # Quarry Vector Store
//!
//! The semantic side of hybrid search. Files are cut into overlapping text
//! windows, embedded with a 384-dimensional sentence-transformer model, and
//! stored behind the [`VectorBackend`] trait keyed by
//! `"{file_path}:{chunk_index}"` ids. The [`VectorWriter`] owns the only
//! write path and replaces a file's chunks as a unit, so concurrent readers
//! never observe a mixture of old and new chunks for the same file.

mod backend;
mod embedder;
mod error;
mod store;
mod writer;

pub use backend::{ChunkHit, EmbeddedChunk, VectorBackend};
pub use embedder::{EmbeddingProvider, FastEmbedProvider, HashingEmbeddingProvider};
pub use error::{Result, VectorError};
pub use store::LocalVectorStore;
pub use writer::VectorWriter;

/// Dimensionality of the embedding space. Providers may swap the model but
/// must keep this contract.
pub const EMBEDDING_DIMENSION: usize = 384;

/// Default number of chunks embedded per model call.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;
