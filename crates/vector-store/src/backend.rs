use crate::error::Result;
use async_trait::async_trait;
use quarry_protocol::SearchFilter;

/// One embedded window, ready for storage. The backend derives the chunk id
/// as `"{file_path}:{chunk_index}"`.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk_index: usize,
    pub embedding: Vec<f32>,
}

/// One ranked chunk hit from a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub file_path: String,
    pub repository: String,
    pub chunk_index: usize,
    pub file_type: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Narrow interface to the approximate-nearest-neighbor store. A file's
/// chunks are always replaced as a unit: between `replace_file` calls a
/// reader sees either the complete old set or the complete new set, never a
/// mixture.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Atomically swap every chunk of `file_path` for the given set. An
    /// empty set removes the file's presence entirely.
    async fn replace_file(
        &self,
        file_path: &str,
        repository: &str,
        file_type: &str,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<()>;

    /// Remove every chunk whose `file_path` matches.
    async fn delete_file(&self, file_path: &str) -> Result<()>;

    /// Remove every chunk whose `repository` matches.
    async fn clear_repository(&self, repository: &str) -> Result<()>;

    /// Cosine-similarity search, best first.
    async fn search(
        &self,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;

    async fn chunk_count(&self) -> Result<u64>;

    /// Ids of the chunks currently stored for a file, in index order.
    async fn chunk_ids_for_file(&self, file_path: &str) -> Result<Vec<String>>;

    /// Flush to durable storage, when the implementation has any.
    async fn persist(&self) -> Result<()> {
        Ok(())
    }
}
