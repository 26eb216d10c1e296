use crate::backend::{EmbeddedChunk, VectorBackend};
use crate::embedder::EmbeddingProvider;
use crate::error::{Result, VectorError};
use crate::DEFAULT_EMBED_BATCH_SIZE;
use quarry_chunker::Chunker;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sole writer of the vector backend. Chunks a file, embeds the chunks in
/// batches, and swaps the file's stored chunks as a unit. A per-path lock
/// keeps two pipelines from interleaving delete/insert for the same file.
pub struct VectorWriter {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
    batch_size: usize,
    file_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VectorWriter {
    #[must_use]
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: Chunker,
    ) -> Self {
        Self {
            backend,
            embedder,
            chunker,
            batch_size: DEFAULT_EMBED_BATCH_SIZE,
            file_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn VectorBackend> {
        &self.backend
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    async fn lock_for(&self, file_path: &str) -> Arc<Mutex<()>> {
        let mut locks = self.file_locks.lock().await;
        Arc::clone(
            locks
                .entry(file_path.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Re-chunk and re-embed a file, replacing whatever the backend held for
    /// it. Returns the number of chunks written.
    pub async fn upsert(
        &self,
        file_path: &str,
        repository: &str,
        content: &str,
        file_type: &str,
    ) -> Result<usize> {
        let chunks = self.chunker.chunk_str(content);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embedder.embed_batch(batch).await?;
            for vector in &vectors {
                if vector.len() != self.embedder.dimension() {
                    return Err(VectorError::DimensionMismatch {
                        expected: self.embedder.dimension(),
                        actual: vector.len(),
                    });
                }
            }
            embeddings.extend(vectors);
        }

        let embedded: Vec<EmbeddedChunk> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| EmbeddedChunk {
                chunk_index: chunk.index,
                embedding,
            })
            .collect();
        let written = embedded.len();

        let lock = self.lock_for(file_path).await;
        let _guard = lock.lock().await;
        self.backend
            .replace_file(file_path, repository, file_type, embedded)
            .await?;
        log::debug!("vector upsert {file_path}: {written} chunks");
        Ok(written)
    }

    pub async fn delete(&self, file_path: &str) -> Result<()> {
        let lock = self.lock_for(file_path).await;
        let _guard = lock.lock().await;
        log::debug!("vector delete {file_path}");
        self.backend.delete_file(file_path).await
    }

    /// Remove every chunk of a repository (full-rebuild mode).
    pub async fn clear(&self, repository: &str) -> Result<()> {
        log::info!("vector clear repository={repository}");
        self.backend.clear_repository(repository).await
    }

    /// Flush the backend when it persists anything.
    pub async fn persist(&self) -> Result<()> {
        self.backend.persist().await
    }
}
