use crate::backend::{ChunkHit, EmbeddedChunk, VectorBackend};
use crate::error::Result;
use async_trait::async_trait;
use ndarray::ArrayView1;
use quarry_chunker::chunk_id;
use quarry_protocol::SearchFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    chunk_index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileChunks {
    repository: String,
    file_type: String,
    chunks: Vec<StoredChunk>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    files: HashMap<String, FileChunks>,
}

/// In-process [`VectorBackend`] with cosine similarity and JSON
/// persistence. The whole map sits behind one `RwLock`, which makes the
/// per-file replace trivially atomic for readers.
pub struct LocalVectorStore {
    path: Option<PathBuf>,
    files: RwLock<HashMap<String, FileChunks>>,
}

impl LocalVectorStore {
    /// Volatile store, used by tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Open a store persisted at `path`; a missing file starts empty, an
    /// unreadable one is rebuilt from scratch on the next indexing run.
    pub async fn open(path: &Path) -> Result<Self> {
        let files = match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) => snapshot.files,
                Err(err) => {
                    log::warn!(
                        "failed to parse vector store {}: {err}; starting empty",
                        path.display()
                    );
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            files: RwLock::new(files),
        })
    }

    fn cosine(query: &[f32], stored: &[f32]) -> f32 {
        if query.len() != stored.len() {
            return 0.0;
        }
        // Stored embeddings are L2-normalized at write time; the caller
        // normalizes the query, so the dot product is the cosine.
        ArrayView1::from(query).dot(&ArrayView1::from(stored))
    }

    fn normalize(mut embedding: Vec<f32>) -> Vec<f32> {
        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl VectorBackend for LocalVectorStore {
    async fn replace_file(
        &self,
        file_path: &str,
        repository: &str,
        file_type: &str,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<()> {
        let entry = FileChunks {
            repository: repository.to_string(),
            file_type: file_type.to_string(),
            chunks: chunks
                .into_iter()
                .map(|c| StoredChunk {
                    chunk_index: c.chunk_index,
                    embedding: Self::normalize(c.embedding),
                })
                .collect(),
        };
        let mut files = self.files.write().await;
        if entry.chunks.is_empty() {
            files.remove(file_path);
        } else {
            files.insert(file_path.to_string(), entry);
        }
        Ok(())
    }

    async fn delete_file(&self, file_path: &str) -> Result<()> {
        self.files.write().await.remove(file_path);
        Ok(())
    }

    async fn clear_repository(&self, repository: &str) -> Result<()> {
        self.files
            .write()
            .await
            .retain(|_, entry| entry.repository != repository);
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let query = Self::normalize(embedding.to_vec());
        let files = self.files.read().await;

        let mut hits = Vec::new();
        for (file_path, entry) in files.iter() {
            if !filter.repositories.is_empty() && !filter.repositories.contains(&entry.repository) {
                continue;
            }
            if !filter.file_types.is_empty() && !filter.file_types.contains(&entry.file_type) {
                continue;
            }
            if !filter.matches_path(file_path) {
                continue;
            }
            for chunk in &entry.chunks {
                let score = Self::cosine(&query, &chunk.embedding);
                hits.push(ChunkHit {
                    chunk_id: chunk_id(file_path, chunk.chunk_index),
                    file_path: file_path.clone(),
                    repository: entry.repository.clone(),
                    chunk_index: chunk.chunk_index,
                    file_type: entry.file_type.clone(),
                    score,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn chunk_count(&self) -> Result<u64> {
        let files = self.files.read().await;
        Ok(files.values().map(|e| e.chunks.len() as u64).sum())
    }

    async fn chunk_ids_for_file(&self, file_path: &str) -> Result<Vec<String>> {
        let files = self.files.read().await;
        Ok(files
            .get(file_path)
            .map(|entry| {
                entry
                    .chunks
                    .iter()
                    .map(|c| chunk_id(file_path, c.chunk_index))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = {
            let files = self.files.read().await;
            Snapshot {
                files: files.clone(),
            }
        };
        let json = serde_json::to_vec(&snapshot)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so a crash never leaves a torn store file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await?;
        log::debug!("vector store persisted to {}", path.display());
        Ok(())
    }
}
