use crate::error::{Result, VectorError};
use crate::EMBEDDING_DIMENSION;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use once_cell::sync::OnceCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

/// Text-in, fixed-length-float-vector-out. Implementations must be safe to
/// share across tasks; batching is internal to the provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        batch
            .pop()
            .ok_or_else(|| VectorError::Embedding("provider returned empty batch".to_string()))
    }
}

static SHARED_MODEL: OnceCell<Arc<FastEmbedProvider>> = OnceCell::new();

/// Sentence-transformer provider backed by fastembed's ONNX runtime
/// (all-MiniLM-L6-v2, 384 dimensions). Model init downloads and loads the
/// weights, so the process keeps exactly one instance.
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
}

impl FastEmbedProvider {
    /// Load the model. Heavy; prefer [`FastEmbedProvider::shared`].
    pub fn new() -> Result<Self> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
        )
        .map_err(|e| VectorError::Embedding(e.to_string()))?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }

    /// Process-wide singleton, initialized on first use.
    pub fn shared() -> Result<Arc<Self>> {
        SHARED_MODEL
            .get_or_try_init(|| Self::new().map(Arc::new))
            .cloned()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn name(&self) -> &str {
        "fastembed/all-MiniLM-L6-v2"
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let texts = texts.to_vec();
        // The ONNX session is compute-bound; keep it off the runtime workers.
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || {
            let model = model.lock().unwrap_or_else(|p| p.into_inner());
            model
                .embed(texts, None)
                .map_err(|e| VectorError::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| VectorError::Join(e.to_string()))?
    }
}

/// Deterministic embedding provider for tests and offline runs: hashes
/// lowercase alphanumeric tokens into a fixed 384-bucket histogram and
/// L2-normalizes it. Token overlap produces positive cosine similarity,
/// which is all the engine's ranking logic needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashingEmbeddingProvider;

impl HashingEmbeddingProvider {
    fn embed_text(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; EMBEDDING_DIMENSION];
        for token in text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| t.len() >= 2)
        {
            let token = token.to_ascii_lowercase();
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % EMBEDDING_DIMENSION as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::embed_text(t)).collect())
    }
}
