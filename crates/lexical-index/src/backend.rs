use crate::error::Result;
use async_trait::async_trait;
use quarry_protocol::SearchFilter;

/// One whole-file document as stored in the lexical backend.
#[derive(Debug, Clone)]
pub struct LexicalDocument {
    /// Stable hash of `file_path`, see [`crate::document_id`].
    pub id: String,
    pub file_path: String,
    pub repository: String,
    /// Raw file text, size-capped by the caller.
    pub content: String,
    /// Extension without the leading dot.
    pub file_type: String,
}

/// One ranked hit from the lexical backend.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub file_path: String,
    pub repository: String,
    pub file_type: String,
    /// BM25 score as reported by the backend.
    pub score: f32,
}

/// Narrow interface to the full-text index. `content` and `file_path` are
/// searchable (with `content` weighted higher), `repository` and
/// `file_type` filterable.
#[async_trait]
pub trait LexicalBackend: Send + Sync {
    async fn upsert(&self, doc: LexicalDocument) -> Result<()>;

    /// Remove a document by its id.
    async fn delete(&self, doc_id: &str) -> Result<()>;

    /// Remove every document whose `repository` field matches.
    async fn clear_repository(&self, repository: &str) -> Result<()>;

    async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<LexicalHit>>;

    async fn doc_count(&self) -> Result<u64>;
}
