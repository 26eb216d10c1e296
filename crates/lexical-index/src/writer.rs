use crate::backend::{LexicalBackend, LexicalDocument};
use crate::document_id;
use crate::error::Result;
use std::sync::Arc;

/// Per-file write surface over the lexical backend. Failed upserts are
/// reported to the caller; the orchestrator leaves the metadata record
/// untouched so the next run retries the file.
pub struct LexicalWriter {
    backend: Arc<dyn LexicalBackend>,
}

impl LexicalWriter {
    #[must_use]
    pub fn new(backend: Arc<dyn LexicalBackend>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn LexicalBackend> {
        &self.backend
    }

    pub async fn upsert(
        &self,
        file_path: &str,
        repository: &str,
        content: &str,
        file_type: &str,
    ) -> Result<()> {
        let doc = LexicalDocument {
            id: document_id(file_path),
            file_path: file_path.to_string(),
            repository: repository.to_string(),
            content: content.to_string(),
            file_type: file_type.to_string(),
        };
        log::debug!("lexical upsert {file_path}");
        self.backend.upsert(doc).await
    }

    pub async fn delete(&self, file_path: &str) -> Result<()> {
        log::debug!("lexical delete {file_path}");
        self.backend.delete(&document_id(file_path)).await
    }

    /// Remove every document of a repository (full-rebuild mode).
    pub async fn clear(&self, repository: &str) -> Result<()> {
        log::info!("lexical clear repository={repository}");
        self.backend.clear_repository(repository).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TantivyBackend;
    use quarry_protocol::SearchFilter;

    #[tokio::test]
    async fn writer_round_trip() {
        let backend = Arc::new(TantivyBackend::open_in_ram().unwrap());
        let writer = LexicalWriter::new(backend.clone());

        writer
            .upsert("/r/a.py", "demo", "def greet(): pass", "py")
            .await
            .unwrap();
        let hits = backend
            .search("greet", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        writer.delete("/r/a.py").await.unwrap();
        assert_eq!(backend.doc_count().await.unwrap(), 0);
    }
}
