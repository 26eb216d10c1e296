use crate::backend::{LexicalBackend, LexicalDocument, LexicalHit};
use crate::error::{LexicalError, Result};
use async_trait::async_trait;
use quarry_protocol::SearchFilter;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::doc;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermSetQuery};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, TantivyDocument, Term};

const WRITER_BUDGET_BYTES: usize = 50_000_000;
/// Edit distance allowed on query terms for typo tolerance.
const FUZZY_DISTANCE: u8 = 1;

#[derive(Debug, Clone, Copy)]
struct Fields {
    id: Field,
    file_path: Field,
    repository: Field,
    file_type: Field,
    content: Field,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let id = builder.add_text_field("id", STRING | STORED);
    let file_path = builder.add_text_field("file_path", TEXT | STORED);
    let repository = builder.add_text_field("repository", STRING | STORED);
    let file_type = builder.add_text_field("file_type", STRING | STORED);
    let content = builder.add_text_field("content", TEXT);
    (
        builder.build(),
        Fields {
            id,
            file_path,
            repository,
            file_type,
            content,
        },
    )
}

/// Embedded tantivy implementation of [`LexicalBackend`]. All index
/// operations are blocking and run on the blocking pool; the writer is
/// shared behind a mutex, commits happen per operation so readers converge
/// quickly after each upsert.
pub struct TantivyBackend {
    index: Index,
    reader: IndexReader,
    writer: Arc<Mutex<IndexWriter>>,
    fields: Fields,
}

impl TantivyBackend {
    /// Open or create an index under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, fields) = build_schema();
        let index = Index::open_or_create(MmapDirectory::open(dir)?, schema)?;
        Self::from_index(index, fields)
    }

    /// Volatile in-RAM index, used by tests.
    pub fn open_in_ram() -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        Self::from_index(index, fields)
    }

    fn from_index(index: Index, fields: Fields) -> Result<Self> {
        let reader = index.reader()?;
        let writer: IndexWriter = index.writer(WRITER_BUDGET_BYTES)?;
        Ok(Self {
            index,
            reader,
            writer: Arc::new(Mutex::new(writer)),
            fields,
        })
    }

    fn build_query(&self, query: &str, filter: &SearchFilter) -> Box<dyn Query> {
        let mut parser = QueryParser::for_index(
            &self.index,
            vec![self.fields.content, self.fields.file_path],
        );
        parser.set_field_boost(self.fields.content, 2.0);
        parser.set_field_fuzzy(self.fields.content, false, FUZZY_DISTANCE, true);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            log::debug!("lenient query parse for {query:?}: {errors:?}");
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, parsed)];
        if !filter.repositories.is_empty() {
            let terms = filter
                .repositories
                .iter()
                .map(|r| Term::from_field_text(self.fields.repository, r))
                .collect::<Vec<_>>();
            clauses.push((Occur::Must, Box::new(TermSetQuery::new(terms))));
        }
        if !filter.file_types.is_empty() {
            let terms = filter
                .file_types
                .iter()
                .map(|t| Term::from_field_text(self.fields.file_type, t))
                .collect::<Vec<_>>();
            clauses.push((Occur::Must, Box::new(TermSetQuery::new(terms))));
        }

        if clauses.len() == 1 {
            clauses.remove(0).1
        } else {
            Box::new(BooleanQuery::new(clauses))
        }
    }
}

#[async_trait]
impl LexicalBackend for TantivyBackend {
    async fn upsert(&self, doc: LexicalDocument) -> Result<()> {
        let writer = Arc::clone(&self.writer);
        let fields = self.fields;
        tokio::task::spawn_blocking(move || {
            let mut writer = writer.lock().unwrap_or_else(|p| p.into_inner());
            writer.delete_term(Term::from_field_text(fields.id, &doc.id));
            writer.add_document(doc!(
                fields.id => doc.id,
                fields.file_path => doc.file_path,
                fields.repository => doc.repository,
                fields.file_type => doc.file_type,
                fields.content => doc.content,
            ))?;
            writer.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| LexicalError::Join(e.to_string()))?
    }

    async fn delete(&self, doc_id: &str) -> Result<()> {
        let writer = Arc::clone(&self.writer);
        let fields = self.fields;
        let doc_id = doc_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut writer = writer.lock().unwrap_or_else(|p| p.into_inner());
            writer.delete_term(Term::from_field_text(fields.id, &doc_id));
            writer.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| LexicalError::Join(e.to_string()))?
    }

    async fn clear_repository(&self, repository: &str) -> Result<()> {
        let writer = Arc::clone(&self.writer);
        let fields = self.fields;
        let repository = repository.to_string();
        tokio::task::spawn_blocking(move || {
            let mut writer = writer.lock().unwrap_or_else(|p| p.into_inner());
            writer.delete_term(Term::from_field_text(fields.repository, &repository));
            writer.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| LexicalError::Join(e.to_string()))?
    }

    async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<LexicalHit>> {
        let tantivy_query = self.build_query(query, filter);
        let reader = self.reader.clone();
        let fields = self.fields;
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || {
            reader.reload()?;
            let searcher = reader.searcher();

            // Oversample when a path prefix will post-filter the page.
            let fetch = if filter.path_prefixes.is_empty() {
                limit
            } else {
                limit.saturating_mul(4)
            };
            let top_docs = searcher.search(&tantivy_query, &TopDocs::with_limit(fetch.max(1)))?;

            let mut hits = Vec::with_capacity(top_docs.len().min(limit));
            for (score, address) in top_docs {
                let retrieved: TantivyDocument = searcher.doc(address)?;
                let file_path = retrieved
                    .get_first(fields.file_path)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if !filter.matches_path(&file_path) {
                    continue;
                }
                let repository = retrieved
                    .get_first(fields.repository)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let file_type = retrieved
                    .get_first(fields.file_type)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                hits.push(LexicalHit {
                    file_path,
                    repository,
                    file_type,
                    score,
                });
                if hits.len() == limit {
                    break;
                }
            }
            Ok(hits)
        })
        .await
        .map_err(|e| LexicalError::Join(e.to_string()))?
    }

    async fn doc_count(&self) -> Result<u64> {
        let reader = self.reader.clone();
        tokio::task::spawn_blocking(move || {
            reader.reload()?;
            Ok(reader.searcher().num_docs())
        })
        .await
        .map_err(|e| LexicalError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_id;

    fn doc(path: &str, repo: &str, content: &str, file_type: &str) -> LexicalDocument {
        LexicalDocument {
            id: document_id(path),
            file_path: path.to_string(),
            repository: repo.to_string(),
            content: content.to_string(),
            file_type: file_type.to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_search_delete() {
        let backend = TantivyBackend::open_in_ram().unwrap();
        backend
            .upsert(doc("/r/a.py", "demo", "def greet(): return 'hi'", "py"))
            .await
            .unwrap();
        backend
            .upsert(doc("/r/b.md", "demo", "hello world", "md"))
            .await
            .unwrap();

        let hits = backend
            .search("greet", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "/r/a.py");
        assert!(hits[0].score > 0.0);

        backend.delete(&document_id("/r/a.py")).await.unwrap();
        let hits = backend
            .search("greet", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_previous_document() {
        let backend = TantivyBackend::open_in_ram().unwrap();
        backend
            .upsert(doc("/r/a.md", "demo", "original text", "md"))
            .await
            .unwrap();
        backend
            .upsert(doc("/r/a.md", "demo", "replacement text", "md"))
            .await
            .unwrap();

        assert_eq!(backend.doc_count().await.unwrap(), 1);
        let hits = backend
            .search("original", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
        let hits = backend
            .search("replacement", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn repository_and_file_type_filters() {
        let backend = TantivyBackend::open_in_ram().unwrap();
        backend
            .upsert(doc("/one/a.rs", "one", "shared keyword", "rs"))
            .await
            .unwrap();
        backend
            .upsert(doc("/two/b.md", "two", "shared keyword", "md"))
            .await
            .unwrap();

        let filter = SearchFilter {
            repositories: vec!["one".to_string()],
            ..SearchFilter::default()
        };
        let hits = backend.search("shared", &filter, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].repository, "one");

        let filter = SearchFilter {
            file_types: vec!["md".to_string()],
            ..SearchFilter::default()
        };
        let hits = backend.search("shared", &filter, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_type, "md");
    }

    #[tokio::test]
    async fn clear_repository_removes_only_that_repository() {
        let backend = TantivyBackend::open_in_ram().unwrap();
        backend
            .upsert(doc("/one/a.rs", "one", "alpha", "rs"))
            .await
            .unwrap();
        backend
            .upsert(doc("/two/b.rs", "two", "alpha", "rs"))
            .await
            .unwrap();

        backend.clear_repository("one").await.unwrap();
        let hits = backend
            .search("alpha", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].repository, "two");
    }

    #[tokio::test]
    async fn typo_tolerant_matching() {
        let backend = TantivyBackend::open_in_ram().unwrap();
        backend
            .upsert(doc(
                "/r/auth.rs",
                "demo",
                "fn authenticate(user: &User) -> Token",
                "rs",
            ))
            .await
            .unwrap();

        // One edit away from "authenticate".
        let hits = backend
            .search("authentigate", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let backend = TantivyBackend::open(dir.path()).unwrap();
            backend
                .upsert(doc("/r/a.md", "demo", "durable content", "md"))
                .await
                .unwrap();
        }
        let backend = TantivyBackend::open(dir.path()).unwrap();
        let hits = backend
            .search("durable", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
