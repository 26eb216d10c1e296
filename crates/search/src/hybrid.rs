use crate::fusion::{collapse_chunks, fuse, FusedFile, RankedFile};
use crate::snippet::{snippet_for_file, SNIPPET_CHARS};
use quarry_lexical_index::LexicalBackend;
use quarry_protocol::{
    Degraded, EngineError, EngineResult, QueryResult, SearchFilter, SearchMode, SearchRequest,
    SearchResponse, MAX_LIMIT,
};
use quarry_vector_store::{EmbeddingProvider, VectorBackend};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SearcherConfig {
    /// Hybrid oversampling floor: each backend is asked for
    /// `max(limit × factor, floor)` candidates.
    pub oversample_floor: usize,
    pub oversample_factor: usize,
    pub snippet_chars: usize,
    /// Soft deadline per backend call.
    pub deadline: Duration,
}

impl Default for SearcherConfig {
    fn default() -> Self {
        Self {
            oversample_floor: 30,
            oversample_factor: 3,
            snippet_chars: SNIPPET_CHARS,
            deadline: Duration::from_secs(10),
        }
    }
}

/// Executes the three query modes against the two backends and assembles
/// the response. In hybrid mode both backends are consulted concurrently
/// and their rankings fused; when exactly one fails, the response degrades
/// to the surviving backend and says so.
pub struct HybridSearcher {
    lexical: Arc<dyn LexicalBackend>,
    vector: Arc<dyn VectorBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: SearcherConfig,
}

impl HybridSearcher {
    #[must_use]
    pub fn new(
        lexical: Arc<dyn LexicalBackend>,
        vector: Arc<dyn VectorBackend>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            lexical,
            vector,
            embedder,
            config: SearcherConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SearcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Run a validated request. `filter` is the engine-resolved filter and
    /// `roots` maps repository names to their absolute roots (used for
    /// relative paths in the response).
    pub async fn search(
        &self,
        req: &SearchRequest,
        filter: &SearchFilter,
        roots: &HashMap<String, PathBuf>,
    ) -> EngineResult<SearchResponse> {
        validate(req)?;

        match req.mode {
            SearchMode::Lexical => self.search_lexical(req, filter, roots).await,
            SearchMode::Semantic => self.search_semantic(req, filter, roots).await,
            SearchMode::Hybrid => self.search_hybrid(req, filter, roots).await,
        }
    }

    async fn search_lexical(
        &self,
        req: &SearchRequest,
        filter: &SearchFilter,
        roots: &HashMap<String, PathBuf>,
    ) -> EngineResult<SearchResponse> {
        let files = self.lexical_files(&req.query, filter, req.limit).await?;

        let fused = files
            .iter()
            .enumerate()
            .map(|(rank, f)| FusedFile {
                file_path: f.file_path.clone(),
                repository: f.repository.clone(),
                file_type: f.file_type.clone(),
                score: f.score,
                lexical_rank: Some(rank),
                lexical_score: Some(f.score),
                vector_score: None,
            })
            .collect();
        let results = self.assemble(fused, &req.query, req.limit, roots).await;
        Ok(response(req, SearchMode::Lexical, results, None))
    }

    async fn search_semantic(
        &self,
        req: &SearchRequest,
        filter: &SearchFilter,
        roots: &HashMap<String, PathBuf>,
    ) -> EngineResult<SearchResponse> {
        // The backend ranks chunks; fetch extra so that collapsing to files
        // still fills the page.
        let k = req.limit * self.config.oversample_factor;
        let files = self.vector_files(&req.query, filter, k).await?;

        let fused = files
            .into_iter()
            .map(|f| FusedFile {
                score: f.score,
                vector_score: Some(f.score),
                lexical_rank: None,
                lexical_score: None,
                file_path: f.file_path,
                repository: f.repository,
                file_type: f.file_type,
            })
            .collect();
        let results = self.assemble(fused, &req.query, req.limit, roots).await;
        Ok(response(req, SearchMode::Semantic, results, None))
    }

    async fn search_hybrid(
        &self,
        req: &SearchRequest,
        filter: &SearchFilter,
        roots: &HashMap<String, PathBuf>,
    ) -> EngineResult<SearchResponse> {
        let k = (req.limit * self.config.oversample_factor).max(self.config.oversample_floor);

        let (lexical_out, vector_out) = tokio::join!(
            self.lexical_files(&req.query, filter, k),
            self.vector_files(&req.query, filter, k),
        );

        let (lexical_files, vector_files, degraded) = match (lexical_out, vector_out) {
            (Ok(lex), Ok(vec)) => (lex, vec, None),
            (Ok(lex), Err(err)) => {
                log::warn!("hybrid search: vector backend failed: {err}");
                let degraded = Degraded {
                    backend: "vector".to_string(),
                    reason: err.to_string(),
                };
                (lex, Vec::new(), Some(degraded))
            }
            (Err(err), Ok(vec)) => {
                log::warn!("hybrid search: lexical backend failed: {err}");
                let degraded = Degraded {
                    backend: "lexical".to_string(),
                    reason: err.to_string(),
                };
                (Vec::new(), vec, Some(degraded))
            }
            (Err(lex_err), Err(vec_err)) => {
                return Err(EngineError::backend_unavailable(
                    "lexical+vector",
                    format!("lexical: {lex_err}; vector: {vec_err}"),
                ));
            }
        };

        let mut fused = fuse(&lexical_files, &vector_files);
        if let Some(min_score) = req.min_score {
            fused.retain(|f| f.score >= min_score);
        }
        fused.truncate(req.limit);

        let results = self.assemble(fused, &req.query, req.limit, roots).await;
        Ok(response(req, SearchMode::Hybrid, results, degraded))
    }

    /// File-level lexical ranking, best first.
    async fn lexical_files(
        &self,
        query: &str,
        filter: &SearchFilter,
        k: usize,
    ) -> EngineResult<Vec<RankedFile>> {
        let hits = tokio::time::timeout(self.config.deadline, self.lexical.search(query, filter, k))
            .await
            .map_err(|_| EngineError::Timeout("lexical search deadline exceeded".to_string()))?
            .map_err(EngineError::from)?;
        Ok(hits
            .into_iter()
            .map(|h| RankedFile {
                file_path: h.file_path,
                repository: h.repository,
                file_type: h.file_type,
                score: h.score,
            })
            .collect())
    }

    /// File-level vector ranking: embed the query, search chunks, collapse
    /// each file to its best chunk.
    async fn vector_files(
        &self,
        query: &str,
        filter: &SearchFilter,
        k: usize,
    ) -> EngineResult<Vec<RankedFile>> {
        let work = async {
            let embedding = self.embedder.embed_one(query).await?;
            self.vector.search(&embedding, filter, k).await
        };
        let hits = tokio::time::timeout(self.config.deadline, work)
            .await
            .map_err(|_| EngineError::Timeout("vector search deadline exceeded".to_string()))?
            .map_err(EngineError::from)?;
        Ok(collapse_chunks(&hits))
    }

    async fn assemble(
        &self,
        fused: Vec<FusedFile>,
        query: &str,
        limit: usize,
        roots: &HashMap<String, PathBuf>,
    ) -> Vec<QueryResult> {
        let mut results = Vec::with_capacity(fused.len().min(limit));
        for file in fused.into_iter().take(limit) {
            let path = Path::new(&file.file_path);
            let snippet = snippet_for_file(path, query, self.config.snippet_chars).await;
            let relative_path = roots
                .get(&file.repository)
                .and_then(|root| path.strip_prefix(root).ok())
                .map_or_else(|| file.file_path.clone(), |p| p.to_string_lossy().to_string());
            results.push(QueryResult {
                file_path: file.file_path,
                repository: file.repository,
                relative_path,
                file_type: file.file_type,
                snippet,
                score: file.score,
                lexical_score: file.lexical_score,
                vector_score: file.vector_score,
            });
        }
        results
    }
}

fn validate(req: &SearchRequest) -> EngineResult<()> {
    if req.query.trim().is_empty() {
        return Err(EngineError::InvalidArgument(
            "query must not be empty".to_string(),
        ));
    }
    if req.limit == 0 || req.limit > MAX_LIMIT {
        return Err(EngineError::InvalidArgument(format!(
            "limit must be between 1 and {MAX_LIMIT}, got {}",
            req.limit
        )));
    }
    Ok(())
}

fn response(
    req: &SearchRequest,
    mode: SearchMode,
    results: Vec<QueryResult>,
    degraded: Option<Degraded>,
) -> SearchResponse {
    SearchResponse {
        total_results: results.len(),
        results,
        search_type: mode,
        query: req.query.clone(),
        degraded,
    }
}
