use quarry_chunker::{Chunker, ChunkerConfig};
use quarry_indexer::{
    FileScanner, IndexOrchestrator, IndexerContext, RepositoryWatcher, RunHandle, WatcherOptions,
    WatcherStatusEntry,
};
use quarry_lexical_index::{LexicalBackend, LexicalWriter, TantivyBackend};
use quarry_metadata_store::{
    MetadataStore, STATE_LAST_INDEX_TIME, STATE_TOTAL_SEARCHES, STATE_TOTAL_SEARCH_TIME_MS,
};
use quarry_protocol::{
    BulkAction, EngineError, EngineResult, IndexJob, IndexKind, IndexingStatus, Priority,
    RepositoryConfig, RepositoryStatSummary, RepositoryUpdate, SearchFilter, SearchMode,
    SearchRequest, SearchResponse,
};
use quarry_registry::RepoRegistry;
use quarry_search::HybridSearcher;
use quarry_vector_store::{EmbeddingProvider, LocalVectorStore, VectorBackend, VectorWriter};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where the engine keeps its state on disk.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Holds the metadata database, the lexical index directory, and the
    /// vector store file.
    pub data_dir: PathBuf,
    /// YAML repository configuration.
    pub config_path: PathBuf,
}

impl EngineOptions {
    fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("metadata.db")
    }

    fn lexical_dir(&self) -> PathBuf {
        self.data_dir.join("lexical")
    }

    fn vector_path(&self) -> PathBuf {
        self.data_dir.join("vectors.json")
    }
}

/// One row of the `repositories()` listing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RepositoryOverview {
    pub repository: RepositoryConfig,
    pub stats: Vec<RepositoryStatSummary>,
    /// Candidate files currently on disk, counted with the repository's
    /// include/exclude patterns.
    pub files_on_disk: u64,
}

/// The assembled engine. Everything inside is shared and internally
/// synchronized; the engine itself is cheap to share behind an `Arc`.
pub struct Engine {
    registry: Arc<RepoRegistry>,
    metadata: Arc<MetadataStore>,
    lexical_writer: Arc<LexicalWriter>,
    vector_writer: Arc<VectorWriter>,
    orchestrator: IndexOrchestrator,
    watcher: Arc<RepositoryWatcher>,
    searcher: HybridSearcher,
}

impl Engine {
    /// Open the engine with the default embedded backends under
    /// `options.data_dir`.
    pub async fn open(
        options: &EngineOptions,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> EngineResult<Self> {
        tokio::fs::create_dir_all(&options.data_dir)
            .await
            .map_err(|e| {
                EngineError::Fatal(format!(
                    "cannot create data dir {}: {e}",
                    options.data_dir.display()
                ))
            })?;

        let registry = Arc::new(RepoRegistry::load(&options.config_path)?);
        let metadata = Arc::new(MetadataStore::open(&options.metadata_path())?);
        let lexical: Arc<dyn LexicalBackend> =
            Arc::new(TantivyBackend::open(&options.lexical_dir()).map_err(EngineError::from)?);
        let vector: Arc<dyn VectorBackend> = Arc::new(
            LocalVectorStore::open(&options.vector_path())
                .await
                .map_err(EngineError::from)?,
        );

        Ok(Self::assemble(registry, metadata, lexical, vector, embedder))
    }

    /// Assemble the engine from explicit parts. This is the seam for
    /// swapping either backend implementation.
    #[must_use]
    pub fn assemble(
        registry: Arc<RepoRegistry>,
        metadata: Arc<MetadataStore>,
        lexical_backend: Arc<dyn LexicalBackend>,
        vector_backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let global = registry.global();
        let mut chunker_config = ChunkerConfig::new(global.chunk_size, global.chunk_overlap);
        chunker_config.max_file_bytes = global.max_file_bytes;
        let chunker = Chunker::new(chunker_config);

        let lexical_writer = Arc::new(LexicalWriter::new(Arc::clone(&lexical_backend)));
        let vector_writer = Arc::new(VectorWriter::new(
            Arc::clone(&vector_backend),
            Arc::clone(&embedder),
            chunker,
        ));

        let orchestrator = IndexOrchestrator::new(IndexerContext {
            registry: Arc::clone(&registry),
            metadata: Arc::clone(&metadata),
            lexical: Arc::clone(&lexical_writer),
            vector: Arc::clone(&vector_writer),
        });

        let watcher = Arc::new(RepositoryWatcher::new(
            orchestrator.clone(),
            Arc::clone(&registry),
            WatcherOptions {
                debounce: Duration::from_secs(global.debounce_seconds),
                ..WatcherOptions::default()
            },
        ));

        let searcher = HybridSearcher::new(lexical_backend, vector_backend, embedder);

        Self {
            registry,
            metadata,
            lexical_writer,
            vector_writer,
            orchestrator,
            watcher,
            searcher,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RepoRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn watcher(&self) -> &Arc<RepositoryWatcher> {
        &self.watcher
    }

    // ---- Search surface -------------------------------------------------

    pub async fn search_lexical(&self, req: &SearchRequest) -> EngineResult<SearchResponse> {
        self.search_with_mode(req, SearchMode::Lexical).await
    }

    pub async fn search_semantic(&self, req: &SearchRequest) -> EngineResult<SearchResponse> {
        self.search_with_mode(req, SearchMode::Semantic).await
    }

    pub async fn search_hybrid(&self, req: &SearchRequest) -> EngineResult<SearchResponse> {
        self.search_with_mode(req, SearchMode::Hybrid).await
    }

    async fn search_with_mode(
        &self,
        req: &SearchRequest,
        mode: SearchMode,
    ) -> EngineResult<SearchResponse> {
        let started = Instant::now();
        let mut req = req.clone();
        req.mode = mode;

        let (filter, roots) = self.resolve_filter(&req)?;
        let response = self.searcher.search(&req, &filter, &roots).await?;

        let elapsed_ms = started.elapsed().as_millis() as i64;
        if let Err(err) = self.metadata.bump_state_counter(STATE_TOTAL_SEARCHES, 1).await {
            log::warn!("failed to bump search counter: {err}");
        }
        if let Err(err) = self
            .metadata
            .bump_state_counter(STATE_TOTAL_SEARCH_TIME_MS, elapsed_ms)
            .await
        {
            log::warn!("failed to bump search time counter: {err}");
        }
        Ok(response)
    }

    /// Translate the request's whitelists into a backend filter. Unknown
    /// repository names are caller errors; locked and disabled repositories
    /// remain searchable, so no flag is consulted here.
    fn resolve_filter(
        &self,
        req: &SearchRequest,
    ) -> EngineResult<(SearchFilter, HashMap<String, PathBuf>)> {
        let registered = self.registry.list();
        let roots: HashMap<String, PathBuf> = registered
            .iter()
            .map(|r| (r.name.clone(), r.path.clone()))
            .collect();

        for name in &req.repositories {
            if !roots.contains_key(name) {
                return Err(EngineError::InvalidArgument(format!(
                    "unknown repository in filter: {name:?}"
                )));
            }
        }

        let path_prefixes = match &req.folder_filter {
            None => Vec::new(),
            Some(folder) => {
                let candidates: Vec<&RepositoryConfig> = if req.repositories.is_empty() {
                    registered.iter().collect()
                } else {
                    registered
                        .iter()
                        .filter(|r| req.repositories.contains(&r.name))
                        .collect()
                };
                candidates
                    .iter()
                    .map(|r| r.path.join(folder).to_string_lossy().into_owned())
                    .collect()
            }
        };

        let filter = SearchFilter {
            repositories: req.repositories.clone(),
            file_types: req.file_types.clone(),
            path_prefixes,
        };
        Ok((filter, roots))
    }

    // ---- Indexing surface -----------------------------------------------

    /// Start an indexing run; returns immediately.
    pub fn reindex(&self, job: &IndexJob) -> EngineResult<RunHandle> {
        self.orchestrator.reindex(job)
    }

    pub fn stop_indexing(&self, kinds: impl IntoIterator<Item = IndexKind>) {
        self.orchestrator.request_stop(kinds);
    }

    pub async fn indexing_status(&self) -> EngineResult<IndexingStatus> {
        Ok(IndexingStatus {
            pipelines: self.orchestrator.status(),
            is_indexing: self.orchestrator.is_indexing(),
            last_index_time: self.metadata.get_state(STATE_LAST_INDEX_TIME).await?,
        })
    }

    pub async fn repositories(&self) -> EngineResult<Vec<RepositoryOverview>> {
        let global = self.registry.global();
        let mut overviews = Vec::new();
        for repo in self.registry.list() {
            let stats = self
                .metadata
                .stats_for(&repo.name)
                .await?
                .into_iter()
                .map(|s| RepositoryStatSummary {
                    index_kind: s.index_kind,
                    total_files_indexed: s.total_files_indexed,
                    initial_run_seconds: s.initial_run_seconds,
                    initial_run_ts: s.initial_run_ts,
                    last_run_seconds: s.last_run_seconds,
                    last_run_ts: s.last_run_ts,
                    total_size_bytes: s.total_size_bytes,
                })
                .collect();

            let include = global.include_patterns_for(&repo);
            let exclude = global.exclude_patterns_for(&repo);
            let root = repo.path.clone();
            let files_on_disk = tokio::task::spawn_blocking(move || {
                FileScanner::new(&root, &include, &exclude)
                    .map(|s| s.scan().count() as u64)
                    .unwrap_or(0)
            })
            .await
            .unwrap_or(0);

            overviews.push(RepositoryOverview {
                repository: repo,
                stats,
                files_on_disk,
            });
        }
        Ok(overviews)
    }

    // ---- Registry surface -----------------------------------------------

    pub async fn add_repository(
        &self,
        name: &str,
        path: &Path,
        priority: Priority,
        enabled: bool,
        auto_reindex: bool,
    ) -> EngineResult<RepositoryConfig> {
        let mut repo = RepositoryConfig::new(name, path);
        repo.priority = priority;
        repo.enabled = enabled;
        repo.auto_reindex = auto_reindex;
        self.registry.add(repo.clone())?;
        self.reconcile_watchers().await;
        Ok(repo)
    }

    /// Drop a repository from the registry and purge its documents from
    /// both backends and the metadata store. Files on disk are untouched.
    pub async fn remove_repository(&self, name: &str) -> EngineResult<()> {
        let removed = self.registry.remove(name)?;
        self.watcher.stop(name).await;

        self.lexical_writer.clear(name).await?;
        self.vector_writer.clear(name).await?;
        self.vector_writer.persist().await?;
        let purged = self.metadata.delete_all(name).await?;
        log::info!(
            "removed repository {name} ({} metadata records, path {} untouched)",
            purged,
            removed.path.display()
        );
        Ok(())
    }

    pub async fn update_repository(
        &self,
        name: &str,
        update: &RepositoryUpdate,
    ) -> EngineResult<RepositoryConfig> {
        let updated = self.registry.update(name, update)?;
        self.reconcile_watchers().await;
        Ok(updated)
    }

    pub async fn bulk_update(&self, action: BulkAction) -> EngineResult<usize> {
        let touched = self.registry.bulk_update(action)?;
        self.reconcile_watchers().await;
        Ok(touched)
    }

    // ---- Watcher control ------------------------------------------------

    /// Start watchers for every `enabled && auto_reindex` repository and
    /// keep them aligned with future registry changes.
    pub async fn start_watchers(&self) -> EngineResult<()> {
        self.watcher.reconcile().await.map_err(EngineError::from)?;
        self.watcher.spawn_registry_listener();
        Ok(())
    }

    pub async fn watcher_status(&self) -> Vec<WatcherStatusEntry> {
        self.watcher.status().await
    }

    pub async fn shutdown(&self) {
        self.watcher.stop_all().await;
    }

    async fn reconcile_watchers(&self) {
        if let Err(err) = self.watcher.reconcile().await {
            log::warn!("watcher reconcile failed: {err}");
        }
    }
}
