//! End-to-end scenarios over the assembled engine: first-time indexing,
//! incremental updates, hybrid search with filters, watcher debouncing,
//! cancellation, and backend degradation. The deterministic hashing
//! embedding provider stands in for the ONNX model.

use async_trait::async_trait;
use quarry_engine::{Engine, RepositoryOverview};
use quarry_lexical_index::{LexicalBackend, TantivyBackend};
use quarry_metadata_store::{MetadataStore, RecordKind};
use quarry_protocol::{
    EngineError, IndexJob, IndexKind, Priority, RepositoryConfig, SearchFilter, SearchRequest,
};
use quarry_registry::{GlobalConfig, RepoRegistry};
use quarry_vector_store::{
    ChunkHit, EmbeddedChunk, EmbeddingProvider, HashingEmbeddingProvider, LocalVectorStore,
    VectorBackend, VectorError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

struct TestBed {
    engine: Engine,
    lexical: Arc<TantivyBackend>,
    vector: Arc<LocalVectorStore>,
    metadata: Arc<MetadataStore>,
    root: PathBuf,
    _dir: tempfile::TempDir,
}

fn testbed_with(
    config: GlobalConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_override: Option<Arc<dyn VectorBackend>>,
) -> TestBed {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dir.path().join("demo");
    std::fs::create_dir_all(&root).unwrap();

    let registry = Arc::new(RepoRegistry::in_memory(config));
    registry.add(RepositoryConfig::new("demo", &root)).unwrap();

    let lexical = Arc::new(TantivyBackend::open_in_ram().unwrap());
    let vector = Arc::new(LocalVectorStore::in_memory());
    let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());

    let vector_backend: Arc<dyn VectorBackend> = match vector_override {
        Some(backend) => backend,
        None => vector.clone(),
    };
    let engine = Engine::assemble(
        registry,
        metadata.clone(),
        lexical.clone(),
        vector_backend,
        embedder,
    );

    TestBed {
        engine,
        lexical,
        vector,
        metadata,
        root,
        _dir: dir,
    }
}

fn testbed() -> TestBed {
    testbed_with(
        GlobalConfig::default(),
        Arc::new(HashingEmbeddingProvider),
        None,
    )
}

fn write(root: &Path, name: &str, content: &str) -> PathBuf {
    let path = root.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

async fn run_job(bed: &TestBed, job: &IndexJob) {
    bed.engine.reindex(job).unwrap().wait().await.unwrap();
}

fn demo_job(mode_full: bool) -> IndexJob {
    if mode_full {
        IndexJob::full_rebuild(vec!["demo".to_string()])
    } else {
        IndexJob::incremental(vec!["demo".to_string()])
    }
}

// First-time indexing populates both backends and the metadata store.
#[tokio::test]
async fn first_time_indexing() {
    let bed = testbed();
    let a = write(&bed.root, "a.md", "hello world");
    let b = write(&bed.root, "b.py", "def greet(): return 'hi'");

    run_job(&bed, &demo_job(true)).await;

    for path in [&a, &b] {
        let record = bed
            .metadata
            .get(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.index_kind, RecordKind::Both);
        assert!(record.last_indexed_ts >= record.last_modified_ts);
    }

    for kind in IndexKind::ALL {
        let stat = bed.metadata.get_stat("demo", kind).await.unwrap().unwrap();
        assert_eq!(stat.total_files_indexed, 2);
    }

    assert_eq!(bed.lexical.doc_count().await.unwrap(), 2);
    // Both files fit one 500-char window.
    assert_eq!(bed.vector.chunk_count().await.unwrap(), 2);
    assert_eq!(
        bed.vector
            .chunk_ids_for_file(&a.to_string_lossy())
            .await
            .unwrap(),
        vec![format!("{}:0", a.display())]
    );
}

// An incremental run after one edit touches exactly that file.
#[tokio::test]
async fn incremental_after_one_edit() {
    let bed = testbed();
    let a = write(&bed.root, "a.md", "hello world");
    let b = write(&bed.root, "b.py", "def greet(): return 'hi'");

    run_job(&bed, &demo_job(true)).await;
    let b_before = bed
        .metadata
        .get(&b.to_string_lossy())
        .await
        .unwrap()
        .unwrap();

    // Append and push the mtime forward so the edit is visible even with
    // second-granularity timestamps.
    let mut content = std::fs::read_to_string(&a).unwrap();
    content.push_str("goodbye");
    std::fs::write(&a, &content).unwrap();
    let file = std::fs::File::options().append(true).open(&a).unwrap();
    file.set_modified(std::time::SystemTime::now() + Duration::from_secs(5))
        .unwrap();
    drop(file);

    let summary = bed
        .engine
        .reindex(&demo_job(false))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary[&IndexKind::Lexical].files_indexed, 1);
    assert_eq!(summary[&IndexKind::Vector].files_indexed, 1);

    let b_after = bed
        .metadata
        .get(&b.to_string_lossy())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b_after.last_indexed_ts, b_before.last_indexed_ts);

    // The lexical document was replaced, not duplicated.
    assert_eq!(bed.lexical.doc_count().await.unwrap(), 2);
    let hits = bed
        .lexical
        .search("goodbye", &SearchFilter::default(), 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].file_path.ends_with("a.md"));
}

// Hybrid search with a repository filter ranks the lexical match
// first.
#[tokio::test]
async fn hybrid_search_with_filter() {
    let bed = testbed();
    write(&bed.root, "a.md", "hello world");
    write(&bed.root, "b.py", "def greet(): return 'hi'");
    run_job(&bed, &demo_job(true)).await;

    let mut req = SearchRequest::new("greet");
    req.limit = 5;
    req.repositories = vec!["demo".to_string()];
    let resp = bed.engine.search_hybrid(&req).await.unwrap();

    assert_eq!(resp.search_type.as_str(), "hybrid");
    assert!(!resp.results.is_empty());
    assert!(resp.results[0].file_path.ends_with("b.py"));
    assert_eq!(resp.results[0].repository, "demo");
    assert_eq!(resp.results[0].relative_path, "b.py");
    assert_eq!(resp.results[0].file_type, "py");
    assert!(resp.results[0].snippet.contains("greet"));
    assert!(resp.degraded.is_none());

    // The search surface keeps the process-wide counters.
    assert_eq!(
        bed.metadata
            .get_state("total_searches")
            .await
            .unwrap()
            .as_deref(),
        Some("1")
    );
    assert!(bed
        .metadata
        .get_state("total_search_time_ms")
        .await
        .unwrap()
        .is_some());
}

// Unknown repository in the filter is a caller error.
#[tokio::test]
async fn unknown_repository_filter_is_invalid() {
    let bed = testbed();
    let mut req = SearchRequest::new("anything");
    req.repositories = vec!["nope".to_string()];
    let err = bed.engine.search_hybrid(&req).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
}

// Folder filter restricts hits to a repository-relative prefix.
#[tokio::test]
async fn folder_filter_restricts_results() {
    let bed = testbed();
    std::fs::create_dir_all(bed.root.join("docs")).unwrap();
    std::fs::create_dir_all(bed.root.join("src")).unwrap();
    write(&bed.root, "docs/guide.md", "install quarry quickly");
    write(&bed.root, "src/install.rs", "fn install_quarry() {}");
    run_job(&bed, &demo_job(true)).await;

    let mut req = SearchRequest::new("install quarry");
    req.folder_filter = Some("docs".to_string());
    let resp = bed.engine.search_hybrid(&req).await.unwrap();
    assert!(!resp.results.is_empty());
    assert!(resp
        .results
        .iter()
        .all(|r| r.relative_path.starts_with("docs/")));
}

// Locked repositories are skipped by writes but stay searchable.
#[tokio::test]
async fn locked_repository_stays_searchable() {
    let bed = testbed();
    write(&bed.root, "a.md", "searchable content here");
    run_job(&bed, &demo_job(true)).await;

    bed.engine
        .update_repository(
            "demo",
            &quarry_protocol::RepositoryUpdate {
                excluded: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Ordinary reindex skips the locked repository.
    write(&bed.root, "late.md", "added after locking");
    run_job(&bed, &demo_job(false)).await;
    assert_eq!(bed.lexical.doc_count().await.unwrap(), 1);

    // Search still reaches the documents indexed before the lock.
    let resp = bed
        .engine
        .search_hybrid(&SearchRequest::new("searchable content"))
        .await
        .unwrap();
    assert!(!resp.results.is_empty());
}

// A burst of events on one file collapses into a single incremental
// run that reflects the final on-disk state.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watcher_debounces_event_burst() {
    let mut config = GlobalConfig::default();
    config.debounce_seconds = 1;
    let bed = testbed_with(config, Arc::new(HashingEmbeddingProvider), None);

    run_job(&bed, &demo_job(true)).await;
    bed.engine.start_watchers().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Burst: create, modify, modify, delete, all inside the window.
    let c = write(&bed.root, "c.md", "first");
    tokio::time::sleep(Duration::from_millis(120)).await;
    write(&bed.root, "c.md", "second");
    tokio::time::sleep(Duration::from_millis(120)).await;
    write(&bed.root, "c.md", "third");
    tokio::time::sleep(Duration::from_millis(120)).await;
    std::fs::remove_file(&c).unwrap();

    // Wait out the debounce window plus the flush itself.
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert!(bed
        .metadata
        .get(&c.to_string_lossy())
        .await
        .unwrap()
        .is_none());
    assert_eq!(bed.lexical.doc_count().await.unwrap(), 0);
    assert_eq!(bed.vector.chunk_count().await.unwrap(), 0);

    let status = bed.engine.watcher_status().await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].repository, "demo");
    assert!(status[0].last_flush_ts.is_some());
    assert_eq!(status[0].pending_count, 0);

    // A file that survives its burst does get indexed by the next flush.
    let d = write(&bed.root, "d.md", "durable content");
    tokio::time::sleep(Duration::from_secs(4)).await;
    let record = bed.metadata.get(&d.to_string_lossy()).await.unwrap();
    assert!(record.is_some());
    assert_eq!(bed.lexical.doc_count().await.unwrap(), 1);

    bed.engine.shutdown().await;
}

/// Hashing provider with an artificial per-batch delay, slow enough for a
/// stop request to land mid-run.
struct SlowEmbedder(HashingEmbeddingProvider);

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    fn name(&self) -> &str {
        "slow-hashing"
    }

    fn dimension(&self) -> usize {
        self.0.dimension()
    }

    async fn embed_batch(&self, texts: &[String]) -> quarry_vector_store::Result<Vec<Vec<f32>>> {
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.0.embed_batch(texts).await
    }
}

// Cancellation stops between files; completed work is durable and the
// next incremental run picks up exactly the remainder.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_mid_run_resumes_cleanly() {
    const FILES: u64 = 40;
    let bed = testbed_with(GlobalConfig::default(), Arc::new(SlowEmbedder(HashingEmbeddingProvider)), None);
    for i in 0..FILES {
        write(&bed.root, &format!("f{i:03}.md"), "a few words of content");
    }

    let handle = bed.engine.reindex(&demo_job(true)).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    bed.engine.stop_indexing(IndexKind::ALL);
    let summary = handle.wait().await.unwrap();

    let vector_first = summary[&IndexKind::Vector].files_indexed;
    assert!(vector_first < FILES, "stop landed too late to observe");
    let recorded = bed
        .metadata
        .count_indexed("demo", IndexKind::Vector)
        .await
        .unwrap();
    assert_eq!(recorded, vector_first);

    let summary = bed
        .engine
        .reindex(&demo_job(false))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary[&IndexKind::Vector].files_indexed, FILES - vector_first);
    assert_eq!(
        bed.metadata
            .count_indexed("demo", IndexKind::Vector)
            .await
            .unwrap(),
        FILES
    );
}

/// Vector backend whose search always fails.
struct DownVectorBackend;

#[async_trait]
impl VectorBackend for DownVectorBackend {
    async fn replace_file(
        &self,
        _file_path: &str,
        _repository: &str,
        _file_type: &str,
        _chunks: Vec<EmbeddedChunk>,
    ) -> quarry_vector_store::Result<()> {
        Ok(())
    }

    async fn delete_file(&self, _file_path: &str) -> quarry_vector_store::Result<()> {
        Ok(())
    }

    async fn clear_repository(&self, _repository: &str) -> quarry_vector_store::Result<()> {
        Ok(())
    }

    async fn search(
        &self,
        _embedding: &[f32],
        _filter: &SearchFilter,
        _limit: usize,
    ) -> quarry_vector_store::Result<Vec<ChunkHit>> {
        Err(VectorError::Embedding("vector backend is down".to_string()))
    }

    async fn chunk_count(&self) -> quarry_vector_store::Result<u64> {
        Ok(0)
    }

    async fn chunk_ids_for_file(&self, _file_path: &str) -> quarry_vector_store::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

// Hybrid search degrades to lexical when the vector backend errors.
#[tokio::test]
async fn hybrid_degrades_when_vector_is_down() {
    let bed = testbed_with(
        GlobalConfig::default(),
        Arc::new(HashingEmbeddingProvider),
        Some(Arc::new(DownVectorBackend)),
    );
    write(&bed.root, "a.md", "hello world");
    run_job(&bed, &demo_job(true)).await;

    let resp = bed
        .engine
        .search_hybrid(&SearchRequest::new("hello"))
        .await
        .unwrap();
    assert!(!resp.results.is_empty());
    let degraded = resp.degraded.unwrap();
    assert_eq!(degraded.backend, "vector");
    assert!(!degraded.reason.is_empty());
}

// Removing a repository purges both backends and the metadata store.
#[tokio::test]
async fn remove_repository_purges_everything() {
    let bed = testbed();
    let a = write(&bed.root, "a.md", "hello world");
    run_job(&bed, &demo_job(true)).await;

    bed.engine.remove_repository("demo").await.unwrap();

    assert!(bed.engine.registry().get("demo").is_none());
    assert_eq!(bed.lexical.doc_count().await.unwrap(), 0);
    assert_eq!(bed.vector.chunk_count().await.unwrap(), 0);
    assert!(bed
        .metadata
        .get(&a.to_string_lossy())
        .await
        .unwrap()
        .is_none());
    // Files on disk are untouched.
    assert!(a.exists());
}

// The repositories() listing combines registry entries, stats, and disk
// counts.
#[tokio::test]
async fn repositories_listing_includes_stats() {
    let bed = testbed();
    write(&bed.root, "a.md", "hello world");
    write(&bed.root, "b.py", "def greet(): pass");
    run_job(&bed, &demo_job(true)).await;

    let listing: Vec<RepositoryOverview> = bed.engine.repositories().await.unwrap();
    assert_eq!(listing.len(), 1);
    let overview = &listing[0];
    assert_eq!(overview.repository.name, "demo");
    assert_eq!(overview.repository.priority, Priority::Medium);
    assert_eq!(overview.files_on_disk, 2);
    assert_eq!(overview.stats.len(), 2);
    assert!(overview.stats.iter().all(|s| s.total_files_indexed == 2));
}

// indexing_status carries last_index_time after a successful run.
#[tokio::test]
async fn indexing_status_after_run() {
    let bed = testbed();
    write(&bed.root, "a.md", "hello");
    run_job(&bed, &demo_job(true)).await;

    let status = bed.engine.indexing_status().await.unwrap();
    assert!(!status.is_indexing);
    assert_eq!(status.pipelines.len(), 2);
    assert!(status.last_index_time.is_some());
}
