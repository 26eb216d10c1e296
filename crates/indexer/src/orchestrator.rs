use crate::progress::PipelineProgressState;
use crate::scanner::FileScanner;
use quarry_lexical_index::LexicalWriter;
use quarry_metadata_store::{
    FileUpsert, MetadataStore, RunRecord, STATE_LAST_INDEX_TIME,
};
use quarry_protocol::{
    EngineError, EngineResult, IndexJob, IndexKind, IndexMode, PipelineProgress, PipelineState,
    RunStats,
};
use quarry_registry::RepoRegistry;
use quarry_vector_store::VectorWriter;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Handles the orchestrator drives. All shared, all cheap to clone.
pub struct IndexerContext {
    pub registry: Arc<RepoRegistry>,
    pub metadata: Arc<MetadataStore>,
    pub lexical: Arc<LexicalWriter>,
    pub vector: Arc<VectorWriter>,
}

/// One repository's slice of a run, resolved from the registry at submit
/// time.
#[derive(Debug, Clone)]
struct RepoPlan {
    name: String,
    root: PathBuf,
    include_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
}

struct Inner {
    ctx: IndexerContext,
    lexical_progress: Arc<PipelineProgressState>,
    vector_progress: Arc<PipelineProgressState>,
    run_lock: Mutex<()>,
    next_run_id: AtomicU64,
}

impl Inner {
    fn progress(&self, kind: IndexKind) -> &Arc<PipelineProgressState> {
        match kind {
            IndexKind::Lexical => &self.lexical_progress,
            IndexKind::Vector => &self.vector_progress,
        }
    }
}

/// Returned by [`IndexOrchestrator::reindex`]; the run continues in the
/// background, `wait` joins it.
#[derive(Debug)]
pub struct RunHandle {
    run_id: u64,
    handle: JoinHandle<BTreeMap<IndexKind, RunStats>>,
}

impl RunHandle {
    #[must_use]
    pub const fn run_id(&self) -> u64 {
        self.run_id
    }

    pub async fn wait(self) -> EngineResult<BTreeMap<IndexKind, RunStats>> {
        self.handle
            .await
            .map_err(|e| EngineError::Fatal(format!("indexing run task failed: {e}")))
    }
}

/// Drives indexing runs: one concurrent pipeline per index kind,
/// repositories in priority order within each pipeline, files sequential
/// within a repository. Runs are serialized against each other; a second
/// `reindex` queues behind the first, which is also how watcher flushes
/// wait for an overlapping job.
#[derive(Clone)]
pub struct IndexOrchestrator {
    inner: Arc<Inner>,
}

impl IndexOrchestrator {
    #[must_use]
    pub fn new(ctx: IndexerContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                lexical_progress: Arc::new(PipelineProgressState::new(IndexKind::Lexical)),
                vector_progress: Arc::new(PipelineProgressState::new(IndexKind::Vector)),
                run_lock: Mutex::new(()),
                next_run_id: AtomicU64::new(1),
            }),
        }
    }

    /// Start a run. Validation happens synchronously; the work itself is
    /// spawned and the handle returned immediately.
    pub fn reindex(&self, job: &IndexJob) -> EngineResult<RunHandle> {
        if job.kinds.is_empty() {
            return Err(EngineError::InvalidArgument(
                "job must select at least one index kind".to_string(),
            ));
        }

        let registered = self.inner.ctx.registry.list();
        let selected: Vec<_> = if job.repositories.is_empty() {
            registered
        } else {
            let mut selected = Vec::with_capacity(job.repositories.len());
            for name in &job.repositories {
                let repo = registered
                    .iter()
                    .find(|r| &r.name == name)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(format!("repository {name:?}")))?;
                selected.push(repo);
            }
            selected
        };

        let global = self.inner.ctx.registry.global();
        let mut ranked: Vec<(u8, RepoPlan)> = selected
            .iter()
            .filter(|r| r.enabled && (!r.excluded || job.override_excluded))
            .map(|r| {
                (
                    r.priority.rank(),
                    RepoPlan {
                        name: r.name.clone(),
                        root: r.path.clone(),
                        include_patterns: global.include_patterns_for(r),
                        exclude_patterns: global.exclude_patterns_for(r),
                    },
                )
            })
            .collect();
        // Priority order, stable by name within a tier.
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
        let plans: Vec<RepoPlan> = ranked.into_iter().map(|(_, p)| p).collect();

        let run_id = self.inner.next_run_id.fetch_add(1, Ordering::Relaxed);
        let kinds: Vec<IndexKind> = job.kinds.iter().copied().collect();
        let mode = job.mode;
        let inner = Arc::clone(&self.inner);

        log::info!(
            "run {run_id}: mode={mode:?} kinds={kinds:?} repositories={:?}",
            plans.iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
        );

        let handle = tokio::spawn(async move {
            let _guard = inner.run_lock.lock().await;
            for kind in &kinds {
                inner.progress(*kind).clear_stop();
            }

            let mut pipelines = Vec::with_capacity(kinds.len());
            for kind in kinds {
                let inner = Arc::clone(&inner);
                let plans = plans.clone();
                pipelines.push((
                    kind,
                    tokio::spawn(async move { run_pipeline(&inner, kind, &plans, mode).await }),
                ));
            }

            let mut summary = BTreeMap::new();
            for (kind, pipeline) in pipelines {
                match pipeline.await {
                    Ok(stats) => {
                        summary.insert(kind, stats);
                    }
                    Err(err) => {
                        log::error!("{kind} pipeline task failed: {err}");
                        let mut stats = RunStats::default();
                        stats.add_error(format!("{kind} pipeline task failed: {err}"));
                        summary.insert(kind, stats);
                    }
                }
            }

            let now_iso = chrono::Utc::now().to_rfc3339();
            if let Err(err) = inner
                .ctx
                .metadata
                .put_state(STATE_LAST_INDEX_TIME, &now_iso)
                .await
            {
                log::warn!("failed to record last_index_time: {err}");
            }
            summary
        });

        Ok(RunHandle { run_id, handle })
    }

    /// Request cooperative cancellation; workers observe the flag between
    /// files.
    pub fn request_stop(&self, kinds: impl IntoIterator<Item = IndexKind>) {
        for kind in kinds {
            log::info!("stop requested for {kind} pipeline");
            self.inner.progress(kind).request_stop();
        }
    }

    #[must_use]
    pub fn status(&self) -> Vec<PipelineProgress> {
        IndexKind::ALL
            .iter()
            .map(|kind| self.inner.progress(*kind).snapshot())
            .collect()
    }

    #[must_use]
    pub fn is_indexing(&self) -> bool {
        IndexKind::ALL
            .iter()
            .any(|kind| self.inner.progress(*kind).is_running())
    }
}

enum RepoOutcome {
    Completed,
    Stopped,
}

async fn run_pipeline(
    inner: &Inner,
    kind: IndexKind,
    plans: &[RepoPlan],
    mode: IndexMode,
) -> RunStats {
    let progress = Arc::clone(inner.progress(kind));
    let started = Instant::now();
    let mut stats = RunStats::default();

    progress.begin_run(mode, plans.len() as u64);

    for plan in plans {
        if progress.stop_requested() {
            progress.set_state(PipelineState::Stopping);
            log::info!("{kind} pipeline stopping before {}", plan.name);
            break;
        }

        progress.set_current_repository(Some(plan.name.clone()));
        match process_repository(inner, kind, plan, mode, &progress, &mut stats).await {
            Ok(RepoOutcome::Completed) => progress.inc_repositories_completed(),
            Ok(RepoOutcome::Stopped) => {
                progress.set_state(PipelineState::Stopping);
                break;
            }
            Err(err) => {
                // One broken repository must not poison the rest of the run.
                progress.set_state(PipelineState::Failed);
                log::error!("{kind} pipeline failed for {}: {err}", plan.name);
                stats.add_error(format!("{}: {err}", plan.name));
            }
        }
    }

    if matches!(kind, IndexKind::Vector) {
        if let Err(err) = inner.ctx.vector.persist().await {
            log::warn!("vector store persist failed: {err}");
            stats.add_error(format!("vector store persist: {err}"));
        }
    }

    stats.time_ms = started.elapsed().as_millis() as u64;
    progress.finish_run();
    log::info!(
        "{kind} pipeline finished: {} indexed, {} deleted, {} errors in {}ms",
        stats.files_indexed,
        stats.files_deleted,
        stats.errors.len(),
        stats.time_ms
    );
    stats
}

async fn process_repository(
    inner: &Inner,
    kind: IndexKind,
    plan: &RepoPlan,
    mode: IndexMode,
    progress: &PipelineProgressState,
    stats: &mut RunStats,
) -> crate::Result<RepoOutcome> {
    let repo_started = Instant::now();
    let metadata = &inner.ctx.metadata;
    let was_indexed_before = metadata.get_stat(&plan.name, kind).await?.is_some();

    progress.set_state(PipelineState::Scanning);
    let scanner = FileScanner::new(&plan.root, &plan.include_patterns, &plan.exclude_patterns)?;
    let files: Vec<PathBuf> = scanner.scan().collect();
    progress.add_files_total(files.len() as u64);
    log::debug!("{kind} {}: {} candidate files", plan.name, files.len());

    if matches!(mode, IndexMode::FullRebuild) {
        match kind {
            IndexKind::Lexical => inner.ctx.lexical.clear(&plan.name).await?,
            IndexKind::Vector => inner.ctx.vector.clear(&plan.name).await?,
        }
        metadata.remove_kind_all(&plan.name, kind).await?;
    }

    progress.set_state(PipelineState::Indexing);
    for file in &files {
        if progress.stop_requested() {
            return Ok(RepoOutcome::Stopped);
        }
        index_file(inner, kind, plan, file, mode, stats).await;
        progress.inc_files_processed();
    }

    // Files still in the metadata store for this kind but gone from disk
    // are removed from the backend and the store.
    let mut after: Option<String> = None;
    'pages: loop {
        let batch = metadata
            .list_indexed_after(&plan.name, kind, after.as_deref(), 500)
            .await?;
        if batch.is_empty() {
            break;
        }
        after = batch.last().map(|r| r.file_path.clone());
        for record in batch {
            if progress.stop_requested() {
                break 'pages;
            }
            if file_exists(Path::new(&record.file_path)).await {
                continue;
            }
            let result = match kind {
                IndexKind::Lexical => inner.ctx.lexical.delete(&record.file_path).await.map_err(
                    crate::IndexerError::from,
                ),
                IndexKind::Vector => inner
                    .ctx
                    .vector
                    .delete(&record.file_path)
                    .await
                    .map_err(crate::IndexerError::from),
            };
            match result {
                Ok(()) => {
                    metadata.remove_kind(&record.file_path, kind).await?;
                    stats.files_deleted += 1;
                    log::debug!("{kind} removed vanished file {}", record.file_path);
                }
                Err(err) => {
                    stats.add_error(format!("delete {}: {err}", record.file_path));
                }
            }
        }
    }

    progress.set_state(PipelineState::Finalizing);
    let now = unix_now();
    let files_indexed = metadata.count_indexed(&plan.name, kind).await?;
    let total_size_bytes = metadata.total_size(&plan.name, kind).await?;
    metadata
        .record_run(RunRecord {
            repository: plan.name.clone(),
            kind,
            files_indexed,
            duration_seconds: repo_started.elapsed().as_secs_f64(),
            total_size_bytes,
            is_initial: !was_indexed_before,
            now,
        })
        .await?;

    Ok(RepoOutcome::Completed)
}

/// Index one file for one kind. Per-file failures are recorded and skipped;
/// the metadata record is only written after a successful backend upsert, so
/// the next run retries anything that failed here.
async fn index_file(
    inner: &Inner,
    kind: IndexKind,
    plan: &RepoPlan,
    file: &Path,
    mode: IndexMode,
    stats: &mut RunStats,
) {
    let file_path = file.to_string_lossy().to_string();

    let (mtime, size) = match tokio::fs::metadata(file).await {
        Ok(meta) => (mtime_seconds(&meta), meta.len()),
        Err(err) => {
            // Vanished between scan and read; the next scan settles it.
            log::debug!("{kind} skipping {file_path}: {err}");
            return;
        }
    };

    if matches!(mode, IndexMode::Incremental) {
        match inner.ctx.metadata.is_stale(&file_path, mtime, kind).await {
            Ok(false) => return,
            Ok(true) => {}
            Err(err) => {
                stats.add_error(format!("{file_path}: {err}"));
                return;
            }
        }
    }

    let bytes = match tokio::fs::read(file).await {
        Ok(bytes) => bytes,
        Err(err) => {
            log::debug!("{kind} skipping {file_path}: {err}");
            return;
        }
    };
    let max_bytes = inner.ctx.registry.global().max_file_bytes;
    let content = quarry_chunker::decode_capped(&bytes, max_bytes);
    let file_type = file_type_of(file);

    let written = match kind {
        IndexKind::Lexical => inner
            .ctx
            .lexical
            .upsert(&file_path, &plan.name, &content, &file_type)
            .await
            .map(|()| 0)
            .map_err(crate::IndexerError::from),
        IndexKind::Vector => inner
            .ctx
            .vector
            .upsert(&file_path, &plan.name, &content, &file_type)
            .await
            .map_err(crate::IndexerError::from),
    };

    match written {
        Ok(chunks) => {
            let upsert = FileUpsert {
                file_path: file_path.clone(),
                repository: plan.name.clone(),
                file_mtime: mtime,
                file_size: size,
                kind,
                now: unix_now(),
            };
            if let Err(err) = inner.ctx.metadata.upsert(upsert).await {
                stats.add_error(format!("{file_path}: {err}"));
                return;
            }
            stats.files_indexed += 1;
            stats.chunks += chunks as u64;
        }
        Err(err) => {
            log::warn!("{kind} upsert failed for {file_path}: {err}");
            stats.add_error(format!("{file_path}: {err}"));
        }
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

fn mtime_seconds(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64)
}

fn file_type_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_chunker::Chunker;
    use quarry_lexical_index::{LexicalBackend, TantivyBackend};
    use quarry_metadata_store::RecordKind;
    use quarry_protocol::{RepositoryConfig, SearchFilter};
    use quarry_registry::GlobalConfig;
    use quarry_vector_store::{
        HashingEmbeddingProvider, LocalVectorStore, VectorBackend,
    };

    struct Fixture {
        orchestrator: IndexOrchestrator,
        lexical: Arc<TantivyBackend>,
        vector: Arc<LocalVectorStore>,
        metadata: Arc<MetadataStore>,
        registry: Arc<RepoRegistry>,
        _dir: tempfile::TempDir,
        root: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();

        let registry = Arc::new(RepoRegistry::in_memory(GlobalConfig::default()));
        registry
            .add(RepositoryConfig::new("demo", &root))
            .unwrap();

        let lexical = Arc::new(TantivyBackend::open_in_ram().unwrap());
        let vector = Arc::new(LocalVectorStore::in_memory());
        let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
        let orchestrator = IndexOrchestrator::new(IndexerContext {
            registry: registry.clone(),
            metadata: metadata.clone(),
            lexical: Arc::new(quarry_lexical_index::LexicalWriter::new(lexical.clone())),
            vector: Arc::new(VectorWriter::new(
                vector.clone(),
                Arc::new(HashingEmbeddingProvider),
                Chunker::default(),
            )),
        });

        Fixture {
            orchestrator,
            lexical,
            vector,
            metadata,
            registry,
            _dir: dir,
            root,
        }
    }

    fn write(root: &Path, name: &str, content: &str) -> PathBuf {
        let path = root.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    async fn run(fx: &Fixture, job: &IndexJob) -> BTreeMap<IndexKind, RunStats> {
        fx.orchestrator.reindex(job).unwrap().wait().await.unwrap()
    }

    #[tokio::test]
    async fn empty_kinds_is_invalid() {
        let fx = fixture();
        let job = IndexJob {
            kinds: std::collections::BTreeSet::new(),
            ..IndexJob::incremental(vec![])
        };
        let err = fx.orchestrator.reindex(&job).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn unknown_repository_is_not_found() {
        let fx = fixture();
        let job = IndexJob::incremental(vec!["missing".to_string()]);
        let err = fx.orchestrator.reindex(&job).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn full_rebuild_indexes_both_kinds() {
        let fx = fixture();
        write(&fx.root, "a.md", "hello world");
        write(&fx.root, "b.py", "def greet(): return 'hi'");

        let summary = run(&fx, &IndexJob::full_rebuild(vec!["demo".to_string()])).await;
        assert_eq!(summary[&IndexKind::Lexical].files_indexed, 2);
        assert_eq!(summary[&IndexKind::Vector].files_indexed, 2);

        assert_eq!(fx.lexical.doc_count().await.unwrap(), 2);
        assert_eq!(fx.vector.chunk_count().await.unwrap(), 2);

        let a = fx
            .metadata
            .get(&fx.root.join("a.md").to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.index_kind, RecordKind::Both);

        let stat = fx
            .metadata
            .get_stat("demo", IndexKind::Lexical)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stat.total_files_indexed, 2);
        assert!(stat.initial_run_ts.is_some());

        assert!(fx
            .metadata
            .get_state(STATE_LAST_INDEX_TIME)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn incremental_skips_unchanged_files() {
        let fx = fixture();
        let a = write(&fx.root, "a.md", "hello world");
        write(&fx.root, "b.py", "def greet(): return 'hi'");

        run(&fx, &IndexJob::full_rebuild(vec!["demo".to_string()])).await;
        let before = fx
            .metadata
            .get(&a.to_string_lossy())
            .await
            .unwrap()
            .unwrap();

        let summary = run(&fx, &IndexJob::incremental(vec!["demo".to_string()])).await;
        assert_eq!(summary[&IndexKind::Lexical].files_indexed, 0);
        assert_eq!(summary[&IndexKind::Vector].files_indexed, 0);

        let after = fx
            .metadata
            .get(&a.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.last_indexed_ts, before.last_indexed_ts);
    }

    #[tokio::test]
    async fn touched_file_is_reindexed_once() {
        let fx = fixture();
        let a = write(&fx.root, "a.md", "hello world");
        run(&fx, &IndexJob::full_rebuild(vec!["demo".to_string()])).await;

        // Push mtime past the recorded index time.
        let future = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        let file = std::fs::File::options().append(true).open(&a).unwrap();
        file.set_modified(future).unwrap();
        drop(file);

        let summary = run(&fx, &IndexJob::incremental(vec!["demo".to_string()])).await;
        assert_eq!(summary[&IndexKind::Lexical].files_indexed, 1);
        assert_eq!(summary[&IndexKind::Vector].files_indexed, 1);
    }

    #[tokio::test]
    async fn vanished_files_are_removed_everywhere() {
        let fx = fixture();
        let a = write(&fx.root, "a.md", "hello world");
        write(&fx.root, "b.py", "def greet(): return 'hi'");
        run(&fx, &IndexJob::full_rebuild(vec!["demo".to_string()])).await;

        std::fs::remove_file(&a).unwrap();
        let summary = run(&fx, &IndexJob::incremental(vec!["demo".to_string()])).await;
        assert_eq!(summary[&IndexKind::Lexical].files_deleted, 1);
        assert_eq!(summary[&IndexKind::Vector].files_deleted, 1);

        assert_eq!(fx.lexical.doc_count().await.unwrap(), 1);
        assert_eq!(fx.vector.chunk_count().await.unwrap(), 1);
        assert!(fx
            .metadata
            .get(&a.to_string_lossy())
            .await
            .unwrap()
            .is_none());

        let hits = fx
            .lexical
            .search("hello", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn kind_restricted_run_leaves_other_kind_alone() {
        let fx = fixture();
        write(&fx.root, "a.md", "hello world");
        run(&fx, &IndexJob::full_rebuild(vec!["demo".to_string()])).await;
        let chunks_before = fx.vector.chunk_count().await.unwrap();

        let mut job = IndexJob::full_rebuild(vec!["demo".to_string()]);
        job.kinds = [IndexKind::Lexical].into_iter().collect();
        run(&fx, &job).await;

        assert_eq!(fx.vector.chunk_count().await.unwrap(), chunks_before);
        let record = fx
            .metadata
            .get(&fx.root.join("a.md").to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.index_kind, RecordKind::Both);
    }

    #[tokio::test]
    async fn excluded_repository_is_skipped_unless_overridden() {
        let fx = fixture();
        write(&fx.root, "a.md", "hello world");
        fx.registry
            .update(
                "demo",
                &quarry_protocol::RepositoryUpdate {
                    excluded: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        run(&fx, &IndexJob::full_rebuild(vec!["demo".to_string()])).await;
        assert_eq!(fx.lexical.doc_count().await.unwrap(), 0);

        let mut job = IndexJob::full_rebuild(vec!["demo".to_string()]);
        job.override_excluded = true;
        run(&fx, &job).await;
        assert_eq!(fx.lexical.doc_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn disabled_repository_is_skipped() {
        let fx = fixture();
        write(&fx.root, "a.md", "hello world");
        fx.registry
            .update(
                "demo",
                &quarry_protocol::RepositoryUpdate {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        let mut job = IndexJob::full_rebuild(vec!["demo".to_string()]);
        job.override_excluded = true;
        run(&fx, &job).await;
        assert_eq!(fx.lexical.doc_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stop_requested_before_run_stops_early() {
        let fx = fixture();
        for i in 0..20 {
            write(&fx.root, &format!("f{i:02}.md"), "some words here");
        }

        // Request stop, then clear on submit: a fresh run proceeds.
        fx.orchestrator.request_stop(IndexKind::ALL);
        let summary = run(&fx, &IndexJob::full_rebuild(vec!["demo".to_string()])).await;
        assert_eq!(summary[&IndexKind::Lexical].files_indexed, 20);
    }
}
