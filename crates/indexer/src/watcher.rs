use crate::error::{IndexerError, Result};
use crate::orchestrator::IndexOrchestrator;
use crate::scanner::PathMatcher;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use quarry_protocol::{IndexJob, IndexKind, IndexMode};
use quarry_registry::RepoRegistry;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time;

const STATE_WATCHING: u8 = 0;
const STATE_FLUSHING: u8 = 1;

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Quiet interval after the last event before a flush.
    pub debounce: Duration,
    /// Kinds the flushed incremental job covers.
    pub kinds: BTreeSet<IndexKind>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(quarry_registry::DEFAULT_DEBOUNCE_SECONDS),
            kinds: IndexKind::ALL.into_iter().collect(),
        }
    }
}

/// Control-plane snapshot for one watched repository.
#[derive(Debug, Clone, Serialize)]
pub struct WatcherStatusEntry {
    pub repository: String,
    pub state: String,
    pub pending_count: u64,
    pub debounce_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_flush_ts: Option<i64>,
}

struct WatchShared {
    state: AtomicU8,
    pending: AtomicU64,
    last_flush_ts: AtomicI64,
}

impl WatchShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_WATCHING),
            pending: AtomicU64::new(0),
            last_flush_ts: AtomicI64::new(0),
        }
    }
}

struct WatchHandle {
    shutdown_tx: mpsc::Sender<()>,
    shared: Arc<WatchShared>,
    // Dropping the notify watcher stops the event stream.
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

/// Watches repositories with `enabled && auto_reindex`, coalesces bursts of
/// file-system events per repository, and submits one incremental job per
/// quiet window. A flush that overlaps a running job waits for it (the
/// orchestrator serializes runs) and then indexes the final on-disk state.
pub struct RepositoryWatcher {
    orchestrator: IndexOrchestrator,
    registry: Arc<RepoRegistry>,
    options: WatcherOptions,
    watchers: tokio::sync::Mutex<HashMap<String, WatchHandle>>,
}

impl RepositoryWatcher {
    #[must_use]
    pub fn new(
        orchestrator: IndexOrchestrator,
        registry: Arc<RepoRegistry>,
        options: WatcherOptions,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            options,
            watchers: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Start watching one repository. Idempotent.
    pub async fn start(&self, repository: &str) -> Result<()> {
        let repo = self
            .registry
            .get(repository)
            .ok_or_else(|| IndexerError::Other(format!("unknown repository {repository:?}")))?;

        let mut watchers = self.watchers.lock().await;
        if watchers.contains_key(repository) {
            return Ok(());
        }

        let global = self.registry.global();
        let matcher = PathMatcher::new(
            &repo.path,
            &global.include_patterns_for(&repo),
            &global.exclude_patterns_for(&repo),
        )?;

        let (event_tx, event_rx) = mpsc::channel(1024);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let shared = Arc::new(WatchShared::new());

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            NotifyConfig::default(),
        )
        .map_err(|e| IndexerError::Watch(format!("watcher init failed: {e}")))?;
        watcher
            .watch(&repo.path, RecursiveMode::Recursive)
            .map_err(|e| {
                IndexerError::Watch(format!("failed to watch {}: {e}", repo.path.display()))
            })?;

        let task = spawn_watch_loop(
            self.orchestrator.clone(),
            repo.name.clone(),
            matcher,
            self.options.clone(),
            Arc::clone(&shared),
            event_rx,
            shutdown_rx,
        );

        log::info!("watching {} at {}", repo.name, repo.path.display());
        watchers.insert(
            repo.name,
            WatchHandle {
                shutdown_tx,
                shared,
                _watcher: watcher,
                task,
            },
        );
        Ok(())
    }

    /// Stop watching one repository. Unknown or unwatched names are a no-op.
    pub async fn stop(&self, repository: &str) {
        let handle = self.watchers.lock().await.remove(repository);
        if let Some(handle) = handle {
            let _ = handle.shutdown_tx.send(()).await;
            let _ = handle.task.await;
            log::info!("stopped watching {repository}");
        }
    }

    pub async fn stop_all(&self) {
        let names: Vec<String> = self.watchers.lock().await.keys().cloned().collect();
        for name in names {
            self.stop(&name).await;
        }
    }

    /// Align running watchers with the registry: start what should run,
    /// stop what should not. Called on registry change notifications.
    pub async fn reconcile(&self) -> Result<()> {
        let desired: HashSet<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|r| r.enabled && r.auto_reindex)
            .map(|r| r.name)
            .collect();

        let running: HashSet<String> = self.watchers.lock().await.keys().cloned().collect();
        for name in running.difference(&desired) {
            self.stop(name).await;
        }
        for name in desired.difference(&running) {
            if let Err(err) = self.start(name).await {
                log::warn!("failed to start watcher for {name}: {err}");
            }
        }
        Ok(())
    }

    /// Subscribe to registry changes and reconcile on every one. Runs until
    /// the registry is dropped.
    pub fn spawn_registry_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let watcher = Arc::clone(self);
        let mut changes = self.registry.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                if let Err(err) = watcher.reconcile().await {
                    log::warn!("watcher reconcile failed: {err}");
                }
            }
        })
    }

    pub async fn status(&self) -> Vec<WatcherStatusEntry> {
        let watchers = self.watchers.lock().await;
        let mut entries: Vec<WatcherStatusEntry> = watchers
            .iter()
            .map(|(name, handle)| {
                let last_flush = handle.shared.last_flush_ts.load(Ordering::Relaxed);
                WatcherStatusEntry {
                    repository: name.clone(),
                    state: match handle.shared.state.load(Ordering::Relaxed) {
                        STATE_FLUSHING => "flushing".to_string(),
                        _ => "watching".to_string(),
                    },
                    pending_count: handle.shared.pending.load(Ordering::Relaxed),
                    debounce_seconds: self.options.debounce.as_secs_f64(),
                    last_flush_ts: (last_flush > 0).then_some(last_flush),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.repository.cmp(&b.repository));
        entries
    }
}

/// Debounce bookkeeping for one repository: the pending path set and the
/// deadline that moves with every new event.
struct DebounceState {
    debounce: Duration,
    pending: HashSet<PathBuf>,
    deadline: Option<time::Instant>,
}

impl DebounceState {
    fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: HashSet::new(),
            deadline: None,
        }
    }

    /// Record an accepted path; returns true when it was new.
    fn record(&mut self, path: PathBuf) -> bool {
        let added = self.pending.insert(path);
        self.deadline = Some(time::Instant::now() + self.debounce);
        added
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    fn should_flush(&self) -> bool {
        self.deadline.is_some() && !self.pending.is_empty()
    }

    /// Snapshot and clear the batch.
    fn take(&mut self) -> Vec<PathBuf> {
        self.deadline = None;
        self.pending.drain().collect()
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_watch_loop(
    orchestrator: IndexOrchestrator,
    repository: String,
    matcher: PathMatcher,
    options: WatcherOptions,
    shared: Arc<WatchShared>,
    mut event_rx: mpsc::Receiver<notify::Result<Event>>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = DebounceState::new(options.debounce);

        loop {
            let deadline = state.deadline;
            tokio::select! {
                Some(event) = event_rx.recv() => {
                    match event {
                        Ok(event) => {
                            // A move arrives as delete-at-source plus
                            // create-at-destination; both paths land in the
                            // pending set and the on-disk state at flush
                            // time decides index-or-delete.
                            for path in event.paths {
                                if matcher.accepts(&path) && state.record(path) {
                                    shared.pending.store(state.pending() as u64, Ordering::Relaxed);
                                }
                            }
                        }
                        Err(err) => log::warn!("watcher error for {repository}: {err}"),
                    }
                }
                _ = shutdown_rx.recv() => break,
                () = async {
                    if let Some(deadline) = deadline {
                        time::sleep_until(deadline).await;
                    }
                }, if state.should_flush() => {
                    let batch = state.take();
                    log::info!(
                        "watcher flush for {repository}: {} changed paths",
                        batch.len()
                    );
                    shared.state.store(STATE_FLUSHING, Ordering::Relaxed);

                    let job = IndexJob {
                        repositories: vec![repository.clone()],
                        kinds: options.kinds.clone(),
                        mode: IndexMode::Incremental,
                        override_excluded: false,
                    };
                    match orchestrator.reindex(&job) {
                        // Waits behind any running job covering this
                        // repository; no duplicate gets queued because the
                        // pending set was drained above.
                        Ok(handle) => {
                            if let Err(err) = handle.wait().await {
                                log::warn!("watcher-triggered run failed for {repository}: {err}");
                            }
                        }
                        Err(err) => {
                            log::warn!("watcher could not schedule run for {repository}: {err}");
                        }
                    }

                    shared.last_flush_ts.store(unix_now(), Ordering::Relaxed);
                    shared.pending.store(0, Ordering::Relaxed);
                    shared.state.store(STATE_WATCHING, Ordering::Relaxed);
                }
            }
        }
    })
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

    #[test]
    fn debounce_deadline_moves_with_events() {
        let mut state = DebounceState::new(Duration::from_millis(100));
        assert!(!state.should_flush());

        assert!(state.record(PathBuf::from("/r/a.rs")));
        let first_deadline = state.deadline.unwrap();
        assert!(state.should_flush());

        // Same path again: deduplicated but the timer resets.
        assert!(!state.record(PathBuf::from("/r/a.rs")));
        assert_eq!(state.pending(), 1);
        assert!(state.deadline.unwrap() >= first_deadline);
    }

    #[test]
    fn take_clears_batch_and_deadline() {
        let mut state = DebounceState::new(Duration::from_millis(100));
        state.record(PathBuf::from("/r/a.rs"));
        state.record(PathBuf::from("/r/b.rs"));

        let batch = state.take();
        assert_eq!(batch.len(), 2);
        assert!(!state.should_flush());
        assert_eq!(state.pending(), 0);
    }
}
