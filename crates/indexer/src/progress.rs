use quarry_protocol::{IndexKind, IndexMode, PipelineProgress, PipelineState};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::RwLock;

const MODE_NONE: u8 = 0;
const MODE_INCREMENTAL: u8 = 1;
const MODE_FULL_REBUILD: u8 = 2;

/// Shared progress for one pipeline. Counters are plain atomics written by
/// the single pipeline task and read by anyone; readers may see a counter a
/// step ahead of another but never a torn value.
pub struct PipelineProgressState {
    kind: IndexKind,
    is_running: AtomicBool,
    state: AtomicU8,
    mode: AtomicU8,
    current_repository: RwLock<Option<String>>,
    repositories_total: AtomicU64,
    repositories_completed: AtomicU64,
    files_total: AtomicU64,
    files_processed: AtomicU64,
    stop_requested: AtomicBool,
}

impl PipelineProgressState {
    #[must_use]
    pub fn new(kind: IndexKind) -> Self {
        Self {
            kind,
            is_running: AtomicBool::new(false),
            state: AtomicU8::new(encode_state(PipelineState::Idle)),
            mode: AtomicU8::new(MODE_NONE),
            current_repository: RwLock::new(None),
            repositories_total: AtomicU64::new(0),
            repositories_completed: AtomicU64::new(0),
            files_total: AtomicU64::new(0),
            files_processed: AtomicU64::new(0),
            stop_requested: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn begin_run(&self, mode: IndexMode, repositories_total: u64) {
        self.repositories_total.store(repositories_total, Ordering::Relaxed);
        self.repositories_completed.store(0, Ordering::Relaxed);
        self.files_total.store(0, Ordering::Relaxed);
        self.files_processed.store(0, Ordering::Relaxed);
        self.mode.store(encode_mode(mode), Ordering::Relaxed);
        self.set_state(PipelineState::Scanning);
        self.is_running.store(true, Ordering::Release);
    }

    pub fn finish_run(&self) {
        self.is_running.store(false, Ordering::Release);
        self.set_state(PipelineState::Idle);
        self.set_current_repository(None);
        self.mode.store(MODE_NONE, Ordering::Relaxed);
    }

    pub fn set_state(&self, state: PipelineState) {
        self.state.store(encode_state(state), Ordering::Relaxed);
    }

    pub fn set_current_repository(&self, repository: Option<String>) {
        *self
            .current_repository
            .write()
            .unwrap_or_else(|p| p.into_inner()) = repository;
    }

    pub fn add_files_total(&self, n: u64) {
        self.files_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_files_processed(&self) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_repositories_completed(&self) {
        self.repositories_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn clear_stop(&self) {
        self.stop_requested.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> PipelineProgress {
        PipelineProgress {
            kind: self.kind,
            is_running: self.is_running.load(Ordering::Acquire),
            state: decode_state(self.state.load(Ordering::Relaxed)),
            current_repository: self
                .current_repository
                .read()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
            repositories_total: self.repositories_total.load(Ordering::Relaxed),
            repositories_completed: self.repositories_completed.load(Ordering::Relaxed),
            files_total: self.files_total.load(Ordering::Relaxed),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            mode: decode_mode(self.mode.load(Ordering::Relaxed)),
        }
    }
}

const fn encode_state(state: PipelineState) -> u8 {
    match state {
        PipelineState::Idle => 0,
        PipelineState::Scanning => 1,
        PipelineState::Indexing => 2,
        PipelineState::Finalizing => 3,
        PipelineState::Stopping => 4,
        PipelineState::Failed => 5,
    }
}

const fn decode_state(raw: u8) -> PipelineState {
    match raw {
        1 => PipelineState::Scanning,
        2 => PipelineState::Indexing,
        3 => PipelineState::Finalizing,
        4 => PipelineState::Stopping,
        5 => PipelineState::Failed,
        _ => PipelineState::Idle,
    }
}

const fn encode_mode(mode: IndexMode) -> u8 {
    match mode {
        IndexMode::Incremental => MODE_INCREMENTAL,
        IndexMode::FullRebuild => MODE_FULL_REBUILD,
    }
}

const fn decode_mode(raw: u8) -> Option<IndexMode> {
    match raw {
        MODE_INCREMENTAL => Some(IndexMode::Incremental),
        MODE_FULL_REBUILD => Some(IndexMode::FullRebuild),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn snapshot_reflects_run_lifecycle() {
        let progress = PipelineProgressState::new(IndexKind::Lexical);
        let idle = progress.snapshot();
        assert!(!idle.is_running);
        assert_eq!(idle.state, PipelineState::Idle);
        assert_eq!(idle.mode, None);

        progress.begin_run(IndexMode::FullRebuild, 3);
        progress.set_current_repository(Some("demo".to_string()));
        progress.add_files_total(10);
        progress.inc_files_processed();
        progress.set_state(PipelineState::Indexing);

        let running = progress.snapshot();
        assert!(running.is_running);
        assert_eq!(running.state, PipelineState::Indexing);
        assert_eq!(running.current_repository.as_deref(), Some("demo"));
        assert_eq!(running.repositories_total, 3);
        assert_eq!(running.files_total, 10);
        assert_eq!(running.files_processed, 1);
        assert_eq!(running.mode, Some(IndexMode::FullRebuild));

        progress.finish_run();
        let done = progress.snapshot();
        assert!(!done.is_running);
        assert_eq!(done.state, PipelineState::Idle);
        assert_eq!(done.current_repository, None);
    }

    #[test]
    fn stop_flag_roundtrip() {
        let progress = PipelineProgressState::new(IndexKind::Vector);
        assert!(!progress.stop_requested());
        progress.request_stop();
        assert!(progress.stop_requested());
        progress.clear_stop();
        assert!(!progress.stop_requested());
    }
}
