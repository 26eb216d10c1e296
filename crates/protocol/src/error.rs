use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Engine-surface error taxonomy.
///
/// Subsystem crates carry their own error enums; everything that crosses the
/// engine boundary is mapped onto one of these variants. `InvalidArgument`
/// and `Conflict` are caller errors and never retried. `BackendUnavailable`
/// and `TransientIo` are expected to heal on a later run. `Fatal` means the
/// affected subsystem refuses to start.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend unavailable: {backend}: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient io error: {0}")]
    TransientIo(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    #[must_use]
    pub fn backend_unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that a later run is expected to clear on its own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::TransientIo(_) | Self::Timeout(_)
        )
    }
}
