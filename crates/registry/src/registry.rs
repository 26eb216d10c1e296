use crate::config::GlobalConfig;
use once_cell::sync::Lazy;
use quarry_protocol::{
    BulkAction, EngineError, EngineResult, RepositoryConfig, RepositoryUpdate,
};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::sync::watch;

static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+$").expect("repository name regex is valid")
});

/// Serialized, persisted repository registry. Every successful mutation
/// writes the YAML file back and bumps the generation on the watch channel;
/// subscribers re-read the registry and reconcile.
#[derive(Debug)]
pub struct RepoRegistry {
    path: Option<PathBuf>,
    inner: RwLock<GlobalConfig>,
    changes: watch::Sender<u64>,
}

impl RepoRegistry {
    /// Load the registry from a YAML file. A missing file starts from
    /// defaults; an unparsable one is a fatal configuration error.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(text) => serde_yaml::from_str(&text).map_err(|e| {
                EngineError::Fatal(format!("unreadable configuration {}: {e}", path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no configuration at {}, starting empty", path.display());
                GlobalConfig::default()
            }
            Err(err) => {
                return Err(EngineError::Fatal(format!(
                    "cannot read configuration {}: {err}",
                    path.display()
                )))
            }
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            inner: RwLock::new(config),
            changes: watch::channel(0).0,
        })
    }

    /// Registry without a backing file, used by tests.
    #[must_use]
    pub fn in_memory(config: GlobalConfig) -> Self {
        Self {
            path: None,
            inner: RwLock::new(config),
            changes: watch::channel(0).0,
        }
    }

    /// Subscribe to change notifications; the value is a generation
    /// counter, the payload is re-read through the accessors.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    #[must_use]
    pub fn global(&self) -> GlobalConfig {
        self.read().clone()
    }

    #[must_use]
    pub fn list(&self) -> Vec<RepositoryConfig> {
        self.read().repositories.clone()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<RepositoryConfig> {
        self.read()
            .repositories
            .iter()
            .find(|r| r.name == name)
            .cloned()
    }

    pub fn add(&self, repo: RepositoryConfig) -> EngineResult<()> {
        if !NAME_RE.is_match(&repo.name) {
            return Err(EngineError::InvalidArgument(format!(
                "repository name {:?} must match [A-Za-z0-9_.-]+",
                repo.name
            )));
        }
        if !repo.path.is_dir() {
            return Err(EngineError::InvalidArgument(format!(
                "repository path {} is not an existing directory",
                repo.path.display()
            )));
        }

        {
            let mut config = self.write();
            if config.repositories.iter().any(|r| r.name == repo.name) {
                return Err(EngineError::Conflict(format!(
                    "repository {:?} already registered",
                    repo.name
                )));
            }
            if config.repositories.iter().any(|r| r.path == repo.path) {
                return Err(EngineError::Conflict(format!(
                    "path {} already registered",
                    repo.path.display()
                )));
            }
            config.repositories.push(repo);
        }
        self.persist_and_notify()
    }

    /// Remove a repository from the registry. Backend/metadata cleanup is
    /// the engine's job; files on disk are never touched.
    pub fn remove(&self, name: &str) -> EngineResult<RepositoryConfig> {
        let removed = {
            let mut config = self.write();
            let idx = config
                .repositories
                .iter()
                .position(|r| r.name == name)
                .ok_or_else(|| EngineError::NotFound(format!("repository {name:?}")))?;
            config.repositories.remove(idx)
        };
        self.persist_and_notify()?;
        Ok(removed)
    }

    pub fn update(&self, name: &str, update: &RepositoryUpdate) -> EngineResult<RepositoryConfig> {
        let updated = {
            let mut config = self.write();
            let repo = config
                .repositories
                .iter_mut()
                .find(|r| r.name == name)
                .ok_or_else(|| EngineError::NotFound(format!("repository {name:?}")))?;
            if let Some(enabled) = update.enabled {
                repo.enabled = enabled;
            }
            if let Some(excluded) = update.excluded {
                repo.excluded = excluded;
            }
            if let Some(priority) = update.priority {
                repo.priority = priority;
            }
            if let Some(auto_reindex) = update.auto_reindex {
                repo.auto_reindex = auto_reindex;
            }
            if let Some(include_patterns) = &update.include_patterns {
                repo.include_patterns = include_patterns.clone();
            }
            if let Some(exclude_patterns) = &update.exclude_patterns {
                repo.exclude_patterns = exclude_patterns.clone();
            }
            repo.clone()
        };
        self.persist_and_notify()?;
        Ok(updated)
    }

    /// Apply one flag across every repository atomically. Returns how many
    /// repositories were touched.
    pub fn bulk_update(&self, action: BulkAction) -> EngineResult<usize> {
        let touched = {
            let mut config = self.write();
            let repos = &mut config.repositories;
            let count = repos.len();
            for repo in repos.iter_mut() {
                match action {
                    BulkAction::EnableAll => repo.enabled = true,
                    BulkAction::DisableAll => repo.enabled = false,
                    BulkAction::LockAll => repo.excluded = true,
                    BulkAction::UnlockAll => repo.excluded = false,
                }
            }
            count
        };
        self.persist_and_notify()?;
        Ok(touched)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, GlobalConfig> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, GlobalConfig> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    fn persist_and_notify(&self) -> EngineResult<()> {
        if let Some(path) = &self.path {
            let yaml = serde_yaml::to_string(&*self.read())
                .map_err(|e| EngineError::Fatal(format!("serialize configuration: {e}")))?;
            let tmp = path.with_extension("yaml.tmp");
            std::fs::write(&tmp, yaml).map_err(|e| {
                EngineError::Fatal(format!("write configuration {}: {e}", tmp.display()))
            })?;
            std::fs::rename(&tmp, path).map_err(|e| {
                EngineError::Fatal(format!("rename configuration {}: {e}", path.display()))
            })?;
        }
        self.changes.send_modify(|generation| *generation += 1);
        Ok(())
    }
}
