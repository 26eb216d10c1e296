use crate::error::{MetadataError, Result};
use crate::record::{FileRecord, FileUpsert, RecordKind, RepositoryStat, RunRecord};
use quarry_protocol::IndexKind;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::spawn_blocking;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, strftime('%s', 'now'));

CREATE TABLE IF NOT EXISTS file_records (
    file_path TEXT PRIMARY KEY,
    repository TEXT NOT NULL,
    last_indexed_ts INTEGER NOT NULL,
    last_modified_ts INTEGER NOT NULL,
    content_hash TEXT,
    file_size INTEGER NOT NULL DEFAULT 0,
    index_kind TEXT NOT NULL,
    created_ts INTEGER NOT NULL,
    updated_ts INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_file_records_repo ON file_records(repository);
CREATE INDEX IF NOT EXISTS idx_file_records_repo_kind ON file_records(repository, index_kind);
CREATE INDEX IF NOT EXISTS idx_file_records_last_indexed ON file_records(last_indexed_ts);

CREATE TABLE IF NOT EXISTS repository_stats (
    repository TEXT NOT NULL,
    index_kind TEXT NOT NULL,
    total_files_indexed INTEGER NOT NULL DEFAULT 0,
    initial_run_seconds REAL,
    initial_run_ts INTEGER,
    last_run_seconds REAL NOT NULL DEFAULT 0,
    last_run_ts INTEGER NOT NULL DEFAULT 0,
    total_size_bytes INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (repository, index_kind)
);

CREATE TABLE IF NOT EXISTS system_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// SQLite-backed metadata store. Cheap to clone handles via `Arc`; one
/// writer at a time is enforced by the internal mutex while readers ride the
/// same connection.
pub struct MetadataStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl MetadataStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| MetadataError::sqlite(path, e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| MetadataError::sqlite(path, e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|e| MetadataError::sqlite(&path, e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| MetadataError::sqlite(&path, e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, &Path) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let path = self.path.clone();
        spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| {
                log::warn!("metadata store mutex poisoned, recovering");
                poisoned.into_inner()
            });
            f(&mut guard, &path)
        })
        .await
        .map_err(|e| MetadataError::Join(e.to_string()))?
    }

    /// True when `(file_path, kind)` has never been indexed or the on-disk
    /// mtime is newer than the recorded index time. Single primary-key
    /// lookup.
    pub async fn is_stale(&self, file_path: &str, file_mtime: i64, kind: IndexKind) -> Result<bool> {
        let file_path = file_path.to_string();
        self.with_conn(move |conn, path| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT index_kind, last_indexed_ts FROM file_records WHERE file_path = ?1",
                    params![file_path],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
                .map_err(|e| MetadataError::sqlite(path, e))?;

            let Some((kind_str, last_indexed_ts)) = row else {
                return Ok(true);
            };
            let record_kind = RecordKind::parse(&kind_str).ok_or_else(|| {
                MetadataError::CorruptRow {
                    file_path: file_path.clone(),
                    cause: format!("bad index_kind {kind_str:?}"),
                }
            })?;
            Ok(!record_kind.covers(kind) || file_mtime > last_indexed_ts)
        })
        .await
    }

    /// Insert or update a file record, merging the kind monotonically and
    /// keeping `last_indexed_ts` non-decreasing.
    pub async fn upsert(&self, up: FileUpsert) -> Result<()> {
        self.with_conn(move |conn, path| {
            let tx = conn
                .transaction()
                .map_err(|e| MetadataError::sqlite(path, e))?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT index_kind FROM file_records WHERE file_path = ?1",
                    params![up.file_path],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| MetadataError::sqlite(path, e))?;

            match existing {
                None => {
                    tx.execute(
                        "INSERT INTO file_records \
                         (file_path, repository, last_indexed_ts, last_modified_ts, file_size, index_kind, created_ts, updated_ts) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            up.file_path,
                            up.repository,
                            up.now,
                            up.file_mtime,
                            up.file_size as i64,
                            RecordKind::from_kind(up.kind).as_str(),
                            up.now,
                            up.now,
                        ],
                    )
                    .map_err(|e| MetadataError::sqlite(path, e))?;
                }
                Some(kind_str) => {
                    let merged = RecordKind::parse(&kind_str)
                        .ok_or_else(|| MetadataError::CorruptRow {
                            file_path: up.file_path.clone(),
                            cause: format!("bad index_kind {kind_str:?}"),
                        })?
                        .merge(up.kind);
                    tx.execute(
                        "UPDATE file_records SET \
                         repository = ?2, \
                         last_indexed_ts = MAX(last_indexed_ts, ?3), \
                         last_modified_ts = ?4, \
                         file_size = ?5, \
                         index_kind = ?6, \
                         updated_ts = ?7 \
                         WHERE file_path = ?1",
                        params![
                            up.file_path,
                            up.repository,
                            up.now,
                            up.file_mtime,
                            up.file_size as i64,
                            merged.as_str(),
                            up.now,
                        ],
                    )
                    .map_err(|e| MetadataError::sqlite(path, e))?;
                }
            }

            tx.commit().map_err(|e| MetadataError::sqlite(path, e))?;
            Ok(())
        })
        .await
    }

    pub async fn get(&self, file_path: &str) -> Result<Option<FileRecord>> {
        let file_path = file_path.to_string();
        self.with_conn(move |conn, path| {
            conn.query_row(
                "SELECT file_path, repository, last_indexed_ts, last_modified_ts, content_hash, \
                 file_size, index_kind, created_ts, updated_ts \
                 FROM file_records WHERE file_path = ?1",
                params![file_path],
                row_to_record,
            )
            .optional()
            .map_err(|e| MetadataError::sqlite(path, e))
        })
        .await
    }

    pub async fn delete(&self, file_path: &str) -> Result<()> {
        let file_path = file_path.to_string();
        self.with_conn(move |conn, path| {
            conn.execute(
                "DELETE FROM file_records WHERE file_path = ?1",
                params![file_path],
            )
            .map_err(|e| MetadataError::sqlite(path, e))?;
            Ok(())
        })
        .await
    }

    /// Remove every record and stat row for a repository. Returns the number
    /// of file records removed.
    pub async fn delete_all(&self, repository: &str) -> Result<u64> {
        let repository = repository.to_string();
        self.with_conn(move |conn, path| {
            let tx = conn
                .transaction()
                .map_err(|e| MetadataError::sqlite(path, e))?;
            let removed = tx
                .execute(
                    "DELETE FROM file_records WHERE repository = ?1",
                    params![repository],
                )
                .map_err(|e| MetadataError::sqlite(path, e))?;
            tx.execute(
                "DELETE FROM repository_stats WHERE repository = ?1",
                params![repository],
            )
            .map_err(|e| MetadataError::sqlite(path, e))?;
            tx.commit().map_err(|e| MetadataError::sqlite(path, e))?;
            Ok(removed as u64)
        })
        .await
    }

    /// Strip one kind component from a record, deleting the row when its
    /// last kind is removed. A record that never covered `kind` is left
    /// untouched.
    pub async fn remove_kind(&self, file_path: &str, kind: IndexKind) -> Result<()> {
        let file_path = file_path.to_string();
        self.with_conn(move |conn, path| {
            let tx = conn
                .transaction()
                .map_err(|e| MetadataError::sqlite(path, e))?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT index_kind FROM file_records WHERE file_path = ?1",
                    params![file_path],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| MetadataError::sqlite(path, e))?;

            if let Some(kind_str) = existing {
                let record_kind =
                    RecordKind::parse(&kind_str).ok_or_else(|| MetadataError::CorruptRow {
                        file_path: file_path.clone(),
                        cause: format!("bad index_kind {kind_str:?}"),
                    })?;
                if record_kind.covers(kind) {
                    match record_kind.remove(kind) {
                        Some(remaining) => {
                            tx.execute(
                                "UPDATE file_records SET index_kind = ?2 WHERE file_path = ?1",
                                params![file_path, remaining.as_str()],
                            )
                            .map_err(|e| MetadataError::sqlite(path, e))?;
                        }
                        None => {
                            tx.execute(
                                "DELETE FROM file_records WHERE file_path = ?1",
                                params![file_path],
                            )
                            .map_err(|e| MetadataError::sqlite(path, e))?;
                        }
                    }
                }
            }

            tx.commit().map_err(|e| MetadataError::sqlite(path, e))?;
            Ok(())
        })
        .await
    }

    /// Strip a kind from every record of a repository (full-rebuild prep).
    /// Returns how many records were touched.
    pub async fn remove_kind_all(&self, repository: &str, kind: IndexKind) -> Result<u64> {
        let repository = repository.to_string();
        self.with_conn(move |conn, path| {
            let tx = conn
                .transaction()
                .map_err(|e| MetadataError::sqlite(path, e))?;
            let demoted = match kind {
                IndexKind::Lexical => tx.execute(
                    "UPDATE file_records SET index_kind = 'vector' \
                     WHERE repository = ?1 AND index_kind = 'both'",
                    params![repository],
                ),
                IndexKind::Vector => tx.execute(
                    "UPDATE file_records SET index_kind = 'lexical' \
                     WHERE repository = ?1 AND index_kind = 'both'",
                    params![repository],
                ),
            }
            .map_err(|e| MetadataError::sqlite(path, e))?;
            let deleted = tx
                .execute(
                    "DELETE FROM file_records WHERE repository = ?1 AND index_kind = ?2",
                    params![repository, kind.as_str()],
                )
                .map_err(|e| MetadataError::sqlite(path, e))?;
            tx.commit().map_err(|e| MetadataError::sqlite(path, e))?;
            Ok((demoted + deleted) as u64)
        })
        .await
    }

    /// Records of a repository covering `kind`, ordered by path, starting
    /// strictly after `after`. Page through with the last path of the
    /// previous batch to keep memory flat on large repositories.
    pub async fn list_indexed_after(
        &self,
        repository: &str,
        kind: IndexKind,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<FileRecord>> {
        let repository = repository.to_string();
        let after = after.unwrap_or("").to_string();
        self.with_conn(move |conn, path| {
            let mut stmt = conn
                .prepare(
                    "SELECT file_path, repository, last_indexed_ts, last_modified_ts, content_hash, \
                     file_size, index_kind, created_ts, updated_ts \
                     FROM file_records \
                     WHERE repository = ?1 AND index_kind IN (?2, 'both') AND file_path > ?3 \
                     ORDER BY file_path LIMIT ?4",
                )
                .map_err(|e| MetadataError::sqlite(path, e))?;
            let rows = stmt
                .query_map(
                    params![repository, kind.as_str(), after, limit as i64],
                    row_to_record,
                )
                .map_err(|e| MetadataError::sqlite(path, e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| MetadataError::sqlite(path, e))
        })
        .await
    }

    /// Convenience wrapper collecting every record; fine for repository
    /// sizes tests use, production callers page via `list_indexed_after`.
    pub async fn list_indexed(&self, repository: &str, kind: IndexKind) -> Result<Vec<FileRecord>> {
        let mut out = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let batch = self
                .list_indexed_after(repository, kind, after.as_deref(), 1000)
                .await?;
            if batch.is_empty() {
                break;
            }
            after = batch.last().map(|r| r.file_path.clone());
            out.extend(batch);
        }
        Ok(out)
    }

    pub async fn count_indexed(&self, repository: &str, kind: IndexKind) -> Result<u64> {
        let repository = repository.to_string();
        self.with_conn(move |conn, path| {
            conn.query_row(
                "SELECT COUNT(*) FROM file_records \
                 WHERE repository = ?1 AND index_kind IN (?2, 'both')",
                params![repository, kind.as_str()],
                |r| r.get::<_, i64>(0),
            )
            .map(|n| n as u64)
            .map_err(|e| MetadataError::sqlite(path, e))
        })
        .await
    }

    /// Total size in bytes of the files currently indexed for `(repository,
    /// kind)`.
    pub async fn total_size(&self, repository: &str, kind: IndexKind) -> Result<u64> {
        let repository = repository.to_string();
        self.with_conn(move |conn, path| {
            conn.query_row(
                "SELECT COALESCE(SUM(file_size), 0) FROM file_records \
                 WHERE repository = ?1 AND index_kind IN (?2, 'both')",
                params![repository, kind.as_str()],
                |r| r.get::<_, i64>(0),
            )
            .map(|n| n as u64)
            .map_err(|e| MetadataError::sqlite(path, e))
        })
        .await
    }

    /// Upsert the aggregate stats for one `(repository, kind)` run. The
    /// `initial_run_*` columns are written once and never overwritten.
    pub async fn record_run(&self, run: RunRecord) -> Result<()> {
        self.with_conn(move |conn, path| {
            let (initial_seconds, initial_ts) = if run.is_initial {
                (Some(run.duration_seconds), Some(run.now))
            } else {
                (None, None)
            };
            conn.execute(
                "INSERT INTO repository_stats \
                 (repository, index_kind, total_files_indexed, initial_run_seconds, initial_run_ts, \
                  last_run_seconds, last_run_ts, total_size_bytes) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(repository, index_kind) DO UPDATE SET \
                 total_files_indexed = excluded.total_files_indexed, \
                 initial_run_seconds = COALESCE(repository_stats.initial_run_seconds, excluded.initial_run_seconds), \
                 initial_run_ts = COALESCE(repository_stats.initial_run_ts, excluded.initial_run_ts), \
                 last_run_seconds = excluded.last_run_seconds, \
                 last_run_ts = excluded.last_run_ts, \
                 total_size_bytes = excluded.total_size_bytes",
                params![
                    run.repository,
                    run.kind.as_str(),
                    run.files_indexed as i64,
                    initial_seconds,
                    initial_ts,
                    run.duration_seconds,
                    run.now,
                    run.total_size_bytes as i64,
                ],
            )
            .map_err(|e| MetadataError::sqlite(path, e))?;
            Ok(())
        })
        .await
    }

    pub async fn get_stat(
        &self,
        repository: &str,
        kind: IndexKind,
    ) -> Result<Option<RepositoryStat>> {
        let repository = repository.to_string();
        self.with_conn(move |conn, path| {
            conn.query_row(
                "SELECT repository, index_kind, total_files_indexed, initial_run_seconds, \
                 initial_run_ts, last_run_seconds, last_run_ts, total_size_bytes \
                 FROM repository_stats WHERE repository = ?1 AND index_kind = ?2",
                params![repository, kind.as_str()],
                row_to_stat,
            )
            .optional()
            .map_err(|e| MetadataError::sqlite(path, e))
        })
        .await
    }

    pub async fn stats_for(&self, repository: &str) -> Result<Vec<RepositoryStat>> {
        let repository = repository.to_string();
        self.with_conn(move |conn, path| {
            let mut stmt = conn
                .prepare(
                    "SELECT repository, index_kind, total_files_indexed, initial_run_seconds, \
                     initial_run_ts, last_run_seconds, last_run_ts, total_size_bytes \
                     FROM repository_stats WHERE repository = ?1 ORDER BY index_kind",
                )
                .map_err(|e| MetadataError::sqlite(path, e))?;
            let rows = stmt
                .query_map(params![repository], row_to_stat)
                .map_err(|e| MetadataError::sqlite(path, e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| MetadataError::sqlite(path, e))
        })
        .await
    }

    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn, path| {
            conn.query_row(
                "SELECT value FROM system_state WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| MetadataError::sqlite(path, e))
        })
        .await
    }

    /// Atomic single-statement write.
    pub async fn put_state(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn, path| {
            conn.execute(
                "INSERT INTO system_state (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|e| MetadataError::sqlite(path, e))?;
            Ok(())
        })
        .await
    }

    /// Add `delta` to an integer-valued state key, initializing it to the
    /// delta when absent.
    pub async fn bump_state_counter(&self, key: &str, delta: i64) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn, path| {
            conn.execute(
                "INSERT INTO system_state (key, value) VALUES (?1, CAST(?2 AS TEXT)) \
                 ON CONFLICT(key) DO UPDATE SET \
                 value = CAST(CAST(system_state.value AS INTEGER) + ?2 AS TEXT)",
                params![key, delta],
            )
            .map_err(|e| MetadataError::sqlite(path, e))?;
            Ok(())
        })
        .await
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let kind_str: String = row.get(6)?;
    let index_kind = RecordKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("bad index_kind {kind_str:?}").into(),
        )
    })?;
    Ok(FileRecord {
        file_path: row.get(0)?,
        repository: row.get(1)?,
        last_indexed_ts: row.get(2)?,
        last_modified_ts: row.get(3)?,
        content_hash: row.get(4)?,
        file_size: row.get::<_, i64>(5)? as u64,
        index_kind,
        created_ts: row.get(7)?,
        updated_ts: row.get(8)?,
    })
}

fn row_to_stat(row: &Row<'_>) -> rusqlite::Result<RepositoryStat> {
    let kind_str: String = row.get(1)?;
    let index_kind = kind_str.parse::<IndexKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(RepositoryStat {
        repository: row.get(0)?,
        index_kind,
        total_files_indexed: row.get::<_, i64>(2)? as u64,
        initial_run_seconds: row.get(3)?,
        initial_run_ts: row.get(4)?,
        last_run_seconds: row.get(5)?,
        last_run_ts: row.get(6)?,
        total_size_bytes: row.get::<_, i64>(7)? as u64,
    })
}
