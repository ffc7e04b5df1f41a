//! SQLite storage layer.
//!
//! Provides async-safe SQLite operations using spawn_blocking.

pub mod chunks;
pub mod edges;
pub mod files;
pub mod fts;
pub mod symbols;
pub mod vectors;

pub use chunks::ChunkStore;
pub use edges::EdgeStore;
pub use files::FileStore;
pub use fts::FtsStore;
pub use symbols::SymbolStore;
pub use vectors::VectorStore;

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::Connection;
use tokio::task::spawn_blocking;

use crate::error::CodeIntelErr;
use crate::error::Result;

/// Current schema version recorded in the `meta` table.
pub const SCHEMA_VERSION: i64 = 2;

/// Async-safe SQLite store.
///
/// rusqlite::Connection is not Send + Sync, so it lives behind Arc<Mutex<>>;
/// writes serialize on the mutex, which also gives each per-file
/// delete-then-insert transaction atomicity with respect to readers.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the index database and apply schema migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path_buf = path.to_path_buf();
        let conn = Connection::open(path).map_err(|e| CodeIntelErr::sqlite(path, e))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| CodeIntelErr::sqlite(path, e))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| CodeIntelErr::sqlite(path, e))?;

        Self::init_schema(&conn, &path_buf)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path_buf,
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CodeIntelErr::sqlite(Path::new(":memory:"), e))?;
        let path_buf = PathBuf::from(":memory:");
        Self::init_schema(&conn, &path_buf)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path_buf,
        })
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(conn: &Connection, path: &PathBuf) -> Result<()> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| CodeIntelErr::Sqlite {
                path: path.clone(),
                cause: format!("schema init failed: {e}"),
            })?;
        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?)",
            [SCHEMA_VERSION.to_string()],
        )
        .map_err(|e| CodeIntelErr::Sqlite {
            path: path.clone(),
            cause: format!("schema version write failed: {e}"),
        })?;
        Ok(())
    }

    /// Execute a read or single-statement write asynchronously.
    pub async fn query<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();

        spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "mutex poisoned, recovering");
                let inner = poisoned.into_inner();
                rollback_if_open(&inner, &path);
                inner
            });
            f(&guard)
        })
        .await
        .map_err(|e| CodeIntelErr::Sqlite {
            path: self.path.clone(),
            cause: format!("spawn_blocking failed: {e}"),
        })?
    }

    /// Execute a multi-statement transaction asynchronously.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();

        spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "mutex poisoned in transaction, recovering");
                let inner = poisoned.into_inner();
                rollback_if_open(&inner, &path);
                inner
            });

            let tx = guard.transaction().map_err(|e| CodeIntelErr::Sqlite {
                path: path.clone(),
                cause: format!("transaction start failed: {e}"),
            })?;
            let result = f(&tx)?;
            tx.commit().map_err(|e| CodeIntelErr::Sqlite {
                path: path.clone(),
                cause: format!("transaction commit failed: {e}"),
            })?;
            Ok(result)
        })
        .await
        .map_err(|e| CodeIntelErr::Sqlite {
            path: self.path.clone(),
            cause: format!("spawn_blocking failed: {e}"),
        })?
    }

    /// Read a value from the `meta` table.
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.query(move |conn| {
            conn.query_row("SELECT value FROM meta WHERE key = ?", [&key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
        })
        .await
    }

    /// Write a value to the `meta` table.
    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.query(move |conn| {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [&key, &value],
            )?;
            Ok(())
        })
        .await
    }
}

/// Roll back an interrupted transaction left behind by a poisoned lock.
fn rollback_if_open(conn: &Connection, path: &Path) {
    if !conn.is_autocommit() {
        tracing::warn!(
            path = %path.display(),
            "connection not in autocommit after poisoning recovery, rolling back"
        );
        if let Err(e) = conn.execute("ROLLBACK", []) {
            tracing::error!(path = %path.display(), error = %e, "rollback failed");
        }
    }
}

/// SQLite schema.
///
/// All rows carry a `branch` tag so one workspace database can index several
/// git branches side by side; deletes are always branch-scoped.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS symbols (
    id TEXT NOT NULL,
    branch TEXT NOT NULL,
    name TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    kind TEXT NOT NULL,
    language TEXT NOT NULL,
    file_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    content TEXT NOT NULL,
    signature TEXT,
    docstring TEXT,
    content_hash TEXT NOT NULL,
    is_external INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL,
    revision_id TEXT,
    embedding_model_id TEXT,
    PRIMARY KEY (id, branch)
);

CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_path, branch);
CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT NOT NULL,
    branch TEXT NOT NULL,
    file_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    content TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    parent_symbol_id TEXT,
    language TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (id, branch)
);

CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path, branch);
CREATE INDEX IF NOT EXISTS idx_chunks_hash ON chunks(content_hash);

CREATE TABLE IF NOT EXISTS files (
    file_path TEXT NOT NULL,
    branch TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    mtime INTEGER NOT NULL,
    size INTEGER NOT NULL,
    last_indexed INTEGER NOT NULL,
    language TEXT NOT NULL,
    status TEXT NOT NULL,
    symbol_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    PRIMARY KEY (file_path, branch)
);

CREATE INDEX IF NOT EXISTS idx_files_status ON files(status, branch);

CREATE TABLE IF NOT EXISTS edges (
    source_symbol_id TEXT NOT NULL,
    target_symbol_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    branch TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0,
    PRIMARY KEY (source_symbol_id, target_symbol_id, kind, branch)
);

CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_symbol_id, branch);

-- Unified full-text index over symbols, chunks and files. The branch column
-- is carried so branch-scoped deletes cascade here (one FTS row per
-- symbol/chunk row per branch).
CREATE VIRTUAL TABLE IF NOT EXISTS fts_content USING fts5(
    content_id UNINDEXED,
    content_type UNINDEXED,
    branch UNINDEXED,
    file_path UNINDEXED,
    name,
    content
);

-- Legacy keyword FTS table. Kept for on-disk compatibility, no longer written.
CREATE VIRTUAL TABLE IF NOT EXISTS keywords_fts USING fts5(
    keyword,
    content_id UNINDEXED
);

-- Embedding vectors: base64-encoded little-endian f32 blobs.
CREATE TABLE IF NOT EXISTS js_vectors (
    content_id TEXT PRIMARY KEY,
    embedding TEXT NOT NULL,
    granularity TEXT NOT NULL,
    norm REAL NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vectors_granularity ON js_vectors(granularity);

CREATE TABLE IF NOT EXISTS repo_map (
    file_path TEXT NOT NULL,
    branch TEXT NOT NULL,
    rank REAL NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (file_path, branch)
);
"#;

/// Extension trait for optional query results.
pub trait OptionalExt<T> {
    /// Convert QueryReturnedNoRows to None.
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_schema() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("index.db")).unwrap();

        let count: i64 = store
            .query(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn meta_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("index.db")).unwrap();

        assert_eq!(store.get_meta("embedding_model_id").await.unwrap(), None);
        store.set_meta("embedding_model_id", "m1").await.unwrap();
        assert_eq!(
            store.get_meta("embedding_model_id").await.unwrap().as_deref(),
            Some("m1")
        );
        store.set_meta("embedding_model_id", "m2").await.unwrap();
        assert_eq!(
            store.get_meta("embedding_model_id").await.unwrap().as_deref(),
            Some("m2")
        );
    }

    #[tokio::test]
    async fn schema_version_recorded() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("index.db")).unwrap();
        let version = store.get_meta("schema_version").await.unwrap().unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
    }

    #[tokio::test]
    async fn transaction_commits() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("index.db")).unwrap();

        store
            .transaction(|conn| {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('a', '1'), ('b', '2')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(store.get_meta("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get_meta("b").await.unwrap().as_deref(), Some("2"));
    }
}
