//! File record storage.

use std::sync::Arc;

use rusqlite::Connection;
use rusqlite::Row;
use rusqlite::params;

use crate::error::Result;
use crate::storage::OptionalExt;
use crate::storage::SqliteStore;
use crate::types::FileRecord;
use crate::types::FileStatus;
use crate::types::now_unix;

/// Aggregate view of the `files` table for one branch.
#[derive(Debug, Clone, Default)]
pub struct FileStats {
    pub total: i64,
    pub indexed: i64,
    pub errored: i64,
    pub symbol_count: i64,
    pub last_indexed: Option<i64>,
}

/// CRUD over the `files` table.
pub struct FileStore {
    db: Arc<SqliteStore>,
}

impl FileStore {
    pub fn new(db: Arc<SqliteStore>) -> Self {
        Self { db }
    }

    /// Upsert a file record inside an open transaction.
    pub fn upsert_tx(conn: &Connection, record: &FileRecord) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO files (
                file_path, branch, file_hash, mtime, size, last_indexed,
                language, status, symbol_count, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.file_path,
                record.branch,
                record.file_hash,
                record.mtime,
                record.size,
                record.last_indexed,
                record.language,
                record.status.as_str(),
                record.symbol_count,
                record.error_message,
            ],
        )?;
        Ok(())
    }

    /// Delete the record for a file on a branch inside an open transaction.
    pub fn delete_tx(conn: &Connection, file_path: &str, branch: &str) -> Result<usize> {
        let count = conn.execute(
            "DELETE FROM files WHERE file_path = ? AND branch = ?",
            params![file_path, branch],
        )?;
        Ok(count)
    }

    /// Delete every record on a branch inside an open transaction.
    pub fn delete_branch_tx(conn: &Connection, branch: &str) -> Result<usize> {
        let count = conn.execute("DELETE FROM files WHERE branch = ?", params![branch])?;
        Ok(count)
    }

    /// Upsert a file record.
    pub async fn upsert(&self, record: FileRecord) -> Result<()> {
        self.db
            .query(move |conn| Self::upsert_tx(conn, &record))
            .await
    }

    /// Mark a file errored without touching the rest of its record.
    pub async fn mark_error(&self, file_path: &str, branch: &str, message: &str) -> Result<()> {
        let record = FileRecord {
            file_path: file_path.to_string(),
            file_hash: String::new(),
            mtime: 0,
            size: 0,
            last_indexed: now_unix(),
            language: String::new(),
            branch: branch.to_string(),
            status: FileStatus::Error,
            symbol_count: 0,
            error_message: Some(message.to_string()),
        };
        self.db
            .query(move |conn| {
                let updated = conn.execute(
                    "UPDATE files SET status = ?, error_message = ?, last_indexed = ? \
                     WHERE file_path = ? AND branch = ?",
                    params![
                        FileStatus::Error.as_str(),
                        record.error_message,
                        record.last_indexed,
                        record.file_path,
                        record.branch
                    ],
                )?;
                if updated == 0 {
                    Self::upsert_tx(conn, &record)?;
                }
                Ok(())
            })
            .await
    }

    /// Look up the record for one file.
    pub async fn get(&self, file_path: &str, branch: &str) -> Result<Option<FileRecord>> {
        let file_path = file_path.to_string();
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                conn.query_row(
                    &format!("SELECT {COLUMNS} FROM files WHERE file_path = ? AND branch = ?"),
                    params![file_path, branch],
                    record_from_row,
                )
                .optional()
            })
            .await
    }

    /// List all records on a branch.
    pub async fn list(&self, branch: &str) -> Result<Vec<FileRecord>> {
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {COLUMNS} FROM files WHERE branch = ? ORDER BY file_path"
                ))?;
                let records = stmt
                    .query_map(params![branch], record_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await
    }

    /// Aggregate stats for one branch.
    pub async fn stats(&self, branch: &str) -> Result<FileStats> {
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                let row = conn.query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(status = 'indexed'), 0),
                            COALESCE(SUM(status = 'error'), 0),
                            COALESCE(SUM(symbol_count), 0),
                            MAX(last_indexed)
                     FROM files WHERE branch = ?",
                    params![branch],
                    |row| {
                        Ok(FileStats {
                            total: row.get(0)?,
                            indexed: row.get(1)?,
                            errored: row.get(2)?,
                            symbol_count: row.get(3)?,
                            last_indexed: row.get(4)?,
                        })
                    },
                )?;
                Ok(row)
            })
            .await
    }
}

const COLUMNS: &str = "file_path, branch, file_hash, mtime, size, last_indexed, language, \
     status, symbol_count, error_message";

fn record_from_row(row: &Row<'_>) -> std::result::Result<FileRecord, rusqlite::Error> {
    let status: String = row.get(7)?;
    Ok(FileRecord {
        file_path: row.get(0)?,
        branch: row.get(1)?,
        file_hash: row.get(2)?,
        mtime: row.get(3)?,
        size: row.get(4)?,
        last_indexed: row.get(5)?,
        language: row.get(6)?,
        status: FileStatus::parse(&status).unwrap_or(FileStatus::Pending),
        symbol_count: row.get(8)?,
        error_message: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(path: &str, status: FileStatus) -> FileRecord {
        FileRecord {
            file_path: path.to_string(),
            file_hash: "hash".to_string(),
            mtime: 1000,
            size: 100,
            last_indexed: now_unix(),
            language: "typescript".to_string(),
            branch: "main".to_string(),
            status,
            symbol_count: 3,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let files = FileStore::new(db);

        files
            .upsert(make_record("src/a.ts", FileStatus::Indexed))
            .await
            .unwrap();

        let record = files.get("src/a.ts", "main").await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Indexed);
        assert_eq!(record.symbol_count, 3);
        assert!(files.get("src/a.ts", "dev").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_error_without_prior_record() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let files = FileStore::new(db);

        files
            .mark_error("src/broken.ts", "main", "parse failed")
            .await
            .unwrap();

        let record = files.get("src/broken.ts", "main").await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("parse failed"));
    }

    #[tokio::test]
    async fn stats_aggregates() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let files = FileStore::new(db);

        files
            .upsert(make_record("a.ts", FileStatus::Indexed))
            .await
            .unwrap();
        files
            .upsert(make_record("b.ts", FileStatus::Indexed))
            .await
            .unwrap();
        files
            .upsert(make_record("c.ts", FileStatus::Error))
            .await
            .unwrap();

        let stats = files.stats("main").await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.indexed, 2);
        assert_eq!(stats.errored, 1);
        assert_eq!(stats.symbol_count, 9);
        assert!(stats.last_indexed.is_some());
    }
}
