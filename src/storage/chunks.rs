//! Chunk row storage.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::Connection;
use rusqlite::Row;
use rusqlite::params;

use crate::error::Result;
use crate::storage::OptionalExt;
use crate::storage::SqliteStore;
use crate::types::Chunk;
use crate::types::ChunkType;

/// CRUD over the `chunks` table.
pub struct ChunkStore {
    db: Arc<SqliteStore>,
}

impl ChunkStore {
    pub fn new(db: Arc<SqliteStore>) -> Self {
        Self { db }
    }

    /// Insert a batch of chunks inside an open transaction.
    pub fn insert_batch_tx(conn: &Connection, chunks: &[Chunk]) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            "INSERT OR REPLACE INTO chunks (
                id, branch, file_path, start_line, end_line, content,
                chunk_type, parent_symbol_id, language, content_hash, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for chunk in chunks {
            stmt.execute(params![
                chunk.id,
                chunk.branch,
                chunk.file_path,
                chunk.start_line,
                chunk.end_line,
                chunk.content,
                chunk.chunk_type.as_str(),
                chunk.parent_symbol_id,
                chunk.language,
                chunk.content_hash,
                chunk.updated_at,
            ])?;
        }
        Ok(())
    }

    /// Delete all chunks for a file on a branch inside an open transaction.
    pub fn delete_by_file_tx(conn: &Connection, file_path: &str, branch: &str) -> Result<usize> {
        let count = conn.execute(
            "DELETE FROM chunks WHERE file_path = ? AND branch = ?",
            params![file_path, branch],
        )?;
        Ok(count)
    }

    /// Delete every chunk on a branch inside an open transaction.
    pub fn delete_branch_tx(conn: &Connection, branch: &str) -> Result<usize> {
        let count = conn.execute("DELETE FROM chunks WHERE branch = ?", params![branch])?;
        Ok(count)
    }

    /// Ids of the chunks currently stored for a file on a branch.
    pub async fn ids_by_file(&self, file_path: &str, branch: &str) -> Result<Vec<String>> {
        let file_path = file_path.to_string();
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                let mut stmt = conn
                    .prepare_cached("SELECT id FROM chunks WHERE file_path = ? AND branch = ?")?;
                let ids = stmt
                    .query_map(params![file_path, branch], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await
    }

    /// All chunks for a file on a branch, ordered by start line.
    pub async fn get_by_file(&self, file_path: &str, branch: &str) -> Result<Vec<Chunk>> {
        let file_path = file_path.to_string();
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {COLUMNS} FROM chunks \
                     WHERE file_path = ? AND branch = ? ORDER BY start_line"
                ))?;
                let chunks = stmt
                    .query_map(params![file_path, branch], chunk_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(chunks)
            })
            .await
    }

    /// Look up one chunk by id on a branch.
    pub async fn get_by_id(&self, id: &str, branch: &str) -> Result<Option<Chunk>> {
        let id = id.to_string();
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                conn.query_row(
                    &format!("SELECT {COLUMNS} FROM chunks WHERE id = ? AND branch = ?"),
                    params![id, branch],
                    chunk_from_row,
                )
                .optional()
            })
            .await
    }

    /// Resolve a set of ids to chunks, keyed by id.
    pub async fn get_by_ids(&self, ids: &[String], branch: &str) -> Result<HashMap<String, Chunk>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids = ids.to_vec();
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let sql = format!(
                    "SELECT {COLUMNS} FROM chunks WHERE branch = ? AND id IN ({placeholders})"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut values: Vec<&dyn rusqlite::ToSql> = vec![&branch];
                for id in &ids {
                    values.push(id);
                }
                let chunks = stmt
                    .query_map(values.as_slice(), chunk_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(chunks.into_iter().map(|c| (c.id.clone(), c)).collect())
            })
            .await
    }

    /// Chunks anywhere on a branch carrying one of the given content hashes.
    ///
    /// Feeds the embedding reuse cache: a chunk whose hash already exists
    /// elsewhere (e.g. a renamed file) can share that chunk's vector.
    pub async fn find_by_hashes(
        &self,
        hashes: &[String],
        branch: &str,
    ) -> Result<Vec<Chunk>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let hashes = hashes.to_vec();
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                let placeholders = vec!["?"; hashes.len()].join(", ");
                let sql = format!(
                    "SELECT {COLUMNS} FROM chunks \
                     WHERE branch = ? AND content_hash IN ({placeholders})"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut values: Vec<&dyn rusqlite::ToSql> = vec![&branch];
                for hash in &hashes {
                    values.push(hash);
                }
                let chunks = stmt
                    .query_map(values.as_slice(), chunk_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(chunks)
            })
            .await
    }

    /// Total chunks on a branch.
    pub async fn count(&self, branch: &str) -> Result<i64> {
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM chunks WHERE branch = ?",
                    params![branch],
                    |row| row.get(0),
                )?)
            })
            .await
    }
}

const COLUMNS: &str = "id, branch, file_path, start_line, end_line, content, chunk_type, \
     parent_symbol_id, language, content_hash, updated_at";

fn chunk_from_row(row: &Row<'_>) -> std::result::Result<Chunk, rusqlite::Error> {
    let chunk_type: String = row.get(6)?;
    Ok(Chunk {
        id: row.get(0)?,
        branch: row.get(1)?,
        file_path: row.get(2)?,
        start_line: row.get(3)?,
        end_line: row.get(4)?,
        content: row.get(5)?,
        chunk_type: ChunkType::parse(&chunk_type).unwrap_or(ChunkType::Block),
        parent_symbol_id: row.get(7)?,
        language: row.get(8)?,
        content_hash: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
pub(crate) fn make_chunk(id: &str, file_path: &str, content: &str, branch: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        file_path: file_path.to_string(),
        start_line: 1,
        end_line: 5,
        content: content.to_string(),
        chunk_type: ChunkType::Block,
        parent_symbol_id: None,
        language: "typescript".to_string(),
        content_hash: crate::types::content_hash(content),
        branch: branch.to_string(),
        updated_at: crate::types::now_unix(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_query() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let chunks = ChunkStore::new(db.clone());

        let batch = vec![
            make_chunk("c1", "src/a.ts", "const a = 1;", "main"),
            make_chunk("c2", "src/a.ts", "const b = 2;", "main"),
            make_chunk("c3", "src/b.ts", "const c = 3;", "main"),
        ];
        db.transaction(move |conn| ChunkStore::insert_batch_tx(conn, &batch))
            .await
            .unwrap();

        assert_eq!(chunks.count("main").await.unwrap(), 3);
        let by_file = chunks.get_by_file("src/a.ts", "main").await.unwrap();
        assert_eq!(by_file.len(), 2);
        assert_eq!(
            chunks.ids_by_file("src/b.ts", "main").await.unwrap(),
            vec!["c3"]
        );
    }

    #[tokio::test]
    async fn delete_by_file_keeps_other_files() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let chunks = ChunkStore::new(db.clone());

        let batch = vec![
            make_chunk("c1", "src/a.ts", "const a = 1;", "main"),
            make_chunk("c2", "src/b.ts", "const b = 2;", "main"),
        ];
        db.transaction(move |conn| ChunkStore::insert_batch_tx(conn, &batch))
            .await
            .unwrap();

        db.transaction(|conn| {
            ChunkStore::delete_by_file_tx(conn, "src/a.ts", "main")?;
            Ok(())
        })
        .await
        .unwrap();

        assert!(chunks.get_by_id("c1", "main").await.unwrap().is_none());
        assert!(chunks.get_by_id("c2", "main").await.unwrap().is_some());
    }

    #[test]
    fn chunk_type_round_trip() {
        for t in [ChunkType::Symbol, ChunkType::Block, ChunkType::File] {
            assert_eq!(ChunkType::parse(t.as_str()), Some(t));
        }
    }
}
