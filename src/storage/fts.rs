//! Unified full-text index over symbols, chunks and files.
//!
//! Backed by the `fts_content` FTS5 virtual table with BM25 ranking. File
//! patterns are applied as GLOB filters after match scoring.

use std::sync::Arc;

use rusqlite::Connection;
use rusqlite::params;

use crate::error::Result;
use crate::storage::SqliteStore;
use crate::types::FtsHit;
use crate::types::Granularity;

/// One row to index.
#[derive(Debug, Clone)]
pub struct FtsRow {
    pub content_id: String,
    pub content_type: Granularity,
    pub branch: String,
    pub file_path: String,
    pub name: String,
    pub content: String,
}

/// Store over the `fts_content` table.
pub struct FtsStore {
    db: Arc<SqliteStore>,
}

impl FtsStore {
    pub fn new(db: Arc<SqliteStore>) -> Self {
        Self { db }
    }

    /// Insert a batch of rows inside an open transaction.
    pub fn insert_batch_tx(conn: &Connection, rows: &[FtsRow]) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO fts_content (content_id, content_type, branch, file_path, name, content) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.content_id,
                row.content_type.as_str(),
                row.branch,
                row.file_path,
                row.name,
                row.content,
            ])?;
        }
        Ok(())
    }

    /// Delete all rows for a file on a branch inside an open transaction.
    pub fn delete_by_file_tx(conn: &Connection, file_path: &str, branch: &str) -> Result<usize> {
        let count = conn.execute(
            "DELETE FROM fts_content WHERE file_path = ? AND branch = ?",
            params![file_path, branch],
        )?;
        Ok(count)
    }

    /// Delete every row on a branch inside an open transaction.
    pub fn delete_branch_tx(conn: &Connection, branch: &str) -> Result<usize> {
        let count = conn.execute("DELETE FROM fts_content WHERE branch = ?", params![branch])?;
        Ok(count)
    }

    /// Count rows with a given content id (invariant checks in tests).
    pub async fn count_by_content_id(&self, content_id: &str, branch: &str) -> Result<i64> {
        let content_id = content_id.to_string();
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM fts_content WHERE content_id = ? AND branch = ?",
                    params![content_id, branch],
                    |row| row.get(0),
                )?)
            })
            .await
    }

    /// Full-text search with BM25 ranking.
    ///
    /// `match_query` must already be valid FTS5 syntax (see
    /// [`sanitize_match_query`]). Hits come back best-first; `rank` is the raw
    /// BM25 value (negative, lower is better).
    pub async fn search(
        &self,
        match_query: &str,
        limit: usize,
        branch: &str,
        content_type: Option<Granularity>,
        file_patterns: &[String],
    ) -> Result<Vec<FtsHit>> {
        if match_query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let match_query = match_query.to_string();
        let branch = branch.to_string();
        let globs: Vec<String> = file_patterns.iter().flat_map(|p| glob_to_sql(p)).collect();

        self.db
            .query(move |conn| {
                let mut sql = String::from(
                    "SELECT content_id, content_type, file_path, name, content, rank \
                     FROM fts_content WHERE fts_content MATCH ? AND branch = ?",
                );
                let mut values: Vec<&dyn rusqlite::ToSql> = vec![&match_query, &branch];

                let type_str = content_type.map(|t| t.as_str().to_string());
                if let Some(ref t) = type_str {
                    sql.push_str(" AND content_type = ?");
                    values.push(t);
                }

                if !globs.is_empty() {
                    let clause = vec!["file_path GLOB ?"; globs.len()].join(" OR ");
                    sql.push_str(&format!(" AND ({clause})"));
                    for glob in &globs {
                        values.push(glob);
                    }
                }

                sql.push_str(" ORDER BY rank LIMIT ?");
                let limit = limit as i64;
                values.push(&limit);

                let mut stmt = conn.prepare(&sql)?;
                let hits = stmt
                    .query_map(values.as_slice(), |row| {
                        let content_type: String = row.get(1)?;
                        Ok(FtsHit {
                            content_id: row.get(0)?,
                            content_type: Granularity::parse(&content_type)
                                .unwrap_or(Granularity::Chunk),
                            file_path: row.get(2)?,
                            name: row.get(3)?,
                            content: row.get(4)?,
                            rank: row.get(5)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(hits)
            })
            .await
    }
}

/// Translate a `**`-style glob into SQLite GLOB patterns.
///
/// SQLite's `*` already crosses path separators, so `**` collapses to `*`.
/// A leading `**/` expands into two patterns so both root-level and nested
/// paths match.
pub fn glob_to_sql(pattern: &str) -> Vec<String> {
    if let Some(suffix) = pattern.strip_prefix("**/") {
        let suffix = suffix.replace("**", "*");
        vec![suffix.clone(), format!("*/{suffix}")]
    } else {
        vec![pattern.replace("**", "*")]
    }
}

/// Turn free text into a safe FTS5 match expression (implicit AND of quoted
/// terms). The rewriter produces its own `OR`-grouped expressions; this is
/// for the unrewritten path.
pub fn sanitize_match_query(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" ")
}
