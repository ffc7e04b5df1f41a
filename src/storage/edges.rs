//! Edge row storage.
//!
//! Edges connect symbols; the repomap module consumes them for PageRank.

use std::sync::Arc;

use rusqlite::Connection;
use rusqlite::params;

use crate::error::Result;
use crate::storage::SqliteStore;
use crate::types::Edge;
use crate::types::EdgeKind;

/// CRUD over the `edges` table.
pub struct EdgeStore {
    db: Arc<SqliteStore>,
}

impl EdgeStore {
    pub fn new(db: Arc<SqliteStore>) -> Self {
        Self { db }
    }

    /// Insert a batch of edges inside an open transaction.
    pub fn insert_batch_tx(conn: &Connection, edges: &[Edge]) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            "INSERT OR REPLACE INTO edges \
             (source_symbol_id, target_symbol_id, kind, branch, confidence) \
             VALUES (?, ?, ?, ?, ?)",
        )?;
        for edge in edges {
            stmt.execute(params![
                edge.source_symbol_id,
                edge.target_symbol_id,
                edge.kind.as_str(),
                edge.branch,
                edge.confidence as f64,
            ])?;
        }
        Ok(())
    }

    /// Delete edges whose endpoint is any of the given symbols, on a branch,
    /// inside an open transaction.
    pub fn delete_by_symbol_ids_tx(
        conn: &Connection,
        symbol_ids: &[String],
        branch: &str,
    ) -> Result<usize> {
        if symbol_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; symbol_ids.len()].join(", ");
        let sql = format!(
            "DELETE FROM edges WHERE branch = ? AND \
             (source_symbol_id IN ({placeholders}) OR target_symbol_id IN ({placeholders}))"
        );
        let mut values: Vec<&dyn rusqlite::ToSql> = vec![&branch];
        for id in symbol_ids {
            values.push(id);
        }
        for id in symbol_ids {
            values.push(id);
        }
        let count = conn.execute(&sql, values.as_slice())?;
        Ok(count)
    }

    /// Delete every edge on a branch inside an open transaction.
    pub fn delete_branch_tx(conn: &Connection, branch: &str) -> Result<usize> {
        let count = conn.execute("DELETE FROM edges WHERE branch = ?", params![branch])?;
        Ok(count)
    }

    /// Insert a batch of edges.
    pub async fn insert_batch(&self, edges: Vec<Edge>) -> Result<()> {
        if edges.is_empty() {
            return Ok(());
        }
        self.db
            .transaction(move |conn| Self::insert_batch_tx(conn, &edges))
            .await
    }

    /// All edges on a branch.
    pub async fn list(&self, branch: &str) -> Result<Vec<Edge>> {
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT source_symbol_id, target_symbol_id, kind, branch, confidence \
                     FROM edges WHERE branch = ?",
                )?;
                let edges = stmt
                    .query_map(params![branch], |row| {
                        let kind: String = row.get(2)?;
                        Ok(Edge {
                            source_symbol_id: row.get(0)?,
                            target_symbol_id: row.get(1)?,
                            kind: EdgeKind::parse(&kind).unwrap_or(EdgeKind::References),
                            branch: row.get(3)?,
                            confidence: row.get::<_, f64>(4)? as f32,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(edges)
            })
            .await
    }

    /// Total edges on a branch.
    pub async fn count(&self, branch: &str) -> Result<i64> {
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM edges WHERE branch = ?",
                    params![branch],
                    |row| row.get(0),
                )?)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(source: &str, target: &str, kind: EdgeKind) -> Edge {
        Edge {
            source_symbol_id: source.to_string(),
            target_symbol_id: target.to_string(),
            kind,
            branch: "main".to_string(),
            confidence: 1.0,
        }
    }

    #[tokio::test]
    async fn insert_and_list() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let edges = EdgeStore::new(db);

        edges
            .insert_batch(vec![
                edge("a", "b", EdgeKind::Imports),
                edge("b", "c", EdgeKind::Calls),
            ])
            .await
            .unwrap();

        assert_eq!(edges.count("main").await.unwrap(), 2);
        assert_eq!(edges.count("dev").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_by_endpoint_removes_both_directions() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let edges = EdgeStore::new(db.clone());

        edges
            .insert_batch(vec![
                edge("a", "b", EdgeKind::Imports),
                edge("c", "a", EdgeKind::Calls),
                edge("c", "d", EdgeKind::Calls),
            ])
            .await
            .unwrap();

        db.transaction(|conn| {
            EdgeStore::delete_by_symbol_ids_tx(conn, &["a".to_string()], "main")?;
            Ok(())
        })
        .await
        .unwrap();

        let remaining = edges.list("main").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].source_symbol_id, "c");
        assert_eq!(remaining[0].target_symbol_id, "d");
    }
}
