//! Symbol row storage.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::Connection;
use rusqlite::Row;
use rusqlite::params;

use crate::error::Result;
use crate::storage::OptionalExt;
use crate::storage::SqliteStore;
use crate::types::Symbol;
use crate::types::SymbolKind;

/// CRUD over the `symbols` table.
///
/// Per-file replacement (delete then insert) composes with the other stores
/// inside one [`SqliteStore::transaction`] via the `_tx` functions.
pub struct SymbolStore {
    db: Arc<SqliteStore>,
}

impl SymbolStore {
    pub fn new(db: Arc<SqliteStore>) -> Self {
        Self { db }
    }

    /// Insert a batch of symbols inside an open transaction.
    pub fn insert_batch_tx(conn: &Connection, symbols: &[Symbol]) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            "INSERT OR REPLACE INTO symbols (
                id, branch, name, qualified_name, kind, language, file_path,
                start_line, end_line, content, signature, docstring,
                content_hash, is_external, updated_at, revision_id,
                embedding_model_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for symbol in symbols {
            stmt.execute(params![
                symbol.id,
                symbol.branch,
                symbol.name,
                symbol.qualified_name,
                symbol.kind.as_str(),
                symbol.language,
                symbol.file_path,
                symbol.start_line,
                symbol.end_line,
                symbol.content,
                symbol.signature,
                symbol.docstring,
                symbol.content_hash,
                symbol.is_external as i32,
                symbol.updated_at,
                symbol.revision_id,
                symbol.embedding_model_id,
            ])?;
        }
        Ok(())
    }

    /// Delete all symbols for a file on a branch inside an open transaction.
    pub fn delete_by_file_tx(conn: &Connection, file_path: &str, branch: &str) -> Result<usize> {
        let count = conn.execute(
            "DELETE FROM symbols WHERE file_path = ? AND branch = ?",
            params![file_path, branch],
        )?;
        Ok(count)
    }

    /// Delete every symbol on a branch inside an open transaction.
    pub fn delete_branch_tx(conn: &Connection, branch: &str) -> Result<usize> {
        let count = conn.execute("DELETE FROM symbols WHERE branch = ?", params![branch])?;
        Ok(count)
    }

    /// Ids of the symbols currently stored for a file on a branch.
    pub async fn ids_by_file(&self, file_path: &str, branch: &str) -> Result<Vec<String>> {
        let file_path = file_path.to_string();
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id FROM symbols WHERE file_path = ? AND branch = ?",
                )?;
                let ids = stmt
                    .query_map(params![file_path, branch], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await
    }

    /// All symbols for a file on a branch, ordered by start line.
    pub async fn get_by_file(&self, file_path: &str, branch: &str) -> Result<Vec<Symbol>> {
        let file_path = file_path.to_string();
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {COLUMNS} FROM symbols \
                     WHERE file_path = ? AND branch = ? ORDER BY start_line"
                ))?;
                let symbols = stmt
                    .query_map(params![file_path, branch], symbol_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(symbols)
            })
            .await
    }

    /// Look up one symbol by id on a branch.
    pub async fn get_by_id(&self, id: &str, branch: &str) -> Result<Option<Symbol>> {
        let id = id.to_string();
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                conn.query_row(
                    &format!("SELECT {COLUMNS} FROM symbols WHERE id = ? AND branch = ?"),
                    params![id, branch],
                    symbol_from_row,
                )
                .optional()
            })
            .await
    }

    /// Resolve a set of ids to symbols, keyed by id.
    pub async fn get_by_ids(
        &self,
        ids: &[String],
        branch: &str,
    ) -> Result<HashMap<String, Symbol>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids = ids.to_vec();
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let sql = format!(
                    "SELECT {COLUMNS} FROM symbols WHERE branch = ? AND id IN ({placeholders})"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut values: Vec<&dyn rusqlite::ToSql> = vec![&branch];
                for id in &ids {
                    values.push(id);
                }
                let symbols = stmt
                    .query_map(values.as_slice(), symbol_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(symbols.into_iter().map(|s| (s.id.clone(), s)).collect())
            })
            .await
    }

    /// Total symbols on a branch.
    pub async fn count(&self, branch: &str) -> Result<i64> {
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM symbols WHERE branch = ?",
                    params![branch],
                    |row| row.get(0),
                )?)
            })
            .await
    }
}

const COLUMNS: &str = "id, branch, name, qualified_name, kind, language, file_path, \
     start_line, end_line, content, signature, docstring, content_hash, \
     is_external, updated_at, revision_id, embedding_model_id";

fn symbol_from_row(row: &Row<'_>) -> std::result::Result<Symbol, rusqlite::Error> {
    let kind: String = row.get(4)?;
    Ok(Symbol {
        id: row.get(0)?,
        branch: row.get(1)?,
        name: row.get(2)?,
        qualified_name: row.get(3)?,
        kind: SymbolKind::parse(&kind).unwrap_or(SymbolKind::Function),
        language: row.get(5)?,
        file_path: row.get(6)?,
        start_line: row.get(7)?,
        end_line: row.get(8)?,
        content: row.get(9)?,
        signature: row.get(10)?,
        docstring: row.get(11)?,
        content_hash: row.get(12)?,
        is_external: row.get::<_, i32>(13)? != 0,
        updated_at: row.get(14)?,
        revision_id: row.get(15)?,
        embedding_model_id: row.get(16)?,
    })
}

#[cfg(test)]
pub(crate) fn make_symbol(id: &str, name: &str, file_path: &str, branch: &str) -> Symbol {
    Symbol {
        id: id.to_string(),
        name: name.to_string(),
        qualified_name: name.to_string(),
        kind: SymbolKind::Function,
        language: "typescript".to_string(),
        file_path: file_path.to_string(),
        start_line: 1,
        end_line: 3,
        content: format!("function {name}() {{}}"),
        signature: Some(format!("function {name}()")),
        docstring: None,
        content_hash: crate::types::content_hash(name),
        is_external: false,
        branch: branch.to_string(),
        updated_at: crate::types::now_unix(),
        revision_id: None,
        embedding_model_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (Arc<SqliteStore>, SymbolStore) {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        (db.clone(), SymbolStore::new(db))
    }

    #[tokio::test]
    async fn insert_and_get_by_file() {
        let (db, symbols) = store().await;
        let batch = vec![
            make_symbol("s1", "alpha", "src/a.ts", "main"),
            make_symbol("s2", "beta", "src/a.ts", "main"),
        ];
        db.transaction(move |conn| SymbolStore::insert_batch_tx(conn, &batch))
            .await
            .unwrap();

        let found = symbols.get_by_file("src/a.ts", "main").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "alpha");
        assert_eq!(symbols.count("main").await.unwrap(), 2);
        assert_eq!(symbols.count("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_is_branch_scoped() {
        let (db, symbols) = store().await;
        let batch = vec![
            make_symbol("s1", "alpha", "src/a.ts", "main"),
            make_symbol("s1", "alpha", "src/a.ts", "dev"),
        ];
        db.transaction(move |conn| SymbolStore::insert_batch_tx(conn, &batch))
            .await
            .unwrap();

        db.transaction(|conn| {
            SymbolStore::delete_by_file_tx(conn, "src/a.ts", "main")?;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(symbols.count("main").await.unwrap(), 0);
        assert_eq!(symbols.count("dev").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_by_ids_resolves_subset() {
        let (db, symbols) = store().await;
        let batch = vec![
            make_symbol("s1", "alpha", "src/a.ts", "main"),
            make_symbol("s2", "beta", "src/b.ts", "main"),
        ];
        db.transaction(move |conn| SymbolStore::insert_batch_tx(conn, &batch))
            .await
            .unwrap();

        let found = symbols
            .get_by_ids(
                &["s2".to_string(), "missing".to_string()],
                "main",
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["s2"].name, "beta");
    }
}
