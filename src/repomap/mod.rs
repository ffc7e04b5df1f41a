//! Repo map: PageRank-based file importance over the symbol edge graph.
//!
//! Consumes the `edges` table, aggregates symbol edges to a file-level
//! graph, ranks files and persists the result to `repo_map`. The search
//! core does not depend on this module.

pub mod pagerank;

pub use pagerank::PageRanker;

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use petgraph::graph::DiGraph;
use petgraph::graph::NodeIndex;
use rusqlite::params;

use crate::error::Result;
use crate::storage::EdgeStore;
use crate::storage::SqliteStore;
use crate::storage::SymbolStore;
use crate::types::EdgeKind;
use crate::types::now_unix;

/// One ranked file.
#[derive(Debug, Clone)]
pub struct RankedFile {
    pub file_path: String,
    pub rank: f64,
}

/// Builds and persists the repo map for one branch.
pub struct RepoMap {
    db: Arc<SqliteStore>,
    symbols: Arc<SymbolStore>,
    edges: Arc<EdgeStore>,
    ranker: PageRanker,
}

impl RepoMap {
    pub fn new(db: Arc<SqliteStore>, symbols: Arc<SymbolStore>, edges: Arc<EdgeStore>) -> Self {
        Self {
            db,
            symbols,
            edges,
            ranker: PageRanker::default(),
        }
    }

    pub fn with_ranker(mut self, ranker: PageRanker) -> Self {
        self.ranker = ranker;
        self
    }

    /// Recompute the repo map from the current edge set and persist it.
    pub async fn rebuild(&self, branch: &str) -> Result<Vec<RankedFile>> {
        let edges = self.edges.list(branch).await?;

        // Resolve edge endpoints to file paths.
        let symbol_ids: Vec<String> = edges
            .iter()
            .flat_map(|e| [e.source_symbol_id.clone(), e.target_symbol_id.clone()])
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let symbol_map = self.symbols.get_by_ids(&symbol_ids, branch).await?;

        let mut graph: DiGraph<String, f64> = DiGraph::new();
        let mut node_of: HashMap<String, NodeIndex> = HashMap::new();
        let mut node = |graph: &mut DiGraph<String, f64>,
                        node_of: &mut HashMap<String, NodeIndex>,
                        path: &str| {
            *node_of
                .entry(path.to_string())
                .or_insert_with(|| graph.add_node(path.to_string()))
        };

        for edge in &edges {
            let (Some(source), Some(target)) = (
                symbol_map.get(&edge.source_symbol_id),
                symbol_map.get(&edge.target_symbol_id),
            ) else {
                continue;
            };
            if source.file_path == target.file_path {
                continue;
            }
            let from = node(&mut graph, &mut node_of, &source.file_path);
            let to = node(&mut graph, &mut node_of, &target.file_path);
            let weight = edge_weight(edge.kind) * edge.confidence as f64;
            graph.add_edge(from, to, weight);
        }

        let ranks = self.ranker.rank(&graph, &HashMap::new());
        let mut ranked: Vec<RankedFile> = ranks
            .into_iter()
            .map(|(file_path, rank)| RankedFile { file_path, rank })
            .collect();
        ranked.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap_or(std::cmp::Ordering::Equal));

        // Persist, replacing the branch's previous map.
        let branch_owned = branch.to_string();
        let rows: Vec<(String, f64)> = ranked
            .iter()
            .map(|r| (r.file_path.clone(), r.rank))
            .collect();
        self.db
            .transaction(move |conn| {
                conn.execute("DELETE FROM repo_map WHERE branch = ?", [&branch_owned])?;
                let now = now_unix();
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO repo_map (file_path, branch, rank, updated_at) VALUES (?, ?, ?, ?)",
                )?;
                for (file_path, rank) in &rows {
                    stmt.execute(params![file_path, branch_owned, rank, now])?;
                }
                Ok(())
            })
            .await?;

        Ok(ranked)
    }

    /// Read the persisted top files for a branch.
    pub async fn top_files(&self, branch: &str, limit: usize) -> Result<Vec<RankedFile>> {
        let branch = branch.to_string();
        self.db
            .query(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT file_path, rank FROM repo_map WHERE branch = ? \
                     ORDER BY rank DESC LIMIT ?",
                )?;
                let rows = stmt
                    .query_map(params![branch, limit as i64], |row| {
                        Ok(RankedFile {
                            file_path: row.get(0)?,
                            rank: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

fn edge_weight(kind: EdgeKind) -> f64 {
    match kind {
        EdgeKind::Imports => 1.0,
        EdgeKind::Extends | EdgeKind::Implements => 0.8,
        EdgeKind::Calls => 0.5,
        EdgeKind::References => 0.3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Edge;
    use crate::types::Symbol;
    use crate::types::SymbolKind;

    fn symbol(id: &str, file_path: &str) -> Symbol {
        Symbol {
            id: id.to_string(),
            name: id.to_string(),
            qualified_name: id.to_string(),
            kind: SymbolKind::Function,
            language: "typescript".to_string(),
            file_path: file_path.to_string(),
            start_line: 1,
            end_line: 2,
            content: format!("function {id}() {{}}"),
            signature: None,
            docstring: None,
            content_hash: crate::types::content_hash(id),
            is_external: false,
            branch: "main".to_string(),
            updated_at: 0,
            revision_id: None,
            embedding_model_id: None,
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            source_symbol_id: source.to_string(),
            target_symbol_id: target.to_string(),
            kind: EdgeKind::Imports,
            branch: "main".to_string(),
            confidence: 1.0,
        }
    }

    #[tokio::test]
    async fn rebuild_ranks_imported_files_higher() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let symbols = Arc::new(SymbolStore::new(db.clone()));
        let edges = Arc::new(EdgeStore::new(db.clone()));

        let batch = vec![
            symbol("a", "src/app.ts"),
            symbol("b", "src/core.ts"),
            symbol("c", "src/cli.ts"),
        ];
        db.transaction(move |conn| SymbolStore::insert_batch_tx(conn, &batch))
            .await
            .unwrap();
        // Both app and cli import core.
        edges
            .insert_batch(vec![edge("a", "b"), edge("c", "b")])
            .await
            .unwrap();

        let repomap = RepoMap::new(db, symbols, edges);
        let ranked = repomap.rebuild("main").await.unwrap();
        assert_eq!(ranked[0].file_path, "src/core.ts");

        let top = repomap.top_files("main", 2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].file_path, "src/core.ts");
    }

    #[tokio::test]
    async fn empty_edge_set_yields_empty_map() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let symbols = Arc::new(SymbolStore::new(db.clone()));
        let edges = Arc::new(EdgeStore::new(db.clone()));

        let repomap = RepoMap::new(db, symbols, edges);
        let ranked = repomap.rebuild("main").await.unwrap();
        assert!(ranked.is_empty());
        assert!(repomap.top_files("main", 10).await.unwrap().is_empty());
    }
}
