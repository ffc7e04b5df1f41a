//! Embedding vector storage.
//!
//! One row per content id; embeddings are contiguous little-endian IEEE-754
//! f32 values, base64-encoded. Similarity is cosine over precomputed norms,
//! computed by a brute-force scan (workspace-scale row counts).

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rusqlite::Connection;
use rusqlite::params;

use crate::error::Result;
use crate::storage::OptionalExt;
use crate::storage::SqliteStore;
use crate::types::Granularity;
use crate::types::VectorHit;
use crate::types::now_unix;

/// Store over the `js_vectors` table.
pub struct VectorStore {
    db: Arc<SqliteStore>,
}

impl VectorStore {
    pub fn new(db: Arc<SqliteStore>) -> Self {
        Self { db }
    }

    /// Upsert one vector inside an open transaction.
    pub fn upsert_tx(
        conn: &Connection,
        content_id: &str,
        embedding: &[f32],
        granularity: Granularity,
    ) -> Result<()> {
        let encoded = encode_embedding(embedding);
        let norm = norm(embedding);
        conn.execute(
            "INSERT OR REPLACE INTO js_vectors (content_id, embedding, granularity, norm, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![content_id, encoded, granularity.as_str(), norm as f64, now_unix()],
        )?;
        Ok(())
    }

    /// Upsert one vector.
    pub async fn upsert(
        &self,
        content_id: &str,
        embedding: &[f32],
        granularity: Granularity,
    ) -> Result<()> {
        let content_id = content_id.to_string();
        let embedding = embedding.to_vec();
        self.db
            .query(move |conn| Self::upsert_tx(conn, &content_id, &embedding, granularity))
            .await
    }

    /// Upsert a batch of vectors in one transaction.
    pub async fn upsert_batch(
        &self,
        vectors: Vec<(String, Vec<f32>, Granularity)>,
    ) -> Result<()> {
        if vectors.is_empty() {
            return Ok(());
        }
        self.db
            .transaction(move |conn| {
                for (content_id, embedding, granularity) in &vectors {
                    Self::upsert_tx(conn, content_id, embedding, *granularity)?;
                }
                Ok(())
            })
            .await
    }

    /// Read one vector with its granularity.
    pub async fn get(&self, content_id: &str) -> Result<Option<(Vec<f32>, Granularity)>> {
        let content_id = content_id.to_string();
        self.db
            .query(move |conn| {
                conn.query_row(
                    "SELECT embedding, granularity FROM js_vectors WHERE content_id = ?",
                    params![content_id],
                    |row| {
                        let encoded: String = row.get(0)?;
                        let granularity: String = row.get(1)?;
                        Ok((encoded, granularity))
                    },
                )
                .optional()?
                .map(|(encoded, granularity)| {
                    Ok((
                        decode_embedding(&encoded)?,
                        Granularity::parse(&granularity).unwrap_or(Granularity::Chunk),
                    ))
                })
                .transpose()
            })
            .await
    }

    /// Read vectors for a set of content ids.
    pub async fn get_many(
        &self,
        content_ids: &[String],
    ) -> Result<Vec<(String, Vec<f32>, Granularity)>> {
        if content_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = content_ids.to_vec();
        self.db
            .query(move |conn| {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let sql = format!(
                    "SELECT content_id, embedding, granularity FROM js_vectors \
                     WHERE content_id IN ({placeholders})"
                );
                let mut stmt = conn.prepare(&sql)?;
                let values: Vec<&dyn rusqlite::ToSql> =
                    ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
                let rows = stmt
                    .query_map(values.as_slice(), |row| {
                        let id: String = row.get(0)?;
                        let encoded: String = row.get(1)?;
                        let granularity: String = row.get(2)?;
                        Ok((id, encoded, granularity))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let mut vectors = Vec::with_capacity(rows.len());
                for (id, encoded, granularity) in rows {
                    vectors.push((
                        id,
                        decode_embedding(&encoded)?,
                        Granularity::parse(&granularity).unwrap_or(Granularity::Chunk),
                    ));
                }
                Ok(vectors)
            })
            .await
    }

    /// Delete vectors by content id inside an open transaction.
    pub fn delete_by_ids_tx(conn: &Connection, content_ids: &[String]) -> Result<usize> {
        if content_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; content_ids.len()].join(", ");
        let sql = format!("DELETE FROM js_vectors WHERE content_id IN ({placeholders})");
        let values: Vec<&dyn rusqlite::ToSql> = content_ids
            .iter()
            .map(|id| id as &dyn rusqlite::ToSql)
            .collect();
        let count = conn.execute(&sql, values.as_slice())?;
        Ok(count)
    }

    /// Wipe every vector row (embedding model rotation).
    pub async fn delete_all(&self) -> Result<usize> {
        self.db
            .query(|conn| Ok(conn.execute("DELETE FROM js_vectors", [])?))
            .await
    }

    /// Total vector rows.
    pub async fn count(&self) -> Result<i64> {
        self.db
            .query(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM js_vectors", [], |row| row.get(0))?)
            })
            .await
    }

    /// Nearest neighbors by cosine similarity.
    ///
    /// The vector store has no file-path predicate; callers over-fetch and
    /// post-filter by path.
    pub async fn search(
        &self,
        query: &[f32],
        limit: usize,
        granularity: Option<Granularity>,
    ) -> Result<Vec<VectorHit>> {
        let query = query.to_vec();
        let query_norm = norm(&query);
        if query_norm == 0.0 {
            return Ok(Vec::new());
        }

        self.db
            .query(move |conn| {
                let (sql, filter) = match granularity {
                    Some(g) => (
                        "SELECT content_id, embedding, granularity, norm FROM js_vectors \
                         WHERE granularity = ?",
                        Some(g.as_str().to_string()),
                    ),
                    None => (
                        "SELECT content_id, embedding, granularity, norm FROM js_vectors",
                        None,
                    ),
                };

                let mut stmt = conn.prepare(sql)?;
                let map_row = |row: &rusqlite::Row<'_>| {
                    let id: String = row.get(0)?;
                    let encoded: String = row.get(1)?;
                    let granularity: String = row.get(2)?;
                    let norm: f64 = row.get(3)?;
                    Ok((id, encoded, granularity, norm))
                };
                let rows = match &filter {
                    Some(g) => stmt.query_map(params![g], map_row)?.collect::<std::result::Result<Vec<_>, _>>()?,
                    None => stmt.query_map([], map_row)?.collect::<std::result::Result<Vec<_>, _>>()?,
                };

                let mut hits = Vec::with_capacity(rows.len());
                for (id, encoded, granularity, row_norm) in rows {
                    if row_norm == 0.0 {
                        continue;
                    }
                    let embedding = decode_embedding(&encoded)?;
                    if embedding.len() != query.len() {
                        // Stale row from a different model dimension; skip.
                        continue;
                    }
                    let dot: f32 = embedding.iter().zip(&query).map(|(a, b)| a * b).sum();
                    let similarity = dot / (row_norm as f32 * query_norm);
                    hits.push(VectorHit {
                        content_id: id,
                        granularity: Granularity::parse(&granularity)
                            .unwrap_or(Granularity::Chunk),
                        similarity,
                    });
                }

                hits.sort_by(|a, b| {
                    b.similarity
                        .partial_cmp(&a.similarity)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                hits.truncate(limit);
                Ok(hits)
            })
            .await
    }
}

/// Encode an embedding as base64 over little-endian f32 bytes.
pub fn encode_embedding(embedding: &[f32]) -> String {
    let bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
    BASE64.encode(bytes)
}

/// Decode a base64 little-endian f32 blob.
pub fn decode_embedding(encoded: &str) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| crate::error::CodeIntelErr::SqliteOp {
            operation: "decode embedding".to_string(),
            cause: e.to_string(),
        })?;
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basis(dim: usize, index: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[index] = 1.0;
        v
    }

    #[test]
    fn embedding_round_trip() {
        let original = vec![0.1234, -5.6789, 1.0, 0.0];
        let decoded = decode_embedding(&encode_embedding(&original)).unwrap();
        assert_eq!(original.len(), decoded.len());
        for (a, b) in original.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn exact_basis_match_is_similarity_one() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let vectors = VectorStore::new(db);

        vectors
            .upsert("a", &basis(4, 0), Granularity::File)
            .await
            .unwrap();
        vectors
            .upsert("b", &basis(4, 1), Granularity::File)
            .await
            .unwrap();

        let hits = vectors.search(&basis(4, 0), 10, None).await.unwrap();
        assert_eq!(hits[0].content_id, "a");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!(hits[1].similarity.abs() < 1e-6);
    }

    #[tokio::test]
    async fn granularity_filter() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let vectors = VectorStore::new(db);

        vectors
            .upsert("sym", &basis(4, 0), Granularity::Symbol)
            .await
            .unwrap();
        vectors
            .upsert("chk", &basis(4, 0), Granularity::Chunk)
            .await
            .unwrap();

        let hits = vectors
            .search(&basis(4, 0), 10, Some(Granularity::Symbol))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content_id, "sym");
    }

    #[tokio::test]
    async fn model_rotation_wipes_all() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let vectors = VectorStore::new(db);

        vectors
            .upsert("a", &basis(4, 0), Granularity::Chunk)
            .await
            .unwrap();
        vectors
            .upsert("b", &basis(4, 1), Granularity::Chunk)
            .await
            .unwrap();
        assert_eq!(vectors.count().await.unwrap(), 2);

        assert_eq!(vectors.delete_all().await.unwrap(), 2);
        assert_eq!(vectors.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dimension_mismatch_rows_skipped() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let vectors = VectorStore::new(db);

        vectors
            .upsert("old", &basis(8, 0), Granularity::Chunk)
            .await
            .unwrap();
        vectors
            .upsert("new", &basis(4, 0), Granularity::Chunk)
            .await
            .unwrap();

        let hits = vectors.search(&basis(4, 0), 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content_id, "new");
    }

    #[tokio::test]
    async fn get_many_returns_present_subset() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let vectors = VectorStore::new(db);

        vectors
            .upsert("a", &basis(4, 0), Granularity::Chunk)
            .await
            .unwrap();

        let got = vectors
            .get_many(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, "a");
    }
}
