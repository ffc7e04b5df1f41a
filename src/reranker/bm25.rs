//! BM25 reranker: recomputes BM25 over the candidate set.
//!
//! Parameters follow the usual defaults (k1 = 1.2, b = 0.75); the corpus is
//! just the candidates, so document frequencies adapt to the result set.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::reranker::Reranker;
use crate::reranker::sort_by_score;
use crate::reranker::tokenize;
use crate::types::RankedItem;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Candidate-set BM25 scorer.
#[derive(Debug, Default)]
pub struct Bm25Reranker;

impl Bm25Reranker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reranker for Bm25Reranker {
    fn name(&self) -> &'static str {
        "bm25"
    }

    async fn rerank(
        &self,
        mut items: Vec<RankedItem>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RankedItem>> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || items.is_empty() {
            items.truncate(limit);
            return Ok(items);
        }

        let docs: Vec<Vec<String>> = items.iter().map(|i| tokenize(&i.content)).collect();
        let doc_count = docs.len() as f32;
        let avg_len =
            docs.iter().map(|d| d.len()).sum::<usize>() as f32 / doc_count.max(1.0);

        // Document frequency per query term.
        let mut df: HashMap<&str, f32> = HashMap::new();
        for term in &query_terms {
            let n = docs
                .iter()
                .filter(|doc| doc.iter().any(|t| t == term))
                .count() as f32;
            df.insert(term.as_str(), n);
        }

        for (item, doc) in items.iter_mut().zip(&docs) {
            let doc_len = doc.len() as f32;
            let mut score = 0.0f32;
            for term in &query_terms {
                let tf = doc.iter().filter(|t| *t == term).count() as f32;
                if tf == 0.0 {
                    continue;
                }
                let n = df[term.as_str()];
                let idf = ((doc_count - n + 0.5) / (n + 0.5) + 1.0).ln();
                let denom = tf + K1 * (1.0 - B + B * doc_len / avg_len.max(1.0));
                score += idf * tf * (K1 + 1.0) / denom;
            }
            item.score = score;
        }

        sort_by_score(&mut items);
        items.truncate(limit);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Granularity;

    fn item(id: &str, content: &str, score: f32) -> RankedItem {
        RankedItem {
            id: id.to_string(),
            content: content.to_string(),
            file_path: format!("src/{id}.ts"),
            score,
            granularity: Granularity::Symbol,
            start_line: Some(1),
            end_line: Some(3),
        }
    }

    #[tokio::test]
    async fn matching_content_outranks_initial_score() {
        let reranker = Bm25Reranker::new();
        let items = vec![
            item("alpha", "function alpha() { return 1; }", 5.0),
            item("beta", "function beta() { return beta_result; }", 0.1),
        ];
        let ranked = reranker.rerank(items, "beta result", 10).await.unwrap();
        assert_eq!(ranked[0].id, "beta");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[tokio::test]
    async fn no_query_terms_keeps_order() {
        let reranker = Bm25Reranker::new();
        let items = vec![item("a", "alpha", 2.0), item("b", "beta", 1.0)];
        let ranked = reranker.rerank(items, "!!!", 10).await.unwrap();
        assert_eq!(ranked[0].id, "a");
        assert_eq!(ranked[0].score, 2.0);
    }

    #[tokio::test]
    async fn rarer_terms_weigh_more() {
        let reranker = Bm25Reranker::new();
        let items = vec![
            item("common", "parse parse shared shared", 1.0),
            item("rare", "parse unique_token shared", 1.0),
            item("other", "parse shared filler", 1.0),
        ];
        let ranked = reranker
            .rerank(items, "unique_token", 10)
            .await
            .unwrap();
        assert_eq!(ranked[0].id, "rare");
    }
}
