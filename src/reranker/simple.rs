//! Heuristic reranker: initial score, file-path matches, identifier
//! frequency.

use async_trait::async_trait;

use crate::error::Result;
use crate::reranker::Reranker;
use crate::reranker::sort_by_score;
use crate::reranker::tokenize;
use crate::types::RankedItem;

const PATH_MATCH_BONUS: f32 = 0.5;
const FREQUENCY_BONUS: f32 = 0.1;
const MAX_FREQUENCY: usize = 10;

/// Cheap rule-based reranker, no I/O.
#[derive(Debug, Default)]
pub struct SimpleReranker;

impl SimpleReranker {
    pub fn new() -> Self {
        Self
    }

    fn score(item: &RankedItem, query_terms: &[String]) -> f32 {
        if query_terms.is_empty() {
            return item.score;
        }

        let path = item.file_path.to_lowercase();
        let path_matches = query_terms.iter().filter(|t| path.contains(*t)).count();
        let path_ratio = path_matches as f32 / query_terms.len() as f32;

        let content_tokens = tokenize(&item.content);
        let frequency: usize = query_terms
            .iter()
            .map(|term| content_tokens.iter().filter(|t| *t == term).count())
            .sum();
        let frequency = frequency.min(MAX_FREQUENCY) as f32;

        item.score * (1.0 + PATH_MATCH_BONUS * path_ratio + FREQUENCY_BONUS * frequency)
    }
}

#[async_trait]
impl Reranker for SimpleReranker {
    fn name(&self) -> &'static str {
        "simple"
    }

    async fn rerank(
        &self,
        mut items: Vec<RankedItem>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RankedItem>> {
        let query_terms = tokenize(query);
        for item in &mut items {
            item.score = Self::score(item, &query_terms);
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

    fn item(id: &str, file_path: &str, content: &str, score: f32) -> RankedItem {
        RankedItem {
            id: id.to_string(),
            content: content.to_string(),
            file_path: file_path.to_string(),
            score,
            granularity: Granularity::Symbol,
            start_line: Some(1),
            end_line: Some(5),
        }
    }

    #[tokio::test]
    async fn path_match_beats_equal_score() {
        let reranker = SimpleReranker::new();
        let items = vec![
            item("a", "src/db/pool.ts", "function poolInit() {}", 1.0),
            item("b", "src/auth/session.ts", "function sessionInit() {}", 1.0),
        ];
        let ranked = reranker.rerank(items, "auth session", 10).await.unwrap();
        assert_eq!(ranked[0].id, "b");
    }

    #[tokio::test]
    async fn term_frequency_breaks_ties() {
        let reranker = SimpleReranker::new();
        let items = vec![
            item("a", "x.ts", "retry once", 1.0),
            item("b", "y.ts", "retry retry retry backoff retry", 1.0),
        ];
        let ranked = reranker.rerank(items, "retry", 10).await.unwrap();
        assert_eq!(ranked[0].id, "b");
    }

    #[tokio::test]
    async fn truncates_to_limit() {
        let reranker = SimpleReranker::new();
        let items = (0..5)
            .map(|i| item(&format!("i{i}"), "f.ts", "content", 1.0))
            .collect();
        let ranked = reranker.rerank(items, "content", 2).await.unwrap();
        assert_eq!(ranked.len(), 2);
    }
}
