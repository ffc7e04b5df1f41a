//! Reranking: second-stage scoring over a short candidate list.
//!
//! Rerankers receive the fused, ranked items and return the same shape with
//! `score` replaced by their own relevance estimate. The searcher snapshots
//! line ranges around the call because rerankers are free to drop them.

pub mod bm25;
pub mod remote;
pub mod simple;

pub use bm25::Bm25Reranker;
pub use remote::RemoteReranker;
pub use simple::SimpleReranker;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RerankerConfig;
use crate::config::RerankerKind;
use crate::error::Result;
use crate::types::RankedItem;

/// Second-stage scorer.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this reranker can run (e.g. credentials present).
    fn available(&self) -> bool {
        true
    }

    /// Reorder `items` by relevance to `query`, truncated to `limit`.
    async fn rerank(
        &self,
        items: Vec<RankedItem>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RankedItem>>;
}

/// Build the reranker for a selector.
pub fn for_kind(kind: RerankerKind, config: &RerankerConfig) -> Arc<dyn Reranker> {
    match kind {
        RerankerKind::Simple => Arc::new(SimpleReranker::new()),
        RerankerKind::Bm25 => Arc::new(Bm25Reranker::new()),
        RerankerKind::Remote => Arc::new(RemoteReranker::from_env(config)),
    }
}

/// Lower-cased identifier tokens of a text.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Sort best-first by score, stable for equal scores.
pub(crate) fn sort_by_score(items: &mut [RankedItem]) {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
