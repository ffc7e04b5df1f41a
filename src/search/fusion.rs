//! Reciprocal Rank Fusion over multi-granular lexical and vector hits.
//!
//! Each source list is split by granularity into buckets; an item
//! contributes `weight / (k + rank_in_bucket + 1)` per bucket it appears in,
//! and scores for the same content id are summed across buckets.

use std::collections::HashMap;

use regex::Regex;

use crate::config::SearchConfig;
use crate::types::Granularity;
use crate::types::RankedItem;

/// One retrieval hit normalized for fusion, ordered best-first per source.
#[derive(Debug, Clone)]
pub struct FusionCandidate {
    pub content_id: String,
    pub granularity: Granularity,
    pub file_path: String,
    pub content: String,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
}

fn weight_for(config: &SearchConfig, granularity: Granularity) -> f32 {
    match granularity {
        Granularity::Symbol => config.symbol_weight,
        Granularity::Chunk => config.chunk_weight,
        Granularity::File => config.file_weight,
    }
}

/// Fuse the lexical and vector candidate lists.
///
/// When the same content id shows up in several buckets its scores sum, and
/// metadata missing from the first occurrence (line ranges) is backfilled
/// from later ones. Output is best-first, truncated to `limit`.
pub fn fuse(
    fts: &[FusionCandidate],
    vector: &[FusionCandidate],
    config: &SearchConfig,
    limit: usize,
) -> Vec<RankedItem> {
    let k = config.rrf_k;
    let mut items: HashMap<String, RankedItem> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for source in [fts, vector] {
        // Split this source into granularity buckets, preserving order.
        let mut bucket_rank: HashMap<Granularity, usize> = HashMap::new();
        for candidate in source {
            let rank = bucket_rank.entry(candidate.granularity).or_insert(0);
            let contribution = weight_for(config, candidate.granularity) / (k + *rank as f32 + 1.0);
            *rank += 1;

            match items.get_mut(&candidate.content_id) {
                Some(item) => {
                    item.score += contribution;
                    // Backfill metadata absent in the first occurrence.
                    if item.start_line.is_none() {
                        item.start_line = candidate.start_line;
                    }
                    if item.end_line.is_none() {
                        item.end_line = candidate.end_line;
                    }
                }
                None => {
                    order.push(candidate.content_id.clone());
                    items.insert(
                        candidate.content_id.clone(),
                        RankedItem {
                            id: candidate.content_id.clone(),
                            content: candidate.content.clone(),
                            file_path: candidate.file_path.clone(),
                            score: contribution,
                            granularity: candidate.granularity,
                            start_line: candidate.start_line,
                            end_line: candidate.end_line,
                        },
                    );
                }
            }
        }
    }

    let mut ranked: Vec<RankedItem> = order
        .into_iter()
        .filter_map(|id| items.remove(&id))
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(limit);
    ranked
}

/// Word-boundary boost for short query tokens.
///
/// Identifier queries like `tx` or `io` are easily diluted by prefix
/// matches; any ranked item whose content contains the token on a word
/// boundary gets its score multiplied.
pub fn apply_short_token_boost(items: &mut Vec<RankedItem>, query: &str, boost: f32) {
    let short_tokens: Vec<&str> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty() && t.len() <= 3)
        .collect();
    if short_tokens.is_empty() {
        return;
    }

    let patterns: Vec<Regex> = short_tokens
        .iter()
        .filter_map(|t| Regex::new(&format!(r"\b{}\b", regex::escape(t))).ok())
        .collect();

    for item in items.iter_mut() {
        if patterns.iter().any(|p| p.is_match(&item.content)) {
            item.score *= boost;
        }
    }

    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, granularity: Granularity, content: &str) -> FusionCandidate {
        FusionCandidate {
            content_id: id.to_string(),
            granularity,
            file_path: format!("src/{id}.ts"),
            content: content.to_string(),
            start_line: Some(1),
            end_line: Some(10),
        }
    }

    fn config() -> SearchConfig {
        SearchConfig::default()
    }

    #[test]
    fn single_source_keeps_order() {
        let fts = vec![
            candidate("a", Granularity::Symbol, "alpha"),
            candidate("b", Granularity::Symbol, "beta"),
        ];
        let ranked = fuse(&fts, &[], &config(), 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, "a");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn appearing_in_both_sources_sums_scores() {
        let fts = vec![
            candidate("both", Granularity::Symbol, "shared"),
            candidate("fts_only", Granularity::Symbol, "lexical"),
        ];
        let vector = vec![
            candidate("vec_only", Granularity::Symbol, "semantic"),
            candidate("both", Granularity::Symbol, "shared"),
        ];
        let ranked = fuse(&fts, &vector, &config(), 10);
        assert_eq!(ranked[0].id, "both");
    }

    #[test]
    fn symbol_weight_dominates_file_weight() {
        // Same rank in their buckets, different granularity weights.
        let fts = vec![
            candidate("file_hit", Granularity::File, "file content"),
            candidate("symbol_hit", Granularity::Symbol, "symbol content"),
        ];
        let ranked = fuse(&fts, &[], &config(), 10);
        assert_eq!(ranked[0].id, "symbol_hit");
    }

    #[test]
    fn metadata_backfilled_from_later_occurrence() {
        let mut fts_candidate = candidate("x", Granularity::Chunk, "content");
        fts_candidate.start_line = None;
        fts_candidate.end_line = None;
        let vector_candidate = candidate("x", Granularity::Chunk, "content");

        let ranked = fuse(&[fts_candidate], &[vector_candidate], &config(), 10);
        assert_eq!(ranked[0].start_line, Some(1));
        assert_eq!(ranked[0].end_line, Some(10));
    }

    #[test]
    fn truncates_to_limit() {
        let fts: Vec<FusionCandidate> = (0..20)
            .map(|i| candidate(&format!("i{i}"), Granularity::Chunk, "c"))
            .collect();
        let ranked = fuse(&fts, &[], &config(), 5);
        assert_eq!(ranked.len(), 5);
    }

    #[test]
    fn short_token_boost_prefers_word_boundary_match() {
        // "tx" as an identifier vs. inside "contextual".
        let fts = vec![
            candidate("noise", Granularity::Symbol, "contextual"),
            candidate("hit", Granularity::Symbol, "tx = 1"),
        ];
        let mut ranked = fuse(&fts, &[], &config(), 10);
        assert_eq!(ranked[0].id, "noise");
        let pre_boost = ranked[1].score;

        apply_short_token_boost(&mut ranked, "tx", 1.5);
        assert_eq!(ranked[0].id, "hit");
        assert!((ranked[0].score - pre_boost * 1.5).abs() < 1e-6);
    }

    #[test]
    fn long_tokens_do_not_boost() {
        let fts = vec![
            candidate("a", Granularity::Symbol, "session handler"),
            candidate("b", Granularity::Symbol, "other"),
        ];
        let mut ranked = fuse(&fts, &[], &config(), 10);
        let scores: Vec<f32> = ranked.iter().map(|i| i.score).collect();
        apply_short_token_boost(&mut ranked, "session", 1.5);
        let after: Vec<f32> = ranked.iter().map(|i| i.score).collect();
        assert_eq!(scores, after);
    }
}
