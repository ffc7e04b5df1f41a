//! Hybrid search: lexical FTS + vector similarity, RRF fusion, boosting,
//! optional rewriting and reranking, result caching.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use serde::Deserialize;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::config::RerankerConfig;
use crate::config::RerankerKind;
use crate::config::SearchConfig;
use crate::error::Result;
use crate::query::QueryRewriter;
use crate::reranker;
use crate::reranker::Reranker;
use crate::search::cache::ContentCache;
use crate::search::cache::canonical_key;
use crate::search::fusion::FusionCandidate;
use crate::search::fusion::apply_short_token_boost;
use crate::search::fusion::fuse;
use crate::storage::ChunkStore;
use crate::storage::FtsStore;
use crate::storage::SymbolStore;
use crate::storage::VectorStore;
use crate::storage::fts::sanitize_match_query;
use crate::types::Chunk;
use crate::types::FileScore;
use crate::types::Granularity;
use crate::types::RankedItem;
use crate::types::Symbol;
use crate::types::VectorHit;

/// Per-call override of the granularity weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GranularityWeights {
    pub symbol: f32,
    pub chunk: f32,
    pub file: f32,
}

/// Options for one search call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub branch: String,
    /// `None` searches every granularity (auto).
    pub granularity: Option<Granularity>,
    /// `0` falls back to the configured default.
    pub limit: usize,
    /// Override of the configured RRF weights.
    pub weights: Option<GranularityWeights>,
    /// Override of the configured RRF constant.
    pub rrf_k: Option<f32>,
    pub path_prefix: Option<String>,
    pub file_patterns: Vec<String>,
    pub enable_rewriting: bool,
    pub enable_reranking: bool,
    pub reranker: RerankerKind,
    pub enable_caching: bool,
    pub skip_cache: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            branch: crate::git::DEFAULT_BRANCH.to_string(),
            granularity: None,
            limit: 0,
            weights: None,
            rrf_k: None,
            path_prefix: None,
            file_patterns: Vec::new(),
            enable_rewriting: true,
            enable_reranking: false,
            reranker: RerankerKind::default(),
            enable_caching: true,
            skip_cache: false,
        }
    }
}

impl SearchOptions {
    pub fn for_branch(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..Self::default()
        }
    }
}

/// Rewriting/reranking details attached to a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub expanded_query: Option<String>,
    pub expansions: HashMap<String, Vec<String>>,
    pub languages: Vec<String>,
    pub reranker: Option<String>,
}

/// Final search result with materialized views.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Fused (and possibly reranked) items, best-first.
    pub ranked: Vec<RankedItem>,
    /// Symbol rows for symbol-granularity items, in ranked order.
    pub symbols: Vec<Symbol>,
    /// Chunk rows for chunk/file-granularity items, in ranked order.
    pub chunks: Vec<Chunk>,
    /// Per-file score sums, best-first.
    pub files: Vec<FileScore>,
    pub from_cache: bool,
    pub metadata: SearchMetadata,
}

#[derive(Serialize)]
struct CacheKey<'a> {
    query: String,
    branch: &'a str,
    path_prefix: Option<&'a str>,
    granularity: &'a str,
    limit: usize,
    weights: Option<GranularityWeights>,
    rrf_k: Option<f32>,
    file_patterns: Vec<String>,
    reranker: Option<&'a str>,
}

/// Multi-granular hybrid searcher over the index stores.
pub struct HybridSearcher {
    symbols: Arc<SymbolStore>,
    chunks: Arc<ChunkStore>,
    fts: Arc<FtsStore>,
    vectors: Arc<VectorStore>,
    config: SearchConfig,
    rewriter: QueryRewriter,
    simple_reranker: Arc<dyn Reranker>,
    bm25_reranker: Arc<dyn Reranker>,
    remote_reranker: Arc<dyn Reranker>,
    cache: Mutex<ContentCache<SearchResponse>>,
}

impl HybridSearcher {
    pub fn new(
        symbols: Arc<SymbolStore>,
        chunks: Arc<ChunkStore>,
        fts: Arc<FtsStore>,
        vectors: Arc<VectorStore>,
        config: SearchConfig,
        reranker_config: &RerankerConfig,
        cache_config: &CacheConfig,
    ) -> Self {
        let rewriter = QueryRewriter::new(config.max_synonyms);
        Self {
            symbols,
            chunks,
            fts,
            vectors,
            config,
            rewriter,
            simple_reranker: reranker::for_kind(RerankerKind::Simple, reranker_config),
            bm25_reranker: reranker::for_kind(RerankerKind::Bm25, reranker_config),
            remote_reranker: reranker::for_kind(RerankerKind::Remote, reranker_config),
            cache: Mutex::new(ContentCache::new(cache_config)),
        }
    }

    /// Hybrid search over both sources. `embedding` absent means
    /// keyword-only.
    pub async fn search(
        &self,
        query: &str,
        embedding: Option<&[f32]>,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        self.search_core(query, embedding, true, options).await
    }

    /// Lexical-only variant.
    pub async fn search_keyword(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        self.search_core(query, None, true, options).await
    }

    /// Vector-only variant.
    pub async fn search_vector(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        self.search_core("", Some(embedding), false, options).await
    }

    /// Drop cached results referencing a file (called after reindexing it).
    pub fn invalidate_file(&self, file_path: &str) -> usize {
        self.lock_cache().invalidate_by_file(file_path)
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    pub fn cache_stats(&self) -> crate::search::cache::CacheStats {
        self.lock_cache().stats()
    }

    async fn search_core(
        &self,
        query: &str,
        embedding: Option<&[f32]>,
        use_fts: bool,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let limit = if options.limit == 0 {
            self.config.limit
        } else {
            options.limit
        };
        let config = self.effective_config(options);

        // Step 1: cache probe.
        let cache_key = self.cache_key(query, limit, options);
        if options.enable_caching && !options.skip_cache {
            if let Some(mut hit) = self.lock_cache().get(&cache_key) {
                hit.from_cache = true;
                return Ok(hit);
            }
        }

        // Step 2: optional rewrite.
        let mut metadata = SearchMetadata::default();
        let mut effective_patterns = options.file_patterns.clone();
        let match_query = if use_fts && options.enable_rewriting && !query.is_empty() {
            let rewritten = self.rewriter.rewrite(query);
            for pattern in &rewritten.file_patterns {
                if !effective_patterns.contains(pattern) {
                    effective_patterns.push(pattern.clone());
                }
            }
            metadata.languages = rewritten.languages;
            metadata.expansions = rewritten.expansions.clone();
            metadata.expanded_query = Some(rewritten.expanded.clone());
            if rewritten.expansions.is_empty() {
                sanitize_match_query(query)
            } else {
                rewritten.expanded
            }
        } else {
            sanitize_match_query(query)
        };

        // Step 3: path filter plumbing.
        if let Some(prefix) = &options.path_prefix {
            let pattern = format!("{prefix}**");
            if !effective_patterns.contains(&pattern) {
                effective_patterns.push(pattern);
            }
        }
        let filters_active = !effective_patterns.is_empty();

        // Step 4: lexical search.
        let fts_candidates = if use_fts && !match_query.is_empty() {
            let hits = self
                .fts
                .search(
                    &match_query,
                    limit * 2,
                    &options.branch,
                    options.granularity,
                    &effective_patterns,
                )
                .await?;
            hits.into_iter()
                .map(|hit| FusionCandidate {
                    content_id: hit.content_id,
                    granularity: hit.content_type,
                    file_path: hit.file_path,
                    content: hit.content,
                    start_line: None,
                    end_line: None,
                })
                .collect()
        } else {
            Vec::new()
        };

        // Step 5: vector search with over-fetch and path post-filter.
        let vector_candidates = match embedding {
            Some(embedding) => {
                let factor = if filters_active {
                    config.overfetch_filtered
                } else {
                    config.overfetch
                };
                let mut hits = self
                    .vectors
                    .search(embedding, limit * factor, options.granularity)
                    .await?;
                hits.retain(|h| h.similarity >= config.min_similarity);
                self.resolve_vector_hits(hits, options, &effective_patterns)
                    .await?
            }
            None => Vec::new(),
        };

        // Step 6: RRF fusion.
        let mut ranked = fuse(&fts_candidates, &vector_candidates, &config, limit);

        // Step 7: short-token word-boundary boost.
        apply_short_token_boost(&mut ranked, query, config.short_token_boost);

        // Lexical hits carry no line ranges (the FTS table has none);
        // resolve them from the stores before reranking can observe them.
        self.backfill_lines(&mut ranked, options).await?;

        // Step 8: optional reranking with line-range snapshot.
        if options.enable_reranking && !ranked.is_empty() {
            let snapshot: HashMap<String, (Option<i32>, Option<i32>)> = ranked
                .iter()
                .map(|item| (item.id.clone(), (item.start_line, item.end_line)))
                .collect();

            let selected = self.reranker_for(options.reranker);
            metadata.reranker = Some(selected.name().to_string());
            ranked = selected.rerank(ranked, query, limit).await?;

            for item in &mut ranked {
                if let Some((start, end)) = snapshot.get(&item.id) {
                    if item.start_line.is_none() {
                        item.start_line = *start;
                    }
                    if item.end_line.is_none() {
                        item.end_line = *end;
                    }
                }
            }
        }

        // Step 9: materialized views.
        let response = self.extract_views(ranked, metadata, options).await?;

        // Step 10: cache write.
        if options.enable_caching {
            let files: Vec<String> = response
                .ranked
                .iter()
                .map(|item| item.file_path.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            self.lock_cache()
                .set(cache_key, response.clone(), files);
        }

        Ok(response)
    }

    /// Per-call search config with option overrides applied.
    fn effective_config(&self, options: &SearchOptions) -> SearchConfig {
        let mut config = self.config.clone();
        if let Some(weights) = options.weights {
            config.symbol_weight = weights.symbol;
            config.chunk_weight = weights.chunk;
            config.file_weight = weights.file;
        }
        if let Some(rrf_k) = options.rrf_k {
            config.rrf_k = rrf_k;
        }
        config
    }

    fn cache_key(&self, query: &str, limit: usize, options: &SearchOptions) -> String {
        let mut file_patterns = options.file_patterns.clone();
        file_patterns.sort();
        canonical_key(&CacheKey {
            query: query.trim().to_lowercase(),
            branch: &options.branch,
            path_prefix: options.path_prefix.as_deref(),
            granularity: options
                .granularity
                .map(|g| g.as_str())
                .unwrap_or("auto"),
            limit,
            weights: options.weights,
            rrf_k: options.rrf_k,
            file_patterns,
            reranker: options
                .enable_reranking
                .then(|| options.reranker.as_str()),
        })
    }

    fn reranker_for(&self, kind: RerankerKind) -> Arc<dyn Reranker> {
        match kind {
            RerankerKind::Simple => self.simple_reranker.clone(),
            RerankerKind::Bm25 => self.bm25_reranker.clone(),
            RerankerKind::Remote => self.remote_reranker.clone(),
        }
    }

    /// Resolve vector hits to full content; orphans (vectors whose content
    /// row is gone) are dropped, and the path filter is applied here because
    /// the vector store has no file-path predicate.
    async fn resolve_vector_hits(
        &self,
        hits: Vec<VectorHit>,
        options: &SearchOptions,
        patterns: &[String],
    ) -> Result<Vec<FusionCandidate>> {
        let symbol_ids: Vec<String> = hits
            .iter()
            .filter(|h| h.granularity == Granularity::Symbol)
            .map(|h| h.content_id.clone())
            .collect();
        let chunk_ids: Vec<String> = hits
            .iter()
            .filter(|h| h.granularity != Granularity::Symbol)
            .map(|h| h.content_id.clone())
            .collect();

        let symbols = self.symbols.get_by_ids(&symbol_ids, &options.branch).await?;
        let chunks = self.chunks.get_by_ids(&chunk_ids, &options.branch).await?;

        let glob_set = build_glob_set(patterns);
        let path_allowed = |path: &str| -> bool {
            if let Some(prefix) = &options.path_prefix {
                if !path.starts_with(prefix.as_str()) {
                    return false;
                }
            }
            match &glob_set {
                Some(set) => set.is_match(path),
                None => true,
            }
        };

        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            let candidate = match hit.granularity {
                Granularity::Symbol => symbols.get(&hit.content_id).map(|s| FusionCandidate {
                    content_id: hit.content_id.clone(),
                    granularity: Granularity::Symbol,
                    file_path: s.file_path.clone(),
                    content: s.content.clone(),
                    start_line: Some(s.start_line),
                    end_line: Some(s.end_line),
                }),
                granularity => chunks.get(&hit.content_id).map(|c| FusionCandidate {
                    content_id: hit.content_id.clone(),
                    granularity,
                    file_path: c.file_path.clone(),
                    content: c.content.clone(),
                    start_line: Some(c.start_line),
                    end_line: Some(c.end_line),
                }),
            };
            if let Some(candidate) = candidate {
                if path_allowed(&candidate.file_path) {
                    candidates.push(candidate);
                }
            }
        }
        Ok(candidates)
    }

    /// Fill missing line ranges from the owning store rows.
    async fn backfill_lines(
        &self,
        ranked: &mut [RankedItem],
        options: &SearchOptions,
    ) -> Result<()> {
        let symbol_ids: Vec<String> = ranked
            .iter()
            .filter(|item| item.start_line.is_none() && item.granularity == Granularity::Symbol)
            .map(|item| item.id.clone())
            .collect();
        let chunk_ids: Vec<String> = ranked
            .iter()
            .filter(|item| item.start_line.is_none() && item.granularity != Granularity::Symbol)
            .map(|item| item.id.clone())
            .collect();
        if symbol_ids.is_empty() && chunk_ids.is_empty() {
            return Ok(());
        }

        let symbols = self.symbols.get_by_ids(&symbol_ids, &options.branch).await?;
        let chunks = self.chunks.get_by_ids(&chunk_ids, &options.branch).await?;
        for item in ranked.iter_mut() {
            if item.start_line.is_some() {
                continue;
            }
            match item.granularity {
                Granularity::Symbol => {
                    if let Some(symbol) = symbols.get(&item.id) {
                        item.start_line = Some(symbol.start_line);
                        item.end_line = Some(symbol.end_line);
                    }
                }
                _ => {
                    if let Some(chunk) = chunks.get(&item.id) {
                        item.start_line = Some(chunk.start_line);
                        item.end_line = Some(chunk.end_line);
                    }
                }
            }
        }
        Ok(())
    }

    async fn extract_views(
        &self,
        ranked: Vec<RankedItem>,
        metadata: SearchMetadata,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let symbol_ids: Vec<String> = ranked
            .iter()
            .filter(|item| item.granularity == Granularity::Symbol)
            .map(|item| item.id.clone())
            .collect();
        let chunk_ids: Vec<String> = ranked
            .iter()
            .filter(|item| item.granularity != Granularity::Symbol)
            .map(|item| item.id.clone())
            .collect();

        let symbol_map = self.symbols.get_by_ids(&symbol_ids, &options.branch).await?;
        let chunk_map = self.chunks.get_by_ids(&chunk_ids, &options.branch).await?;

        // Views reflect the ranked (post-rerank) order.
        let symbols: Vec<Symbol> = symbol_ids
            .iter()
            .filter_map(|id| symbol_map.get(id).cloned())
            .collect();
        let chunks: Vec<Chunk> = chunk_ids
            .iter()
            .filter_map(|id| chunk_map.get(id).cloned())
            .collect();

        let mut file_scores: Vec<FileScore> = Vec::new();
        for item in &ranked {
            match file_scores
                .iter_mut()
                .find(|f| f.file_path == item.file_path)
            {
                Some(entry) => entry.score += item.score,
                None => file_scores.push(FileScore {
                    file_path: item.file_path.clone(),
                    score: item.score,
                }),
            }
        }
        file_scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(SearchResponse {
            ranked,
            symbols,
            chunks,
            files: file_scores,
            from_cache: false,
            metadata,
        })
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, ContentCache<SearchResponse>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn build_glob_set(patterns: &[String]) -> Option<GlobSet> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GlobSetBuilder::new();
    let mut any = false;
    for pattern in patterns {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
            any = true;
        }
    }
    if !any {
        return None;
    }
    builder.build().ok()
}
