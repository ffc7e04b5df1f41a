//! Configuration for the code-intel engine.

use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;

use crate::error::CodeIntelErr;
use crate::error::Result;

/// Directory under the workspace root holding all persistent state.
pub const DATA_DIR: &str = ".opencode/code-intel";
/// Index database file name inside [`DATA_DIR`].
pub const INDEX_DB_FILE: &str = "index.db";
/// Sync cache file name inside [`DATA_DIR`].
pub const SYNC_CACHE_FILE: &str = "cache.json";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CodeIntelConfig {
    /// Indexing configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Embedding configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Reranker configuration
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// Result cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Job queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
}

impl CodeIntelConfig {
    /// Load configuration from config files.
    ///
    /// Search order (first found wins):
    /// 1. `{workspace}/.opencode/code-intel.toml` (project-level)
    /// 2. `~/.opencode/code-intel.toml` (global)
    /// 3. Default
    pub fn load(workspace: &Path) -> Result<Self> {
        let project_config = workspace.join(".opencode/code-intel.toml");
        if project_config.exists() {
            return Self::from_file(&project_config);
        }

        if let Some(home) = dirs::home_dir() {
            let global_config = home.join(".opencode/code-intel.toml");
            if global_config.exists() {
                return Self::from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CodeIntelErr::ConfigParse {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        self.indexing.validate()?;
        self.search.validate()?;
        self.queue.validate()?;
        Ok(())
    }
}

/// Indexing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexingConfig {
    /// Maximum concurrent per-file pipelines during a full index or refresh
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Maximum file size in bytes to index
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Ignore globs applied while walking the workspace
    #[serde(default = "default_ignore_globs")]
    pub ignore_globs: Vec<String>,

    /// Directory names whose contents are flagged `is_external`
    #[serde(default = "default_external_dirs")]
    pub external_dirs: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_file_size: default_max_file_size(),
            ignore_globs: default_ignore_globs(),
            external_dirs: default_external_dirs(),
        }
    }
}

impl IndexingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(CodeIntelErr::Config {
                field: "indexing.parallelism".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn default_parallelism() -> usize {
    8
}
fn default_max_file_size() -> u64 {
    2 * 1024 * 1024
}
fn default_ignore_globs() -> Vec<String> {
    [
        "**/node_modules/**",
        "**/.git/**",
        "**/dist/**",
        "**/build/**",
        "**/target/**",
        "**/out/**",
        "**/.next/**",
        "**/coverage/**",
        "**/__pycache__/**",
        "**/*.min.js",
        "**/*.bundle.js",
        "**/vendor/**",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_external_dirs() -> Vec<String> {
    ["node_modules", "vendor", "third_party", ".venv", "site-packages"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    /// Lines per fixed-size block chunk
    #[serde(default = "default_block_lines")]
    pub block_lines: usize,

    /// Overlapping lines between consecutive block chunks
    #[serde(default = "default_block_overlap")]
    pub block_overlap: usize,

    /// Maximum characters stored in the whole-file chunk (truncated beyond)
    #[serde(default = "default_file_chunk_max_chars")]
    pub file_chunk_max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            block_lines: default_block_lines(),
            block_overlap: default_block_overlap(),
            file_chunk_max_chars: default_file_chunk_max_chars(),
        }
    }
}

fn default_block_lines() -> usize {
    40
}
fn default_block_overlap() -> usize {
    8
}
fn default_file_chunk_max_chars() -> usize {
    16_000
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Final number of results to return
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// RRF weight for symbol-granularity buckets
    #[serde(default = "default_symbol_weight")]
    pub symbol_weight: f32,

    /// RRF weight for chunk-granularity buckets
    #[serde(default = "default_chunk_weight")]
    pub chunk_weight: f32,

    /// RRF weight for file-granularity buckets
    #[serde(default = "default_file_weight")]
    pub file_weight: f32,

    /// RRF constant k
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Vector hits below this cosine similarity are dropped
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Vector over-fetch multiplier without path filters
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,

    /// Vector over-fetch multiplier when path filters are active
    #[serde(default = "default_overfetch_filtered")]
    pub overfetch_filtered: usize,

    /// Score multiplier for exact word-boundary matches of short query tokens
    #[serde(default = "default_short_token_boost")]
    pub short_token_boost: f32,

    /// Maximum synonyms per expanded query term
    #[serde(default = "default_max_synonyms")]
    pub max_synonyms: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            symbol_weight: default_symbol_weight(),
            chunk_weight: default_chunk_weight(),
            file_weight: default_file_weight(),
            rrf_k: default_rrf_k(),
            min_similarity: default_min_similarity(),
            overfetch: default_overfetch(),
            overfetch_filtered: default_overfetch_filtered(),
            short_token_boost: default_short_token_boost(),
            max_synonyms: default_max_synonyms(),
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(CodeIntelErr::Config {
                field: "search.limit".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.overfetch == 0 || self.overfetch_filtered == 0 {
            return Err(CodeIntelErr::Config {
                field: "search.overfetch".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn default_limit() -> usize {
    20
}
fn default_symbol_weight() -> f32 {
    1.0
}
fn default_chunk_weight() -> f32 {
    0.7
}
fn default_file_weight() -> f32 {
    0.3
}
fn default_rrf_k() -> f32 {
    60.0
}
fn default_min_similarity() -> f32 {
    0.25
}
fn default_overfetch() -> usize {
    2
}
fn default_overfetch_filtered() -> usize {
    3
}
fn default_short_token_boost() -> f32 {
    1.5
}
fn default_max_synonyms() -> usize {
    3
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Model identifier recorded in global metadata (e.g. "voyage/voyage-code-3")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// API base URL (optional override)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Items per embedding request (API-backed: 128, local: 32)
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Concurrent in-flight embedding requests (API-backed: 7, local: 2)
    #[serde(default = "default_embedding_concurrency")]
    pub concurrency: usize,

    /// Retry attempts per batch before dropping it
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            base_url: None,
            batch_size: default_embedding_batch_size(),
            concurrency: default_embedding_concurrency(),
            max_retries: default_embedding_max_retries(),
        }
    }
}

impl EmbeddingConfig {
    /// Batch/concurrency profile for a local (in-process) embedder.
    pub fn local_profile(mut self) -> Self {
        self.batch_size = 32;
        self.concurrency = 2;
        self
    }
}

fn default_embedding_model() -> String {
    "voyage/voyage-code-3".to_string()
}
fn default_embedding_dimension() -> usize {
    1024
}
fn default_embedding_batch_size() -> usize {
    128
}
fn default_embedding_concurrency() -> usize {
    7
}
fn default_embedding_max_retries() -> usize {
    3
}

/// Which reranker the enhanced search path uses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RerankerKind {
    #[default]
    Bm25,
    Simple,
    Remote,
}

impl RerankerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RerankerKind::Bm25 => "bm25",
            RerankerKind::Simple => "simple",
            RerankerKind::Remote => "remote",
        }
    }
}

/// Reranker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RerankerConfig {
    /// Default reranker selector
    #[serde(default)]
    pub kind: RerankerKind,

    /// Candidate cap for the remote reranker
    #[serde(default = "default_remote_max_candidates")]
    pub remote_max_candidates: usize,

    /// Remote rerank request timeout in seconds
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,

    /// Remote rerank model name
    #[serde(default = "default_remote_model")]
    pub remote_model: String,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            kind: RerankerKind::default(),
            remote_max_candidates: default_remote_max_candidates(),
            remote_timeout_secs: default_remote_timeout_secs(),
            remote_model: default_remote_model(),
        }
    }
}

fn default_remote_max_candidates() -> usize {
    40
}
fn default_remote_timeout_secs() -> u64 {
    15
}
fn default_remote_model() -> String {
    "rerank-2.5".to_string()
}

/// Result cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Maximum cached queries
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// Entry TTL in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_max_entries() -> usize {
    256
}
fn default_cache_ttl_secs() -> u64 {
    300
}

/// Job queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Maximum jobs running at once
    #[serde(default = "default_queue_concurrency")]
    pub concurrency: usize,

    /// Maximum pending jobs before enqueues fail with backpressure
    #[serde(default = "default_queue_max_pending")]
    pub max_pending: usize,

    /// Per-job timeout in milliseconds
    #[serde(default = "default_queue_timeout_ms")]
    pub timeout_ms: u64,

    /// Retry attempts for jobs enqueued with retry_on_failure
    #[serde(default = "default_queue_max_retries")]
    pub max_retries: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_queue_concurrency(),
            max_pending: default_queue_max_pending(),
            timeout_ms: default_queue_timeout_ms(),
            max_retries: default_queue_max_retries(),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(CodeIntelErr::Config {
                field: "queue.concurrency".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.max_pending == 0 {
            return Err(CodeIntelErr::Config {
                field: "queue.max_pending".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn default_queue_concurrency() -> usize {
    4
}
fn default_queue_max_pending() -> usize {
    1000
}
fn default_queue_timeout_ms() -> u64 {
    30_000
}
fn default_queue_max_retries() -> usize {
    2
}

/// Resolve the data directory for a workspace root.
pub fn data_dir(workspace: &Path) -> PathBuf {
    workspace.join(DATA_DIR)
}

/// Resolve the index database path for a workspace root.
pub fn index_db_path(workspace: &Path) -> PathBuf {
    data_dir(workspace).join(INDEX_DB_FILE)
}

/// Resolve the sync cache path for a workspace root.
pub fn sync_cache_path(workspace: &Path) -> PathBuf {
    data_dir(workspace).join(SYNC_CACHE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CodeIntelConfig::default();
        config.validate().unwrap();
        assert_eq!(config.indexing.parallelism, 8);
        assert_eq!(config.search.rrf_k, 60.0);
        assert_eq!(config.search.min_similarity, 0.25);
        assert_eq!(config.queue.concurrency, 4);
        assert_eq!(config.embedding.batch_size, 128);
    }

    #[test]
    fn local_profile_shrinks_batching() {
        let config = EmbeddingConfig::default().local_profile();
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.concurrency, 2);
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut config = CodeIntelConfig::default();
        config.indexing.parallelism = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let config: CodeIntelConfig = toml::from_str(
            r#"
            [search]
            limit = 5
            rrf_k = 30.0

            [reranker]
            kind = "remote"
            "#,
        )
        .unwrap();
        assert_eq!(config.search.limit, 5);
        assert_eq!(config.search.rrf_k, 30.0);
        assert_eq!(config.reranker.kind, RerankerKind::Remote);
        // Untouched sections keep defaults
        assert_eq!(config.indexing.parallelism, 8);
    }

    #[test]
    fn workspace_paths() {
        let ws = Path::new("/repo");
        assert_eq!(
            index_db_path(ws),
            PathBuf::from("/repo/.opencode/code-intel/index.db")
        );
        assert_eq!(
            sync_cache_path(ws),
            PathBuf::from("/repo/.opencode/code-intel/cache.json")
        );
    }
}
