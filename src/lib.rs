//! Local code-intelligence core: an incremental, multi-granular hybrid
//! search index over a source-code workspace.
//!
//! The index manager scans a workspace, detects changes through a tiered
//! sync cache, extracts symbols and chunks, persists them to an embedded
//! SQLite database (FTS5 + vector blobs) and embeds new content in batches.
//! Queries fuse lexical BM25 and cosine-similarity retrieval with
//! Reciprocal Rank Fusion, optionally rewriting the query and reranking the
//! fused result, with an LRU+TTL result cache in front.
//!
//! ## Layout
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `indexing` | index manager, workspace walker |
//! | `sync` | tiered change detection (mtime/size then content hash) |
//! | `storage` | SQLite stores: symbols, chunks, files, FTS, vectors, edges |
//! | `search` | hybrid search, RRF fusion, result cache |
//! | `query` | query rewriting |
//! | `reranker` | simple / bm25 / remote rerankers |
//! | `embeddings` | embedder trait, providers, batch processor |
//! | `jobs` | priority job queue |
//! | `lifecycle` | state machine |
//! | `repomap` | PageRank file importance (auxiliary) |

// Core modules
pub mod config;
pub mod error;
pub mod git;
pub mod types;

// Subsystems
pub mod chunking;
pub mod embeddings;
pub mod extract;
pub mod indexing;
pub mod jobs;
pub mod lifecycle;
pub mod query;
pub mod repomap;
pub mod reranker;
pub mod search;
pub mod storage;
pub mod sync;

// Re-exports
pub use config::CodeIntelConfig;
pub use config::RerankerKind;
pub use error::CodeIntelErr;
pub use error::Result;
pub use types::Chunk;
pub use types::ChunkType;
pub use types::Edge;
pub use types::EdgeKind;
pub use types::FileRecord;
pub use types::FileStatus;
pub use types::Granularity;
pub use types::RankedItem;
pub use types::Symbol;
pub use types::SymbolKind;

pub use chunking::Chunker;
pub use embeddings::BatchProcessor;
pub use embeddings::Embedder;
pub use embeddings::EmbeddingItem;
pub use embeddings::InputType;
pub use embeddings::LocalEmbedder;
pub use embeddings::VoyageEmbeddings;
pub use extract::BasicExtractor;
pub use extract::EdgeExtractor;
pub use extract::SymbolExtractor;
pub use jobs::IndexJobQueue;
pub use jobs::JobKind;
pub use jobs::JobPriority;
pub use jobs::JobQueue;
pub use lifecycle::IndexPhase;
pub use lifecycle::LifecycleManager;
pub use lifecycle::LifecycleState;
pub use query::QueryRewriter;
pub use query::RewriteResult;
pub use reranker::Reranker;
pub use search::HybridSearcher;
pub use search::SearchOptions;
pub use search::SearchResponse;
pub use storage::SqliteStore;
pub use sync::SyncCache;

// Indexing exports
pub use indexing::IndexManager;
pub use indexing::IndexStatus;
pub use indexing::IndexSummary;
pub use indexing::RefreshSummary;
