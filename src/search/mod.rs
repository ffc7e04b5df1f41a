//! Multi-granular hybrid search.

pub mod cache;
pub mod fusion;
pub mod hybrid;

pub use cache::CacheStats;
pub use cache::ContentCache;
pub use cache::canonical_key;
pub use fusion::FusionCandidate;
pub use fusion::apply_short_token_boost;
pub use fusion::fuse;
pub use hybrid::GranularityWeights;
pub use hybrid::HybridSearcher;
pub use hybrid::SearchMetadata;
pub use hybrid::SearchOptions;
pub use hybrid::SearchResponse;
