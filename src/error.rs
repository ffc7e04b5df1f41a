//! Error types for the code-intel crate.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CodeIntelErr>;

/// Errors produced by the indexing and search core.
///
/// Locally-recoverable failures (single-file I/O, parse errors, embedding
/// batches, remote rerank calls) are handled at their boundary and surface as
/// `FileRecord` statuses or log lines; the variants here are what crosses a
/// public API call.
#[derive(Debug, thiserror::Error)]
pub enum CodeIntelErr {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("sqlite error at {path}: {cause}")]
    Sqlite { path: PathBuf, cause: String },

    #[error("sqlite {operation} failed: {cause}")]
    SqliteOp { operation: String, cause: String },

    #[error("config parse error at {path}: {cause}")]
    ConfigParse { path: PathBuf, cause: String },

    #[error("invalid config value for {field}: {cause}")]
    Config { field: String, cause: String },

    #[error("embedding failed: {cause}")]
    EmbeddingFailed { cause: String },

    #[error("rerank failed: {cause}")]
    RerankFailed { cause: String },

    #[error("symbol extraction failed for {path}: {cause}")]
    Extract { path: PathBuf, cause: String },

    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("job queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("job {job_id} timed out after {timeout_ms}ms")]
    JobTimeout { job_id: String, timeout_ms: u64 },

    #[error("job {job_id} was cancelled")]
    JobCancelled { job_id: String },

    #[error("job {job_id} failed: {cause}")]
    JobFailed { job_id: String, cause: String },

    #[error("job queue is shut down")]
    QueueShutdown,

    #[error("index manager is not initialized")]
    NotInitialized,
}

impl CodeIntelErr {
    /// Wrap a rusqlite error with the database path it came from.
    pub fn sqlite(path: &std::path::Path, err: rusqlite::Error) -> Self {
        Self::Sqlite {
            path: path.to_path_buf(),
            cause: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for CodeIntelErr {
    fn from(err: rusqlite::Error) -> Self {
        Self::SqliteOp {
            operation: "query".to_string(),
            cause: err.to_string(),
        }
    }
}
