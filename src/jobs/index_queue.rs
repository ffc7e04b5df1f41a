//! Index-labeled job queue.
//!
//! Thin wrapper that labels jobs by kind and assigns the priority the index
//! manager uses for each class of work.

use std::future::Future;
use std::sync::Arc;

use crate::config::QueueConfig;
use crate::error::Result;
use crate::jobs::JobOptions;
use crate::jobs::JobPriority;
use crate::jobs::JobQueue;
use crate::jobs::QueueStats;

/// Classes of index work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Lsp,
    SymbolExtraction,
    EdgeExtraction,
    BatchWrite,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Lsp => "lsp",
            JobKind::SymbolExtraction => "symbol-extraction",
            JobKind::EdgeExtraction => "edge-extraction",
            JobKind::BatchWrite => "batch-write",
        }
    }

    /// Priority class for this kind of work.
    pub fn priority(&self) -> JobPriority {
        match self {
            JobKind::Lsp => JobPriority::High,
            JobKind::SymbolExtraction => JobPriority::Normal,
            JobKind::EdgeExtraction => JobPriority::Normal,
            JobKind::BatchWrite => JobPriority::Low,
        }
    }
}

/// The queue the index manager schedules work through.
pub struct IndexJobQueue {
    queue: Arc<JobQueue>,
}

impl IndexJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            queue: JobQueue::new(config),
        }
    }

    /// Enqueue labeled work.
    pub fn submit<F, Fut>(&self, kind: JobKind, f: F) -> Result<String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.queue.enqueue(
            f,
            kind.priority(),
            JobOptions {
                kind: Some(kind.as_str().to_string()),
                retry_on_failure: matches!(kind, JobKind::BatchWrite),
                timeout_ms: None,
            },
        )
    }

    /// Enqueue labeled work and wait for its result.
    pub async fn submit_and_wait<F, Fut, T>(&self, kind: JobKind, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.queue.enqueue_and_wait(f, kind.priority()).await
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub async fn drain(&self) {
        self.queue.drain().await;
    }

    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }

    pub fn inner(&self) -> &Arc<JobQueue> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_priorities() {
        assert_eq!(JobKind::Lsp.priority(), JobPriority::High);
        assert_eq!(JobKind::SymbolExtraction.priority(), JobPriority::Normal);
        assert_eq!(JobKind::EdgeExtraction.priority(), JobPriority::Normal);
        assert_eq!(JobKind::BatchWrite.priority(), JobPriority::Low);
    }

    #[tokio::test]
    async fn labels_jobs_by_kind() {
        let queue = IndexJobQueue::new(QueueConfig::default());
        let id = queue
            .submit(JobKind::SymbolExtraction, || async { Ok(()) })
            .unwrap();
        let info = queue.inner().get_job(&id).unwrap();
        assert_eq!(info.kind.as_deref(), Some("symbol-extraction"));
        queue.drain().await;
    }

    #[tokio::test]
    async fn submit_and_wait_round_trips() {
        let queue = IndexJobQueue::new(QueueConfig::default());
        let value = queue
            .submit_and_wait(JobKind::BatchWrite, || async { Ok("done") })
            .await
            .unwrap();
        assert_eq!(value, "done");
    }
}
