//! Batch processor: batching, bounded concurrency and retry around an
//! embedder.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::embeddings::Embedder;
use crate::embeddings::EmbeddingItem;
use crate::embeddings::EmbeddingVector;
use crate::embeddings::InputType;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Drives an [`Embedder`] with batched, concurrent, retried requests.
///
/// Batch failures are dropped after the retry budget; the caller gets the
/// vectors that succeeded. A later refresh re-embeds what is missing.
pub struct BatchProcessor {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    concurrency: usize,
    max_retries: usize,
}

impl BatchProcessor {
    pub fn new(embedder: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        Self {
            embedder,
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed all items, returning whatever succeeded.
    pub async fn process(
        &self,
        items: Vec<EmbeddingItem>,
        input_type: InputType,
    ) -> Vec<EmbeddingVector> {
        if items.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let batches: Vec<Vec<EmbeddingItem>> = items
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        let tasks = batches.into_iter().map(|batch| {
            let semaphore = semaphore.clone();
            let embedder = self.embedder.clone();
            let max_retries = self.max_retries;
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                Self::embed_with_retry(embedder.as_ref(), &batch, input_type, max_retries).await
            }
        });

        join_all(tasks)
            .await
            .into_iter()
            .flatten()
            .flatten()
            .collect()
    }

    async fn embed_with_retry(
        embedder: &dyn Embedder,
        batch: &[EmbeddingItem],
        input_type: InputType,
        max_retries: usize,
    ) -> Option<Vec<EmbeddingVector>> {
        let mut attempt = 0;
        loop {
            match embedder.embed(batch, input_type).await {
                Ok(vectors) => return Some(vectors),
                Err(e) if attempt < max_retries => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt as u32 - 1);
                    tracing::warn!(
                        attempt,
                        batch_size = batch.len(),
                        error = %e,
                        "embedding batch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(
                        batch_size = batch.len(),
                        error = %e,
                        "embedding batch dropped after retries"
                    );
                    return None;
                }
            }
        }
    }
}
