//! Embedding providers for vector search.

pub mod batch;
pub mod local;
pub mod voyage;

pub use batch::BatchProcessor;
pub use local::LocalEmbedder;
pub use voyage::VoyageEmbeddings;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Granularity;

/// Whether a text is being embedded as indexed content or as a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Document,
    Query,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Document => "document",
            InputType::Query => "query",
        }
    }
}

/// One text unit to embed.
#[derive(Debug, Clone)]
pub struct EmbeddingItem {
    pub id: String,
    pub text: String,
    pub granularity: Granularity,
}

/// One produced embedding.
#[derive(Debug, Clone)]
pub struct EmbeddingVector {
    pub id: String,
    pub embedding: Vec<f32>,
    pub granularity: Granularity,
}

/// Turns text items into fixed-dimensional vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Opaque model identifier recorded in global metadata; changing it
    /// invalidates every stored vector.
    fn model_id(&self) -> &str;

    /// Output dimension.
    fn dimension(&self) -> usize;

    /// Embed a batch of items. Order of the result matches the input.
    async fn embed(
        &self,
        items: &[EmbeddingItem],
        input_type: InputType,
    ) -> Result<Vec<EmbeddingVector>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let items = [EmbeddingItem {
            id: "query".to_string(),
            text: text.to_string(),
            granularity: Granularity::Chunk,
        }];
        let mut vectors = self.embed(&items, InputType::Query).await?;
        vectors
            .pop()
            .map(|v| v.embedding)
            .ok_or_else(|| crate::error::CodeIntelErr::EmbeddingFailed {
                cause: "empty embedding response".to_string(),
            })
    }
}
