//! Local embedder: deterministic token feature hashing.
//!
//! No model download and no network; usable as the low-footprint fallback
//! and in tests. Tokens are hashed into buckets with tf weighting, then the
//! vector is L2-normalized, so cosine similarity reflects token overlap.

use async_trait::async_trait;
use sha2::Digest;
use sha2::Sha256;

use crate::embeddings::Embedder;
use crate::embeddings::EmbeddingItem;
use crate::embeddings::EmbeddingVector;
use crate::embeddings::InputType;
use crate::error::Result;

/// Feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimension: usize,
    model_id: String,
}

impl LocalEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: format!("local/feature-hash-{dimension}"),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let bucket = token_bucket(&token, self.dimension);
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(
        &self,
        items: &[EmbeddingItem],
        _input_type: InputType,
    ) -> Result<Vec<EmbeddingVector>> {
        Ok(items
            .iter()
            .map(|item| EmbeddingVector {
                id: item.id.clone(),
                embedding: self.embed_text(&item.text),
                granularity: item.granularity,
            })
            .collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn token_bucket(token: &str, dimension: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let raw = u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
    (raw % dimension as u64) as usize
}
