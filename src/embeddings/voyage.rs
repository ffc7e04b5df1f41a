//! Voyage AI embeddings provider.
//!
//! API-backed embedder; the key is read from `VOYAGE_API_KEY` and its absence
//! disables the provider (probed via [`VoyageEmbeddings::available`]).

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::embeddings::Embedder;
use crate::embeddings::EmbeddingItem;
use crate::embeddings::EmbeddingVector;
use crate::embeddings::InputType;
use crate::error::CodeIntelErr;
use crate::error::Result;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "VOYAGE_API_KEY";

const DEFAULT_MODEL: &str = "voyage-code-3";
const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";

/// Voyage embeddings provider.
#[derive(Debug, Clone)]
pub struct VoyageEmbeddings {
    api_key: String,
    model: String,
    model_id: String,
    dimension: usize,
    base_url: String,
    client: reqwest::Client,
}

impl VoyageEmbeddings {
    /// Create a provider with an explicit key.
    pub fn new(api_key: impl Into<String>, dimension: usize) -> Self {
        let model = DEFAULT_MODEL.to_string();
        Self {
            api_key: api_key.into(),
            model_id: format!("voyage/{model}"),
            model,
            dimension,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Create a provider from `VOYAGE_API_KEY`, `None` when unset.
    pub fn from_env(dimension: usize) -> Option<Self> {
        let api_key = std::env::var(API_KEY_ENV).ok()?;
        if api_key.is_empty() {
            return None;
        }
        Some(Self::new(api_key, dimension))
    }

    /// Whether the provider can be used (key present).
    pub fn available() -> bool {
        std::env::var(API_KEY_ENV).map(|k| !k.is_empty()).unwrap_or(false)
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self.model_id = format!("voyage/{}", self.model);
        self
    }

    /// Set the base URL for API requests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request_embeddings(
        &self,
        input: Vec<String>,
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input,
            input_type: input_type.as_str().to_string(),
            output_dimension: Some(self.dimension),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CodeIntelErr::EmbeddingFailed {
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CodeIntelErr::EmbeddingFailed {
                cause: format!("API error {status}: {error_text}"),
            });
        }

        let result: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| CodeIntelErr::EmbeddingFailed {
                    cause: e.to_string(),
                })?;

        // Sort by index to guarantee input order.
        let mut embeddings: Vec<(usize, Vec<f32>)> = result
            .data
            .into_iter()
            .map(|e| (e.index, e.embedding))
            .collect();
        embeddings.sort_by_key(|(idx, _)| *idx);

        Ok(embeddings.into_iter().map(|(_, e)| e).collect())
    }
}

#[async_trait]
impl Embedder for VoyageEmbeddings {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(
        &self,
        items: &[EmbeddingItem],
        input_type: InputType,
    ) -> Result<Vec<EmbeddingVector>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = items.iter().map(|i| i.text.clone()).collect();
        let embeddings = self.request_embeddings(texts, input_type).await?;

        if embeddings.len() != items.len() {
            return Err(CodeIntelErr::EmbeddingFailed {
                cause: format!(
                    "expected {} embeddings, got {}",
                    items.len(),
                    embeddings.len()
                ),
            });
        }

        Ok(items
            .iter()
            .zip(embeddings)
            .map(|(item, embedding)| EmbeddingVector {
                id: item.id.clone(),
                embedding,
                granularity: item.granularity,
            })
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    input_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimension: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[allow(dead_code)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}
