//! Remote reranker backed by the Voyage rerank API.
//!
//! Candidates are capped before the call; overflow items are appended with
//! score 0 so no result is lost. On API error or missing credentials the
//! reranker logs a warning and falls back to BM25.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::config::RerankerConfig;
use crate::embeddings::voyage::API_KEY_ENV;
use crate::error::CodeIntelErr;
use crate::error::Result;
use crate::reranker::Bm25Reranker;
use crate::reranker::Reranker;
use crate::reranker::sort_by_score;
use crate::types::RankedItem;

const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";

/// Remote reranking service client with BM25 fallback.
pub struct RemoteReranker {
    api_key: Option<String>,
    model: String,
    base_url: String,
    max_candidates: usize,
    client: reqwest::Client,
    fallback: Bm25Reranker,
}

impl RemoteReranker {
    /// Build from config, reading the key from `VOYAGE_API_KEY`.
    pub fn from_env(config: &RerankerConfig) -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        Self::new(api_key, config)
    }

    pub fn new(api_key: Option<String>, config: &RerankerConfig) -> Self {
        Self {
            api_key,
            model: config.remote_model.clone(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_candidates: config.remote_max_candidates,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.remote_timeout_secs))
                .build()
                .unwrap_or_default(),
            fallback: Bm25Reranker::new(),
        }
    }

    /// Override the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn rerank_remote(
        &self,
        items: &[RankedItem],
        query: &str,
    ) -> Result<Vec<RankedItem>> {
        let Some(ref api_key) = self.api_key else {
            return Err(CodeIntelErr::RerankFailed {
                cause: format!("{API_KEY_ENV} is not set"),
            });
        };

        let head = &items[..items.len().min(self.max_candidates)];
        let request = RerankRequest {
            model: self.model.clone(),
            query: query.to_string(),
            documents: head.iter().map(|i| i.content.clone()).collect(),
        };

        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CodeIntelErr::RerankFailed {
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CodeIntelErr::RerankFailed {
                cause: format!("API error {status}: {error_text}"),
            });
        }

        let result: RerankResponse =
            response
                .json()
                .await
                .map_err(|e| CodeIntelErr::RerankFailed {
                    cause: e.to_string(),
                })?;

        let mut reranked = Vec::with_capacity(items.len());
        for data in result.data {
            let Some(item) = head.get(data.index) else {
                continue;
            };
            let mut item = item.clone();
            item.score = data.relevance_score;
            reranked.push(item);
        }
        sort_by_score(&mut reranked);

        // Overflow beyond the candidate cap is preserved at score 0.
        for item in &items[head.len()..] {
            let mut item = item.clone();
            item.score = 0.0;
            reranked.push(item);
        }

        Ok(reranked)
    }
}

#[async_trait]
impl Reranker for RemoteReranker {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn rerank(
        &self,
        items: Vec<RankedItem>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RankedItem>> {
        if items.is_empty() {
            return Ok(items);
        }

        match self.rerank_remote(&items, query).await {
            Ok(mut reranked) => {
                reranked.truncate(limit);
                Ok(reranked)
            }
            Err(e) => {
                tracing::warn!(error = %e, "remote rerank failed, falling back to bm25");
                self.fallback.rerank(items, query, limit).await
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest {
    model: String,
    query: String,
    documents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    data: Vec<RerankData>,
}

#[derive(Debug, Deserialize)]
struct RerankData {
    index: usize,
    relevance_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Granularity;

    fn item(id: &str, content: &str) -> RankedItem {
        RankedItem {
            id: id.to_string(),
            content: content.to_string(),
            file_path: format!("src/{id}.ts"),
            score: 1.0,
            granularity: Granularity::Symbol,
            start_line: Some(1),
            end_line: Some(2),
        }
    }

    #[tokio::test]
    async fn missing_credentials_falls_back_to_bm25() {
        let reranker = RemoteReranker::new(None, &RerankerConfig::default());
        assert!(!reranker.available());

        let items = vec![
            item("alpha", "function alpha() {}"),
            item("beta", "function beta() { beta_result }"),
        ];
        let expected = Bm25Reranker::new()
            .rerank(items.clone(), "beta result", 10)
            .await
            .unwrap();
        let ranked = reranker.rerank(items, "beta result", 10).await.unwrap();

        // Fallback output matches the BM25 reranker's output.
        assert_eq!(ranked[0].id, expected[0].id);
        assert_eq!(ranked.len(), expected.len());
    }

    #[tokio::test]
    async fn unreachable_api_falls_back() {
        let config = RerankerConfig {
            remote_timeout_secs: 1,
            ..RerankerConfig::default()
        };
        let reranker = RemoteReranker::new(Some("key".to_string()), &config)
            .with_base_url("http://127.0.0.1:9");

        let items = vec![item("a", "alpha content"), item("b", "beta content")];
        let ranked = reranker.rerank(items, "beta", 10).await.unwrap();
        assert_eq!(ranked[0].id, "b");
    }
}
