use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{status_to_error, transport_error, EmbedError, EmbeddingProvider};
use crate::config::EmbeddingProviderConfig;

// Gemini is reached through its OpenAI-compatible surface, so the wire
// shapes mirror the OpenAI adapter; only model normalization differs.

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct GeminiEmbeddings {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl GeminiEmbeddings {
    pub fn new(config: &EmbeddingProviderConfig, dimension: usize, timeout_seconds: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            // Native Gemini model ids look like "models/text-embedding-004";
            // the OpenAI-compatible endpoint wants the bare name.
            model: config
                .model
                .strip_prefix("models/")
                .unwrap_or(&config.model)
                .to_string(),
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddings {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        debug!(count = texts.len(), model = %self.model, "gemini embedding request");

        let request = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_to_error(status, body));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::ProviderRejected(format!("malformed response: {e}")))?;

        if body.data.len() != texts.len() {
            return Err(EmbedError::ProviderRejected(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.data.len()
            )));
        }

        let mut data = body.data;
        data.sort_by_key(|d| d.index);

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            if item.embedding.len() != self.dimension {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.dimension,
                    got: item.embedding.len(),
                });
            }
            vectors.push(item.embedding);
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn strips_models_prefix_from_model_name() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(json!({ "model": "text-embedding-004" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "index": 0, "embedding": [0.5, 0.5] }]
            })))
            .mount(&server)
            .await;

        let provider = GeminiEmbeddings::new(
            &EmbeddingProviderConfig {
                base_url: server.uri(),
                api_key: "key".to_string(),
                model: "models/text-embedding-004".to_string(),
            },
            2,
            5,
        );

        let vectors = provider.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.5]]);
    }
}
