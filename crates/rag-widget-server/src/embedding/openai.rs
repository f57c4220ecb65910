use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{status_to_error, transport_error, EmbedError, EmbeddingProvider};
use crate::config::EmbeddingProviderConfig;

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

pub struct OpenAiEmbeddings {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddings {
    pub fn new(config: &EmbeddingProviderConfig, dimension: usize, timeout_seconds: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            // Callers sometimes configure "openai/<model>"; the API wants the
            // bare model name.
            model: config
                .model
                .strip_prefix("openai/")
                .unwrap_or(&config.model)
                .to_string(),
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        debug!(count = texts.len(), model = %self.model, "openai embedding request");

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

        // The API reports an index per item; order by it rather than trusting
        // response order.
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
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, dimension: usize) -> OpenAiEmbeddings {
        OpenAiEmbeddings::new(
            &EmbeddingProviderConfig {
                base_url: server.uri(),
                api_key: "sk-test".to_string(),
                model: "text-embedding-3-small".to_string(),
            },
            dimension,
            5,
        )
    }

    #[tokio::test]
    async fn embeds_batch_in_input_order() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({ "model": "text-embedding-3-small" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0, 0.0] },
                    { "index": 0, "embedding": [1.0, 0.0, 0.0] },
                ]
            })))
            .mount(&server)
            .await;

        let provider = provider(&server, 3);
        let vectors = provider
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors[0], vec![1.0, 0.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn server_error_is_provider_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server, 3)
            .embed(&["text".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn auth_error_is_provider_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = provider(&server, 3)
            .embed(&["text".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::ProviderRejected(_)));
    }

    #[tokio::test]
    async fn wrong_dimension_is_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "index": 0, "embedding": [1.0, 2.0] }]
            })))
            .mount(&server)
            .await;

        let err = provider(&server, 3)
            .embed(&["text".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch { expected: 3, got: 2 }
        ));
    }
}
