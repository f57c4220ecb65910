use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{chat_status_to_error, ChatCompletion, ChatMessage, ChatProvider, ChatRequest, LlmError};
use crate::config::LlmProviderConfig;
use crate::document::tokenizer;

// Chat generation against Gemini's OpenAI-compatible endpoint.

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

pub struct GeminiChat {
    client: Client,
    base_url: String,
    api_key: String,
    default_model: String,
}

impl GeminiChat {
    pub fn new(config: &LlmProviderConfig, timeout_seconds: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            default_model: config.default_model.clone(),
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiChat {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let model = request
            .model
            .strip_prefix("models/")
            .unwrap_or(&request.model);

        debug!(model, messages = request.messages.len(), "gemini chat request");

        let body = ChatCompletionRequest {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(chat_status_to_error(status, body));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ProviderRejected(format!("malformed response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let completion = match parsed.usage {
            Some(usage) => ChatCompletion {
                text,
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            None => {
                let prompt_tokens: usize = request
                    .messages
                    .iter()
                    .map(|m| tokenizer::count_tokens(&m.content, &request.model))
                    .sum();
                let completion_tokens = tokenizer::count_tokens(&text, &request.model);
                ChatCompletion {
                    text,
                    prompt_tokens: prompt_tokens as u32,
                    completion_tokens: completion_tokens as u32,
                    total_tokens: (prompt_tokens + completion_tokens) as u32,
                }
            }
        };

        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn strips_models_prefix_and_parses_usage() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({ "model": "gemini-1.5-flash" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "Hi there." } }],
                "usage": { "prompt_tokens": 20, "completion_tokens": 3, "total_tokens": 23 }
            })))
            .mount(&server)
            .await;

        let provider = GeminiChat::new(
            &LlmProviderConfig {
                base_url: server.uri(),
                api_key: "key".to_string(),
                default_model: "gemini-1.5-flash".to_string(),
                context_window: 128000,
            },
            5,
        );

        let completion = provider
            .generate(&ChatRequest {
                messages: vec![ChatMessage::user("hello")],
                model: "models/gemini-1.5-flash".to_string(),
                temperature: 0.7,
                max_tokens: 128,
            })
            .await
            .unwrap();

        assert_eq!(completion.text, "Hi there.");
        assert_eq!(completion.total_tokens, 23);
    }
}
