pub mod gemini;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub use gemini::GeminiChat;
pub use openai::OpenAiChat;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("context overflow: {0}")]
    ContextOverflow(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Fully composed request: `messages` already includes the system prompt as
/// its first element.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// The model used when this provider serves a failover request for a bot
    /// configured against the other provider.
    fn default_model(&self) -> &str;

    async fn generate(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError>;
}

/// Routes a generation to the bot's provider, falling over once to the
/// alternate provider (with its own default model) when the primary is
/// unreachable.
pub struct ChatRouter {
    providers: Vec<Arc<dyn ChatProvider>>,
}

impl ChatRouter {
    pub fn new(providers: Vec<Arc<dyn ChatProvider>>) -> Self {
        Self { providers }
    }

    pub async fn generate(
        &self,
        provider_name: &str,
        request: ChatRequest,
    ) -> Result<ChatCompletion, LlmError> {
        let primary_idx = self
            .providers
            .iter()
            .position(|p| p.name() == provider_name)
            .unwrap_or(0);
        let primary = &self.providers[primary_idx];

        match primary.generate(&request).await {
            Ok(completion) => Ok(completion),
            Err(LlmError::ProviderUnavailable(cause)) => {
                let Some(alternate) = self
                    .providers
                    .iter()
                    .enumerate()
                    .find(|(i, _)| *i != primary_idx)
                    .map(|(_, p)| p)
                else {
                    return Err(LlmError::ProviderUnavailable(cause));
                };

                warn!(
                    from = primary.name(),
                    to = alternate.name(),
                    "llm provider unavailable, retrying with alternate: {}",
                    cause
                );

                let mut fallback = request;
                fallback.model = alternate.default_model().to_string();
                alternate.generate(&fallback).await
            }
            Err(other) => Err(other),
        }
    }
}

/// Shared error mapping for the OpenAI-shaped chat endpoints.
pub(crate) fn chat_status_to_error(status: reqwest::StatusCode, body: String) -> LlmError {
    if status.is_server_error() {
        LlmError::ProviderUnavailable(format!("{status}: {body}"))
    } else if body.contains("context_length_exceeded") || body.contains("context length") {
        LlmError::ContextOverflow(body)
    } else {
        LlmError::ProviderRejected(format!("{status}: {body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        name: &'static str,
        model: String,
        unavailable: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn default_model(&self) -> &str {
            &self.model
        }

        async fn generate(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable {
                return Err(LlmError::ProviderUnavailable("down".to_string()));
            }
            Ok(ChatCompletion {
                text: format!("answer from {} via {}", self.name, request.model),
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            })
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::system("be helpful"), ChatMessage::user("hi")],
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 256,
        }
    }

    #[tokio::test]
    async fn primary_provider_answers() {
        let router = ChatRouter::new(vec![
            Arc::new(ScriptedProvider {
                name: "openai",
                model: "gpt-4o-mini".to_string(),
                unavailable: false,
                calls: AtomicUsize::new(0),
            }),
            Arc::new(ScriptedProvider {
                name: "gemini",
                model: "gemini-1.5-flash".to_string(),
                unavailable: false,
                calls: AtomicUsize::new(0),
            }),
        ]);

        let completion = router.generate("openai", request()).await.unwrap();
        assert!(completion.text.contains("openai"));
    }

    #[tokio::test]
    async fn unavailable_primary_fails_over_with_alternate_model() {
        let router = ChatRouter::new(vec![
            Arc::new(ScriptedProvider {
                name: "openai",
                model: "gpt-4o-mini".to_string(),
                unavailable: true,
                calls: AtomicUsize::new(0),
            }),
            Arc::new(ScriptedProvider {
                name: "gemini",
                model: "gemini-1.5-flash".to_string(),
                unavailable: false,
                calls: AtomicUsize::new(0),
            }),
        ]);

        let completion = router.generate("openai", request()).await.unwrap();
        assert!(completion.text.contains("gemini via gemini-1.5-flash"));
    }

    #[tokio::test]
    async fn rejection_does_not_fail_over() {
        struct Rejecting;
        #[async_trait]
        impl ChatProvider for Rejecting {
            fn name(&self) -> &'static str {
                "openai"
            }
            fn default_model(&self) -> &str {
                "gpt-4o-mini"
            }
            async fn generate(&self, _request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
                Err(LlmError::ProviderRejected("quota".to_string()))
            }
        }

        let router = ChatRouter::new(vec![Arc::new(Rejecting)]);
        let err = router.generate("openai", request()).await.unwrap_err();
        assert!(matches!(err, LlmError::ProviderRejected(_)));
    }
}
