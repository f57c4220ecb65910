pub mod gemini;
pub mod openai;
pub mod orchestrator;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::GeminiEmbeddings;
pub use openai::OpenAiEmbeddings;
pub use orchestrator::EmbeddingOrchestrator;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding failed for batch {batch_index}: {cause}")]
    EmbeddingFailed { batch_index: usize, cause: String },
}

/// A provider returns one vector of exactly the configured dimension per
/// input text, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Shared mapping from an HTTP status to the provider error kinds.
pub(crate) fn status_to_error(status: reqwest::StatusCode, body: String) -> EmbedError {
    if status.is_server_error() {
        EmbedError::ProviderUnavailable(format!("{status}: {body}"))
    } else {
        // 401/403 auth, 429 quota, 400 invalid model all mean the request
        // as posed will not succeed.
        EmbedError::ProviderRejected(format!("{status}: {body}"))
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> EmbedError {
    EmbedError::ProviderUnavailable(err.to_string())
}
