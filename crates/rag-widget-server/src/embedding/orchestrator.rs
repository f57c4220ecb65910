use std::sync::Arc;

use tracing::{info, warn};

use super::{EmbedError, EmbeddingProvider};

/// Dispatches embedding work to the preferred provider in fixed-size batches,
/// failing over once to the alternate provider. A successful call never mixes
/// vectors from two providers: when the preferred provider fails any batch,
/// the whole input is re-embedded through the alternate.
pub struct EmbeddingOrchestrator {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    default_provider: String,
    batch_size: usize,
    pub dimension: usize,
}

impl EmbeddingOrchestrator {
    pub fn new(
        providers: Vec<Arc<dyn EmbeddingProvider>>,
        default_provider: String,
        batch_size: usize,
        dimension: usize,
    ) -> Self {
        Self {
            providers,
            default_provider,
            batch_size: batch_size.max(1),
            dimension,
        }
    }

    /// Embed `texts`, returning vectors in input order.
    pub async fn embed(
        &self,
        texts: &[String],
        preferred: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let preferred_name = preferred.unwrap_or(&self.default_provider);
        let (primary, alternate) = self.pick(preferred_name);

        match self.embed_all(primary.as_ref(), texts).await {
            Ok(vectors) => Ok(vectors),
            Err((batch_index, cause)) if is_failover(&cause) => {
                let Some(alternate) = alternate else {
                    return Err(EmbedError::EmbeddingFailed {
                        batch_index,
                        cause: cause.to_string(),
                    });
                };
                warn!(
                    from = primary.name(),
                    to = alternate.name(),
                    batch = batch_index,
                    "embedding provider failed, retrying with alternate: {}",
                    cause
                );
                match self.embed_all(alternate.as_ref(), texts).await {
                    Ok(vectors) => {
                        info!(provider = alternate.name(), "embeddings produced by alternate provider");
                        Ok(vectors)
                    }
                    Err((batch_index, cause)) => Err(EmbedError::EmbeddingFailed {
                        batch_index,
                        cause: cause.to_string(),
                    }),
                }
            }
            Err((batch_index, cause)) => Err(EmbedError::EmbeddingFailed {
                batch_index,
                cause: cause.to_string(),
            }),
        }
    }

    /// Embed a single text, e.g. an incoming query.
    pub async fn embed_one(
        &self,
        text: &str,
        preferred: Option<&str>,
    ) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed(&[text.to_string()], preferred).await?;
        vectors.pop().ok_or(EmbedError::EmbeddingFailed {
            batch_index: 0,
            cause: "provider returned no vector".to_string(),
        })
    }

    async fn embed_all(
        &self,
        provider: &dyn EmbeddingProvider,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, (usize, EmbedError)> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            let batch_vectors = provider
                .embed(batch)
                .await
                .map_err(|e| (batch_index, e))?;
            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }

    fn pick(
        &self,
        preferred: &str,
    ) -> (Arc<dyn EmbeddingProvider>, Option<Arc<dyn EmbeddingProvider>>) {
        let primary_idx = self
            .providers
            .iter()
            .position(|p| p.name() == preferred)
            .unwrap_or(0);
        let primary = self.providers[primary_idx].clone();
        let alternate = self
            .providers
            .iter()
            .enumerate()
            .find(|(i, _)| *i != primary_idx)
            .map(|(_, p)| p.clone());
        (primary, alternate)
    }
}

fn is_failover(err: &EmbedError) -> bool {
    matches!(
        err,
        EmbedError::ProviderUnavailable(_) | EmbedError::ProviderRejected(_)
    )
}
