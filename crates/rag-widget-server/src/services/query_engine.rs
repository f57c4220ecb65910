use pgvector::Vector;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{LlmConfig, RagConfig};
use crate::database::models::{
    Bot, LlmProvider, NewQueryLog, ReturnedSource, ScoredChunk, SourceType,
};
use crate::database::Repository;
use crate::embedding::{EmbedError, EmbeddingOrchestrator};
use crate::llm::{ChatMessage, ChatRequest, ChatRouter, LlmError};
use crate::services::prompt::{PromptComposer, PromptError};
use crate::utils::error::ApiError;

const SUMMARY_CHARS: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub query_text: String,
    pub session_id: Option<String>,
    pub page_url: Option<String>,
    pub history: Vec<ChatMessage>,
    pub include_metadata: bool,
    pub top_k: Option<i64>,
    pub min_score: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CitationMeta {
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub chunk_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CitationMeta>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: Option<f32>,
    pub session_id: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency_ms: i64,
}

/// End-to-end RAG: embed the query, search the bot's chunks, compose a
/// prompt, generate, score, cite, and log.
pub struct QueryEngine {
    repository: Arc<Repository>,
    embeddings: Arc<EmbeddingOrchestrator>,
    llm: Arc<ChatRouter>,
    composer: PromptComposer,
    rag: RagConfig,
    llm_config: LlmConfig,
}

impl QueryEngine {
    pub fn new(
        repository: Arc<Repository>,
        embeddings: Arc<EmbeddingOrchestrator>,
        llm: Arc<ChatRouter>,
        rag: RagConfig,
        llm_config: LlmConfig,
    ) -> Self {
        let composer = PromptComposer::new(rag.history_turns, rag.safety_margin_tokens);
        Self {
            repository,
            embeddings,
            llm,
            composer,
            rag,
            llm_config,
        }
    }

    pub async fn query(&self, bot: &Bot, params: QueryParams) -> Result<QueryOutcome, ApiError> {
        let started = Instant::now();
        let session_id = params
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // 1. Query embedding.
        let query_vec = self
            .embeddings
            .embed_one(&params.query_text, Some(bot.llm_provider.as_str()))
            .await
            .map_err(map_embed_error)?;

        // 2. Tenant-scoped retrieval.
        let top_k = params.top_k.unwrap_or(self.rag.default_top_k);
        let min_score = params.min_score.unwrap_or(self.rag.default_min_score);
        let chunks = self
            .repository
            .search_chunks(bot.id, Vector::from(query_vec), top_k, min_score)
            .await
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

        // 3. Prompt composition. With zero retrieved chunks the model still
        // runs; the system prompt handles "I don't know" phrasing.
        let settings = &bot.llm_config.0;
        let prompt = self
            .composer
            .compose(
                &bot.system_prompt,
                &chunks,
                &params.history,
                &params.query_text,
                &settings.model_name,
                self.context_window(bot.llm_provider),
                settings.max_tokens,
            )
            .map_err(|PromptError::ContextOverflow(msg)| ApiError::ContextOverflow(msg))?;

        // 4. Generation, with provider failover inside the router.
        let completion = self
            .llm
            .generate(
                bot.llm_provider.as_str(),
                ChatRequest {
                    messages: prompt.messages,
                    model: settings.model_name.clone(),
                    temperature: settings.temperature,
                    max_tokens: settings.max_tokens,
                },
            )
            .await
            .map_err(map_llm_error)?;

        // 5. Confidence: mean retrieval score, null when nothing came back.
        let confidence = if chunks.is_empty() {
            None
        } else {
            Some(chunks.iter().map(|c| c.score).sum::<f32>() / chunks.len() as f32)
        };

        // 6. Citations.
        let citations = self.build_citations(&chunks, params.include_metadata).await?;

        let latency_ms = started.elapsed().as_millis() as i64;

        // 7. Query log. Best-effort: a failed insert must not void an
        // already-generated answer.
        let log = NewQueryLog {
            bot_id: bot.id,
            session_id: session_id.clone(),
            query_text: params.query_text.clone(),
            page_url: params.page_url.clone(),
            returned_sources: chunks
                .iter()
                .map(|c| ReturnedSource {
                    chunk_id: c.chunk_id,
                    heading: c.heading.clone(),
                    score: c.score,
                })
                .collect(),
            response_summary: truncate_chars(&completion.text, SUMMARY_CHARS),
            tokens_used: completion.total_tokens as i32,
            prompt_tokens: Some(completion.prompt_tokens as i32),
            completion_tokens: Some(completion.completion_tokens as i32),
            confidence,
            latency_ms,
        };
        if let Err(e) = self.repository.insert_query_log(&log).await {
            warn!(bot_id = %bot.id, "failed to persist query log: {}", e);
        }

        info!(
            bot_id = %bot.id,
            chunks = chunks.len(),
            latency_ms,
            tokens = completion.total_tokens,
            "query answered"
        );

        Ok(QueryOutcome {
            answer: completion.text,
            citations,
            confidence,
            session_id,
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
            latency_ms,
        })
    }

    fn context_window(&self, provider: LlmProvider) -> usize {
        match provider {
            LlmProvider::Openai => self.llm_config.openai.context_window,
            LlmProvider::Gemini => self.llm_config.gemini.context_window,
        }
    }

    async fn build_citations(
        &self,
        chunks: &[ScoredChunk],
        include_metadata: bool,
    ) -> Result<Vec<Citation>, ApiError> {
        let mut meta_by_chunk: HashMap<Uuid, CitationMeta> = HashMap::new();

        if include_metadata && !chunks.is_empty() {
            let ids: Vec<Uuid> = chunks.iter().map(|c| c.chunk_id).collect();
            let sources = self
                .repository
                .get_citation_sources(&ids)
                .await
                .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

            for row in sources {
                let filename = row
                    .storage_path
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .and_then(|p| p.rsplit('/').next())
                    .map(|f| f.to_string());
                meta_by_chunk.insert(
                    row.chunk_id,
                    CitationMeta {
                        source_type: row.source_type,
                        original_url: row.original_url,
                        canonical_url: row.canonical_url,
                        storage_path: row.storage_path.filter(|p| !p.is_empty()),
                        filename,
                    },
                );
            }
        }

        Ok(chunks
            .iter()
            .map(|chunk| Citation {
                chunk_id: chunk.chunk_id,
                heading: chunk.heading.clone(),
                score: chunk.score,
                source: meta_by_chunk.remove(&chunk.chunk_id),
            })
            .collect())
    }
}

fn map_embed_error(err: EmbedError) -> ApiError {
    match err {
        EmbedError::ProviderUnavailable(msg) => ApiError::ProviderUnavailable(msg),
        EmbedError::ProviderRejected(msg) => ApiError::ProviderRejected(msg),
        EmbedError::DimensionMismatch { expected, got } => {
            ApiError::Internal(format!("embedding dimension mismatch: {expected} vs {got}"))
        }
        EmbedError::EmbeddingFailed { cause, .. } => ApiError::ProviderUnavailable(cause),
    }
}

fn map_llm_error(err: LlmError) -> ApiError {
    match err {
        LlmError::ProviderUnavailable(msg) => ApiError::ProviderUnavailable(msg),
        LlmError::ProviderRejected(msg) => ApiError::ProviderRejected(msg),
        LlmError::ContextOverflow(msg) => ApiError::ContextOverflow(msg),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_truncates_on_char_boundaries() {
        let short = truncate_chars("short answer", 500);
        assert_eq!(short, "short answer");

        let long = truncate_chars(&"é".repeat(600), 500);
        assert_eq!(long.chars().count(), 500);
    }

    #[test]
    fn provider_errors_map_to_api_kinds() {
        assert!(matches!(
            map_embed_error(EmbedError::ProviderUnavailable("down".into())),
            ApiError::ProviderUnavailable(_)
        ));
        assert!(matches!(
            map_llm_error(LlmError::ContextOverflow("big".into())),
            ApiError::ContextOverflow(_)
        ));
    }
}
