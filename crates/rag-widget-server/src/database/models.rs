use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "llm_provider", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Openai,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Openai => "openai",
            LlmProvider::Gemini => "gemini",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "source_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Docx,
    Html,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "source_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Uploaded,
    Parsing,
    Indexed,
    Failed,
}

/// Per-bot generation settings stored as JSONB. Unknown fields in stored
/// documents are ignored on read; upgrades only ever add fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Bot {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    pub llm_provider: LlmProvider,
    pub llm_config: Json<LlmSettings>,
    pub rate_limit_per_min: Option<i32>,
    pub retention_days: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Source {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub source_type: SourceType,
    pub original_url: Option<String>,
    pub canonical_url: Option<String>,
    pub storage_path: String,
    pub status: SourceStatus,
    pub error_message: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub page_checksum: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Chunk ready for insertion; the embedding is always present because a
/// source is only persisted after every batch embedded successfully.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i32,
    pub excerpt: String,
    pub heading: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub char_start: i32,
    pub char_end: i32,
    pub tokens_estimate: i32,
    pub embedding: Vector,
}

/// One vector-search hit, scored with cosine similarity.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub excerpt: String,
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<DateTime<Utc>>,
    pub score: f32,
}

/// Citation entry persisted on the query log and returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnedSource {
    pub chunk_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct NewQueryLog {
    pub bot_id: Uuid,
    pub session_id: String,
    pub query_text: String,
    pub page_url: Option<String>,
    pub returned_sources: Vec<ReturnedSource>,
    pub response_summary: String,
    pub tokens_used: i32,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub confidence: Option<f32>,
    pub latency_ms: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WidgetToken {
    pub id: Uuid,
    pub bot_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub token_prefix: Option<String>,
    pub allowed_domains: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Source fields joined onto a citation when callers ask for metadata.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CitationSource {
    pub chunk_id: Uuid,
    pub source_type: SourceType,
    pub original_url: Option<String>,
    pub canonical_url: Option<String>,
    pub storage_path: Option<String>,
}
