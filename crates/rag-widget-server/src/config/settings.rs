use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub crawler: CrawlerConfig,
    pub rag: RagConfig,
    pub ingestion: IngestionConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    pub root_dir: String,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub preferred_provider: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_seconds: u64,
    pub openai: EmbeddingProviderConfig,
    pub gemini: EmbeddingProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub timeout_seconds: u64,
    pub openai: LlmProviderConfig,
    pub gemini: LlmProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub default_model: String,
    pub context_window: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CrawlerConfig {
    pub timeout_seconds: u64,
    pub min_content_chars: usize,
    pub render_fallback_threshold: usize,
    pub render_base_url: Option<String>,
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    pub default_top_k: i64,
    pub default_min_score: f32,
    pub history_turns: usize,
    pub safety_margin_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IngestionConfig {
    pub worker_count: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    pub default_rate_per_min: i32,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
