use axum::extract::{Extension, Path};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::config::Settings;
use crate::database::models::{Bot, LlmProvider, LlmSettings};
use crate::database::Repository;
use crate::security::BotAccess;
use crate::utils::error::ApiError;
use crate::utils::response::{ok, ok_with, ApiResponse};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions using \
the provided context. If the context does not contain the answer, say that you do not know.";

#[derive(Debug, Deserialize)]
pub struct CreateBotRequest {
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_config: Option<LlmSettings>,
    pub rate_limit_per_min: Option<i32>,
    pub retention_days: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBotRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_config: Option<LlmSettings>,
    pub rate_limit_per_min: Option<i32>,
    pub retention_days: Option<i32>,
}

fn validate_llm_settings(settings: &LlmSettings) -> Result<(), ApiError> {
    if settings.model_name.trim().is_empty() {
        return Err(ApiError::ValidationFailed(
            "llm_config.model_name must not be empty".to_string(),
        ));
    }
    if !(0.0..=2.0).contains(&settings.temperature) {
        return Err(ApiError::ValidationFailed(
            "llm_config.temperature must be within [0, 2]".to_string(),
        ));
    }
    if settings.max_tokens < 1 {
        return Err(ApiError::ValidationFailed(
            "llm_config.max_tokens must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_retention_days(days: i32) -> Result<(), ApiError> {
    if !(1..=3650).contains(&days) {
        return Err(ApiError::ValidationFailed(
            "retention_days must be within [1, 3650]".to_string(),
        ));
    }
    Ok(())
}

pub async fn create_bot(
    AuthUser(user_id): AuthUser,
    Extension(repository): Extension<Arc<Repository>>,
    Extension(settings): Extension<Arc<Settings>>,
    Json(request): Json<CreateBotRequest>,
) -> Result<Json<ApiResponse<Bot>>, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::ValidationFailed("name must not be empty".to_string()));
    }

    let llm_provider = request.llm_provider.unwrap_or(LlmProvider::Openai);
    let llm_config = request.llm_config.unwrap_or_else(|| LlmSettings {
        model_name: match llm_provider {
            LlmProvider::Openai => settings.llm.openai.default_model.clone(),
            LlmProvider::Gemini => settings.llm.gemini.default_model.clone(),
        },
        temperature: 0.7,
        max_tokens: 1024,
    });
    validate_llm_settings(&llm_config)?;

    let retention_days = request.retention_days.unwrap_or(90);
    validate_retention_days(retention_days)?;

    let bot = repository
        .create_bot(
            user_id,
            request.name.trim(),
            request.description.as_deref(),
            request
                .system_prompt
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(DEFAULT_SYSTEM_PROMPT),
            llm_provider,
            &llm_config,
            request.rate_limit_per_min,
            retention_days,
        )
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    info!(bot_id = %bot.id, owner = %user_id, "bot created");

    Ok(ok_with(bot, "bot created"))
}

pub async fn list_bots(
    AuthUser(user_id): AuthUser,
    Extension(repository): Extension<Arc<Repository>>,
) -> Result<Json<ApiResponse<Vec<Bot>>>, ApiError> {
    let bots = repository
        .list_bots(user_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    Ok(ok(bots))
}

pub async fn get_bot(
    AuthUser(user_id): AuthUser,
    Path(bot_id): Path<Uuid>,
    Extension(access): Extension<Arc<BotAccess>>,
) -> Result<Json<ApiResponse<Bot>>, ApiError> {
    let bot = access.require_owner(user_id, bot_id).await?;
    Ok(ok(bot))
}

pub async fn update_bot(
    AuthUser(user_id): AuthUser,
    Path(bot_id): Path<Uuid>,
    Extension(repository): Extension<Arc<Repository>>,
    Json(request): Json<UpdateBotRequest>,
) -> Result<Json<ApiResponse<Bot>>, ApiError> {
    if let Some(name) = &request.name {
        if name.trim().is_empty() {
            return Err(ApiError::ValidationFailed("name must not be empty".to_string()));
        }
    }
    if let Some(config) = &request.llm_config {
        validate_llm_settings(config)?;
    }
    if let Some(days) = request.retention_days {
        validate_retention_days(days)?;
    }

    let bot = repository
        .update_bot(
            bot_id,
            user_id,
            request.name.as_deref().map(str::trim),
            request.description.as_deref(),
            request.system_prompt.as_deref(),
            request.llm_provider,
            request.llm_config.as_ref(),
            request.rate_limit_per_min,
            request.retention_days,
        )
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("bot {bot_id} not found")))?;

    Ok(ok_with(bot, "bot updated"))
}

pub async fn delete_bot(
    AuthUser(user_id): AuthUser,
    Path(bot_id): Path<Uuid>,
    Extension(repository): Extension<Arc<Repository>>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let deleted = repository
        .delete_bot(bot_id, user_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    if !deleted {
        return Err(ApiError::NotFound(format!("bot {bot_id} not found")));
    }

    info!(bot_id = %bot_id, owner = %user_id, "bot deleted");

    Ok(ok_with(serde_json::json!({ "deleted": true }), "bot deleted"))
}
