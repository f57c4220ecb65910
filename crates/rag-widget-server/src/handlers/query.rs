use axum::extract::{Extension, Path};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::llm::ChatMessage;
use crate::security::BotAccess;
use crate::services::query_engine::{QueryOutcome, QueryParams};
use crate::services::{QueryEngine, RateLimiter};
use crate::utils::error::ApiError;
use crate::utils::response::{ok, ApiResponse};

#[derive(Debug, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub query: String,
    pub session_id: Option<String>,
    pub page_url: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    #[serde(default)]
    pub include_metadata: bool,
    pub top_k: Option<i64>,
    pub min_score: Option<f32>,
}

pub(crate) fn validate_query_body(body: &QueryBody) -> Result<(), ApiError> {
    if body.query.trim().is_empty() {
        return Err(ApiError::ValidationFailed("query must not be empty".to_string()));
    }
    if let Some(top_k) = body.top_k {
        if !(1..=50).contains(&top_k) {
            return Err(ApiError::ValidationFailed(
                "top_k must be within [1, 50]".to_string(),
            ));
        }
    }
    if let Some(min_score) = body.min_score {
        if !(0.0..=1.0).contains(&min_score) {
            return Err(ApiError::ValidationFailed(
                "min_score must be within [0, 1]".to_string(),
            ));
        }
    }
    Ok(())
}

pub(crate) fn to_params(body: QueryBody, include_metadata: bool) -> QueryParams {
    let history: Vec<ChatMessage> = body
        .history
        .into_iter()
        .filter(|turn| turn.role == "user" || turn.role == "assistant")
        .map(|turn| ChatMessage {
            role: turn.role,
            content: turn.content,
        })
        .collect();

    QueryParams {
        query_text: body.query.trim().to_string(),
        session_id: body.session_id,
        page_url: body.page_url,
        history,
        include_metadata,
        top_k: body.top_k,
        min_score: body.min_score,
    }
}

/// Dashboard query: owner-authenticated, metadata join allowed.
pub async fn query_bot(
    AuthUser(user_id): AuthUser,
    Path(bot_id): Path<Uuid>,
    Extension(access): Extension<Arc<BotAccess>>,
    Extension(limiter): Extension<Arc<RateLimiter>>,
    Extension(engine): Extension<Arc<QueryEngine>>,
    Json(body): Json<QueryBody>,
) -> Result<Json<ApiResponse<QueryOutcome>>, ApiError> {
    validate_query_body(&body)?;

    let bot = access.require_owner(user_id, bot_id).await?;
    limiter.check(bot.id, bot.rate_limit_per_min).await?;

    let include_metadata = body.include_metadata;
    let outcome = engine.query(&bot, to_params(body, include_metadata)).await?;

    Ok(ok(outcome))
}
