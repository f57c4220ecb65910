use axum::extract::Extension;
use axum::http::header::{ORIGIN, REFERER};
use axum::http::HeaderMap;
use axum::Json;
use std::sync::Arc;
use tracing::debug;

use super::query::{to_params, validate_query_body, QueryBody};
use super::widget_tokens::map_token_error;
use crate::security::BotAccess;
use crate::services::query_engine::QueryOutcome;
use crate::services::{QueryEngine, RateLimiter, WidgetTokenService};
use crate::utils::error::ApiError;
use crate::utils::response::{ok, ApiResponse};

/// Public widget query. CORS is wide open on this route; the real gate is
/// the widget token's domain allow-list, checked against Origin/Referer.
pub async fn widget_query(
    headers: HeaderMap,
    Extension(tokens): Extension<Arc<WidgetTokenService>>,
    Extension(access): Extension<Arc<BotAccess>>,
    Extension(limiter): Extension<Arc<RateLimiter>>,
    Extension(engine): Extension<Arc<QueryEngine>>,
    Json(body): Json<QueryBody>,
) -> Result<Json<ApiResponse<QueryOutcome>>, ApiError> {
    validate_query_body(&body)?;

    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing widget token".to_string()))?;

    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    let referer = headers.get(REFERER).and_then(|v| v.to_str().ok());

    let token = tokens
        .validate(bearer, origin, referer)
        .await
        .map_err(map_token_error)?;

    debug!(bot_id = %token.bot_id, token_id = %token.id, "widget request authorized");

    // Scope is exactly the bot this token identifies; no other tenant data
    // is reachable from here.
    let bot = access.widget_bot(token.bot_id).await?;
    limiter.check(bot.id, bot.rate_limit_per_min).await?;

    let outcome = engine.query(&bot, to_params(body, false)).await?;

    Ok(ok(outcome))
}
