use axum::extract::{Extension, Path};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::database::models::WidgetToken;
use crate::database::Repository;
use crate::security::BotAccess;
use crate::services::widget_tokens::TokenError;
use crate::services::WidgetTokenService;
use crate::utils::error::ApiError;
use crate::utils::response::{ok, ok_with, ApiResponse};

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub allowed_domains: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub name: Option<String>,
}

/// The only response that ever carries the plaintext token.
#[derive(Debug, Serialize)]
pub struct CreatedToken {
    pub token: String,
    #[serde(flatten)]
    pub details: WidgetToken,
}

pub async fn create_token(
    AuthUser(user_id): AuthUser,
    Path(bot_id): Path<Uuid>,
    Extension(access): Extension<Arc<BotAccess>>,
    Extension(tokens): Extension<Arc<WidgetTokenService>>,
    Json(request): Json<CreateTokenRequest>,
) -> Result<Json<ApiResponse<CreatedToken>>, ApiError> {
    access.require_owner(user_id, bot_id).await?;

    let domains: Vec<String> = request
        .allowed_domains
        .iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();
    if domains.is_empty() {
        return Err(ApiError::ValidationFailed(
            "allowed_domains must contain at least one domain".to_string(),
        ));
    }
    if let Some(expires_at) = request.expires_at {
        if expires_at <= Utc::now() {
            return Err(ApiError::ValidationFailed(
                "expires_at must be in the future".to_string(),
            ));
        }
    }

    let (details, plaintext) = tokens
        .issue(bot_id, domains, request.expires_at, request.name)
        .await
        .map_err(map_token_error)?;

    info!(bot_id = %bot_id, token_id = %details.id, "widget token issued");

    Ok(ok_with(
        CreatedToken {
            token: plaintext,
            details,
        },
        "store this token now; it cannot be retrieved again",
    ))
}

pub async fn list_tokens(
    AuthUser(user_id): AuthUser,
    Path(bot_id): Path<Uuid>,
    Extension(access): Extension<Arc<BotAccess>>,
    Extension(repository): Extension<Arc<Repository>>,
) -> Result<Json<ApiResponse<Vec<WidgetToken>>>, ApiError> {
    access.require_owner(user_id, bot_id).await?;

    let tokens = repository
        .list_widget_tokens(bot_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    Ok(ok(tokens))
}

pub async fn revoke_token(
    AuthUser(user_id): AuthUser,
    Path((bot_id, token_id)): Path<(Uuid, Uuid)>,
    Extension(access): Extension<Arc<BotAccess>>,
    Extension(repository): Extension<Arc<Repository>>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    access.require_owner(user_id, bot_id).await?;

    let deleted = repository
        .delete_widget_token(bot_id, token_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    if !deleted {
        return Err(ApiError::NotFound(format!("token {token_id} not found")));
    }

    info!(bot_id = %bot_id, token_id = %token_id, "widget token revoked");

    Ok(ok_with(
        serde_json::json!({ "revoked": true }),
        "token revoked",
    ))
}

pub(crate) fn map_token_error(err: TokenError) -> ApiError {
    match err {
        TokenError::NotFound => ApiError::Unauthorized("unknown widget token".to_string()),
        TokenError::Expired => ApiError::Expired,
        TokenError::DomainNotAllowed => {
            ApiError::DomainNotAllowed("origin is not allowed for this token".to_string())
        }
        TokenError::Internal(msg) => ApiError::DatabaseError(msg),
    }
}
