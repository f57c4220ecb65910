use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors that cross the HTTP boundary. Ingestion-path failures
/// (parser/crawler/embedding) never appear here; they are recorded on the
/// source row instead.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Context overflow: {0}")]
    ContextOverflow(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("Rate limited, retry in {retry_after_s}s")]
    RateLimited { retry_after_s: u64 },

    #[error("Domain not allowed: {0}")]
    DomainNotAllowed(String),

    #[error("Token expired")]
    Expired,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable code, suitable for client switching.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::ValidationFailed(_) => "validation_failed",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::UnsupportedFormat(_) => "unsupported_format",
            ApiError::ContextOverflow(_) => "context_overflow",
            ApiError::ProviderUnavailable(_) => "provider_unavailable",
            ApiError::ProviderRejected(_) => "provider_rejected",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::DomainNotAllowed(_) => "domain_not_allowed",
            ApiError::Expired => "expired",
            ApiError::DatabaseError(_) => "internal",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ContextOverflow(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ProviderRejected(_) => StatusCode::BAD_GATEWAY,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::DomainNotAllowed(_) => StatusCode::FORBIDDEN,
            ApiError::Expired => StatusCode::UNAUTHORIZED,
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("row not found".to_string()),
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        } else {
            tracing::warn!(code, %message, "request rejected");
        }

        // Rate limiting carries its retry hint in the payload and the header.
        let data = match &self {
            ApiError::RateLimited { retry_after_s } => json!({ "retry_after_s": retry_after_s }),
            _ => serde_json::Value::Null,
        };

        let body = Json(json!({
            "status": "error",
            "data": data,
            "message": message,
            "code": code,
        }));

        let mut response = (status, body).into_response();

        if let ApiError::RateLimited { retry_after_s } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_s.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            ApiError::ValidationFailed("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::RateLimited { retry_after_s: 12 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::DomainNotAllowed("evil.test".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::Expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::ProviderUnavailable("openai".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(ApiError::Expired.code(), "expired");
        assert_eq!(
            ApiError::ContextOverflow("too big".into()).code(),
            "context_overflow"
        );
        assert_eq!(
            ApiError::DatabaseError("pool".into()).code(),
            "internal"
        );
    }
}
