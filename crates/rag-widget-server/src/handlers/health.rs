use axum::{extract::Extension, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::database::Repository;
use crate::utils::error::ApiError;
use crate::utils::response::{ok, ApiResponse};

pub async fn health_check() -> Json<ApiResponse<Value>> {
    ok(json!({ "status": "up" }))
}

pub async fn readiness_check(
    Extension(repository): Extension<Arc<Repository>>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    sqlx::query("SELECT 1")
        .execute(repository.pool())
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    Ok(ok(json!({ "status": "ready" })))
}
