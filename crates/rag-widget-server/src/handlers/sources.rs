use axum::extract::{Extension, Multipart, Path};
use axum::Json;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::config::Settings;
use crate::crawler::Crawler;
use crate::database::models::{Source, SourceType};
use crate::database::Repository;
use crate::ingestion::{IngestJob, IngestQueue};
use crate::security::BotAccess;
use crate::storage::{object_path, source_prefix, ObjectStore};
use crate::utils::error::ApiError;
use crate::utils::response::{ok, ok_with, ApiResponse};

const MIME_PDF: &str = "application/pdf";
const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const MIME_TEXT: &str = "text/plain";

fn source_type_for_mime(mime: &str) -> Option<SourceType> {
    match mime {
        MIME_PDF => Some(SourceType::Pdf),
        MIME_DOCX => Some(SourceType::Docx),
        MIME_TEXT => Some(SourceType::Text),
        _ => None,
    }
}

pub async fn upload_source(
    AuthUser(user_id): AuthUser,
    Path(bot_id): Path<Uuid>,
    Extension(access): Extension<Arc<BotAccess>>,
    Extension(repository): Extension<Arc<Repository>>,
    Extension(storage): Extension<Arc<dyn ObjectStore>>,
    Extension(settings): Extension<Arc<Settings>>,
    Extension(queue): Extension<IngestQueue>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<Source>>, ApiError> {
    access.require_owner(user_id, bot_id).await?;

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::ValidationFailed(format!("failed to read field: {e}")))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(|s| s.to_string());
            content_type = field.content_type().map(|s| s.to_string());
            file_bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::ValidationFailed(format!("failed to read file: {e}")))?
                    .to_vec(),
            );
        }
    }

    let file_bytes =
        file_bytes.ok_or_else(|| ApiError::ValidationFailed("file field required".to_string()))?;
    let filename =
        filename.ok_or_else(|| ApiError::ValidationFailed("filename required".to_string()))?;

    if file_bytes.is_empty() {
        return Err(ApiError::ValidationFailed("file is empty".to_string()));
    }
    if file_bytes.len() as u64 > settings.storage.max_upload_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "file exceeds {} bytes",
            settings.storage.max_upload_bytes
        )));
    }

    let mime = content_type
        .filter(|m| !m.is_empty())
        .or_else(|| {
            mime_guess::from_path(&filename)
                .first_raw()
                .map(|m| m.to_string())
        })
        .unwrap_or_default();
    // Content types may carry parameters ("text/plain; charset=utf-8").
    let mime = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    let source_type = source_type_for_mime(&mime)
        .ok_or_else(|| ApiError::UnsupportedFormat(format!("mime type {mime:?} not accepted")))?;

    let checksum = hex::encode(Sha256::digest(&file_bytes));
    let source_id = Uuid::new_v4();
    let storage_path = object_path(bot_id, source_id, &filename);

    storage
        .put(&storage_path, &file_bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("object store write failed: {e}")))?;

    let source = repository
        .create_source(
            source_id,
            bot_id,
            source_type,
            None,
            &storage_path,
            Some(&checksum),
            Some(file_bytes.len() as i64),
            Some(&mime),
        )
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    queue
        .send(IngestJob { bot_id, source_id })
        .map_err(|e| ApiError::Internal(format!("failed to schedule ingestion: {e}")))?;

    info!(bot_id = %bot_id, source_id = %source_id, bytes = source.file_size, "file source accepted");

    Ok(ok_with(source, "source accepted for ingestion"))
}

#[derive(Debug, Deserialize)]
pub struct SubmitUrlRequest {
    pub url: String,
}

pub async fn submit_url(
    AuthUser(user_id): AuthUser,
    Path(bot_id): Path<Uuid>,
    Extension(access): Extension<Arc<BotAccess>>,
    Extension(repository): Extension<Arc<Repository>>,
    Extension(queue): Extension<IngestQueue>,
    Json(request): Json<SubmitUrlRequest>,
) -> Result<Json<ApiResponse<Source>>, ApiError> {
    access.require_owner(user_id, bot_id).await?;

    let url = Crawler::canonicalize(&request.url)
        .map_err(|e| ApiError::ValidationFailed(e.to_string()))?;

    let source_id = Uuid::new_v4();
    let source = repository
        .create_source(
            source_id,
            bot_id,
            SourceType::Html,
            Some(url.as_str()),
            "",
            None,
            None,
            Some("text/html"),
        )
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    queue
        .send(IngestJob { bot_id, source_id })
        .map_err(|e| ApiError::Internal(format!("failed to schedule ingestion: {e}")))?;

    info!(bot_id = %bot_id, source_id = %source_id, url = %url, "url source accepted");

    Ok(ok_with(source, "source accepted for ingestion"))
}

pub async fn list_sources(
    AuthUser(user_id): AuthUser,
    Path(bot_id): Path<Uuid>,
    Extension(access): Extension<Arc<BotAccess>>,
    Extension(repository): Extension<Arc<Repository>>,
) -> Result<Json<ApiResponse<Vec<Source>>>, ApiError> {
    access.require_owner(user_id, bot_id).await?;

    let sources = repository
        .list_sources(bot_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    Ok(ok(sources))
}

pub async fn get_source(
    AuthUser(user_id): AuthUser,
    Path((bot_id, source_id)): Path<(Uuid, Uuid)>,
    Extension(access): Extension<Arc<BotAccess>>,
    Extension(repository): Extension<Arc<Repository>>,
) -> Result<Json<ApiResponse<Source>>, ApiError> {
    access.require_owner(user_id, bot_id).await?;

    let source = repository
        .get_source(bot_id, source_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("source {source_id} not found")))?;

    Ok(ok(source))
}

pub async fn delete_source(
    AuthUser(user_id): AuthUser,
    Path((bot_id, source_id)): Path<(Uuid, Uuid)>,
    Extension(access): Extension<Arc<BotAccess>>,
    Extension(repository): Extension<Arc<Repository>>,
    Extension(storage): Extension<Arc<dyn ObjectStore>>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    access.require_owner(user_id, bot_id).await?;

    let storage_path = repository
        .delete_source(bot_id, source_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("source {source_id} not found")))?;

    if !storage_path.is_empty() {
        storage
            .delete_prefix(&source_prefix(bot_id, source_id))
            .await
            .map_err(|e| ApiError::Internal(format!("object store delete failed: {e}")))?;
    }

    info!(bot_id = %bot_id, source_id = %source_id, "source deleted");

    Ok(ok_with(
        serde_json::json!({ "deleted": true }),
        "source deleted",
    ))
}
