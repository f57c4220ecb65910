use axum::Json;
use serde::Serialize;

/// Uniform response envelope for every successful endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: &'static str,
    pub data: Option<T>,
    pub message: String,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        status: "success",
        data: Some(data),
        message: String::new(),
    })
}

pub fn ok_with<T: Serialize>(data: T, message: impl Into<String>) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        status: "success",
        data: Some(data),
        message: message.into(),
    })
}
