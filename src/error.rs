// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    /// No usable user access; the owner must re-authorize.
    #[error("Authorization failed: {0}")]
    AuthFailure(String),

    /// Network error, 5xx or unexpected platform response.
    #[error("Feishu API error: {0}")]
    FeishuApi(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Marker carried by `FeishuApi` when the platform rejected the access token.
    pub const FEISHU_TOKEN_ERROR: &'static str = "Token expired or invalid";

    /// Platform error codes that mean the user access token must be refreshed.
    pub const TOKEN_EXPIRED_CODES: [i64; 2] = [99991677, 99991668];

    /// Whether the error signals an expired or rejected access token.
    pub fn is_token_error(&self) -> bool {
        matches!(self, AppError::FeishuApi(msg) if msg.starts_with(Self::FEISHU_TOKEN_ERROR))
    }

    /// Build the token-rejection error for the given platform detail.
    pub fn token_rejected(detail: impl std::fmt::Display) -> Self {
        AppError::FeishuApi(format!("{} ({})", Self::FEISHU_TOKEN_ERROR, detail))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::AuthFailure(msg) => {
                (StatusCode::UNAUTHORIZED, "auth_failure", Some(msg.clone()))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::FeishuApi(msg) => {
                (StatusCode::BAD_GATEWAY, "feishu_error", Some(msg.clone()))
            }
            AppError::DownloadFailed(msg) => {
                tracing::error!(error = %msg, "Download error");
                (StatusCode::INTERNAL_SERVER_ERROR, "download_error", None)
            }
            AppError::Storage(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
