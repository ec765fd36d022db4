//! Mapping of core errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use ripstream_core::{BackendError, ProbeError, RegistryError};
use serde_json::json;
use thiserror::Error;

/// Errors returned by HTTP handlers.
///
/// Always rendered as `{"message": ...}` with a status derived from the
/// underlying error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Failed to build response: {0}")]
    Response(#[from] axum::http::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Registry(
                RegistryError::InvalidPath { .. } | RegistryError::InvalidFileIndex { .. },
            ) => StatusCode::BAD_REQUEST,
            ApiError::Registry(RegistryError::FileNotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Probe(ProbeError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::warn!("Request failed with {}: {}", status, message);
        } else {
            tracing::debug!("Request rejected with {}: {}", status, message);
        }

        (status, Json(json!({ "message": message }))).into_response()
    }
}
