//! API error type.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cheshire_sdk::SDKError;
use serde::Serialize;
use thiserror::Error;

/// Error body returned by every route
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Errors surfaced by route handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Sdk(#[from] SDKError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Sdk(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Sdk(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            Self::Sdk(SDKError::Database(_) | SDKError::Io(_) | SDKError::Other(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Sdk(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self);
        }

        (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdk_errors_map_to_status() {
        assert_eq!(
            ApiError::from(SDKError::not_found("Extension", "x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(SDKError::extension("the core extension cannot be disabled")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SDKError::timeout(10)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
