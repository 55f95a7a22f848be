//! API error mapping for the HTTP surface

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Common(#[from] chordwise_common::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use chordwise_common::Error;

        let (status, code, message) = match &self {
            ApiError::Common(err) => {
                let status = match err {
                    Error::Validation(_) => StatusCode::BAD_REQUEST,
                    Error::Authentication(_) => StatusCode::UNAUTHORIZED,
                    Error::Authorization(_) => StatusCode::FORBIDDEN,
                    Error::NotFound(_) => StatusCode::NOT_FOUND,
                    Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code(), err.to_string())
            }
            ApiError::Other(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
