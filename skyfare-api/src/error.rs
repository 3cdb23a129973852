use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use skyfare_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Core(err) => match err {
                CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_failed", msg),
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
                CoreError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
                CoreError::ProviderUnavailable(msg) => {
                    (StatusCode::BAD_GATEWAY, "provider_unavailable", msg)
                }
                CoreError::ProviderRejected(msg) => {
                    (StatusCode::BAD_GATEWAY, "provider_rejected", msg)
                }
                CoreError::SignatureRejected(msg) => {
                    (StatusCode::UNAUTHORIZED, "signature_rejected", msg)
                }
                CoreError::MalformedEvent(msg) => {
                    (StatusCode::BAD_REQUEST, "malformed_event", msg)
                }
                CoreError::Storage(msg) => {
                    tracing::error!("Storage error: {}", msg);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        "Internal Server Error".to_string(),
                    )
                }
            },
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            AppError::Internal(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal Server Error".to_string(),
                )
            }
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
