use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Structured error kinds per the propagation policy: every outbound call is
/// wrapped so a single failure becomes a per-item outcome or a 5xx response,
/// never a poisoned batch. Only invariant violations are fatal.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("No healthy IPFS node found")]
    NoHealthyNode,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("failed to emit span: {0}")]
    EmitFailure(String),

    #[error("catalog error: {0}")]
    CatalogFailure(String),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Transport(e.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::CatalogFailure(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NoHealthyNode => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::DeadlineExceeded => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
            AppError::EmitFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::CatalogFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, axum::Json(json!({ "error": self.to_string() }))).into_response()
    }
}
