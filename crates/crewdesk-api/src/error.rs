use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crewdesk_types::api::ErrorBody;

/// Failure taxonomy shared by every chat operation.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store unavailable")]
    TransientStoreFailure(#[from] anyhow::Error),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::TransientStoreFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(e: tokio::task::JoinError) -> Self {
        error!("spawn_blocking join error: {}", e);
        Self::TransientStoreFailure(e.into())
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        if let Self::TransientStoreFailure(e) = &self {
            // Store details stay in the log, not in the response body
            error!("store failure: {:#}", e);
        }
        let body = ErrorBody { error: self.to_string() };
        (self.status(), Json(body)).into_response()
    }
}
