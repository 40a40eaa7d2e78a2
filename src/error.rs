//! Error types that cross module boundaries: HTTP responses and startup.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::gtfs::loader::LoadError;
use crate::matcher::MatchError;
use crate::realtime::ReplayError;
use crate::secrets::SecretError;

/// Per-request failure, reported only to the caller that made the request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request could not be parsed at all.
    #[error("{0}")]
    Malformed(String),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Replay(#[from] ReplayError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Malformed(_)
            | ApiError::Replay(_)
            | ApiError::Match(MatchError::InvalidCoordinate(_))
            | ApiError::Match(MatchError::InvalidTrace(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Match(MatchError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    status: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            status: status.as_u16(),
        };
        (status, axum::Json(body)).into_response()
    }
}

/// Anything that stops the service from coming up.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to load reference data: {0}")]
    Load(#[from] LoadError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}
