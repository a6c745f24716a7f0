use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy for the whole request pipeline. Every variant maps to one
/// HTTP status and one machine-readable code; compensation failures are logged
/// at the call site and never surfaced in place of the original error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthenticated,
    /// Same as `Unauthenticated`, but the session expired server-side and the
    /// client should drop its stale credentials.
    #[error("auth session expired")]
    SessionExpired,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
    #[error("not found")]
    NotFound,
    #[error("failed to upload image: {0}")]
    StoreWrite(String),
    #[error("failed to get public URL for the uploaded image: {0}")]
    StoreResolve(String),
    #[error("failed to insert image record: {0}")]
    RepositoryWrite(String),
    #[error("the model returned no image")]
    NoImageReturned,
    #[error("upstream service error: {0}")]
    Upstream(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated | ApiError::SessionExpired => "Unauthenticated",
            ApiError::InvalidRequest(_) => "InvalidRequest",
            ApiError::UnsupportedInput(_) => "UnsupportedInput",
            ApiError::NotFound => "NotFound",
            ApiError::StoreWrite(_) => "StoreWriteError",
            ApiError::StoreResolve(_) => "StoreResolveError",
            ApiError::RepositoryWrite(_) => "RepositoryWriteError",
            ApiError::NoImageReturned => "NoImageReturned",
            ApiError::Upstream(_) => "UpstreamServiceError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated | ApiError::SessionExpired => StatusCode::UNAUTHORIZED,
            ApiError::InvalidRequest(_) | ApiError::UnsupportedInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::StoreWrite(_)
            | ApiError::StoreResolve(_)
            | ApiError::RepositoryWrite(_)
            | ApiError::NoImageReturned
            | ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    clear_session: Option<bool>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::warn!(code = self.code(), error = %self, "request rejected");
        }
        let body = ErrorBody {
            code: self.code(),
            error: self.to_string(),
            clear_session: matches!(self, ApiError::SessionExpired).then_some(true),
        };
        (status, Json(body)).into_response()
    }
}
