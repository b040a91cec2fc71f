use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type VideoResult<T> = Result<T, VideoError>;

/// Domain errors for the video service. The worker records `Service` and
/// validation messages into `video_jobs.error`; handlers translate the rest
/// to HTTP statuses. `Cancelled` is worker-internal control flow and is
/// never surfaced to clients.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Service(String),

    #[error("video job cancelled")]
    Cancelled,
}

impl VideoError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            VideoError::NotFound(_) => StatusCode::NOT_FOUND,
            VideoError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            VideoError::Service(_) | VideoError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for VideoError {
    fn from(e: rusqlite::Error) -> Self {
        VideoError::Service(format!("database error: {e}"))
    }
}

impl From<std::io::Error> for VideoError {
    fn from(e: std::io::Error) -> Self {
        VideoError::Service(format!("io error: {e}"))
    }
}

impl From<serde_json::Error> for VideoError {
    fn from(e: serde_json::Error) -> Self {
        VideoError::Service(format!("serialization error: {e}"))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for VideoError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            VideoError::not_found("x").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            VideoError::validation("x").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            VideoError::service("x").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            VideoError::Cancelled.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_message_is_not_prefixed() {
        let e = VideoError::service("ffmpeg failed with exit code 1");
        assert_eq!(e.to_string(), "ffmpeg failed with exit code 1");
    }
}
