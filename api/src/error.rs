/// JSON error responses for the API.
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use tubefetch_shared::errors::{ExtractError, FetchError};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Seconds clients are asked to wait after a retriable extractor failure.
const RETRY_AFTER_SECS: u64 = 30;

/// An error returned by a handler: a status code and a message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    /// Sent as `Retry-After` when set.
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), retry_after: None }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(ErrorBody { error: self.message })).into_response();
        if let Some(secs) = self.retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, secs.into());
        }
        response
    }
}

/// Status code for a failed yt-dlp / ffmpeg operation.
pub fn status_for(err: &FetchError) -> StatusCode {
    match err.root() {
        FetchError::Extract(e) => match e {
            ExtractError::UnsupportedUrl(_) => StatusCode::BAD_REQUEST,
            ExtractError::VideoUnavailable(_) | ExtractError::NoEntries => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ExtractError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::BAD_GATEWAY,
        },
        FetchError::Process(_) => StatusCode::BAD_GATEWAY,
        FetchError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            warn!("Request failed: {}", err);
        }
        let mut api_err = Self::new(status, err.to_string());
        if err.extract_error().is_some_and(ExtractError::is_retriable) {
            api_err.retry_after = Some(RETRY_AFTER_SECS);
        }
        api_err
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        warn!("Internal error: {:#}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tubefetch_shared::errors::ProcessError;

    #[test]
    fn test_status_mapping() {
        let wrapped = |e: FetchError| FetchError::context("Failed to extract video info", e);

        assert_eq!(
            status_for(&wrapped(ExtractError::UnsupportedUrl("x".into()).into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&wrapped(ExtractError::VideoUnavailable("gone".into()).into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&wrapped(ExtractError::RateLimited("429".into()).into())),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&wrapped(ExtractError::AuthRequired("sign in".into()).into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&wrapped(ProcessError::Timeout(60).into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&FetchError::Io(std::io::Error::other("disk"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_message_keeps_context() {
        let err: ApiError = FetchError::context(
            "Download failed",
            ExtractError::VideoUnavailable("This video is private".into()),
        )
        .into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.message, "Download failed: Video unavailable: This video is private");
        assert!(err.retry_after.is_none());
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let err: ApiError = FetchError::context(
            "Failed to extract video info",
            ExtractError::RateLimited("HTTP Error 429".into()),
        )
        .into();
        assert_eq!(err.retry_after, Some(RETRY_AFTER_SECS));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");

        let plain = ApiError::not_found("Job not found").into_response();
        assert!(plain.headers().get(header::RETRY_AFTER).is_none());
    }
}
