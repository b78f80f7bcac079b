//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lanvan_storage::StorageError;
use lanvan_upload::UploadError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("chunk body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] lanvan_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Internal(_) => "internal_error",
            Self::Upload(e) => e.kind(),
            Self::Storage(StorageError::NotFound(_)) => "not_found",
            Self::Storage(StorageError::InvalidName(_)) => "validation",
            Self::Storage(_) => "storage_error",
            Self::Core(_) => "validation",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upload(e) => match e {
                UploadError::Validation(_) => StatusCode::BAD_REQUEST,
                UploadError::SizeMismatch { .. }
                | UploadError::HashMismatch { .. }
                | UploadError::Overflow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                UploadError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
                UploadError::ResourceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
                UploadError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                UploadError::Aborted
                | UploadError::SessionClosed(_)
                | UploadError::InvalidTransition { .. } => StatusCode::CONFLICT,
                UploadError::Storage(StorageError::InvalidName(_)) => StatusCode::BAD_REQUEST,
                UploadError::Io(_) | UploadError::Storage(_) | UploadError::Cipher(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::InvalidName(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// JSON body for this error, also used for per-file admission failures.
    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(self.to_response_body())).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use lanvan_core::SessionId;

    #[test]
    fn test_upload_error_codes_and_statuses() {
        let err = ApiError::from(UploadError::SessionNotFound(SessionId::new()));
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = ApiError::from(UploadError::Overflow {
            declared: 1,
            received: 2,
        });
        assert_eq!(err.code(), "integrity");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let err = ApiError::from(UploadError::ResourceExhausted("full".into()));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_storage_not_found_maps_to_404() {
        let err = ApiError::from(StorageError::NotFound("x".into()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "not_found");
    }
}
