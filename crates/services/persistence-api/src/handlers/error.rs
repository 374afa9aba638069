//! Error handling types for HTTP handlers

use axum::{Json, http::StatusCode};

/// Standard error response returned by the API
///
/// ## Error Code Conventions
/// - Error codes use SCREAMING_SNAKE_CASE (e.g., `SNAPSHOT_NOT_FOUND`)
/// - Codes are stable and can be relied upon programmatically
/// - Messages may change and should only be used for display/logging
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    /// HTTP status code for this error
    ///
    /// Not serialized to JSON - used internally for response construction
    #[serde(skip, default = "default_status_code")]
    pub status_code: StatusCode,

    /// Machine-readable error code in SCREAMING_SNAKE_CASE format
    pub error_code: String,

    /// Human-readable error message
    pub error_message: String,
}

fn default_status_code() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Trait for error types that can be converted to HTTP error responses
///
/// This trait must be implemented by all handler-specific error enums to
/// enable automatic conversion into `ErrorResponse`.
pub trait IntoErrorResponse: std::fmt::Display + Send + Sync + 'static {
    /// Returns a stable, machine-readable error code
    fn error_code(&self) -> &'static str;

    /// Returns the HTTP status code for this error
    fn status_code(&self) -> StatusCode;
}

impl<E> From<E> for ErrorResponse
where
    E: IntoErrorResponse,
{
    fn from(error: E) -> Self {
        ErrorResponse {
            status_code: error.status_code(),
            error_code: error.error_code().to_string(),
            error_message: error.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error_message.fmt(f)
    }
}

impl axum::response::IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code;
        (status_code, Json(self)).into_response()
    }
}

/// The standard mapping from service errors to HTTP responses.
///
/// Handler-specific error enums delegate their service variants here.
impl IntoErrorResponse for persistence::Error {
    fn error_code(&self) -> &'static str {
        match self {
            persistence::Error::Validation(_) => "VALIDATION_ERROR",
            persistence::Error::Authorization(_) => "HARD_DELETE_CONFIRMATION_REQUIRED",
            persistence::Error::NotFound(_) => "NOT_FOUND",
            persistence::Error::Storage(_) => "STORAGE_ERROR",
            persistence::Error::Flush(_) => "STORAGE_ERROR",
            persistence::Error::Codec(_) => "CODEC_ERROR",
            persistence::Error::Config(_) => "CONFIG_ERROR",
            persistence::Error::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            persistence::Error::Validation(_) => StatusCode::BAD_REQUEST,
            persistence::Error::Authorization(_) => StatusCode::FORBIDDEN,
            persistence::Error::NotFound(_) => StatusCode::NOT_FOUND,
            persistence::Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            persistence::Error::Flush(_) => StatusCode::INTERNAL_SERVER_ERROR,
            persistence::Error::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
            persistence::Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            persistence::Error::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}
