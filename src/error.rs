//! Error handling for the monitoring orchestrator

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Camera hardware permission refused (terminal for that attempt)
    #[error("Acquisition denied: {0}")]
    AcquisitionDenied(String),

    /// Remote side rejected a stream start request (no channel created)
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Mid-session channel/connection loss (implicit stop, no auto-retry)
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Single malformed frame (dropped by callers, session continues)
    #[error("Frame decode error: {0}")]
    FrameDecode(String),

    /// One-shot processing request failed (prior output is retained)
    #[error("Submission failed: {0}")]
    Submission(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable code for user-visible notices and API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::AcquisitionDenied(_) => "ACQUISITION_DENIED",
            Error::InitializationFailed(_) => "INITIALIZATION_FAILED",
            Error::TransportFailure(_) => "TRANSPORT_FAILURE",
            Error::FrameDecode(_) => "FRAME_DECODE_ERROR",
            Error::Submission(_) => "SUBMISSION_FAILED",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::AcquisitionDenied(_) => StatusCode::FORBIDDEN,
            Error::InitializationFailed(_)
            | Error::TransportFailure(_)
            | Error::Submission(_)
            | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::FrameDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Serialization(_) | Error::Io(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let error_code = self.code();
        let message = self.to_string();

        let body = Json(json!({
            "ok": false,
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
