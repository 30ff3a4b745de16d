//! API error handling for the Nimbus Web API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// API error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Bad request (400).
    BadRequest,
    /// Path escaped the storage root or was malformed (400).
    InvalidPath,
    /// File or resource not found (404).
    NotFound,
    /// Archive source folder not found (404).
    FolderNotFound,
    /// Archive source is not a directory (400).
    NotADirectory,
    /// Folder or selection has no files to archive (422).
    EmptyFolder,
    /// Unknown or already-finished upload token (404).
    SessionNotFound,
    /// Complete requested before all chunks arrived (409).
    IncompleteUpload,
    /// Archive generation failed (500).
    ArchiveError,
    /// Internal server error (500).
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidPath => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::FolderNotFound => StatusCode::NOT_FOUND,
            ErrorCode::NotADirectory => StatusCode::BAD_REQUEST,
            ErrorCode::EmptyFolder => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::SessionNotFound => StatusCode::NOT_FOUND,
            ErrorCode::IncompleteUpload => StatusCode::CONFLICT,
            ErrorCode::ArchiveError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Always `false` on the error path.
    pub success: bool,
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Missing chunk numbers (only for incomplete uploads).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_chunks: Option<Vec<u32>>,
}

/// API error type.
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    missing_chunks: Option<Vec<u32>>,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            missing_chunks: None,
        }
    }

    /// Create a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Create an invalid path error.
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPath, message)
    }

    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Create a session not found error.
    pub fn session_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SessionNotFound, message)
    }

    /// Create an incomplete upload error listing the missing chunks.
    pub fn incomplete_upload(missing: Vec<u32>) -> Self {
        Self {
            code: ErrorCode::IncompleteUpload,
            message: format!("upload incomplete: {} chunks missing", missing.len()),
            missing_chunks: Some(missing),
        }
    }

    /// Create an internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The error code (for handler-level remapping).
    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status_code();
        let body = ErrorBody {
            success: false,
            code: self.code,
            message: self.message,
            missing_chunks: self.missing_chunks,
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<crate::NimbusError> for ApiError {
    fn from(err: crate::NimbusError) -> Self {
        use crate::NimbusError;
        match err {
            NimbusError::InvalidPath(msg) => ApiError::invalid_path(msg),
            NimbusError::NotFound(msg) => ApiError::not_found(format!("{msg} not found")),
            NimbusError::NotADirectory(msg) => ApiError::new(ErrorCode::NotADirectory, msg),
            NimbusError::EmptyFolder(msg) => ApiError::new(ErrorCode::EmptyFolder, msg),
            NimbusError::SessionNotFound(msg) => ApiError::session_not_found(msg),
            NimbusError::IncompleteUpload { missing } => ApiError::incomplete_upload(missing),
            NimbusError::InvalidInput(msg) => ApiError::bad_request(msg),
            NimbusError::Archive(msg) => ApiError::new(ErrorCode::ArchiveError, msg),
            other => {
                tracing::error!("Internal error: {}", other);
                ApiError::internal("An internal error occurred")
            }
        }
    }
}
