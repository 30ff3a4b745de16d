//! Error types for Nimbus.

use thiserror::Error;

/// Common error type for Nimbus transfer operations.
#[derive(Error, Debug)]
pub enum NimbusError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A path escaped the storage root or contained forbidden components.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A folder operation was requested on something that is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A folder (or selection) contained no eligible files.
    #[error("no files to archive: {0}")]
    EmptyFolder(String),

    /// Unknown or already-finished upload token.
    #[error("upload session not found: {0}")]
    SessionNotFound(String),

    /// `complete` was called before every chunk arrived.
    #[error("upload incomplete: {} chunks missing", missing.len())]
    IncompleteUpload { missing: Vec<u32> },

    /// Validation error for caller input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Archive generation error.
    #[error("archive error: {0}")]
    Archive(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP transport error (client side).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a coded error body (client side).
    #[error("server error {code}: {message}")]
    Server { code: String, message: String },

    /// A chunk transfer exhausted its retry budget (client side).
    #[error("chunk {number} failed after {attempts} attempts: {message}")]
    ChunkFailed {
        number: u32,
        attempts: u32,
        message: String,
    },

    /// The operation was cancelled by its cancellation token.
    #[error("transfer cancelled")]
    Cancelled,
}

/// Result type alias for Nimbus operations.
pub type Result<T> = std::result::Result<T, NimbusError>;
