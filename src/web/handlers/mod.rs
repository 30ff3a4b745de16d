//! API handlers for the transfer endpoints.

pub mod archive;
pub mod download;
pub mod upload;

use std::path::Path;
use std::sync::Arc;

use crate::storage::StorageRoot;
use crate::upload::UploadStore;
use crate::web::error::ApiError;

/// Shared application state for all handlers.
pub struct AppState {
    /// Storage root served by the API.
    pub storage: StorageRoot,
    /// Active upload sessions.
    pub uploads: Arc<UploadStore>,
    /// Request body cap, sized to hold one chunk plus multipart overhead.
    pub max_body_bytes: usize,
}

impl AppState {
    /// Create a new application state.
    pub fn new(storage: StorageRoot, uploads: Arc<UploadStore>, max_body_bytes: usize) -> Self {
        Self {
            storage,
            uploads,
            max_body_bytes,
        }
    }
}

/// Fetch metadata for a resolved path, mapping a missing file to a 404
/// with a client-safe message.
pub(crate) async fn metadata_or_not_found(
    path: &Path,
    what: &str,
) -> Result<std::fs::Metadata, ApiError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::not_found(format!("{what} not found")))
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "metadata lookup failed");
            Err(ApiError::internal("Failed to read file metadata"))
        }
    }
}
