//! Client-side transfer engines.
//!
//! `Uploader` and `DownloadManager` drive the transfer API with bounded
//! concurrency, retries, typed progress events and cancellation.

pub mod downloader;
pub mod uploader;

pub use downloader::{DownloadManager, DownloadSnapshot, DownloadStatus};
pub use uploader::{BatchOutcome, UploadOutcome, Uploader};

use std::time::Duration;

use serde::Deserialize;

use crate::transfer::DEFAULT_CHUNK_SIZE;
use crate::{NimbusError, Result};

/// Client-side transfer tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the transfer API, e.g. `http://host:8090`.
    pub base_url: String,
    /// Chunk size for chunked transfers.
    pub chunk_size: u64,
    /// Files at or below this size upload as a single request.
    pub single_request_threshold: u64,
    /// Maximum concurrently in-flight chunk requests.
    pub max_concurrent_chunks: usize,
    /// Attempts per chunk before the transfer fails.
    pub chunk_retry_limit: u32,
    /// Download history entries kept per manager.
    pub history_limit: usize,
    /// An active download with no progress for this long is marked failed.
    pub stall_timeout: Duration,
}

impl ClientConfig {
    /// Defaults matching the server's transfer tuning.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            single_request_threshold: 50 * 1024 * 1024,
            max_concurrent_chunks: 4,
            chunk_retry_limit: 3,
            history_limit: 50,
            stall_timeout: Duration::from_secs(30),
        }
    }
}

/// Error body shape the server uses for every failure.
#[derive(Debug, Deserialize)]
struct ApiFailure {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Turn a non-success response into a typed server error.
pub(crate) async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let failure: ApiFailure = response.json().await.unwrap_or(ApiFailure {
        code: None,
        message: None,
    });
    Err(NimbusError::Server {
        code: failure.code.unwrap_or_else(|| status.to_string()),
        message: failure
            .message
            .unwrap_or_else(|| "request failed".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::new("http://localhost:8090");
        assert_eq!(config.chunk_size, 25 * 1024 * 1024);
        assert_eq!(config.single_request_threshold, 50 * 1024 * 1024);
        assert_eq!(config.max_concurrent_chunks, 4);
        assert_eq!(config.chunk_retry_limit, 3);
    }
}
