//! Configuration module for Nimbus.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{NimbusError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins. Empty means permissive (development default).
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory served for uploads and downloads.
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Staging directory for in-flight upload sessions.
    #[serde(default = "default_staging_dir")]
    pub staging: String,
}

fn default_storage_root() -> String {
    "data/storage".to_string()
}

fn default_staging_dir() -> String {
    "data/staging".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            staging: default_staging_dir(),
        }
    }
}

/// Transfer tuning configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Chunk size in MiB for chunked transfers.
    #[serde(default = "default_chunk_size_mib")]
    pub chunk_size_mib: u64,
    /// Files at or below this size (MiB) upload as a single request.
    #[serde(default = "default_single_request_threshold_mib")]
    pub single_request_threshold_mib: u64,
    /// Maximum concurrently in-flight chunk requests per transfer.
    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,
    /// Attempts per chunk before the transfer fails.
    #[serde(default = "default_chunk_retry_limit")]
    pub chunk_retry_limit: u32,
    /// Seconds an upload session may sit idle before it is swept.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_chunk_size_mib() -> u64 {
    25
}

fn default_single_request_threshold_mib() -> u64 {
    50
}

fn default_max_concurrent_chunks() -> usize {
    4
}

fn default_chunk_retry_limit() -> u32 {
    3
}

fn default_session_ttl_secs() -> u64 {
    3600
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_mib: default_chunk_size_mib(),
            single_request_threshold_mib: default_single_request_threshold_mib(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            chunk_retry_limit: default_chunk_retry_limit(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl TransferConfig {
    /// Chunk size in bytes.
    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_mib * 1024 * 1024
    }

    /// Single-request threshold in bytes.
    pub fn threshold_bytes(&self) -> u64 {
        self.single_request_threshold_mib * 1024 * 1024
    }

    /// Session TTL as a duration.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file path. Console-only when unset.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Transfer tuning.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(NimbusError::Io)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| NimbusError::Config(format!("config parse error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8090);
        assert_eq!(config.storage.root, "data/storage");
        assert_eq!(config.transfer.chunk_size_mib, 25);
        assert_eq!(config.transfer.max_concurrent_chunks, 4);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.transfer.session_ttl_secs, 3600);
    }

    #[test]
    fn test_parse_partial_override() {
        let config = Config::parse(
            r#"
[server]
port = 9000

[transfer]
chunk_size_mib = 8
chunk_retry_limit = 5
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.transfer.chunk_size_mib, 8);
        assert_eq!(config.transfer.chunk_retry_limit, 5);
        // Untouched sections keep defaults
        assert_eq!(config.transfer.max_concurrent_chunks, 4);
        assert_eq!(config.storage.staging, "data/staging");
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = Config::parse("[server\nport = 9000");
        assert!(result.is_err());
    }

    #[test]
    fn test_byte_conversions() {
        let transfer = TransferConfig::default();
        assert_eq!(transfer.chunk_size_bytes(), 25 * 1024 * 1024);
        assert_eq!(transfer.threshold_bytes(), 50 * 1024 * 1024);
        assert_eq!(transfer.session_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_cors_origins() {
        let config = Config::parse(
            r#"
[server]
cors_origins = ["http://localhost:5173"]
"#,
        )
        .unwrap();
        assert_eq!(config.server.cors_origins.len(), 1);
    }
}
