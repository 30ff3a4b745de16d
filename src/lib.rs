//! Nimbus - chunked file transfer service
//!
//! A self-hosted file transfer server and client library: resumable
//! chunked uploads, ranged downloads, and streaming ZIP archives over a
//! plain HTTP API.

pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod storage;
pub mod transfer;
pub mod upload;
pub mod web;

pub use client::{
    BatchOutcome, ClientConfig, DownloadManager, DownloadSnapshot, DownloadStatus, UploadOutcome,
    Uploader,
};
pub use config::Config;
pub use error::{NimbusError, Result};
pub use storage::StorageRoot;
pub use transfer::{
    CancelHandle, ChunkSpec, ConcurrencyLimiter, EventBus, TaskHandle, TransferEvent,
};
pub use web::WebServer;
