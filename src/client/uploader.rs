//! Upload orchestration.
//!
//! Small files go up in one request; larger files run the chunked protocol
//! (`init` → concurrent chunks → `complete`). Each chunk has its own retry
//! budget with linear backoff, and progress counts only confirmed bytes, so
//! a retried chunk never inflates the numbers. Cancellation stops new
//! chunks, abandons in-flight results, sends a best-effort `abort`, and
//! emits exactly one `Cancelled` event.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use reqwest::multipart::{Form, Part};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::client::{check_response, ClientConfig};
use crate::transfer::{
    chunk, time_remaining, ChunkSpec, ConcurrencyLimiter, EventBus, SpeedMeter, TransferEvent,
};
use crate::web::dto::{InitUploadResponse, UploadTokenRequest};
use crate::{NimbusError, Result};

/// Result of a single file upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Server-issued session token.
    pub token: Uuid,
    pub file_name: String,
    pub bytes: u64,
    pub chunks: u32,
}

/// Result of a batch upload. The batch carries on past individual
/// failures; it succeeded only if nothing failed.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub uploaded: usize,
    pub failed: Vec<(PathBuf, String)>,
    pub total_bytes: u64,
}

impl BatchOutcome {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Overall-progress context while a file uploads as part of a batch.
#[derive(Debug, Clone, Copy)]
struct BatchContext {
    id: Uuid,
    base: u64,
    total: u64,
}

/// Client upload engine.
#[derive(Clone)]
pub struct Uploader {
    http: reqwest::Client,
    config: ClientConfig,
    limiter: ConcurrencyLimiter,
    events: EventBus,
}

/// Chunk size to plan with: files under the threshold go as one chunk.
fn effective_chunk_size(file_size: u64, config: &ClientConfig) -> u64 {
    if file_size <= config.single_request_threshold {
        file_size.max(1)
    } else {
        config.chunk_size
    }
}

impl Uploader {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            limiter: ConcurrencyLimiter::new(config.max_concurrent_chunks),
            events: EventBus::new(),
            config,
        }
    }

    /// Subscribe to transfer events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<TransferEvent> {
        self.events.subscribe()
    }

    /// Adjust chunk concurrency at runtime. Raising it dispatches queued
    /// chunks immediately.
    pub fn set_chunk_concurrency(&self, limit: usize) {
        self.limiter.set_limit(limit);
    }

    /// Upload one file into `destination` (a folder relative to the
    /// server's storage root).
    pub async fn upload_file(
        &self,
        path: &Path,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        self.upload_file_inner(path, destination, cancel, None)
            .await
    }

    /// Upload several files sequentially into the same destination.
    ///
    /// Per-file failures are collected and the batch keeps going;
    /// cancellation stops it with a batch-level `Cancelled` event.
    pub async fn upload_files(
        &self,
        paths: &[PathBuf],
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        let batch_id = Uuid::new_v4();
        let mut failed: Vec<(PathBuf, String)> = Vec::new();
        let mut sized = Vec::with_capacity(paths.len());
        let mut total = 0u64;
        for path in paths {
            match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() => {
                    total += meta.len();
                    sized.push((path.clone(), meta.len()));
                }
                Ok(_) => failed.push((path.clone(), "not a regular file".to_string())),
                Err(e) => failed.push((path.clone(), e.to_string())),
            }
        }

        self.events.emit(TransferEvent::Started {
            id: batch_id,
            name: format!("{} files", paths.len()),
            total_bytes: Some(total),
        });

        let mut uploaded = 0usize;
        let mut transferred = 0u64;
        for (path, size) in sized {
            if cancel.is_cancelled() {
                self.events.emit(TransferEvent::Cancelled { id: batch_id });
                return Err(NimbusError::Cancelled);
            }
            let batch = BatchContext {
                id: batch_id,
                base: transferred,
                total,
            };
            match self
                .upload_file_inner(&path, destination, cancel, Some(batch))
                .await
            {
                Ok(_) => {
                    uploaded += 1;
                    transferred += size;
                    self.events.emit(TransferEvent::Progress {
                        id: batch_id,
                        transferred,
                        total_bytes: Some(total),
                        speed_bps: None,
                        eta: None,
                    });
                }
                Err(NimbusError::Cancelled) => {
                    self.events.emit(TransferEvent::Cancelled { id: batch_id });
                    return Err(NimbusError::Cancelled);
                }
                Err(e) => failed.push((path.clone(), e.to_string())),
            }
        }

        if failed.is_empty() {
            self.events.emit(TransferEvent::Completed {
                id: batch_id,
                transferred,
            });
        } else {
            self.events.emit(TransferEvent::Failed {
                id: batch_id,
                message: format!("{} of {} files failed", failed.len(), paths.len()),
            });
        }

        Ok(BatchOutcome {
            uploaded,
            failed,
            total_bytes: transferred,
        })
    }

    async fn upload_file_inner(
        &self,
        path: &Path,
        destination: &str,
        cancel: &CancellationToken,
        batch: Option<BatchContext>,
    ) -> Result<UploadOutcome> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                NimbusError::InvalidInput(format!("path has no file name: {}", path.display()))
            })?;
        let meta = tokio::fs::metadata(path).await?;
        let size = meta.len();
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);
        let id = Uuid::new_v4();

        self.events.emit(TransferEvent::Started {
            id,
            name: file_name.clone(),
            total_bytes: Some(size),
        });

        let result = self
            .run_upload(
                id,
                path,
                &file_name,
                size,
                last_modified,
                destination,
                cancel,
                batch,
            )
            .await;

        match &result {
            Ok(_) => self.events.emit(TransferEvent::Completed {
                id,
                transferred: size,
            }),
            Err(NimbusError::Cancelled) => self.events.emit(TransferEvent::Cancelled { id }),
            Err(e) => self.events.emit(TransferEvent::Failed {
                id,
                message: e.to_string(),
            }),
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_upload(
        &self,
        id: Uuid,
        path: &Path,
        file_name: &str,
        size: u64,
        last_modified: Option<u64>,
        destination: &str,
        cancel: &CancellationToken,
        batch: Option<BatchContext>,
    ) -> Result<UploadOutcome> {
        if cancel.is_cancelled() {
            return Err(NimbusError::Cancelled);
        }

        let chunk_size = effective_chunk_size(size, &self.config);
        let chunks = chunk::plan(size, chunk_size)?;
        let chunk_total = chunks.len() as u32;

        let token = self
            .init_session(
                file_name,
                size,
                chunk_total,
                chunk_size,
                last_modified,
                destination,
            )
            .await?;

        let confirmed = Arc::new(AtomicU64::new(0));
        let meter = Arc::new(Mutex::new(SpeedMeter::default()));
        let retry_limit = self.config.chunk_retry_limit.max(1);

        let mut joins = Vec::with_capacity(chunks.len());
        let mut cancels = Vec::with_capacity(chunks.len());
        for spec in chunks {
            let http = self.http.clone();
            let base_url = self.config.base_url.clone();
            let events = self.events.clone();
            let cancel = cancel.clone();
            let confirmed = Arc::clone(&confirmed);
            let meter = Arc::clone(&meter);
            let path = path.to_path_buf();
            let file_name = file_name.to_string();

            let task = async move {
                send_chunk_with_retry(
                    &http, &base_url, token, &path, &file_name, spec, retry_limit, &cancel,
                )
                .await?;

                // Count bytes only once the chunk is confirmed. Holding the
                // meter lock across the emit keeps transferred values in
                // order even when chunks land on different workers.
                {
                    let mut meter = meter.lock().unwrap();
                    let done = confirmed.fetch_add(spec.size, Ordering::SeqCst) + spec.size;
                    let speed = meter.sample(done);
                    let eta = speed.and_then(|s| time_remaining(size, done, s));
                    events.emit(TransferEvent::Progress {
                        id,
                        transferred: done,
                        total_bytes: Some(size),
                        speed_bps: speed,
                        eta,
                    });
                    if let Some(batch) = batch {
                        events.emit(TransferEvent::Progress {
                            id: batch.id,
                            transferred: batch.base + done,
                            total_bytes: Some(batch.total),
                            speed_bps: speed,
                            eta: None,
                        });
                    }
                }
                Ok::<(), NimbusError>(())
            };
            let (handle, cancel_handle) = self.limiter.enqueue(task);
            joins.push(handle);
            cancels.push(cancel_handle);
        }

        let mut cancelled = false;
        let mut first_error: Option<NimbusError> = None;
        for handle in joins {
            tokio::select! {
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    // Drop everything still queued; in-flight results are
                    // abandoned as their handles drop
                    for cancel_handle in &cancels {
                        cancel_handle.cancel();
                    }
                }
                joined = handle.join() => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(NimbusError::Cancelled)) => cancelled = true,
                    Ok(Err(e)) => {
                        if first_error.is_none() {
                            // Fail fast: no point sending the rest
                            for cancel_handle in &cancels {
                                cancel_handle.cancel();
                            }
                            first_error = Some(e);
                        }
                    }
                    // Removed from the queue before it ran
                    Err(_) => {}
                },
            }
        }

        if cancelled {
            let _ = self.abort_session(&token).await;
            return Err(NimbusError::Cancelled);
        }
        if let Some(e) = first_error {
            let _ = self.abort_session(&token).await;
            return Err(e);
        }

        if let Err(e) = self.complete_session(&token).await {
            let _ = self.abort_session(&token).await;
            return Err(e);
        }

        Ok(UploadOutcome {
            token,
            file_name: file_name.to_string(),
            bytes: size,
            chunks: chunk_total,
        })
    }

    async fn init_session(
        &self,
        file_name: &str,
        file_size: u64,
        chunk_count: u32,
        chunk_size: u64,
        last_modified: Option<u64>,
        destination: &str,
    ) -> Result<Uuid> {
        let body = serde_json::json!({
            "fileName": file_name,
            "fileSize": file_size,
            "chunkCount": chunk_count,
            "chunkSize": chunk_size,
            "destinationPath": destination,
            "lastModified": last_modified,
        });
        let response = self
            .http
            .post(format!("{}/uploads/init", self.config.base_url))
            .json(&body)
            .send()
            .await?;
        let response = check_response(response).await?;
        let parsed: InitUploadResponse = response.json().await?;
        Ok(parsed.upload_token)
    }

    async fn complete_session(&self, token: &Uuid) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/uploads/complete", self.config.base_url))
            .json(&UploadTokenRequest {
                upload_token: *token,
            })
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }

    async fn abort_session(&self, token: &Uuid) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/uploads/abort", self.config.base_url))
            .json(&UploadTokenRequest {
                upload_token: *token,
            })
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }
}

/// Read one chunk's bytes from the source file.
async fn read_chunk(path: &Path, spec: ChunkSpec) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(spec.offset)).await?;
    let mut buf = vec![0u8; spec.size as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn send_chunk_once(
    http: &reqwest::Client,
    base_url: &str,
    token: Uuid,
    path: &Path,
    file_name: &str,
    spec: ChunkSpec,
) -> Result<()> {
    let bytes = read_chunk(path, spec).await?;
    let form = Form::new()
        .text("uploadToken", token.to_string())
        .text("chunkNumber", spec.number.to_string())
        .part("chunk", Part::bytes(bytes).file_name(file_name.to_string()));
    let response = http
        .post(format!("{base_url}/uploads/chunk"))
        .multipart(form)
        .send()
        .await?;
    check_response(response).await?;
    Ok(())
}

/// Per-chunk retry state machine: up to `retry_limit` attempts with
/// linear backoff (`attempt * 1s`) between them.
#[allow(clippy::too_many_arguments)]
async fn send_chunk_with_retry(
    http: &reqwest::Client,
    base_url: &str,
    token: Uuid,
    path: &Path,
    file_name: &str,
    spec: ChunkSpec,
    retry_limit: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(NimbusError::Cancelled);
        }
        match send_chunk_once(http, base_url, token, path, file_name, spec).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retry_limit => {
                debug!(
                    chunk = spec.number,
                    attempt,
                    error = %e,
                    "chunk attempt failed, backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(NimbusError::Cancelled),
                    _ = sleep(Duration::from_secs(u64::from(attempt))) => {}
                }
            }
            Err(e) => {
                return Err(NimbusError::ChunkFailed {
                    number: spec.number,
                    attempts: attempt,
                    message: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        let mut config = ClientConfig::new("http://localhost:0");
        config.chunk_size = 1024;
        config.single_request_threshold = 4096;
        config
    }

    #[test]
    fn test_small_file_is_one_chunk() {
        let config = config();
        assert_eq!(effective_chunk_size(100, &config), 100);
        assert_eq!(chunk::plan(100, 100).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_file_plans_zero_chunks() {
        let config = config();
        let size = effective_chunk_size(0, &config);
        assert_eq!(size, 1);
        assert!(chunk::plan(0, size).unwrap().is_empty());
    }

    #[test]
    fn test_large_file_uses_configured_chunk_size() {
        let config = config();
        assert_eq!(effective_chunk_size(10_000, &config), 1024);
        assert_eq!(chunk::plan(10_000, 1024).unwrap().len(), 10);
    }

    #[test]
    fn test_threshold_boundary_is_single_request() {
        let config = config();
        assert_eq!(effective_chunk_size(4096, &config), 4096);
    }
}
