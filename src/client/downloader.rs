//! Download orchestration.
//!
//! Two modes: single-request streaming (plain files and ZIP archives) and
//! ranged chunked downloads that reassemble a pre-sized output file with
//! positional writes. Every download gets a registry descriptor; finished
//! ones move into a bounded history. A stalled download (no progress past
//! the stall timeout while partially transferred) is swept to history as
//! failed, matching what a user sees as a dead connection.

use std::collections::{HashMap, VecDeque};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::client::{check_response, ClientConfig};
use crate::transfer::{
    chunk, time_remaining, ChunkSpec, ConcurrencyLimiter, EventBus, SpeedMeter, TransferEvent,
};
use crate::web::dto::{FolderZipRequest, MetadataResponse, SelectionZipRequest};
use crate::{NimbusError, Result};

/// A download reports no speed after this much silence; past the stall
/// timeout it is failed outright.
const INDETERMINATE_AFTER: Duration = Duration::from_secs(10);

/// Lifecycle state of a tracked download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

/// Point-in-time view of a tracked download.
#[derive(Debug, Clone)]
pub struct DownloadSnapshot {
    pub id: Uuid,
    pub name: String,
    pub total_bytes: Option<u64>,
    pub transferred: u64,
    pub speed_bps: Option<f64>,
    pub status: DownloadStatus,
    pub error: Option<String>,
}

struct Descriptor {
    name: String,
    total_bytes: Option<u64>,
    transferred: u64,
    speed_bps: Option<f64>,
    status: DownloadStatus,
    error: Option<String>,
    last_update: Instant,
}

impl Descriptor {
    fn snapshot(&self, id: Uuid) -> DownloadSnapshot {
        DownloadSnapshot {
            id,
            name: self.name.clone(),
            total_bytes: self.total_bytes,
            transferred: self.transferred,
            speed_bps: self.speed_bps,
            status: self.status,
            error: self.error.clone(),
        }
    }
}

struct Registry {
    active: HashMap<Uuid, Descriptor>,
    history: VecDeque<(Uuid, Descriptor)>,
}

/// Client download engine with a descriptor registry.
#[derive(Clone)]
pub struct DownloadManager {
    http: reqwest::Client,
    config: ClientConfig,
    limiter: ConcurrencyLimiter,
    events: EventBus,
    registry: Arc<Mutex<Registry>>,
}

impl DownloadManager {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            limiter: ConcurrencyLimiter::new(config.max_concurrent_chunks),
            events: EventBus::new(),
            registry: Arc::new(Mutex::new(Registry {
                active: HashMap::new(),
                history: VecDeque::new(),
            })),
            config,
        }
    }

    /// Subscribe to transfer events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<TransferEvent> {
        self.events.subscribe()
    }

    /// Snapshots of in-flight downloads.
    pub fn active(&self) -> Vec<DownloadSnapshot> {
        let registry = self.registry.lock().unwrap();
        registry
            .active
            .iter()
            .map(|(id, d)| d.snapshot(*id))
            .collect()
    }

    /// Snapshots of finished downloads, most recent first.
    pub fn history(&self) -> Vec<DownloadSnapshot> {
        let registry = self.registry.lock().unwrap();
        registry
            .history
            .iter()
            .map(|(id, d)| d.snapshot(*id))
            .collect()
    }

    /// Drop all finished downloads from the history.
    pub fn clear_history(&self) {
        self.registry.lock().unwrap().history.clear();
    }

    /// Download a file in one streamed request.
    pub async fn download_file(
        &self,
        remote_path: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let id = self.register(display_name(remote_path), None);
        let result = self.stream_file(id, remote_path, dest, cancel).await;
        self.settle(id, result, dest).await
    }

    /// Download a folder as a streamed ZIP archive.
    pub async fn download_folder_zip(
        &self,
        folder_path: &str,
        zip_name: Option<&str>,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let id = self.register(
            zip_name
                .map(|n| n.to_string())
                .unwrap_or_else(|| display_name(folder_path)),
            None,
        );
        let request = FolderZipRequest {
            folder_path: folder_path.to_string(),
            zip_name: zip_name.map(|n| n.to_string()),
        };
        let result = self
            .stream_zip_request(id, "/downloads/folder-zip", &request, dest, cancel)
            .await;
        self.settle(id, result, dest).await
    }

    /// Download an explicit file selection as a streamed ZIP archive.
    pub async fn download_zip_selection(
        &self,
        files: &[String],
        zip_name: Option<&str>,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let id = self.register(
            zip_name.map(|n| n.to_string()).unwrap_or_else(|| "archive".to_string()),
            None,
        );
        let request = SelectionZipRequest {
            files: files.to_vec(),
            zip_name: zip_name.map(|n| n.to_string()),
        };
        let result = self
            .stream_zip_request(id, "/downloads/zip", &request, dest, cancel)
            .await;
        self.settle(id, result, dest).await
    }

    /// Download a file with concurrent ranged requests reassembled by
    /// positional writes. Chunk arrival order does not matter.
    pub async fn download_file_chunked(
        &self,
        remote_path: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let id = self.register(display_name(remote_path), None);
        let result = self.ranged_download(id, remote_path, dest, cancel).await;
        self.settle(id, result, dest).await
    }

    /// Fail active downloads that have made no progress past the stall
    /// timeout, and mark silent-but-recent ones as indeterminate. Returns
    /// how many were failed.
    pub fn sweep_stalled(&self) -> usize {
        let now = Instant::now();
        let mut stalled = Vec::new();
        let mut indeterminate = Vec::new();
        {
            let registry = self.registry.lock().unwrap();
            for (id, d) in &registry.active {
                if d.status != DownloadStatus::Downloading || d.transferred == 0 {
                    continue;
                }
                if d.total_bytes.is_some_and(|t| d.transferred >= t) {
                    continue;
                }
                let idle = now.duration_since(d.last_update);
                if idle > self.config.stall_timeout {
                    stalled.push(*id);
                } else if idle > INDETERMINATE_AFTER {
                    indeterminate.push((*id, d.transferred, d.total_bytes));
                }
            }
        }

        for (id, transferred, total_bytes) in indeterminate {
            self.events.emit(TransferEvent::Progress {
                id,
                transferred,
                total_bytes,
                speed_bps: None,
                eta: None,
            });
        }

        let count = stalled.len();
        for id in stalled {
            debug!(%id, "download stalled, marking failed");
            self.finish(id, DownloadStatus::Failed, Some("connection lost".to_string()));
        }
        count
    }

    /// Spawn a background task that sweeps stalled downloads periodically.
    pub fn spawn_stall_sweeper(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            let period = (manager.config.stall_timeout / 3).max(Duration::from_secs(1));
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                manager.sweep_stalled();
            }
        });
    }

    // --- internals ---

    fn register(&self, name: String, total_bytes: Option<u64>) -> Uuid {
        let id = Uuid::new_v4();
        self.registry.lock().unwrap().active.insert(
            id,
            Descriptor {
                name: name.clone(),
                total_bytes,
                transferred: 0,
                speed_bps: None,
                status: DownloadStatus::Downloading,
                error: None,
                last_update: Instant::now(),
            },
        );
        self.events.emit(TransferEvent::Started {
            id,
            name,
            total_bytes,
        });
        id
    }

    fn set_total(&self, id: Uuid, total_bytes: Option<u64>) {
        if let Some(d) = self.registry.lock().unwrap().active.get_mut(&id) {
            d.total_bytes = total_bytes;
        }
    }

    /// Record progress; emits an event only when a speed sample is due so
    /// fast transfers do not flood subscribers.
    fn report_progress(&self, id: Uuid, transferred: u64, speed_bps: Option<f64>) {
        let total_bytes = {
            let mut registry = self.registry.lock().unwrap();
            let Some(d) = registry.active.get_mut(&id) else {
                return;
            };
            d.transferred = transferred;
            d.last_update = Instant::now();
            if speed_bps.is_some() {
                d.speed_bps = speed_bps;
            }
            d.total_bytes
        };
        if let Some(speed) = speed_bps {
            let eta = total_bytes.and_then(|t| time_remaining(t, transferred, speed));
            self.events.emit(TransferEvent::Progress {
                id,
                transferred,
                total_bytes,
                speed_bps: Some(speed),
                eta,
            });
        }
    }

    /// Move a download out of the active map, exactly once. Late calls
    /// (e.g. after the stall sweeper already failed it) are no-ops, so a
    /// download can never emit two terminal events.
    fn finish(&self, id: Uuid, status: DownloadStatus, error: Option<String>) {
        let descriptor = {
            let mut registry = self.registry.lock().unwrap();
            let Some(mut d) = registry.active.remove(&id) else {
                return;
            };
            d.status = status;
            d.error = error.clone();
            let transferred = d.transferred;
            registry.history.push_front((id, d));
            while registry.history.len() > self.config.history_limit {
                registry.history.pop_back();
            }
            transferred
        };
        let event = match status {
            DownloadStatus::Completed => TransferEvent::Completed {
                id,
                transferred: descriptor,
            },
            DownloadStatus::Cancelled => TransferEvent::Cancelled { id },
            _ => TransferEvent::Failed {
                id,
                message: error.unwrap_or_else(|| "download failed".to_string()),
            },
        };
        self.events.emit(event);
    }

    /// Apply a download result to the registry and clean up partial output.
    async fn settle(&self, id: Uuid, result: Result<u64>, dest: &Path) -> Result<u64> {
        match &result {
            Ok(_) => self.finish(id, DownloadStatus::Completed, None),
            Err(NimbusError::Cancelled) => {
                let _ = tokio::fs::remove_file(dest).await;
                self.finish(id, DownloadStatus::Cancelled, None);
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(dest).await;
                self.finish(id, DownloadStatus::Failed, Some(e.to_string()));
            }
        }
        result
    }

    async fn stream_file(
        &self,
        id: Uuid,
        remote_path: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let response = self
            .http
            .get(format!("{}/downloads/file", self.config.base_url))
            .query(&[("path", remote_path)])
            .send()
            .await?;
        let response = check_response(response).await?;
        self.set_total(id, response.content_length());
        self.consume_stream(id, response, dest, cancel).await
    }

    async fn stream_zip_request<B: serde::Serialize>(
        &self,
        id: Uuid,
        endpoint: &str,
        body: &B,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let response = self
            .http
            .post(format!("{}{endpoint}", self.config.base_url))
            .json(body)
            .send()
            .await?;
        let response = check_response(response).await?;
        // Archive bodies stream without Content-Length; the uncompressed
        // total from the header keeps progress determinate
        let total = response
            .headers()
            .get("X-Total-Size")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        self.set_total(id, total);
        self.consume_stream(id, response, dest, cancel).await
    }

    async fn consume_stream(
        &self,
        id: Uuid,
        mut response: reqwest::Response,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut meter = SpeedMeter::default();
        let mut transferred = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(NimbusError::Cancelled),
                next = response.chunk() => match next? {
                    Some(bytes) => {
                        file.write_all(&bytes).await?;
                        transferred += bytes.len() as u64;
                        self.report_progress(id, transferred, meter.sample(transferred));
                    }
                    None => break,
                },
            }
        }
        file.flush().await?;
        Ok(transferred)
    }

    async fn ranged_download(
        &self,
        id: Uuid,
        remote_path: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(NimbusError::Cancelled);
        }

        let response = self
            .http
            .get(format!("{}/files/metadata", self.config.base_url))
            .query(&[("path", remote_path)])
            .send()
            .await?;
        let response = check_response(response).await?;
        let metadata: MetadataResponse = response.json().await?;
        let size = metadata.data.size;
        self.set_total(id, Some(size));

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(dest).await?;
        file.set_len(size).await?;
        drop(file);

        let chunks = chunk::plan(size, self.config.chunk_size)?;
        let confirmed = Arc::new(AtomicU64::new(0));
        let meter = Arc::new(Mutex::new(SpeedMeter::default()));
        let retry_limit = self.config.chunk_retry_limit.max(1);

        let mut joins = Vec::with_capacity(chunks.len());
        let mut cancels = Vec::with_capacity(chunks.len());
        for spec in chunks {
            let manager = self.clone();
            let remote_path = remote_path.to_string();
            let dest = dest.to_path_buf();
            let cancel = cancel.clone();
            let confirmed = Arc::clone(&confirmed);
            let meter = Arc::clone(&meter);

            let task = async move {
                fetch_range_with_retry(&manager, &remote_path, &dest, spec, retry_limit, &cancel)
                    .await?;
                // Meter lock held across the report so transferred values
                // stay in order across workers
                {
                    let mut meter = meter.lock().unwrap();
                    let done = confirmed.fetch_add(spec.size, Ordering::SeqCst) + spec.size;
                    let speed = meter.sample(done);
                    manager.report_progress(id, done, speed);
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
                    for cancel_handle in &cancels {
                        cancel_handle.cancel();
                    }
                }
                joined = handle.join() => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(NimbusError::Cancelled)) => cancelled = true,
                    Ok(Err(e)) => {
                        if first_error.is_none() {
                            for cancel_handle in &cancels {
                                cancel_handle.cancel();
                            }
                            first_error = Some(e);
                        }
                    }
                    Err(_) => {}
                },
            }
        }

        if cancelled {
            return Err(NimbusError::Cancelled);
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(size)
    }
}

/// Last path segment, for registry display.
fn display_name(remote_path: &str) -> String {
    remote_path
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(remote_path)
        .to_string()
}

async fn fetch_range_once(
    manager: &DownloadManager,
    remote_path: &str,
    dest: &Path,
    spec: ChunkSpec,
) -> Result<()> {
    let response = manager
        .http
        .get(format!("{}/downloads/file", manager.config.base_url))
        .query(&[("path", remote_path)])
        .header(
            reqwest::header::RANGE,
            format!("bytes={}-{}", spec.offset, spec.last_byte()),
        )
        .send()
        .await?;
    let response = check_response(response).await?;
    let bytes = response.bytes().await?;
    if bytes.len() as u64 != spec.size {
        return Err(NimbusError::InvalidInput(format!(
            "range response for chunk {} was {} bytes, expected {}",
            spec.number,
            bytes.len(),
            spec.size
        )));
    }

    let mut file = tokio::fs::OpenOptions::new().write(true).open(dest).await?;
    file.seek(SeekFrom::Start(spec.offset)).await?;
    file.write_all(&bytes).await?;
    file.flush().await?;
    Ok(())
}

async fn fetch_range_with_retry(
    manager: &DownloadManager,
    remote_path: &str,
    dest: &Path,
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
        match fetch_range_once(manager, remote_path, dest, spec).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retry_limit => {
                debug!(
                    chunk = spec.number,
                    attempt,
                    error = %e,
                    "range attempt failed, backing off"
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
