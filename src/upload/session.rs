//! One in-flight chunked upload.
//!
//! A session owns a staging file pre-sized to the declared file size. Chunks
//! land with positional writes at `number * chunk_size`, so arrival order
//! does not matter and duplicates are harmless overwrites of identical
//! bytes. Completion is gated on every chunk number being present, then the
//! staging file is renamed into the destination in one step.

use std::collections::BTreeSet;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use crate::{NimbusError, Result};

/// Parameters for a new upload session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub file_name: String,
    pub file_size: u64,
    pub chunk_count: u32,
    pub chunk_size: u64,
    /// Final destination path (already validated against the storage root).
    pub destination: PathBuf,
    /// Staging file path for in-flight bytes.
    pub staging: PathBuf,
}

struct SessionState {
    received: BTreeSet<u32>,
    last_activity: Instant,
}

/// An active upload session keyed by its token.
pub struct UploadSession {
    token: Uuid,
    file_name: String,
    file_size: u64,
    chunk_count: u32,
    chunk_size: u64,
    destination: PathBuf,
    staging: PathBuf,
    state: Mutex<SessionState>,
}

impl UploadSession {
    /// Create the session and its pre-sized staging file.
    pub async fn create(token: Uuid, params: SessionParams) -> Result<Self> {
        if let Some(parent) = params.staging.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = fs::File::create(&params.staging).await?;
        file.set_len(params.file_size).await?;

        Ok(Self {
            token,
            file_name: params.file_name,
            file_size: params.file_size,
            chunk_count: params.chunk_count,
            chunk_size: params.chunk_size,
            destination: params.destination,
            staging: params.staging,
            state: Mutex::new(SessionState {
                received: BTreeSet::new(),
                last_activity: Instant::now(),
            }),
        })
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Expected byte length of a given chunk.
    fn expected_size(&self, number: u32) -> u64 {
        let offset = number as u64 * self.chunk_size;
        self.chunk_size.min(self.file_size.saturating_sub(offset))
    }

    /// Write one chunk at its offset. Duplicates are idempotent.
    ///
    /// Returns the number of distinct chunks received so far.
    pub async fn receive_chunk(&self, number: u32, bytes: &[u8]) -> Result<u32> {
        if number >= self.chunk_count {
            return Err(NimbusError::InvalidInput(format!(
                "chunk number {number} out of range (chunk count {})",
                self.chunk_count
            )));
        }
        let expected = self.expected_size(number);
        if bytes.len() as u64 != expected {
            return Err(NimbusError::InvalidInput(format!(
                "chunk {number} has {} bytes, expected {expected}",
                bytes.len()
            )));
        }

        let offset = number as u64 * self.chunk_size;
        let mut file = OpenOptions::new().write(true).open(&self.staging).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        let mut state = self.state.lock().unwrap();
        state.received.insert(number);
        state.last_activity = Instant::now();
        Ok(state.received.len() as u32)
    }

    /// Chunk numbers received so far, in order.
    pub fn received_chunks(&self) -> Vec<u32> {
        self.state.lock().unwrap().received.iter().copied().collect()
    }

    /// Chunk numbers still outstanding, in order.
    pub fn missing_chunks(&self) -> Vec<u32> {
        let state = self.state.lock().unwrap();
        (0..self.chunk_count)
            .filter(|n| !state.received.contains(n))
            .collect()
    }

    /// Finalize the upload: verify completeness and the staged byte count,
    /// then rename staging into the destination.
    ///
    /// On an incomplete-upload error the session stays usable; the caller
    /// can keep sending the missing chunks and complete again.
    pub async fn complete(&self) -> Result<()> {
        let missing = self.missing_chunks();
        if !missing.is_empty() {
            return Err(NimbusError::IncompleteUpload { missing });
        }

        let staged = fs::metadata(&self.staging).await?.len();
        if staged != self.file_size {
            return Err(NimbusError::InvalidInput(format!(
                "staging file is {staged} bytes, declared size {}",
                self.file_size
            )));
        }

        if let Some(parent) = self.destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&self.staging, &self.destination).await?;
        Ok(())
    }

    /// Drop the staging file. Safe to call more than once.
    pub async fn abort(&self) -> Result<()> {
        match fs::remove_file(&self.staging).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the session has been idle for at least `ttl`.
    pub fn is_idle_for(&self, ttl: Duration) -> bool {
        self.state.lock().unwrap().last_activity.elapsed() >= ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn make_session(dir: &TempDir, data_len: u64, chunk_size: u64) -> UploadSession {
        let chunk_count = data_len.div_ceil(chunk_size) as u32;
        UploadSession::create(
            Uuid::new_v4(),
            SessionParams {
                file_name: "out.bin".to_string(),
                file_size: data_len,
                chunk_count,
                chunk_size,
                destination: dir.path().join("dest").join("out.bin"),
                staging: dir.path().join("staging").join("s.part"),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_chunks_in_any_order() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..100u8).collect();
        let session = make_session(&dir, 100, 30).await;

        // 4 chunks of 30/30/30/10, delivered shuffled
        for number in [2u32, 0, 3, 1] {
            let start = number as usize * 30;
            let end = (start + 30).min(100);
            session.receive_chunk(number, &data[start..end]).await.unwrap();
        }

        session.complete().await.unwrap();
        let written = std::fs::read(dir.path().join("dest").join("out.bin")).unwrap();
        assert_eq!(written, data);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let session = make_session(&dir, 10, 10).await;
        assert_eq!(session.receive_chunk(0, &[7u8; 10]).await.unwrap(), 1);
        assert_eq!(session.receive_chunk(0, &[7u8; 10]).await.unwrap(), 1);
        assert_eq!(session.received_chunks(), vec![0]);
    }

    #[tokio::test]
    async fn test_complete_rejects_missing_chunks() {
        let dir = TempDir::new().unwrap();
        let session = make_session(&dir, 100, 30).await;
        session.receive_chunk(0, &[1u8; 30]).await.unwrap();
        session.receive_chunk(2, &[3u8; 30]).await.unwrap();

        match session.complete().await {
            Err(NimbusError::IncompleteUpload { missing }) => {
                assert_eq!(missing, vec![1, 3]);
            }
            other => panic!("expected IncompleteUpload, got {other:?}"),
        }

        // Session still usable: send the rest and complete
        session.receive_chunk(1, &[2u8; 30]).await.unwrap();
        session.receive_chunk(3, &[4u8; 10]).await.unwrap();
        session.complete().await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_chunk_size_rejected() {
        let dir = TempDir::new().unwrap();
        let session = make_session(&dir, 100, 30).await;
        assert!(session.receive_chunk(0, &[0u8; 29]).await.is_err());
        // Last chunk must be exactly 10 bytes
        assert!(session.receive_chunk(3, &[0u8; 30]).await.is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_chunk_rejected() {
        let dir = TempDir::new().unwrap();
        let session = make_session(&dir, 100, 30).await;
        assert!(session.receive_chunk(4, &[0u8; 30]).await.is_err());
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let session = make_session(&dir, 10, 10).await;
        session.abort().await.unwrap();
        session.abort().await.unwrap();
        assert!(!dir.path().join("staging").join("s.part").exists());
    }

    #[tokio::test]
    async fn test_empty_file_completes_without_chunks() {
        let dir = TempDir::new().unwrap();
        let session = make_session(&dir, 0, 10).await;
        session.complete().await.unwrap();
        let meta = std::fs::metadata(dir.path().join("dest").join("out.bin")).unwrap();
        assert_eq!(meta.len(), 0);
    }
}
