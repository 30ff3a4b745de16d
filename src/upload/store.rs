//! Token-keyed registry of active upload sessions.
//!
//! Sessions that finish (complete or abort) leave the map immediately.
//! Abandoned sessions are reclaimed by a TTL sweep, and staging files left
//! behind by an unclean shutdown are removed at startup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::transfer::chunk;
use crate::upload::session::{SessionParams, UploadSession};
use crate::{NimbusError, Result};

/// Extension for staging files, used by the orphan sweep.
const STAGING_EXTENSION: &str = "part";

/// Registry of in-flight upload sessions.
pub struct UploadStore {
    sessions: Mutex<HashMap<Uuid, Arc<UploadSession>>>,
    staging_dir: PathBuf,
    ttl: Duration,
}

impl UploadStore {
    pub fn new<P: Into<PathBuf>>(staging_dir: P, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            staging_dir: staging_dir.into(),
            ttl,
        }
    }

    /// Session idle TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Open a new session and return its token.
    ///
    /// `destination` must already be resolved against the storage root. The
    /// declared chunk count has to match the plan arithmetic for the
    /// declared size and chunk size, otherwise positional writes could not
    /// reassemble the file.
    pub async fn init(
        &self,
        file_name: String,
        file_size: u64,
        chunk_count: u32,
        chunk_size: u64,
        destination: PathBuf,
    ) -> Result<Uuid> {
        if chunk_size == 0 {
            return Err(NimbusError::InvalidInput(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        let expected = chunk::chunk_count(file_size, chunk_size);
        if u64::from(chunk_count) != expected {
            return Err(NimbusError::InvalidInput(format!(
                "chunk count {chunk_count} does not match size {file_size} at chunk size {chunk_size} (expected {expected})"
            )));
        }

        let token = Uuid::new_v4();
        let staging = self
            .staging_dir
            .join(format!("{token}.{STAGING_EXTENSION}"));
        let session = UploadSession::create(
            token,
            SessionParams {
                file_name,
                file_size,
                chunk_count,
                chunk_size,
                destination,
                staging,
            },
        )
        .await?;

        self.sessions
            .lock()
            .unwrap()
            .insert(token, Arc::new(session));
        debug!(%token, file_size, chunk_count, "upload session opened");
        Ok(token)
    }

    /// Look up an active session.
    pub fn get(&self, token: &Uuid) -> Result<Arc<UploadSession>> {
        self.sessions
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| NimbusError::SessionNotFound(token.to_string()))
    }

    /// Finalize a session. On success the session is dropped; an
    /// incomplete upload leaves it registered for resume.
    pub async fn complete(&self, token: &Uuid) -> Result<()> {
        let session = self.get(token)?;
        session.complete().await?;
        self.sessions.lock().unwrap().remove(token);
        debug!(%token, "upload session completed");
        Ok(())
    }

    /// Abort a session and delete its staging file. Unknown tokens are
    /// fine: abort is idempotent.
    pub async fn abort(&self, token: &Uuid) -> Result<()> {
        let session = self.sessions.lock().unwrap().remove(token);
        if let Some(session) = session {
            session.abort().await?;
            debug!(%token, "upload session aborted");
        }
        Ok(())
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }

    /// Remove sessions idle past the TTL, deleting their staging files.
    /// Returns how many were swept.
    pub async fn sweep_expired(&self) -> usize {
        let expired: Vec<(Uuid, Arc<UploadSession>)> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .iter()
                .filter(|(_, s)| s.is_idle_for(self.ttl))
                .map(|(t, s)| (*t, Arc::clone(s)))
                .collect()
        };

        for (token, session) in &expired {
            if let Err(e) = session.abort().await {
                warn!(%token, error = %e, "failed to remove expired staging file");
            }
            self.sessions.lock().unwrap().remove(token);
            debug!(%token, "expired upload session swept");
        }
        expired.len()
    }

    /// Delete staging files with no owning session, left behind by an
    /// unclean shutdown. Only files older than the TTL are touched so an
    /// in-flight restart race cannot eat live uploads.
    pub async fn clean_orphaned_staging(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.staging_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STAGING_EXTENSION) {
                continue;
            }
            let meta = entry.metadata().await?;
            let age = meta
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .unwrap_or_default();
            if age >= self.ttl {
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "failed to remove orphaned staging file");
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}
