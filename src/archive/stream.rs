//! Streaming ZIP writer.
//!
//! The archive is written into one end of a bounded duplex pipe while the
//! HTTP response body drains the other end, so memory stays flat no matter
//! how large the archive is. On a mid-stream read error the writer task
//! bails out without closing the archive: the body truncates before the
//! central directory, which every unzip tool flags, so a partial download
//! can never pass for a complete one. A client disconnect closes the read
//! end and the next write fails, stopping the task promptly.

use async_zip::tokio::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use futures::AsyncWriteExt;
use tokio::io::{duplex, AsyncReadExt, DuplexStream};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use crate::archive::manifest::ArchiveManifest;
use crate::{NimbusError, Result};

/// Pipe and copy buffer size for archive streaming.
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Enforce a download-safe archive file name.
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_` and the `.zip`
/// suffix is always present exactly once.
pub fn sanitize_zip_name(name: &str) -> String {
    let stem = name.strip_suffix(".zip").unwrap_or(name);
    let mut sanitized: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        sanitized.push_str("archive");
    }
    sanitized.push_str(".zip");
    sanitized
}

/// Start the archive writer task and return the byte stream to serve.
pub fn stream_zip(manifest: ArchiveManifest) -> ReaderStream<DuplexStream> {
    let (read_half, write_half) = duplex(STREAM_BUFFER_SIZE);
    tokio::spawn(async move {
        match write_archive(write_half, &manifest).await {
            Ok(bytes) => debug!(files = manifest.total_files(), bytes, "archive stream finished"),
            // Dropping the writer here truncates the stream before the
            // central directory, aborting the whole download visibly.
            Err(e) => error!(error = %e, "archive stream aborted"),
        }
    });
    ReaderStream::new(read_half)
}

/// Write every manifest entry, in order, returning uncompressed bytes
/// copied.
async fn write_archive(writer: DuplexStream, manifest: &ArchiveManifest) -> Result<u64> {
    let mut zip = ZipFileWriter::with_tokio(writer);
    let mut copied = 0u64;

    for entry in &manifest.entries {
        let mut file = tokio::fs::File::open(&entry.source).await?;
        let builder =
            ZipEntryBuilder::new(entry.archive_path.clone().into(), Compression::Stored);
        let mut entry_writer = zip
            .write_entry_stream(builder)
            .await
            .map_err(|e| NimbusError::Archive(e.to_string()))?;

        let mut buf = vec![0u8; STREAM_BUFFER_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            entry_writer.write_all(&buf[..n]).await?;
            copied += n as u64;
        }
        entry_writer
            .close()
            .await
            .map_err(|e| NimbusError::Archive(e.to_string()))?;
    }

    zip.close()
        .await
        .map_err(|e| NimbusError::Archive(e.to_string()))?;
    Ok(copied)
}
