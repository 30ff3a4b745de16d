//! File download and metadata endpoints.
//!
//! Downloads stream straight from disk and honor single `Range` requests
//! (`a-b`, `a-`, `-suffix`). Malformed range headers are ignored per RFC
//! 9110 (full response); syntactically valid but unsatisfiable ranges get
//! a 416 with `Content-Range: bytes */size`.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Response, StatusCode};
use axum::Json;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::web::dto::{FileMetadata, FileQuery, MetadataResponse};
use crate::web::error::ApiError;
use crate::web::handlers::{metadata_or_not_found, AppState};

/// Build a Content-Disposition header value for a download.
fn content_disposition_header(filename: &str) -> String {
    // Sanitize filename for the basic filename parameter (ASCII fallback)
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' => '_',
            '\\' => '_',
            _ => c,
        })
        .collect();

    // For ASCII-only filenames, use simple format
    if filename.is_ascii() && !filename.chars().any(|c| c.is_control() || c == '"' || c == '\\') {
        return format!("attachment; filename=\"{}\"", filename);
    }

    // RFC 5987 encoding for non-ASCII or special characters
    let encoded = urlencoding::encode(filename);

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    )
}

/// Outcome of evaluating a `Range` header against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeOutcome {
    /// No usable range: serve the whole file.
    Full,
    /// Serve `[start, end]` inclusive.
    Partial { start: u64, end: u64 },
    /// Range is syntactically valid but outside the file.
    Unsatisfiable,
}

/// Evaluate an optional `Range` header for a file of `size` bytes.
///
/// Only single `bytes=` ranges are supported; multipart ranges and
/// malformed values fall back to a full response.
fn evaluate_range(header: Option<&str>, size: u64) -> RangeOutcome {
    let Some(raw) = header else {
        return RangeOutcome::Full;
    };
    let Some(spec) = raw.strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if spec.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((first, last)) = spec.trim().split_once('-') else {
        return RangeOutcome::Full;
    };

    // Suffix form: bytes=-N means the last N bytes
    if first.is_empty() {
        let Ok(suffix) = last.parse::<u64>() else {
            return RangeOutcome::Full;
        };
        if suffix == 0 || size == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial {
            start: size.saturating_sub(suffix),
            end: size - 1,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    if start >= size {
        return RangeOutcome::Unsatisfiable;
    }
    let end = if last.is_empty() {
        size - 1
    } else {
        match last.parse::<u64>() {
            Ok(end) => end.min(size - 1),
            Err(_) => return RangeOutcome::Full,
        }
    };
    if end < start {
        return RangeOutcome::Unsatisfiable;
    }
    RangeOutcome::Partial { start, end }
}

/// `GET /downloads/file?path=`
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Result<Response<Body>, ApiError> {
    let path = state.storage.resolve(&query.path)?;
    let meta = metadata_or_not_found(&path, "file").await?;
    if meta.is_dir() {
        return Err(ApiError::bad_request("path is a directory, not a file"));
    }
    let size = meta.len();

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let mime = mime_guess::from_path(&path).first_or_octet_stream();

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());
    let (status, start, end) = match evaluate_range(range, size) {
        RangeOutcome::Full => (StatusCode::OK, 0, size.saturating_sub(1)),
        RangeOutcome::Partial { start, end } => (StatusCode::PARTIAL_CONTENT, start, end),
        RangeOutcome::Unsatisfiable => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{size}"))
                .body(Body::empty())
                .map_err(|e| {
                    tracing::error!("Failed to build response: {}", e);
                    ApiError::internal("Failed to build response")
                });
        }
    };
    let length = if size == 0 { 0 } else { end - start + 1 };

    let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "failed to open file");
        ApiError::internal("Failed to open file")
    })?;
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await.map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "failed to seek file");
            ApiError::internal("Failed to read file")
        })?;
    }
    let body = Body::from_stream(ReaderStream::new(file.take(length)));

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CONTENT_LENGTH, length)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_header(&file_name),
        );
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{size}"),
        );
    }

    builder.body(body).map_err(|e| {
        tracing::error!("Failed to build response: {}", e);
        ApiError::internal("Failed to build response")
    })
}

/// `GET /files/metadata?path=`
pub async fn file_metadata(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileQuery>,
) -> Result<Json<MetadataResponse>, ApiError> {
    let path = state.storage.resolve(&query.path)?;
    let meta = metadata_or_not_found(&path, "file").await?;
    if meta.is_dir() {
        return Err(ApiError::bad_request("path is a directory, not a file"));
    }

    let last_modified = meta
        .modified()
        .ok()
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();

    Ok(Json(MetadataResponse {
        success: true,
        data: FileMetadata {
            size: meta.len(),
            last_modified,
        },
    }))
}
