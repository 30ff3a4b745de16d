//! Streaming ZIP archive endpoints.
//!
//! Both endpoints validate everything up front (paths, existence, manifest)
//! so error responses are real JSON errors; once headers go out the body is
//! a live stream and a failure can only surface as a truncated archive.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Response};
use axum::Json;
use tracing::{debug, error};

use crate::archive::{sanitize_zip_name, stream_zip, ArchiveManifest, ManifestEntry};
use crate::web::dto::{FolderZipRequest, SelectionZipRequest};
use crate::web::error::{ApiError, ErrorCode};
use crate::web::handlers::AppState;

/// `POST /downloads/folder-zip`
pub async fn folder_zip(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FolderZipRequest>,
) -> Result<Response<Body>, ApiError> {
    let folder = state.storage.resolve(&req.folder_path)?;

    let meta = match tokio::fs::metadata(&folder).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::new(
                ErrorCode::FolderNotFound,
                format!("folder not found: {}", req.folder_path),
            ));
        }
        Err(e) => {
            error!(path = %folder.display(), error = %e, "folder lookup failed");
            return Err(ApiError::internal("Failed to read folder"));
        }
    };
    if !meta.is_dir() {
        return Err(ApiError::new(
            ErrorCode::NotADirectory,
            format!("not a directory: {}", req.folder_path),
        ));
    }

    // The walk is synchronous std::fs; keep it off the async workers
    let walk_target = folder.clone();
    let manifest = tokio::task::spawn_blocking(move || ArchiveManifest::from_folder(&walk_target))
        .await
        .map_err(|e| {
            error!(error = %e, "manifest walk task failed");
            ApiError::internal("Failed to build archive manifest")
        })??;

    let default_name = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let zip_name = sanitize_zip_name(req.zip_name.as_deref().unwrap_or(&default_name));

    debug!(
        folder = %req.folder_path,
        files = manifest.total_files(),
        bytes = manifest.total_size(),
        "streaming folder archive"
    );
    zip_response(zip_name, manifest)
}

/// `POST /downloads/zip` — archive an explicit file selection.
pub async fn selection_zip(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectionZipRequest>,
) -> Result<Response<Body>, ApiError> {
    let mut entries = Vec::with_capacity(req.files.len());
    for relative in &req.files {
        let path = state.storage.resolve(relative)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ApiError::not_found(format!("file not found: {relative}")));
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "selection lookup failed");
                return Err(ApiError::internal("Failed to read selected file"));
            }
        };
        if !meta.is_file() {
            return Err(ApiError::bad_request(format!("not a file: {relative}")));
        }
        entries.push(ManifestEntry {
            source: path,
            archive_path: archive_path_for(relative),
            size: meta.len(),
        });
    }

    let manifest = ArchiveManifest::new(entries)?;
    let zip_name = sanitize_zip_name(req.zip_name.as_deref().unwrap_or("archive"));

    debug!(
        files = manifest.total_files(),
        bytes = manifest.total_size(),
        "streaming selection archive"
    );
    zip_response(zip_name, manifest)
}

/// Normalize a storage-relative path for use inside the archive.
fn archive_path_for(relative: &str) -> String {
    relative
        .replace('\\', "/")
        .trim_start_matches("./")
        .to_string()
}

/// Assemble the streaming response. Totals go out as headers before the
/// first body byte.
fn zip_response(zip_name: String, manifest: ArchiveManifest) -> Result<Response<Body>, ApiError> {
    let total_files = manifest.total_files();
    let total_size = manifest.total_size();
    let body = Body::from_stream(stream_zip(manifest));

    Response::builder()
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{zip_name}\""),
        )
        .header("X-Total-Files", total_files)
        .header("X-Total-Size", total_size)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| {
            error!("Failed to build response: {}", e);
            ApiError::internal("Failed to build response")
        })
}
