//! Chunked upload endpoints.
//!
//! Lifecycle: `init` opens a session and pre-sizes a staging file, `chunk`
//! lands multipart chunks at their offsets (any order, duplicates are
//! idempotent), `complete` gates on every chunk being present before the
//! atomic rename, `abort` tears the session down. `GET /uploads/:token`
//! reports received/missing chunk numbers so a sender can resume.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::Json;
use tracing::error;
use uuid::Uuid;

use crate::storage::validate_file_name;
use crate::transfer::DEFAULT_CHUNK_SIZE;
use crate::web::dto::{
    ChunkUploadResponse, InitUploadRequest, InitUploadResponse, OkResponse, UploadStatusResponse,
    UploadTokenRequest,
};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;

/// `POST /uploads/init`
pub async fn init_upload(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>, ApiError> {
    validate_file_name(&req.file_name).map_err(ApiError::from)?;
    let folder = state.storage.resolve(&req.destination_path)?;
    let destination = folder.join(&req.file_name);
    let chunk_size = req.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);

    let token = state
        .uploads
        .init(
            req.file_name,
            req.file_size,
            req.chunk_count,
            chunk_size,
            destination,
        )
        .await
        .map_err(|e| match e {
            crate::NimbusError::Io(io) => {
                error!(error = %io, "failed to open upload session");
                ApiError::internal("Failed to open upload session")
            }
            other => ApiError::from(other),
        })?;

    Ok(Json(InitUploadResponse {
        success: true,
        upload_token: token,
    }))
}

/// `POST /uploads/chunk` (multipart: uploadToken, chunkNumber, chunk)
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>, ApiError> {
    let mut token: Option<Uuid> = None;
    let mut chunk_number: Option<u32> = None;
    let mut chunk_data: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart data: {e}")))?
    {
        match field.name() {
            Some("uploadToken") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("invalid uploadToken: {e}")))?;
                token = Some(
                    text.parse()
                        .map_err(|_| ApiError::bad_request("uploadToken is not a valid UUID"))?,
                );
            }
            Some("chunkNumber") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("invalid chunkNumber: {e}")))?;
                chunk_number = Some(
                    text.parse()
                        .map_err(|_| ApiError::bad_request("chunkNumber is not a number"))?,
                );
            }
            Some("chunk") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read chunk: {e}")))?;
                chunk_data = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let token = token.ok_or_else(|| ApiError::bad_request("missing uploadToken field"))?;
    let number = chunk_number.ok_or_else(|| ApiError::bad_request("missing chunkNumber field"))?;
    let data = chunk_data.ok_or_else(|| ApiError::bad_request("missing chunk field"))?;

    let session = state.uploads.get(&token)?;
    let received = session.receive_chunk(number, &data).await.map_err(|e| {
        if let crate::NimbusError::Io(io) = &e {
            error!(%token, chunk = number, error = %io, "chunk write failed");
            ApiError::internal("Failed to write chunk")
        } else {
            ApiError::from(e)
        }
    })?;

    Ok(Json(ChunkUploadResponse {
        success: true,
        received,
    }))
}

/// `POST /uploads/complete`
pub async fn complete_upload(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadTokenRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    state
        .uploads
        .complete(&req.upload_token)
        .await
        .map_err(|e| {
            if let crate::NimbusError::Io(io) = &e {
                error!(token = %req.upload_token, error = %io, "upload finalize failed");
                ApiError::internal("Failed to finalize upload")
            } else {
                ApiError::from(e)
            }
        })?;
    Ok(Json(OkResponse { success: true }))
}

/// `POST /uploads/abort` — idempotent, unknown tokens succeed too.
pub async fn abort_upload(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadTokenRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    state.uploads.abort(&req.upload_token).await.map_err(|e| {
        error!(token = %req.upload_token, error = %e, "upload abort failed");
        ApiError::internal("Failed to abort upload")
    })?;
    Ok(Json(OkResponse { success: true }))
}

/// `GET /uploads/:token`
pub async fn upload_status(
    State(state): State<Arc<AppState>>,
    Path(token): Path<Uuid>,
) -> Result<Json<UploadStatusResponse>, ApiError> {
    let session = state.uploads.get(&token)?;
    Ok(Json(UploadStatusResponse {
        success: true,
        upload_token: token,
        file_name: session.file_name().to_string(),
        file_size: session.file_size(),
        chunk_count: session.chunk_count(),
        received_chunks: session.received_chunks(),
        missing_chunks: session.missing_chunks(),
    }))
}
