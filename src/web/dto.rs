//! Request/response bodies for the Web API.
//!
//! Wire casing is camelCase throughout.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body for `POST /uploads/init`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    pub chunk_count: u32,
    /// Chunk size the sender planned with. Defaults to the server's
    /// standard chunk size when omitted.
    #[serde(default)]
    pub chunk_size: Option<u64>,
    /// Destination folder relative to the storage root.
    pub destination_path: String,
    /// Source file mtime in epoch milliseconds (informational).
    #[serde(default)]
    pub last_modified: Option<u64>,
}

/// Response for `POST /uploads/init`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub success: bool,
    pub upload_token: Uuid,
}

/// Response for `POST /uploads/chunk`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub success: bool,
    /// Distinct chunks received so far.
    pub received: u32,
}

/// Body for `POST /uploads/complete` and `POST /uploads/abort`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTokenRequest {
    pub upload_token: Uuid,
}

/// Generic success response.
#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub success: bool,
}

/// Response for `GET /uploads/:token`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub success: bool,
    pub upload_token: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_count: u32,
    pub received_chunks: Vec<u32>,
    pub missing_chunks: Vec<u32>,
}

/// Query string for file download and metadata lookups.
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub path: String,
}

/// Response for `GET /files/metadata`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub success: bool,
    pub data: FileMetadata,
}

/// File metadata payload.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub size: u64,
    /// Epoch milliseconds.
    pub last_modified: u64,
}

/// Body for `POST /downloads/folder-zip`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderZipRequest {
    /// Folder relative to the storage root; `.` for the root itself.
    pub folder_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_name: Option<String>,
}

/// Body for `POST /downloads/zip`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionZipRequest {
    /// File paths relative to the storage root.
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_request_camel_case() {
        let req: InitUploadRequest = serde_json::from_str(
            r#"{
                "fileName": "a.bin",
                "fileSize": 100,
                "chunkCount": 4,
                "chunkSize": 30,
                "destinationPath": "docs",
                "lastModified": 1700000000000
            }"#,
        )
        .unwrap();
        assert_eq!(req.file_name, "a.bin");
        assert_eq!(req.chunk_size, Some(30));
        assert_eq!(req.last_modified, Some(1700000000000));
    }

    #[test]
    fn test_init_request_optional_fields() {
        let req: InitUploadRequest = serde_json::from_str(
            r#"{"fileName": "a", "fileSize": 1, "chunkCount": 1, "destinationPath": "."}"#,
        )
        .unwrap();
        assert!(req.chunk_size.is_none());
        assert!(req.last_modified.is_none());
    }

    #[test]
    fn test_status_response_serializes_camel_case() {
        let body = serde_json::to_string(&UploadStatusResponse {
            success: true,
            upload_token: Uuid::nil(),
            file_name: "a".to_string(),
            file_size: 1,
            chunk_count: 1,
            received_chunks: vec![],
            missing_chunks: vec![0],
        })
        .unwrap();
        assert!(body.contains("uploadToken"));
        assert!(body.contains("missingChunks"));
    }
}
