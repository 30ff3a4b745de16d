//! Web API Upload Tests
//!
//! Integration tests for the chunked upload endpoints.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use common::{chunk_form, create_test_server, patterned_bytes, staging_dir, storage_file_exists};

/// Init an upload and return the token.
async fn init_upload(
    server: &axum_test::TestServer,
    file_name: &str,
    file_size: u64,
    chunk_count: u32,
    chunk_size: u64,
    destination: &str,
) -> Uuid {
    let response = server
        .post("/uploads/init")
        .json(&json!({
            "fileName": file_name,
            "fileSize": file_size,
            "chunkCount": chunk_count,
            "chunkSize": chunk_size,
            "destinationPath": destination
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], json!(true));
    body["uploadToken"].as_str().unwrap().parse().unwrap()
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_chunked_upload_out_of_order() {
    let (server, dir) = create_test_server();
    let payload = patterned_bytes(30);
    let token = init_upload(&server, "report.bin", 30, 4, 8, "docs").await;

    // Last chunk first, then a scattered order; reassembly must not care
    for number in [3u32, 1, 0, 2] {
        let start = number as usize * 8;
        let end = (start + 8).min(payload.len());
        let response = server
            .post("/uploads/chunk")
            .multipart(chunk_form(token, number, &payload[start..end]))
            .await;
        response.assert_status_ok();
    }

    let response = server
        .post("/uploads/complete")
        .json(&json!({ "uploadToken": token }))
        .await;
    response.assert_status_ok();

    assert_eq!(common::read_storage_file(&dir, "docs/report.bin"), payload);

    // Staging file is gone after the rename
    let leftovers = std::fs::read_dir(staging_dir(&dir)).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_duplicate_chunk_is_idempotent() {
    let (server, dir) = create_test_server();
    let payload = patterned_bytes(16);
    let token = init_upload(&server, "dup.bin", 16, 2, 8, ".").await;

    let first = server
        .post("/uploads/chunk")
        .multipart(chunk_form(token, 0, &payload[..8]))
        .await;
    first.assert_status_ok();
    assert_eq!(first.json::<Value>()["received"], json!(1));

    // Retransmission of the same chunk does not bump the count
    let again = server
        .post("/uploads/chunk")
        .multipart(chunk_form(token, 0, &payload[..8]))
        .await;
    again.assert_status_ok();
    assert_eq!(again.json::<Value>()["received"], json!(1));

    let second = server
        .post("/uploads/chunk")
        .multipart(chunk_form(token, 1, &payload[8..]))
        .await;
    assert_eq!(second.json::<Value>()["received"], json!(2));

    server
        .post("/uploads/complete")
        .json(&json!({ "uploadToken": token }))
        .await
        .assert_status_ok();
    assert_eq!(common::read_storage_file(&dir, "dup.bin"), payload);
}

// ============================================================================
// Completion Gate and Resume
// ============================================================================

#[tokio::test]
async fn test_complete_with_missing_chunks_then_resume() {
    let (server, dir) = create_test_server();
    let payload = patterned_bytes(20);
    let token = init_upload(&server, "partial.bin", 20, 2, 10, ".").await;

    server
        .post("/uploads/chunk")
        .multipart(chunk_form(token, 0, &payload[..10]))
        .await
        .assert_status_ok();

    let response = server
        .post("/uploads/complete")
        .json(&json!({ "uploadToken": token }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["code"], json!("INCOMPLETE_UPLOAD"));
    assert_eq!(body["missingChunks"], json!([1]));

    // The session survives a failed complete; send the missing chunk
    server
        .post("/uploads/chunk")
        .multipart(chunk_form(token, 1, &payload[10..]))
        .await
        .assert_status_ok();
    server
        .post("/uploads/complete")
        .json(&json!({ "uploadToken": token }))
        .await
        .assert_status_ok();
    assert_eq!(common::read_storage_file(&dir, "partial.bin"), payload);
}

#[tokio::test]
async fn test_upload_status_reports_missing_chunks() {
    let (server, _dir) = create_test_server();
    let payload = patterned_bytes(24);
    let token = init_upload(&server, "status.bin", 24, 3, 8, ".").await;

    server
        .post("/uploads/chunk")
        .multipart(chunk_form(token, 1, &payload[8..16]))
        .await
        .assert_status_ok();

    let response = server.get(&format!("/uploads/{token}")).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["fileName"], json!("status.bin"));
    assert_eq!(body["chunkCount"], json!(3));
    assert_eq!(body["receivedChunks"], json!([1]));
    assert_eq!(body["missingChunks"], json!([0, 2]));
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_init_rejects_path_traversal() {
    let (server, _dir) = create_test_server();
    let response = server
        .post("/uploads/init")
        .json(&json!({
            "fileName": "evil.bin",
            "fileSize": 10,
            "chunkCount": 1,
            "destinationPath": "../outside"
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], json!("INVALID_PATH"));
}

#[tokio::test]
async fn test_init_rejects_file_name_with_separator() {
    let (server, _dir) = create_test_server();
    let response = server
        .post("/uploads/init")
        .json(&json!({
            "fileName": "nested/evil.bin",
            "fileSize": 10,
            "chunkCount": 1,
            "destinationPath": "."
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], json!("INVALID_PATH"));
}

#[tokio::test]
async fn test_init_rejects_inconsistent_chunk_count() {
    let (server, _dir) = create_test_server();
    // 100 bytes at 30 per chunk needs 4 chunks, not 2
    let response = server
        .post("/uploads/init")
        .json(&json!({
            "fileName": "bad.bin",
            "fileSize": 100,
            "chunkCount": 2,
            "chunkSize": 30,
            "destinationPath": "."
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], json!("BAD_REQUEST"));
}

#[tokio::test]
async fn test_chunk_rejects_wrong_size() {
    let (server, _dir) = create_test_server();
    let token = init_upload(&server, "wrong.bin", 16, 2, 8, ".").await;

    // Chunk 0 must be exactly 8 bytes
    let response = server
        .post("/uploads/chunk")
        .multipart(chunk_form(token, 0, &[0u8; 5]))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chunk_rejects_out_of_range_number() {
    let (server, _dir) = create_test_server();
    let token = init_upload(&server, "range.bin", 16, 2, 8, ".").await;

    let response = server
        .post("/uploads/chunk")
        .multipart(chunk_form(token, 5, &[0u8; 8]))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_token_is_session_not_found() {
    let (server, _dir) = create_test_server();
    let token = Uuid::new_v4();

    let response = server
        .post("/uploads/chunk")
        .multipart(chunk_form(token, 0, &[0u8; 8]))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], json!("SESSION_NOT_FOUND"));

    let response = server
        .post("/uploads/complete")
        .json(&json!({ "uploadToken": token }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], json!("SESSION_NOT_FOUND"));
}

// ============================================================================
// Abort
// ============================================================================

#[tokio::test]
async fn test_abort_discards_session_and_staging() {
    let (server, dir) = create_test_server();
    let payload = patterned_bytes(16);
    let token = init_upload(&server, "gone.bin", 16, 2, 8, ".").await;

    server
        .post("/uploads/chunk")
        .multipart(chunk_form(token, 0, &payload[..8]))
        .await
        .assert_status_ok();

    let response = server
        .post("/uploads/abort")
        .json(&json!({ "uploadToken": token }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["success"], json!(true));

    // Staging file removed, nothing landed in storage
    let leftovers = std::fs::read_dir(staging_dir(&dir)).unwrap().count();
    assert_eq!(leftovers, 0);
    assert!(!storage_file_exists(&dir, "gone.bin"));

    // Token is dead now
    let response = server
        .post("/uploads/complete")
        .json(&json!({ "uploadToken": token }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);

    // Abort stays idempotent for unknown tokens
    server
        .post("/uploads/abort")
        .json(&json!({ "uploadToken": token }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_empty_file_upload() {
    let (server, dir) = create_test_server();
    let token = init_upload(&server, "empty.bin", 0, 0, 8, ".").await;

    server
        .post("/uploads/complete")
        .json(&json!({ "uploadToken": token }))
        .await
        .assert_status_ok();
    assert_eq!(common::read_storage_file(&dir, "empty.bin"), Vec::<u8>::new());
}
