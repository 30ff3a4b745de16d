//! Test helpers for the transfer API integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use tempfile::TempDir;
use uuid::Uuid;

use nimbus::config::Config;
use nimbus::storage::StorageRoot;
use nimbus::upload::UploadStore;
use nimbus::web::handlers::AppState;
use nimbus::web::router::{create_health_router, create_router};
use nimbus::web::WebServer;

/// Session TTL used by in-process test servers.
pub const TEST_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Body cap for in-process test servers, large enough for any test chunk.
pub const TEST_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Create an in-process test server over a temporary storage root.
pub fn create_test_server() -> (TestServer, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let storage = StorageRoot::new(dir.path().join("storage")).expect("Failed to create storage");
    let staging = dir.path().join("staging");
    std::fs::create_dir_all(&staging).expect("Failed to create staging dir");

    let uploads = Arc::new(UploadStore::new(&staging, TEST_SESSION_TTL));
    let app_state = Arc::new(AppState::new(storage, uploads, TEST_BODY_LIMIT));
    let router = create_router(app_state, &[]).merge(create_health_router());

    let server = TestServer::new(router).expect("Failed to create test server");
    (server, dir)
}

/// Start a real listening server on a random port for client E2E tests.
pub async fn start_live_server() -> (SocketAddr, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.storage.root = dir.path().join("storage").to_string_lossy().into_owned();
    config.storage.staging = dir.path().join("staging").to_string_lossy().into_owned();

    let server = WebServer::new(&config).expect("Failed to create web server");
    let addr = server
        .run_with_addr()
        .await
        .expect("Failed to start web server");
    (addr, dir)
}

/// Write a file under the storage root, creating parent folders.
pub fn write_storage_file(dir: &TempDir, relative: &str, contents: &[u8]) {
    let path = dir.path().join("storage").join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent dirs");
    }
    std::fs::write(path, contents).expect("Failed to write storage file");
}

/// Read a file back from the storage root.
pub fn read_storage_file(dir: &TempDir, relative: &str) -> Vec<u8> {
    std::fs::read(dir.path().join("storage").join(relative)).expect("Failed to read storage file")
}

/// True if a path exists under the storage root.
pub fn storage_file_exists(dir: &TempDir, relative: &str) -> bool {
    dir.path().join("storage").join(relative).exists()
}

/// Staging directory of a test server's temp dir.
pub fn staging_dir(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("staging")
}

/// Build the multipart form for one chunk upload request.
pub fn chunk_form(token: Uuid, number: u32, data: &[u8]) -> MultipartForm {
    MultipartForm::new()
        .add_text("uploadToken", token.to_string())
        .add_text("chunkNumber", number.to_string())
        .add_part("chunk", Part::bytes(data.to_vec()).file_name("blob"))
}

/// Deterministic test payload of the given size.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Write a local source file for client upload tests.
pub fn write_local_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent dirs");
    }
    std::fs::write(path, contents).expect("Failed to write local file");
}
