//! Router configuration for the transfer API.

use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{archive, download, upload, AppState};
use super::middleware::create_cors_layer;

/// Create the main API router.
pub fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let upload_routes = Router::new()
        .route("/init", post(upload::init_upload))
        .route("/chunk", post(upload::upload_chunk))
        .route("/complete", post(upload::complete_upload))
        .route("/abort", post(upload::abort_upload))
        .route("/:token", get(upload::upload_status));

    let download_routes = Router::new()
        .route("/file", get(download::download_file))
        .route("/folder-zip", post(archive::folder_zip))
        .route("/zip", post(archive::selection_zip));

    let file_routes = Router::new().route("/metadata", get(download::file_metadata));

    // Chunk uploads carry a full chunk per request, so the body cap has to
    // clear the configured chunk size
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);

    Router::new()
        .nest("/uploads", upload_routes)
        .nest("/downloads", download_routes)
        .nest("/files", file_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(cors_origins))
                .layer(body_limit),
        )
        .with_state(state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}
