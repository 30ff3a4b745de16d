//! CORS middleware configuration.

use axum::http::header::{ACCEPT, CONTENT_TYPE, RANGE};
use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};

/// Archive total headers exposed to browser clients.
const EXPOSED_HEADERS: [HeaderName; 2] = [
    HeaderName::from_static("x-total-files"),
    HeaderName::from_static("x-total-size"),
];

/// Create a CORS layer from configuration.
pub fn create_cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];

    // No configured origins means development mode: any origin, no
    // credentials. Configured origins get an explicit allow list.
    if origins.is_empty() {
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers(Any)
            .allow_origin(Any)
            .expose_headers(EXPOSED_HEADERS)
    } else {
        let parsed_origins: Vec<HeaderValue> =
            origins.iter().filter_map(|o| o.parse().ok()).collect();

        if parsed_origins.is_empty() {
            // Fallback to dev mode if no origin parsed
            CorsLayer::new()
                .allow_methods(methods)
                .allow_headers(Any)
                .allow_origin(Any)
                .expose_headers(EXPOSED_HEADERS)
        } else {
            CorsLayer::new()
                .allow_methods(methods)
                .allow_headers([CONTENT_TYPE, ACCEPT, RANGE])
                .allow_origin(parsed_origins)
                .expose_headers(EXPOSED_HEADERS)
        }
    }
}
