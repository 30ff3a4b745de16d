//! Web API module for Nimbus.
//!
//! REST endpoints for chunked uploads, ranged downloads and streaming ZIP
//! archives over the configured storage root.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;

pub use error::{ApiError, ErrorCode};
pub use handlers::AppState;
pub use router::{create_health_router, create_router};
pub use server::WebServer;
