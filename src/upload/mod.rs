//! Server-side chunked upload sessions.

pub mod session;
pub mod store;

pub use session::{SessionParams, UploadSession};
pub use store::UploadStore;
