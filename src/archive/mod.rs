//! Streaming ZIP archive generation.
//!
//! A manifest is built up front (so totals can go out in response headers
//! before any body bytes), then entries stream one at a time through a
//! bounded pipe. Entries are stored uncompressed: archive downloads are
//! throughput-bound and the payloads are typically already compressed.

pub mod manifest;
pub mod stream;

pub use manifest::{ArchiveManifest, ManifestEntry};
pub use stream::{sanitize_zip_name, stream_zip};
