//! Chunk planning for large transfers.
//!
//! A plan divides `[0, file_size)` into ordered, gap-free, non-overlapping
//! chunks. The same arithmetic drives uploads (positional staging writes)
//! and ranged downloads, so both sides agree on offsets by construction.

use crate::{NimbusError, Result};

/// Default chunk size for chunked transfers (25 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 25 * 1024 * 1024;

/// One planned chunk of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    /// Zero-based chunk number.
    pub number: u32,
    /// Byte offset of the chunk within the file.
    pub offset: u64,
    /// Chunk length in bytes. Only the last chunk may be short.
    pub size: u64,
}

impl ChunkSpec {
    /// Inclusive end offset, for `Range` headers.
    pub fn last_byte(&self) -> u64 {
        self.offset + self.size - 1
    }
}

/// Number of chunks a file of `file_size` bytes needs at `chunk_size`.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size)
}

/// Build the chunk plan for a file.
///
/// Returns an empty plan for an empty file. `chunk_size == 0` is rejected.
pub fn plan(file_size: u64, chunk_size: u64) -> Result<Vec<ChunkSpec>> {
    if chunk_size == 0 {
        return Err(NimbusError::InvalidInput(
            "chunk size must be greater than zero".to_string(),
        ));
    }

    let count = chunk_count(file_size, chunk_size);
    let mut chunks = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    let mut number = 0u32;
    while offset < file_size {
        let size = chunk_size.min(file_size - offset);
        chunks.push(ChunkSpec {
            number,
            offset,
            size,
        });
        offset += size;
        number += 1;
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    /// Every byte in `[0, file_size)` is covered exactly once, in order.
    fn assert_coverage(file_size: u64, chunk_size: u64) {
        let chunks = plan(file_size, chunk_size).unwrap();
        let mut expected_offset = 0u64;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.number as usize, i);
            assert_eq!(chunk.offset, expected_offset);
            assert!(chunk.size > 0);
            assert!(chunk.size <= chunk_size);
            expected_offset += chunk.size;
        }
        assert_eq!(expected_offset, file_size);
    }

    #[test]
    fn test_coverage_various_sizes() {
        for file_size in [1, 7, 1024, 1025, 4096, 10_000, 123_457] {
            assert_coverage(file_size, 1024);
        }
    }

    #[test]
    fn test_exact_multiple() {
        let chunks = plan(4096, 1024).unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.size == 1024));
    }

    #[test]
    fn test_short_last_chunk() {
        // 120 MiB at 25 MiB: five chunks, last one 20 MiB
        let chunks = plan(120 * MIB, 25 * MIB).unwrap();
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].size, 25 * MIB);
        assert_eq!(chunks[3].size, 25 * MIB);
        assert_eq!(chunks[4].size, 20 * MIB);
        assert_eq!(chunks[4].offset, 100 * MIB);
    }

    #[test]
    fn test_single_chunk_file() {
        let chunks = plan(100, 1024).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].size, 100);
        assert_eq!(chunks[0].last_byte(), 99);
    }

    #[test]
    fn test_empty_file() {
        let chunks = plan(0, 1024).unwrap();
        assert!(chunks.is_empty());
        assert_eq!(chunk_count(0, 1024), 0);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            plan(100, 0),
            Err(NimbusError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(100, 25), 4);
        assert_eq!(chunk_count(101, 25), 5);
        assert_eq!(chunk_count(1, 25), 1);
    }
}
