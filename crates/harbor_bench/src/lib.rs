//! Benchmark utilities.

#![warn(missing_docs)]

use harbor_engine::EntryMetadata;

/// Deterministic payload of the given size.
pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Cache metadata for `count` entries of `size` bytes with ascending
/// `stored_at`.
pub fn entry_metadata(count: usize, size: u64) -> Vec<EntryMetadata> {
    (0..count)
        .map(|i| EntryMetadata {
            key: format!("entry:{i:06}"),
            size_bytes: size,
            stored_at: i as u64,
            expires_at: None,
            version: 1,
        })
        .collect()
}
