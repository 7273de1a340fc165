//! Content hashing for manifest entries.
//!
//! Files are hashed with xxHash64 (seed 0), encoded as base64 of the
//! little-endian digest. Two entries with equal hashes are treated as
//! byte-identical by the conflict analyzer.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Compute xxHash64 of a file and return as base64 string.
///
/// Uses streaming to handle large files without loading into memory.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;

    let mut reader = BufReader::with_capacity(1024 * 1024, file); // 1MB buffer
    let mut buf = vec![0u8; 1024 * 1024]; // 1MB chunks
    let mut hasher = xxhash_rust::xxh64::Xxh64::new(0);

    loop {
        let bytes_read = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buf[..bytes_read]);
    }

    Ok(encode_digest(hasher.digest()))
}

/// Hash an in-memory buffer the same way as `compute_file_hash`.
pub fn compute_bytes_hash(data: &[u8]) -> String {
    encode_digest(xxhash_rust::xxh64::xxh64(data, 0))
}

fn encode_digest(digest: u64) -> String {
    STANDARD.encode(digest.to_le_bytes())
}

/// Compute the MD5 of a file as lowercase hex (Nexus publishes archive MD5s).
pub fn compute_md5(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for MD5: {}", path.display()))?;
    let mut reader = BufReader::with_capacity(1024 * 1024, file);
    let mut buf = vec![0u8; 1024 * 1024];
    let mut context = md5::Context::new();

    loop {
        let bytes_read = reader.read(&mut buf)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buf[..bytes_read]);
    }

    Ok(format!("{:x}", context.compute()))
}
