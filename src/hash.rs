// src/hash.rs

//! # Hashing Utilities
//!
//! SHA-256 digests used across the core.
//!
//! **Responsibilities:**
//! - Compute the cache fingerprint `SHA-256(path:mtime)`.
//! - Compute chunked content digests for quarantined payloads.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Chunk size for streaming content digests (64 KiB, read-ahead friendly).
const DIGEST_CHUNK: usize = 64 * 1024;

/// Hex-encoded SHA-256 of an in-memory buffer.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Cache key for a file: SHA-256 over `"<path>:<mtime>"`. A modification
/// bumps `mtime` and therefore produces a fresh key, so stale entries are
/// never returned for changed files.
pub fn fingerprint(path: &Path, mtime_secs: i64) -> String {
    let key_data = format!("{}:{}", path.display(), mtime_secs);
    sha256_hex(key_data.as_bytes())
}

/// Streaming SHA-256 over a file's contents.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let f = File::open(path)?;
    let mut rdr = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_CHUNK];
    loop {
        let n = rdr.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
