// src/hash.rs

//! Content hashing for package integrity
//!
//! Two flavors are used across the crate:
//! - raw SHA-256 hex digests for single blobs (OCI layer verification),
//! - the canonical directory hash recorded as `sum` in `kcl.mod.lock`.
//!
//! The directory hash is stable across platforms: file paths are taken
//! relative to the root, normalized to `/` separators, sorted
//! lexicographically, and folded as `path \0 sha256(contents) \0` into a
//! single SHA-256 whose digest is base64-encoded.

use crate::error::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use walkdir::WalkDir;

/// Compute the SHA-256 hex digest of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-256 hex digest of a file, streaming its contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the canonical directory hash of `dir`.
///
/// Only regular files participate; empty directories and symlinks do not
/// affect the digest. The result is the base64-encoded SHA-256 of the
/// sorted `path \0 file-digest \0` concatenation.
pub fn hash_dir(dir: &Path) -> Result<String> {
    let mut entries: Vec<(String, String)> = Vec::new();

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            io::Error::new(io::ErrorKind::Other, format!("walking '{}': {e}", dir.display()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        let digest = sha256_file(entry.path())?;
        entries.push((rel, digest));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (path, digest) in &entries {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.as_bytes());
        hasher.update([0u8]);
    }

    Ok(BASE64.encode(hasher.finalize()))
}

/// Read data from a reader and return its SHA-256 hex digest.
pub fn sha256_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
