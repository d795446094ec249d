// src/error.rs

//! Crate-wide error type for the dependency-management core
//!
//! Every fallible operation in the library returns [`Result`]. The variants
//! mirror the error kinds the pipeline distinguishes: fatal manifest/source
//! problems fail fast, while transport errors and corrupt cache entries are
//! retried inside the downloader and cache layers before they surface here.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not find 'kcl.mod' in '{}'", .path.display())]
    ManifestMissing { path: PathBuf },

    #[error("failed to parse '{}': {reason}", .path.display())]
    ManifestMalformed { path: PathBuf, reason: String },

    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("no kcl package found searching upwards from '{}'", .0.display())]
    SourceRootNotFound(PathBuf),

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("authentication rejected: {0}")]
    AuthFailure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("checksum mismatch for '{name}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("cache entry '{0}' is corrupt")]
    CacheCorrupt(String),

    #[error("invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("failed to vendor dependency '{0}': no package tree was materialized")]
    VendorMaterializationFailed(String),

    #[error("timed out waiting for lock '{}'", .path.display())]
    LockContention { path: PathBuf },

    #[error("git operation failed: {0}")]
    Git(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// True for kinds the caller may retry (transport-layer failures).
    /// Auth rejections and 404s are terminal no matter how often retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NetworkFailure(_))
    }
}
