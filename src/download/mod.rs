// src/download/mod.rs

//! Remote package fetching
//!
//! One façade, [`DownloadClient`], dispatches a remote source into a
//! caller-supplied destination directory: git working trees are cloned and
//! checked out, OCI artifacts are pulled layer-by-layer, registry
//! indirections resolve to their OCI form.
//!
//! Transport-layer failures are retried up to a fixed budget with
//! backoff; authentication rejections and 404s are terminal on the first
//! occurrence. Callers may pass a deadline that bounds the whole fetch.

mod git;
mod oci;

pub use oci::list_tags;

use crate::error::{Error, Result};
use crate::source::{Remote, Source};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Per-request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for retryable failures.
const MAX_RETRIES: u32 = 3;

/// Base backoff between attempts; grows linearly with the attempt count.
const RETRY_DELAY_MS: u64 = 1000;

/// Fetches remote sources into caller-supplied directories.
pub struct DownloadClient {
    http: reqwest::blocking::Client,
    insecure_skip_tls_verify: bool,
    max_retries: u32,
}

impl DownloadClient {
    pub fn new(insecure_skip_tls_verify: bool) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(insecure_skip_tls_verify)
            .build()
            .map_err(|e| Error::NetworkFailure(format!("failed to create HTTP client: {e}")))?;

        Ok(DownloadClient {
            http,
            insecure_skip_tls_verify,
            max_retries: MAX_RETRIES,
        })
    }

    /// Fetch `source` into `dest_dir`, which must already exist.
    pub fn download(
        &self,
        source: &Source,
        dest_dir: &Path,
        deadline: Option<Instant>,
    ) -> Result<()> {
        info!("fetching '{}' into '{}'", source.fingerprint(), dest_dir.display());
        match source {
            Source::Remote(Remote::Git(g)) => {
                git::download(g, dest_dir, self.insecure_skip_tls_verify)
            }
            Source::Remote(Remote::Oci(o)) => oci::pull(self, o, dest_dir, deadline),
            Source::Remote(Remote::Registry(r)) => oci::pull(self, &r.oci, dest_dir, deadline),
            other => Err(Error::UnsupportedSource(other.to_string())),
        }
    }

    pub(crate) fn http(&self) -> &reqwest::blocking::Client {
        &self.http
    }

    /// Run `op` under the retry budget. Only kinds marked retryable are
    /// attempted again; everything else propagates immediately.
    pub(crate) fn with_retry<T>(
        &self,
        deadline: Option<Instant>,
        mut op: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(Error::NetworkFailure("fetch deadline exceeded".to_string()));
                }
            }

            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!("fetch attempt {attempt} failed: {e}, retrying");
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Map an HTTP status onto the error taxonomy: auth rejections and 404s
/// are terminal, everything else counts as a transport failure.
pub(crate) fn classify_status(status: reqwest::StatusCode, url: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::AuthFailure(url.to_string()),
        404 => Error::NotFound(url.to_string()),
        _ => Error::NetworkFailure(format!("HTTP {status} from {url}")),
    }
}
