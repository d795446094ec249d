// src/cache.rs

//! Content-addressed package cache
//!
//! Fetched packages are materialized under `<root>/<slot>` where the slot
//! name follows the `<name>_<version>` convention of the vendor tree. Each
//! slot has a sibling `<slot>.lock` file used as an advisory-lock target,
//! making [`PkgCache::update`] safe across processes, not just threads:
//! at most one producer runs per key while distinct keys proceed in
//! parallel.
//!
//! Producers write into a staging directory created under the cache root
//! and the result becomes visible only through an atomic rename, so a
//! reader never observes a half-populated slot.

use crate::error::{Error, Result};
use crate::fsutil::{self, AdvisoryLock};
use crate::source::Source;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// How long `update` waits for another producer before giving up.
const LOCK_TIMEOUT: Duration = Duration::from_secs(120);

/// Process-safe store of materialized packages keyed by source identity.
#[derive(Debug, Clone)]
pub struct PkgCache {
    root: PathBuf,
}

impl PkgCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PkgCache { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a source materializes into, whether or not it exists yet.
    pub fn slot_path(&self, source: &Source) -> PathBuf {
        self.root.join(source.cache_slot())
    }

    fn lock_path(&self, source: &Source) -> PathBuf {
        self.root.join(format!("{}.lock", source.cache_slot()))
    }

    /// Return the fully materialized directory for `source`, if present.
    /// An empty slot directory counts as absent.
    pub fn find(&self, source: &Source) -> Option<PathBuf> {
        let slot = self.slot_path(source);
        if fsutil::dir_exists(&slot) && !fsutil::dir_is_empty(&slot) {
            Some(slot)
        } else {
            None
        }
    }

    /// Materialize `source` through `producer`, ensuring at most one
    /// concurrent producer per key.
    ///
    /// The slot lock is held while the producer runs; under it `find` is
    /// re-checked so losers of the race return the winner's result without
    /// fetching. On success the staging directory is renamed into place;
    /// on failure it is removed and the error propagates. A producer that
    /// succeeds but leaves staging empty is reported as cache corruption.
    pub fn update(
        &self,
        source: &Source,
        producer: impl FnOnce(&Path) -> Result<()>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let _lock = AdvisoryLock::acquire(&self.lock_path(source), LOCK_TIMEOUT)?;

        if let Some(existing) = self.find(source) {
            debug!("cache hit for '{}' after lock", source.fingerprint());
            return Ok(existing);
        }

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)?;

        debug!(
            "producing cache entry '{}' in '{}'",
            source.fingerprint(),
            staging.path().display()
        );
        producer(staging.path())?;

        if fsutil::dir_is_empty(staging.path()) {
            return Err(Error::CacheCorrupt(source.fingerprint()));
        }

        let slot = self.slot_path(source);
        let staged = staging.into_path();
        if let Err(e) = fs::rename(&staged, &slot) {
            let _ = fs::remove_dir_all(&staged);
            return Err(e.into());
        }

        Ok(slot)
    }

    /// Delete one cache entry and its lock file.
    pub fn remove(&self, source: &Source) -> Result<()> {
        let slot = self.slot_path(source);
        if slot.exists() {
            warn!("evicting cache entry '{}'", slot.display());
            fs::remove_dir_all(&slot)?;
        }
        let lock = self.lock_path(source);
        if lock.exists() {
            fs::remove_file(&lock)?;
        }
        Ok(())
    }

    /// Delete the entire cache root.
    pub fn remove_all(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}
