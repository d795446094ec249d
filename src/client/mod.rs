// src/client/mod.rs

//! Top-level pipeline orchestration
//!
//! [`Client`] ties the loader, visitor dispatch, cache, and downloader
//! together behind the three verbs of the pipeline: [`Client::add`],
//! [`Client::update`], and [`Client::vendor_deps`]. One client holds one
//! settings value; nothing is process-global, so tests can run several
//! clients against disjoint home directories.

mod add;
mod update;
mod vendor;

pub use add::AddOptions;

use crate::cache::PkgCache;
use crate::deps::Dependency;
use crate::download::DownloadClient;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::hash;
use crate::manifest::MOD_FILE;
use crate::pkg::{load_package, Package};
use crate::settings::Settings;
use crate::source::Source;
use crate::visitor::{ArchiveVisitor, PkgVisitor, RemoteVisitor, VirtualPkgVisitor, Visitor};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Dependency-management client over one settings value.
pub struct Client {
    settings: Settings,
    cache: PkgCache,
    downloader: DownloadClient,
    deadline: Option<Instant>,
}

impl Client {
    pub fn new(settings: Settings) -> Result<Self> {
        let downloader = DownloadClient::new(settings.insecure_skip_tls_verify)?;
        let cache = PkgCache::new(&settings.home_path);
        Ok(Client {
            settings,
            cache,
            downloader,
            deadline: None,
        })
    }

    /// Bound every remote fetch issued by this client.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &PkgCache {
        &self.cache
    }

    /// Load the package rooted at `path` under this client's settings.
    pub fn load(&self, path: &Path) -> Result<Package> {
        load_package(path, &self.settings)
    }

    /// The authoritative visitor selector, shared by add, update, and
    /// vendor: remote sources go through the cache, archives are
    /// extracted, local directories load in place or synthesize a
    /// virtual package when no manifest is found above them.
    pub(crate) fn visitor_for(&self, source: &Source) -> Result<Visitor<'_>> {
        let pkg_visitor = PkgVisitor {
            settings: &self.settings,
        };

        if source.is_remote() {
            return Ok(Visitor::Remote(RemoteVisitor {
                pkg: pkg_visitor,
                downloader: &self.downloader,
                enable_cache: true,
                cache_path: self.settings.home_path.clone(),
                visited_path: self.settings.home_path.clone(),
                deadline: self.deadline,
            }));
        }
        if source.is_local_tar() || source.is_local_tgz() {
            return Ok(Visitor::Archive(ArchiveVisitor { pkg: pkg_visitor }));
        }
        if source.is_local() {
            return match source.find_root_path() {
                Ok(_) => Ok(Visitor::Pkg(pkg_visitor)),
                Err(Error::SourceRootNotFound(_)) => {
                    Ok(Visitor::Virtual(VirtualPkgVisitor { pkg: pkg_visitor }))
                }
                Err(e) => Err(e),
            };
        }
        Err(Error::UnsupportedSource(source.to_string()))
    }

    pub(crate) fn downloader(&self) -> &DownloadClient {
        &self.downloader
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Canonical directory hash of a materialized dependency; empty when
    /// nothing is materialized yet.
    pub fn acquire_dep_sum(&self, dep: &Dependency) -> Result<String> {
        match &dep.local_full_path {
            Some(path) if path.is_dir() => hash::hash_dir(path),
            _ => Ok(String::new()),
        }
    }

    /// Probe for a dependency already materialized near `root_pkg_home`.
    ///
    /// With `in_vendor`, `vendor/<full_name>` is consulted first; local
    /// dependencies additionally count their own directory. A hit is
    /// re-verified against the recorded sum (local sources exempt, since
    /// their trees legitimately drift) and returned re-rooted at the
    /// found directory.
    pub fn dependency_exists_local(
        &self,
        root_pkg_home: &Path,
        dep: &Dependency,
        in_vendor: bool,
    ) -> Result<Option<Dependency>> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if in_vendor {
            candidates.push(root_pkg_home.join("vendor").join(&dep.full_name));
        } else {
            candidates.push(root_pkg_home.join(&dep.full_name));
        }
        if dep.is_from_local() {
            if let Some(path) = &dep.local_full_path {
                candidates.push(path.clone());
            }
        }

        for candidate in candidates {
            if !candidate.join(MOD_FILE).exists() {
                continue;
            }

            if !dep.sum.is_empty() && !dep.is_from_local() {
                let actual = hash::hash_dir(&candidate)?;
                if actual != dep.sum {
                    return Err(Error::ChecksumMismatch {
                        name: dep.name.clone(),
                        expected: dep.sum.clone(),
                        actual,
                    });
                }
            }

            let mut found = dep.clone();
            found.local_full_path = Some(candidate);
            return Ok(Some(found));
        }
        Ok(None)
    }

    /// Flatten the resolved store into `name -> materialized path`,
    /// the hand-off format for the evaluator.
    pub fn resolve_deps_into_map(&self, pkg: &Package) -> Result<IndexMap<String, PathBuf>> {
        let mut map = IndexMap::new();
        for (name, dep) in pkg.lock_deps.iter() {
            let path = dep
                .local_full_path
                .clone()
                .filter(|p| fsutil::dir_exists(p))
                .or_else(|| {
                    let vendored = pkg.vendor_path().join(&dep.full_name);
                    fsutil::dir_exists(&vendored).then_some(vendored)
                })
                .or_else(|| {
                    let cached = self.settings.home_path.join(&dep.full_name);
                    fsutil::dir_exists(&cached).then_some(cached)
                })
                .ok_or_else(|| Error::NotFound(format!("dependency '{name}' is not materialized")))?;
            map.insert(name.clone(), path);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;
    use std::fs;
    use tempfile::TempDir;

    fn client_for(dir: &Path) -> Client {
        Client::new(Settings::with_home(dir.join("kpkg-home"))).unwrap()
    }

    fn write_pkg(dir: &Path, name: &str, version: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join(MOD_FILE),
            format!("[package]\nname = \"{name}\"\nversion = \"{version}\"\n"),
        )
        .unwrap();
    }

    #[test]
    fn test_selector_remote() {
        let dir = TempDir::new().unwrap();
        let client = client_for(dir.path());
        let source = Source::from_url("oci://ghcr.io/kcl-lang/helloworld?tag=0.1.1").unwrap();
        assert!(matches!(
            client.visitor_for(&source).unwrap(),
            Visitor::Remote(_)
        ));
    }

    #[test]
    fn test_selector_archive() {
        let dir = TempDir::new().unwrap();
        let client = client_for(dir.path());
        let source = Source::from_url("./pkg.tgz").unwrap();
        assert!(matches!(
            client.visitor_for(&source).unwrap(),
            Visitor::Archive(_)
        ));
    }

    #[test]
    fn test_selector_local_pkg_vs_virtual() {
        let dir = TempDir::new().unwrap();
        let client = client_for(dir.path());

        let with_manifest = dir.path().join("real");
        write_pkg(&with_manifest, "real", "0.1.0");
        let source = Source::from_url(&with_manifest.to_string_lossy()).unwrap();
        assert!(matches!(client.visitor_for(&source).unwrap(), Visitor::Pkg(_)));

        let bare = dir.path().join("bare");
        fs::create_dir_all(&bare).unwrap();
        let source = Source::from_url(&bare.to_string_lossy()).unwrap();
        assert!(matches!(
            client.visitor_for(&source).unwrap(),
            Visitor::Virtual(_)
        ));
    }

    #[test]
    fn test_selector_rejects_nil() {
        let dir = TempDir::new().unwrap();
        let client = client_for(dir.path());
        let source = Source::Nil(crate::source::NilSource { spec: None });
        assert!(matches!(
            client.visitor_for(&source),
            Err(Error::UnsupportedSource(_))
        ));
    }

    #[test]
    fn test_dependency_exists_local_checks_sum() {
        let dir = TempDir::new().unwrap();
        let client = client_for(dir.path());

        let root = dir.path().join("root");
        let vendored = root.join("vendor/helloworld_0.1.1");
        write_pkg(&vendored, "helloworld", "0.1.1");

        let mut dep = Dependency::new(
            "helloworld",
            "0.1.1",
            Source::from_url("oci://ghcr.io/kcl-lang/helloworld?tag=0.1.1").unwrap(),
        );

        // Correct sum: found and re-rooted.
        dep.sum = hash::hash_dir(&vendored).unwrap();
        let found = client
            .dependency_exists_local(&root, &dep, true)
            .unwrap()
            .unwrap();
        assert_eq!(found.local_full_path.as_deref(), Some(vendored.as_path()));

        // Tampered sum: checksum mismatch.
        dep.sum = "tampered".to_string();
        assert!(matches!(
            client.dependency_exists_local(&root, &dep, true),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_dependency_exists_local_miss() {
        let dir = TempDir::new().unwrap();
        let client = client_for(dir.path());
        let dep = Dependency::new(
            "absent",
            "0.0.1",
            Source::from_url("oci://ghcr.io/kcl-lang/absent?tag=0.0.1").unwrap(),
        );
        let found = client
            .dependency_exists_local(dir.path(), &dep, true)
            .unwrap();
        assert!(found.is_none());
    }
}
