// src/visitor.rs

//! Uniform access to packages irrespective of how they are stored
//!
//! A [`Visitor`] turns a [`Source`] into a loaded in-memory [`Package`]
//! and runs a synchronous callback under it. Four variants cover the
//! source space:
//!
//! - `Pkg` loads a plain local directory in place,
//! - `Archive` extracts a local tarball next to itself and promotes it,
//! - `Virtual` synthesizes a throwaway package for a manifest-less dir,
//! - `Remote` routes through the content-addressed cache, fetching on a
//!   miss and recovering once from a corrupt entry.

use crate::cache::PkgCache;
use crate::download::DownloadClient;
use crate::error::{Error, Result};
use crate::manifest::MOD_FILE;
use crate::pkg::{load_package, Package};
use crate::settings::Settings;
use crate::source::Source;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Callback run under a visited package.
pub type VisitFn<'a> = &'a mut dyn FnMut(&Package) -> Result<()>;

/// Sum type over the four access strategies.
pub enum Visitor<'a> {
    Pkg(PkgVisitor<'a>),
    Archive(ArchiveVisitor<'a>),
    Virtual(VirtualPkgVisitor<'a>),
    Remote(RemoteVisitor<'a>),
}

impl<'a> Visitor<'a> {
    /// Load the package behind `source` and run `f` under it. The
    /// callback completes before this returns.
    pub fn visit(&self, source: &Source, f: VisitFn<'_>) -> Result<()> {
        match self {
            Visitor::Pkg(v) => v.visit(source, f),
            Visitor::Archive(v) => v.visit(source, f),
            Visitor::Virtual(v) => v.visit(source, f),
            Visitor::Remote(v) => v.visit(source, f),
        }
    }
}

/// Loads a plain local directory that carries a manifest.
pub struct PkgVisitor<'a> {
    pub settings: &'a Settings,
}

impl<'a> PkgVisitor<'a> {
    pub fn visit(&self, source: &Source, f: VisitFn<'_>) -> Result<()> {
        let root = source.find_root_path()?;
        let pkg = load_package(&root, self.settings)?;
        f(&pkg)
    }
}

/// Extracts a local archive beside itself, then loads the result.
pub struct ArchiveVisitor<'a> {
    pub pkg: PkgVisitor<'a>,
}

impl<'a> ArchiveVisitor<'a> {
    pub fn visit(&self, source: &Source, f: VisitFn<'_>) -> Result<()> {
        let (path, kind) = match source {
            Source::LocalArchive(a) => (&a.path, a.kind),
            other => return Err(Error::UnsupportedSource(other.to_string())),
        };

        let dest = extraction_dir(path);
        if !dest.join(MOD_FILE).exists() {
            crate::archive::extract(path, kind, &dest)?;
        }

        let root = find_manifest_root(&dest)
            .ok_or_else(|| Error::SourceRootNotFound(dest.clone()))?;
        let pkg = load_package(&root, self.pkg.settings)?;
        f(&pkg)
    }
}

/// Synthesizes an in-memory package for a directory without a manifest.
pub struct VirtualPkgVisitor<'a> {
    pub pkg: PkgVisitor<'a>,
}

impl<'a> VirtualPkgVisitor<'a> {
    pub fn visit(&self, source: &Source, f: VisitFn<'_>) -> Result<()> {
        match source.find_root_path() {
            Ok(root) => {
                let pkg = load_package(&root, self.pkg.settings)?;
                f(&pkg)
            }
            Err(Error::SourceRootNotFound(_)) => {
                let path = source
                    .local_path()
                    .ok_or_else(|| Error::UnsupportedSource(source.to_string()))?;
                let pkg = Package::new_virtual(path);
                f(&pkg)
            }
            Err(e) => Err(e),
        }
    }
}

/// Consults the cache, fetching through the downloader on a miss.
pub struct RemoteVisitor<'a> {
    pub pkg: PkgVisitor<'a>,
    pub downloader: &'a DownloadClient,
    pub enable_cache: bool,
    /// Root of the content-addressed cache.
    pub cache_path: PathBuf,
    /// Where transient extractions land when the cache is disabled.
    pub visited_path: PathBuf,
    pub deadline: Option<Instant>,
}

impl<'a> RemoteVisitor<'a> {
    pub fn visit(&self, source: &Source, f: VisitFn<'_>) -> Result<()> {
        if !source.is_remote() {
            return Err(Error::UnsupportedSource(source.to_string()));
        }

        if self.enable_cache {
            let cache = PkgCache::new(&self.cache_path);

            if let Some(cached) = cache.find(source) {
                debug!("cache hit for '{}'", source.fingerprint());
                match self.load_visited(&cached, source) {
                    Ok(pkg) => return f(&pkg),
                    Err(e) => {
                        // Present but unloadable: evict and fetch once.
                        warn!(
                            "cache entry '{}' unusable ({e}), re-fetching",
                            cached.display()
                        );
                        cache.remove(source)?;
                    }
                }
            }

            let path = cache.update(source, |staging| {
                self.downloader.download(source, staging, self.deadline)
            })?;
            let pkg = self.load_visited(&path, source)?;
            f(&pkg)
        } else {
            std::fs::create_dir_all(&self.visited_path)?;
            let tmp = tempfile::tempdir_in(&self.visited_path)?;
            self.downloader.download(source, tmp.path(), self.deadline)?;
            let pkg = self.load_visited(tmp.path(), source)?;
            f(&pkg)
        }
    }

    fn load_visited(&self, path: &Path, source: &Source) -> Result<Package> {
        let root =
            find_manifest_root(path).ok_or_else(|| Error::SourceRootNotFound(path.to_path_buf()))?;
        let pkg = load_package(&root, self.pkg.settings)?;

        // A source may address a sub-package bundled inside the artifact.
        if let Some(spec) = source.pkg_spec() {
            if pkg.name() != spec.name {
                return find_package_named(path, &spec.name, self.pkg.settings).ok_or_else(|| {
                    Error::NotFound(format!(
                        "package '{}' inside '{}'",
                        spec.name,
                        source.fingerprint()
                    ))
                });
            }
        }

        Ok(pkg)
    }
}

/// Directory an archive extracts into: the archive path with its
/// extension(s) stripped.
fn extraction_dir(archive: &Path) -> PathBuf {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(".tar.gz")
        .or_else(|| name.strip_suffix(".tgz"))
        .or_else(|| name.strip_suffix(".tar"))
        .unwrap_or(&name);
    archive
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(stem)
}

/// Find the directory holding the manifest: `dir` itself, or the first
/// nested directory within two levels (archives often wrap their content
/// in a single top-level folder).
pub fn find_manifest_root(dir: &Path) -> Option<PathBuf> {
    if dir.join(MOD_FILE).exists() {
        return Some(dir.to_path_buf());
    }
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_dir() && entry.path().join(MOD_FILE).exists() {
            return Some(entry.path().to_path_buf());
        }
    }
    None
}

/// Locate a bundled package by manifest name anywhere under `dir`.
pub fn find_package_named(dir: &Path, name: &str, settings: &Settings) -> Option<Package> {
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() || !entry.path().join(MOD_FILE).exists() {
            continue;
        }
        if let Ok(pkg) = load_package(entry.path(), settings) {
            if pkg.name() == name {
                return Some(pkg);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn settings_for(dir: &Path) -> Settings {
        Settings::with_home(dir.join("kpkg-home"))
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
    fn test_pkg_visitor_loads_in_place() {
        let dir = TempDir::new().unwrap();
        write_pkg(dir.path(), "demo", "0.1.0");
        let settings = settings_for(dir.path());

        let visitor = Visitor::Pkg(PkgVisitor { settings: &settings });
        let source = Source::from_url(&dir.path().to_string_lossy()).unwrap();

        let mut seen = None;
        visitor
            .visit(&source, &mut |pkg| {
                seen = Some((pkg.name().to_string(), pkg.home_path.clone()));
                Ok(())
            })
            .unwrap();

        let (name, home) = seen.unwrap();
        assert_eq!(name, "demo");
        assert!(home.is_absolute());
    }

    #[test]
    fn test_virtual_visitor_synthesizes() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("plain-configs");
        fs::create_dir_all(&target).unwrap();
        let settings = settings_for(dir.path());

        let visitor = Visitor::Virtual(VirtualPkgVisitor {
            pkg: PkgVisitor { settings: &settings },
        });
        let source = Source::from_url(&target.to_string_lossy()).unwrap();

        let mut seen = None;
        visitor
            .visit(&source, &mut |pkg| {
                seen = Some((pkg.name().to_string(), pkg.mod_file.deps.len()));
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, Some(("plain_configs".to_string(), 0)));
    }

    #[test]
    fn test_archive_visitor_extracts_and_loads() {
        let dir = TempDir::new().unwrap();
        let content = dir.path().join("content");
        write_pkg(&content, "archived", "0.2.0");

        let tar_path = dir.path().join("archived.tar");
        let file = fs::File::create(&tar_path).unwrap();
        let mut builder = tar::Builder::new(file);
        builder
            .append_path_with_name(content.join(MOD_FILE), MOD_FILE)
            .unwrap();
        builder.finish().unwrap();

        let settings = settings_for(dir.path());
        let visitor = Visitor::Archive(ArchiveVisitor {
            pkg: PkgVisitor { settings: &settings },
        });
        let source = Source::from_url(&tar_path.to_string_lossy()).unwrap();

        let mut seen = None;
        visitor
            .visit(&source, &mut |pkg| {
                seen = Some(pkg.name().to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen.as_deref(), Some("archived"));

        // Extraction is persistent and reused on a second visit.
        assert!(dir.path().join("archived").join(MOD_FILE).exists());
        visitor.visit(&source, &mut |_| Ok(())).unwrap();
    }

    #[test]
    fn test_find_manifest_root_nested() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("wrapper/pkg");
        write_pkg(&nested, "inner", "0.0.1");

        let root = find_manifest_root(dir.path()).unwrap();
        assert_eq!(root, nested);
    }

    #[test]
    fn test_find_package_named() {
        let dir = TempDir::new().unwrap();
        write_pkg(dir.path(), "outer", "0.1.0");
        write_pkg(&dir.path().join("subpkg"), "inner", "0.0.2");

        let settings = settings_for(dir.path());
        let found = find_package_named(dir.path(), "inner", &settings).unwrap();
        assert_eq!(found.version(), "0.0.2");
        assert!(find_package_named(dir.path(), "absent", &settings).is_none());
    }

    #[test]
    fn test_remote_visitor_uses_cache_without_network() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("kpkg-home");
        let settings = Settings::with_home(&home);

        // Pre-seed the cache slot the source resolves to.
        let source = Source::from_url("oci://ghcr.io/kcl-lang/helloworld?tag=0.1.2").unwrap();
        let slot = home.join("helloworld_0.1.2");
        write_pkg(&slot, "helloworld", "0.1.2");

        let downloader = DownloadClient::new(false).unwrap();
        let visitor = Visitor::Remote(RemoteVisitor {
            pkg: PkgVisitor { settings: &settings },
            downloader: &downloader,
            enable_cache: true,
            cache_path: home.clone(),
            visited_path: home.clone(),
            deadline: None,
        });

        let mut seen = None;
        visitor
            .visit(&source, &mut |pkg| {
                seen = Some((pkg.name().to_string(), pkg.version().to_string()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, Some(("helloworld".to_string(), "0.1.2".to_string())));
    }
}
