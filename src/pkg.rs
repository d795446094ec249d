// src/pkg.rs

//! The package aggregate and its loader
//!
//! A [`Package`] owns a parsed manifest, its home directory, and the
//! resolved dependency store read from (or seeded into) the lockfile.
//! Loading normalizes the manifest in three passes:
//!
//! 1. relative local-path dependencies are absolutized against the
//!    package directory,
//! 2. registry-shaped dependencies gain the configured defaults and nil
//!    sources are expanded into registry indirections,
//! 3. manifest entries missing from the lock are seeded into it, copying
//!    source and full name without bumping versions or inventing sums.

use crate::deps::{full_name_of, DepStore};
use crate::error::Result;
use crate::fsutil;
use crate::lockfile::{LockFile, MOD_LOCK_FILE};
use crate::manifest::{ModFile, MOD_FILE};
use crate::settings::Settings;
use crate::source::{NilSource, OciSource, RegistrySource, Remote, Source};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A loaded package: manifest, home directory, and resolved dep store.
#[derive(Debug, Clone)]
pub struct Package {
    pub mod_file: ModFile,
    /// Absolute path to the directory containing `kcl.mod`.
    pub home_path: PathBuf,
    /// Resolved dependencies, mirroring `kcl.mod.lock`.
    pub lock_deps: DepStore,
    /// When set, sums are neither computed nor verified and the lockfile
    /// is left untouched by updates.
    pub no_sum_check: bool,
}

impl Package {
    pub fn name(&self) -> &str {
        &self.mod_file.pkg.name
    }

    pub fn version(&self) -> &str {
        &self.mod_file.pkg.version
    }

    /// `<name>_<version>`, the directory name under cache and vendor.
    pub fn full_name(&self) -> String {
        full_name_of(self.name(), self.version())
    }

    pub fn vendor_path(&self) -> PathBuf {
        self.home_path.join("vendor")
    }

    pub fn mod_file_path(&self) -> PathBuf {
        self.home_path.join(MOD_FILE)
    }

    pub fn lock_file_path(&self) -> PathBuf {
        self.home_path.join(MOD_LOCK_FILE)
    }

    /// Synthesize a throwaway package for a directory without a manifest.
    /// It has no dependencies and never touches the filesystem.
    pub fn new_virtual(path: &Path) -> Package {
        let name: String = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "virtual".to_string())
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();

        Package {
            mod_file: ModFile::new(&name, "0.0.0"),
            home_path: path.to_path_buf(),
            lock_deps: DepStore::new(),
            no_sum_check: false,
        }
    }

    /// Rewrite `kcl.mod` and, unless sum checking is disabled,
    /// `kcl.mod.lock`. Both writes are staged and renamed so a crash
    /// never leaves a partially written file.
    pub fn update_mod_and_lock(&self) -> Result<()> {
        debug!("writing '{}'", self.mod_file_path().display());
        fsutil::write_atomic(&self.mod_file_path(), &self.mod_file.to_toml_string())?;

        if !self.no_sum_check {
            let lock = LockFile::from_store(&self.lock_deps);
            debug!("writing '{}'", self.lock_file_path().display());
            fsutil::write_atomic(&self.lock_file_path(), &lock.to_toml_string()?)?;
        }
        Ok(())
    }
}

/// Load the package rooted at `pkg_path`.
pub fn load_package(pkg_path: &Path, settings: &Settings) -> Result<Package> {
    let home_path = fsutil::absolutize(pkg_path)?;
    let mut mod_file = ModFile::load(&home_path)?;
    let mut lock_deps = LockFile::load(&home_path)?.into_store();

    normalize_local_paths(&mut mod_file.deps, &home_path)?;
    fill_defaults(&mut mod_file.deps, settings);
    reconcile_lock(&mod_file.deps, &mut lock_deps);

    Ok(Package {
        mod_file,
        home_path,
        lock_deps,
        no_sum_check: false,
    })
}

/// Absolutize relative local-path dependencies against the package root.
/// The manifest keeps the path as written; only `local_full_path` becomes
/// absolute.
fn normalize_local_paths(deps: &mut DepStore, root: &Path) -> Result<()> {
    for name in deps.keys() {
        let dep = match deps.get_mut(&name) {
            Some(dep) => dep,
            None => continue,
        };
        let path = match &dep.source {
            Source::Local(l) => l.path.clone(),
            Source::LocalVirtual(v) => v.path.clone(),
            _ => continue,
        };
        let full = if path.is_absolute() {
            path
        } else {
            fsutil::absolutize(&root.join(path))?
        };
        dep.local_full_path = Some(full);
    }
    Ok(())
}

/// Fill registry defaults from settings and expand nil sources into
/// registry indirections.
fn fill_defaults(deps: &mut DepStore, settings: &Settings) {
    for name in deps.keys() {
        let dep = match deps.get_mut(&name) {
            Some(dep) => dep,
            None => continue,
        };

        match &mut dep.source {
            Source::Remote(Remote::Oci(oci)) => {
                if oci.reg.is_empty() {
                    oci.reg = settings.default_oci_registry.clone();
                }
                if oci.repo.is_empty() {
                    oci.repo = settings.default_repo_for(&dep.name);
                }
            }
            Source::Remote(Remote::Registry(registry)) => {
                if registry.oci.reg.is_empty() {
                    registry.oci.reg = settings.default_oci_registry.clone();
                }
                if registry.oci.repo.is_empty() {
                    registry.oci.repo = settings.default_repo_for(&dep.name);
                }
                dep.version = registry.version.clone();
            }
            Source::Nil(NilSource { .. }) => {
                dep.source = Source::Remote(Remote::Registry(RegistrySource {
                    name: dep.name.clone(),
                    version: dep.version.clone(),
                    oci: OciSource {
                        reg: settings.default_oci_registry.clone(),
                        repo: settings.default_repo_for(&dep.name),
                        tag: dep.version.clone(),
                        pkg_name: None,
                        pkg_version: None,
                    },
                }));
            }
            _ => {}
        }

        if !dep.version.is_empty() {
            dep.full_name = full_name_of(&dep.name, &dep.version);
        }
    }
}

/// Seed lock entries for manifest names the lock does not know yet.
fn reconcile_lock(mod_deps: &DepStore, lock_deps: &mut DepStore) {
    for (name, mod_dep) in mod_deps.iter() {
        if lock_deps.contains(name) {
            continue;
        }
        let mut seeded = mod_dep.clone();
        seeded.sum = String::new();
        lock_deps.set(seeded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn settings_for(dir: &Path) -> Settings {
        Settings::with_home(dir.join("kpkg-home"))
    }

    fn write_manifest(dir: &Path, content: &str) {
        fs::write(dir.join(MOD_FILE), content).unwrap();
    }

    #[test]
    fn test_load_normalizes_relative_paths() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            dir.path(),
            r#"
[package]
name = "root"
version = "0.0.1"

[dependencies]
dep = { path = "../sibling" }
"#,
        );

        let pkg = load_package(dir.path(), &settings_for(dir.path())).unwrap();
        let dep = pkg.mod_file.deps.get("dep").unwrap();
        let full = dep.local_full_path.as_ref().unwrap();
        assert!(full.is_absolute());
        assert!(full.ends_with("sibling"));

        // The manifest keeps the relative path as written.
        match &dep.source {
            Source::Local(l) => assert_eq!(l.path, PathBuf::from("../sibling")),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn test_load_expands_nil_to_registry() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            dir.path(),
            r#"
[package]
name = "root"
version = "0.0.1"

[dependencies]
helloworld = "0.1.1"
"#,
        );

        let pkg = load_package(dir.path(), &settings_for(dir.path())).unwrap();
        let dep = pkg.mod_file.deps.get("helloworld").unwrap();
        match &dep.source {
            Source::Remote(Remote::Registry(r)) => {
                assert_eq!(r.name, "helloworld");
                assert_eq!(r.version, "0.1.1");
                assert_eq!(r.oci.reg, "ghcr.io");
                assert_eq!(r.oci.repo, "kcl-lang/helloworld");
                assert_eq!(r.oci.tag, "0.1.1");
            }
            other => panic!("expected registry source, got {other:?}"),
        }
        assert!(!dep.source.is_nil());
    }

    #[test]
    fn test_load_fills_oci_defaults() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            dir.path(),
            r#"
[package]
name = "root"
version = "0.0.1"

[dependencies]
helloworld = { oci = "oci://ghcr.io/kcl-lang/helloworld", tag = "0.1.1" }
"#,
        );

        let pkg = load_package(dir.path(), &settings_for(dir.path())).unwrap();
        let dep = pkg.mod_file.deps.get("helloworld").unwrap();
        assert_eq!(
            dep.source.fingerprint(),
            "ghcr.io/kcl-lang/helloworld:0.1.1"
        );
        assert_eq!(dep.full_name, "helloworld_0.1.1");
    }

    #[test]
    fn test_load_seeds_lock_from_manifest() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            dir.path(),
            r#"
[package]
name = "root"
version = "0.0.1"

[dependencies]
helloworld = "0.1.1"
"#,
        );

        let pkg = load_package(dir.path(), &settings_for(dir.path())).unwrap();
        let locked = pkg.lock_deps.get("helloworld").unwrap();
        assert_eq!(locked.version, "0.1.1");
        assert_eq!(locked.full_name, "helloworld_0.1.1");
        assert!(locked.sum.is_empty());
    }

    #[test]
    fn test_load_keeps_existing_lock_entries() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            dir.path(),
            r#"
[package]
name = "root"
version = "0.0.1"

[dependencies]
helloworld = "0.1.1"
"#,
        );
        fs::write(
            dir.path().join(MOD_LOCK_FILE),
            r#"[[dependencies]]
name = "helloworld"
full_name = "helloworld_0.1.2"
version = "0.1.2"
sum = "existing="
reg = "ghcr.io"
repo = "kcl-lang/helloworld"
oci_tag = "0.1.2"
"#,
        )
        .unwrap();

        let pkg = load_package(dir.path(), &settings_for(dir.path())).unwrap();
        // Lock already knows the name: no reseeding, version stays 0.1.2.
        let locked = pkg.lock_deps.get("helloworld").unwrap();
        assert_eq!(locked.version, "0.1.2");
        assert_eq!(locked.sum, "existing=");
    }

    #[test]
    fn test_update_mod_and_lock_round_trips() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            dir.path(),
            r#"
[package]
name = "root"
version = "0.0.1"

[dependencies]
helloworld = "0.1.1"
"#,
        );

        let pkg = load_package(dir.path(), &settings_for(dir.path())).unwrap();
        pkg.update_mod_and_lock().unwrap();

        let reloaded = load_package(dir.path(), &settings_for(dir.path())).unwrap();
        assert_eq!(reloaded.mod_file, pkg.mod_file);
        // The lock round-trips through its on-disk form.
        assert_eq!(
            LockFile::from_store(&reloaded.lock_deps),
            LockFile::from_store(&pkg.lock_deps)
        );

        // A second write is byte-identical.
        let mod_before = fs::read_to_string(pkg.mod_file_path()).unwrap();
        let lock_before = fs::read_to_string(pkg.lock_file_path()).unwrap();
        reloaded.update_mod_and_lock().unwrap();
        assert_eq!(fs::read_to_string(pkg.mod_file_path()).unwrap(), mod_before);
        assert_eq!(fs::read_to_string(pkg.lock_file_path()).unwrap(), lock_before);
    }

    #[test]
    fn test_virtual_package_name_sanitized() {
        let pkg = Package::new_virtual(Path::new("/tmp/my-config dir"));
        assert_eq!(pkg.name(), "my_config_dir");
        assert_eq!(pkg.version(), "0.0.0");
        assert!(pkg.mod_file.deps.is_empty());
    }
}
