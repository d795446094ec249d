// src/client/update.rs

//! The update pipeline: bring the lockfile to a fixed point of the
//! manifest's requirements
//!
//! Update reconciles lock entries with the manifest (on a source
//! conflict at equal version the manifest wins), materializes every
//! declared dependency through the visitor layer, folds transitive
//! requirements into the lock under MVS, and persists both files with
//! staged writes. A visited set keyed by `(name, version)` breaks cycles,
//! so cyclic graphs are accepted and terminate with every competing name
//! at its greatest requested version.

use super::Client;
use crate::deps::{full_name_of, DepStore, Dependency, Merge};
use crate::download;
use crate::error::{Error, Result};
use crate::fsutil::{self, AdvisoryLock};
use crate::pkg::Package;
use crate::source::{Local, Remote, Source};
use semver::Version;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Advisory lock file guarding the root package during update.
const ROOT_LOCK_NAME: &str = ".kpkg.lock";

const ROOT_LOCK_TIMEOUT: Duration = Duration::from_secs(120);

impl Client {
    /// Resolve `pkg`'s dependency graph into its lock store and rewrite
    /// `kcl.mod` / `kcl.mod.lock`. Idempotent after the first successful
    /// run: re-running produces byte-identical files.
    pub fn update(&self, pkg: &mut Package) -> Result<()> {
        let _lock = AdvisoryLock::acquire(
            &pkg.home_path.join(ROOT_LOCK_NAME),
            ROOT_LOCK_TIMEOUT,
        )?;

        self.reconcile_lock_with_manifest(pkg);

        let roots: Vec<Dependency> = pkg.mod_file.deps.values().cloned().collect();
        let home = pkg.home_path.clone();
        let no_sum_check = pkg.no_sum_check;

        let mut lock = std::mem::take(&mut pkg.lock_deps);
        let mut visited = HashSet::new();
        let result = roots.into_iter().try_for_each(|dep| {
            self.resolve_recursive(&home, dep, &mut lock, &mut visited, no_sum_check)
        });
        pkg.lock_deps = lock;
        result?;

        pkg.update_mod_and_lock()
    }

    /// Seed lock entries for new manifest names and re-seed entries whose
    /// source origin disagrees with the manifest.
    fn reconcile_lock_with_manifest(&self, pkg: &mut Package) {
        for (name, mod_dep) in pkg.mod_file.deps.iter() {
            let replace = match pkg.lock_deps.get(name) {
                None => true,
                Some(locked) => !same_origin(&locked.source, &mod_dep.source),
            };
            if replace {
                debug!("seeding lock entry for '{name}' from the manifest");
                let mut seeded = mod_dep.clone();
                seeded.sum = String::new();
                pkg.lock_deps.set(seeded);
            }
        }
    }

    fn resolve_recursive(
        &self,
        owner_home: &Path,
        dep: Dependency,
        lock: &mut DepStore,
        visited: &mut HashSet<(String, String)>,
        no_sum_check: bool,
    ) -> Result<()> {
        if dep.source.is_nil() {
            // Nil sources are expanded at load/add time; one surviving to
            // resolution is a programming error.
            return Err(Error::UnsupportedSource(format!(
                "dependency '{}' has an unexpanded nil source",
                dep.name
            )));
        }

        let mut dep = dep;
        self.pin_registry_version(&mut dep);

        // A pinned requirement already resolved at this exact version
        // only needs its requirement propagated; this is what breaks
        // cycles. Unpinned requirements must still be loaded, since the
        // version behind them is only known after the visit.
        if !dep.version.is_empty()
            && visited.contains(&(dep.name.clone(), dep.version.clone()))
        {
            lock.merge_mvs(dep)?;
            return Ok(());
        }

        let lookup = absolutized_source(&dep, owner_home)?;
        let visitor = self.visitor_for(&lookup)?;

        let mut outcome: Option<(Dependency, Package)> = None;
        visitor.visit(&lookup, &mut |dep_pkg| {
            let mut resolved =
                Dependency::new(dep_pkg.name(), dep_pkg.version(), dep.source.clone());
            resolved.local_full_path = Some(dep_pkg.home_path.clone());
            if !no_sum_check {
                resolved.sum = self.acquire_dep_sum(&resolved)?;
            }
            outcome = Some((resolved, dep_pkg.clone()));
            Ok(())
        })?;
        let (resolved, dep_pkg) = outcome.ok_or_else(|| {
            Error::UnsupportedSource(format!("'{}' yielded no package", dep.source))
        })?;

        // A fetched tree must keep hashing to what the lock recorded.
        if !no_sum_check && !resolved.is_from_local() {
            if let Some(previous) = lock.get(&resolved.name) {
                if previous.version == resolved.version
                    && !previous.sum.is_empty()
                    && previous.sum != resolved.sum
                {
                    return Err(Error::ChecksumMismatch {
                        name: resolved.name.clone(),
                        expected: previous.sum.clone(),
                        actual: resolved.sum.clone(),
                    });
                }
            }
        }

        let first_visit = visited.insert((resolved.name.clone(), resolved.version.clone()));

        // On a tie the incumbent survives; a seeded entry that never went
        // through resolution still needs its sum and path filled in.
        if lock.merge_mvs(resolved.clone())? == Merge::KeptExisting {
            if let Some(existing) = lock.get_mut(&resolved.name) {
                if existing.version == resolved.version {
                    if existing.sum.is_empty() {
                        existing.sum = resolved.sum.clone();
                    }
                    if existing.local_full_path.is_none() {
                        existing.local_full_path = resolved.local_full_path.clone();
                    }
                }
            }
        }
        if !first_visit {
            return Ok(());
        }

        for child in dep_pkg.mod_file.deps.values().cloned().collect::<Vec<_>>() {
            self.resolve_recursive(&dep_pkg.home_path, child, lock, visited, no_sum_check)?;
        }
        Ok(())
    }

    /// For default-registry dependencies, ask the registry for the newest
    /// published version satisfying the declared minimum. Offline (or on
    /// any listing failure) the declared version stands.
    fn pin_registry_version(&self, dep: &mut Dependency) {
        let registry = match &mut dep.source {
            Source::Remote(Remote::Registry(r)) => r,
            _ => return,
        };

        match download::list_tags(self.downloader(), &registry.oci, self.deadline()) {
            Ok(tags) => {
                let declared = Version::parse(dep.version.trim_start_matches('v')).ok();
                let newest = tags
                    .iter()
                    .filter_map(|tag| Version::parse(tag).ok().map(|v| (v, tag)))
                    .filter(|(v, _)| declared.as_ref().map_or(true, |min| v >= min))
                    .max_by(|a, b| a.0.cmp(&b.0));

                if let Some((_, tag)) = newest {
                    if *tag != dep.version {
                        debug!("pinning '{}' to newest published {tag}", dep.name);
                    }
                    registry.version = tag.clone();
                    registry.oci.tag = tag.clone();
                    dep.version = tag.clone();
                    dep.full_name = full_name_of(&dep.name, tag);
                }
            }
            Err(e) => {
                warn!(
                    "could not list versions for '{}' ({e}); keeping {}",
                    dep.name, dep.version
                );
            }
        }
    }
}

/// Compare source identity ignoring the version component, so a lock
/// entry legitimately raised by MVS does not read as a conflict.
pub(crate) fn same_origin(a: &Source, b: &Source) -> bool {
    match (origin_of(a), origin_of(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn origin_of(source: &Source) -> Option<(u8, String)> {
    match source {
        Source::Remote(Remote::Oci(o)) => Some((0, format!("{}/{}", o.reg, o.repo))),
        Source::Remote(Remote::Registry(r)) => {
            Some((0, format!("{}/{}", r.oci.reg, r.oci.repo)))
        }
        Source::Remote(Remote::Git(g)) => Some((1, g.url.clone())),
        Source::Local(l) => Some((2, l.path.to_string_lossy().into_owned())),
        Source::LocalVirtual(v) => Some((2, v.path.to_string_lossy().into_owned())),
        Source::LocalArchive(a) => Some((2, a.path.to_string_lossy().into_owned())),
        Source::Nil(_) => None,
    }
}

/// Local sources declared with relative paths are looked up relative to
/// the package that declared them.
pub(crate) fn absolutized_source(dep: &Dependency, owner_home: &Path) -> Result<Source> {
    match &dep.source {
        Source::Local(l) if !l.path.is_absolute() => {
            let path = match &dep.local_full_path {
                Some(full) => full.clone(),
                None => fsutil::absolutize(&owner_home.join(&l.path))?,
            };
            Ok(Source::Local(Local { path }))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{GitRef, GitSource, NilSource, OciSource};
    use std::path::PathBuf;

    fn oci(reg: &str, repo: &str, tag: &str) -> Source {
        Source::Remote(Remote::Oci(OciSource {
            reg: reg.to_string(),
            repo: repo.to_string(),
            tag: tag.to_string(),
            pkg_name: None,
            pkg_version: None,
        }))
    }

    #[test]
    fn test_same_origin_ignores_version() {
        let a = oci("ghcr.io", "kcl-lang/helloworld", "0.1.1");
        let b = oci("ghcr.io", "kcl-lang/helloworld", "0.1.2");
        assert!(same_origin(&a, &b));

        let c = oci("ghcr.io", "kcl-lang/other", "0.1.1");
        assert!(!same_origin(&a, &c));
    }

    #[test]
    fn test_same_origin_across_kinds() {
        let oci_source = oci("ghcr.io", "kcl-lang/helloworld", "0.1.1");
        let git = Source::Remote(Remote::Git(GitSource {
            url: "https://github.com/kcl-lang/helloworld".to_string(),
            reference: GitRef::Default,
        }));
        assert!(!same_origin(&oci_source, &git));

        let nil = Source::Nil(NilSource { spec: None });
        assert!(!same_origin(&nil, &nil));
    }

    #[test]
    fn test_absolutized_source_for_relative_local() {
        let dep = Dependency::new(
            "dep",
            "0.0.1",
            Source::Local(Local {
                path: PathBuf::from("../sibling"),
            }),
        );
        let lookup = absolutized_source(&dep, Path::new("/work/pkg")).unwrap();
        match lookup {
            Source::Local(l) => assert_eq!(l.path, PathBuf::from("/work/sibling")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
