// src/client/vendor.rs

//! The vendor materializer: a flat, de-duplicated snapshot of the
//! resolved graph under `<pkg>/vendor`
//!
//! Vendoring runs in two passes. The first walks the dependency graph
//! (reusing already-vendored trees where they exist) and folds every
//! requirement into one ordered store under MVS, so of two competing
//! versions only the greater is selected. The second pass materializes
//! each selected dependency into `vendor/<full_name>`, copying from the
//! cache slot of the same name or, for dependencies that never pass
//! through the cache, from their own local tree. Stale entries from
//! earlier runs are left in place; re-running over a materialized tree
//! only rebuilds the in-memory store.

use super::update::absolutized_source;
use super::Client;
use crate::deps::{DepStore, Dependency};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::pkg::Package;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

impl Client {
    /// Vendor all dependencies of `pkg` and point its resolved store at
    /// the vendored trees.
    pub fn vendor_deps(&self, pkg: &mut Package) -> Result<()> {
        let vendor_path = pkg.vendor_path();
        fs::create_dir_all(&vendor_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&vendor_path, fs::Permissions::from_mode(0o755))?;
        }

        let mut vendored = DepStore::new();
        let mut visited = HashSet::new();
        self.collect_vendor_closure(pkg, &pkg.home_path, &mut vendored, &mut visited)?;

        for name in vendored.keys() {
            let dep = match vendored.get(&name) {
                Some(dep) => dep.clone(),
                None => continue,
            };

            let vendor_full = vendor_path.join(&dep.full_name);
            if !fsutil::dir_exists(&vendor_full) {
                let cache_full = self.settings().home_path.join(&dep.full_name);
                let copy_src = if fsutil::dir_exists(&cache_full) {
                    cache_full
                } else {
                    dep.local_full_path
                        .clone()
                        .filter(|p| fsutil::dir_exists(p))
                        .ok_or_else(|| Error::VendorMaterializationFailed(name.clone()))?
                };
                info!(
                    "vendoring '{}' from '{}'",
                    dep.full_name,
                    copy_src.display()
                );
                fsutil::copy_dir(&copy_src, &vendor_full)?;
                rewrite_local_paths(&vendor_full, &vendored)?;
            }

            let found = self
                .dependency_exists_local(&pkg.home_path, &dep, true)?
                .ok_or_else(|| Error::VendorMaterializationFailed(name.clone()))?;
            vendored.set(found);
        }

        pkg.lock_deps = vendored;
        Ok(())
    }

    /// Fold the transitive closure of `owner`'s declared dependencies
    /// into `vendored` under MVS, without copying anything yet. A shared
    /// visited set breaks dependency cycles.
    fn collect_vendor_closure(
        &self,
        owner: &Package,
        root_home: &Path,
        vendored: &mut DepStore,
        visited: &mut HashSet<(String, String)>,
    ) -> Result<()> {
        for declared in owner.mod_file.deps.values().cloned().collect::<Vec<_>>() {
            if declared.source.is_nil() {
                return Err(Error::UnsupportedSource(format!(
                    "dependency '{}' has an unexpanded nil source",
                    declared.name
                )));
            }

            // A pinned requirement already folded in at this exact
            // version only needs its requirement propagated (this breaks
            // cycles); unpinned ones must still be loaded to learn the
            // version behind them.
            if !declared.version.is_empty()
                && visited.contains(&(declared.name.clone(), declared.version.clone()))
            {
                vendored.merge_mvs(declared)?;
                continue;
            }

            // Reuse a tree vendored by an earlier run (or iteration).
            if let Some(mut existing) = self.dependency_exists_local(root_home, &declared, true)? {
                let home = existing
                    .local_full_path
                    .clone()
                    .ok_or_else(|| Error::VendorMaterializationFailed(existing.name.clone()))?;
                let dpkg = self.load(&home)?;

                // The found tree is authoritative for identity; unpinned
                // declarations learn their version from it.
                existing.name = dpkg.name().to_string();
                existing.version = dpkg.version().to_string();
                existing.full_name = dpkg.full_name();
                if existing.sum.is_empty() {
                    existing.sum = self.acquire_dep_sum(&existing)?;
                }
                debug!("'{}' already materialized", existing.full_name);

                let first_visit =
                    visited.insert((existing.name.clone(), existing.version.clone()));
                vendored.merge_mvs(existing)?;
                if first_visit {
                    self.collect_vendor_closure(&dpkg, root_home, vendored, visited)?;
                }
                continue;
            }

            let lookup = absolutized_source(&declared, &owner.home_path)?;
            let visitor = self.visitor_for(&lookup)?;

            let mut outcome: Option<(Dependency, Package)> = None;
            visitor.visit(&lookup, &mut |dep_pkg| {
                let mut resolved =
                    Dependency::new(dep_pkg.name(), dep_pkg.version(), declared.source.clone());
                resolved.local_full_path = Some(dep_pkg.home_path.clone());
                resolved.sum = self.acquire_dep_sum(&resolved)?;
                outcome = Some((resolved, dep_pkg.clone()));
                Ok(())
            })?;
            let (resolved, dep_pkg) = outcome.ok_or_else(|| {
                Error::UnsupportedSource(format!("'{}' yielded no package", declared.source))
            })?;

            let first_visit =
                visited.insert((resolved.name.clone(), resolved.version.clone()));
            vendored.merge_mvs(resolved)?;
            if first_visit {
                self.collect_vendor_closure(&dep_pkg, root_home, vendored, visited)?;
            }
        }
        Ok(())
    }
}

/// Point a vendored copy's local-path dependencies at their vendored
/// siblings, so the tree is self-contained. A from-local dependency's
/// sum is exempt from verification, which is what tolerates this edit.
fn rewrite_local_paths(vendor_full: &Path, vendored: &DepStore) -> Result<()> {
    let mut mod_file = match crate::manifest::ModFile::load(vendor_full) {
        Ok(mod_file) => mod_file,
        // Virtual trees carry no manifest; nothing to rewrite.
        Err(Error::ManifestMissing { .. }) => return Ok(()),
        Err(e) => return Err(e),
    };

    let mut changed = false;
    for name in mod_file.deps.keys() {
        let selected_full_name = match vendored.get(&name) {
            Some(selected) => selected.full_name.clone(),
            None => continue,
        };
        if let Some(dep) = mod_file.deps.get_mut(&name) {
            if let crate::source::Source::Local(local) = &mut dep.source {
                let rewritten = Path::new("..").join(&selected_full_name);
                if local.path != rewritten {
                    local.path = rewritten;
                    changed = true;
                }
            }
        }
    }

    if changed {
        fsutil::write_atomic(
            &vendor_full.join(crate::manifest::MOD_FILE),
            &mod_file.to_toml_string(),
        )?;
    }
    Ok(())
}
