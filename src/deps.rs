// src/deps.rs

//! Dependency records and the ordered dependency store
//!
//! The store maps a unique dependency name to its resolved record,
//! preserving insertion order so manifest and lockfile serialization is
//! deterministic. Conflicts between candidates for the same name are
//! settled by minimum-version-selection: keep the semver-greater version,
//! ties going to the incumbent.

use crate::error::{Error, Result};
use crate::source::Source;
use indexmap::IndexMap;
use semver::Version;
use std::path::PathBuf;

/// On-disk directory name of a `(name, version)` pair, shared by the
/// cache and the vendor tree.
pub fn full_name_of(name: &str, version: &str) -> String {
    format!("{name}_{version}")
}

/// A resolved (or declared) dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub full_name: String,
    /// Semver-ordered version string. Empty means "not yet pinned".
    pub version: String,
    /// Canonical directory hash of the materialized tree; empty means
    /// unchecked.
    pub sum: String,
    /// Absolute path to the extracted content, once materialized.
    pub local_full_path: Option<PathBuf>,
    pub source: Source,
}

impl Dependency {
    pub fn new(name: &str, version: &str, source: Source) -> Self {
        Dependency {
            name: name.to_string(),
            full_name: full_name_of(name, version),
            version: version.to_string(),
            sum: String::new(),
            local_full_path: None,
            source,
        }
    }

    /// True when the content lives on the local filesystem rather than in
    /// a fetched cache slot.
    pub fn is_from_local(&self) -> bool {
        self.source.is_local()
    }

    pub fn parsed_version(&self) -> Result<Version> {
        parse_version(&self.version)
    }
}

fn parse_version(version: &str) -> Result<Version> {
    Version::parse(version.trim_start_matches('v')).map_err(|e| Error::InvalidVersion {
        version: version.to_string(),
        reason: e.to_string(),
    })
}

/// Outcome of an MVS merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Inserted,
    Replaced,
    KeptExisting,
}

/// Ordered `name -> Dependency` mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepStore {
    deps: IndexMap<String, Dependency>,
}

impl DepStore {
    pub fn new() -> Self {
        DepStore::default()
    }

    pub fn get(&self, name: &str) -> Option<&Dependency> {
        self.deps.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Dependency> {
        self.deps.get_mut(name)
    }

    /// Insert or overwrite, preserving the position of an existing entry.
    pub fn set(&mut self, dep: Dependency) {
        self.deps.insert(dep.name.clone(), dep);
    }

    pub fn remove(&mut self, name: &str) -> Option<Dependency> {
        self.deps.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.deps.contains_key(name)
    }

    pub fn keys(&self) -> Vec<String> {
        self.deps.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Dependency)> {
        self.deps.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Dependency> {
        self.deps.values()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Merge `candidate` under minimum-version-selection: insert when the
    /// name is new, otherwise keep whichever version is semver-greater.
    /// A tie keeps the incumbent.
    pub fn merge_mvs(&mut self, candidate: Dependency) -> Result<Merge> {
        let existing = match self.deps.get(&candidate.name) {
            Some(dep) => dep,
            None => {
                self.deps.insert(candidate.name.clone(), candidate);
                return Ok(Merge::Inserted);
            }
        };

        // An unpinned side always loses to a pinned one.
        let replace = if existing.version.is_empty() {
            !candidate.version.is_empty()
        } else if candidate.version.is_empty() {
            false
        } else {
            parse_version(&candidate.version)? > parse_version(&existing.version)?
        };

        if replace {
            self.deps.insert(candidate.name.clone(), candidate);
            Ok(Merge::Replaced)
        } else {
            Ok(Merge::KeptExisting)
        }
    }
}

impl<'a> IntoIterator for &'a DepStore {
    type Item = (&'a String, &'a Dependency);
    type IntoIter = indexmap::map::Iter<'a, String, Dependency>;

    fn into_iter(self) -> Self::IntoIter {
        self.deps.iter()
    }
}
