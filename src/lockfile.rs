// src/lockfile.rs

//! `kcl.mod.lock` parsing and serialization
//!
//! The lockfile captures the exact resolved state of the dependency graph:
//! one `[[dependencies]]` table per resolved dependency, in dep-store
//! insertion order, carrying the content hash (`sum`) that makes builds
//! reproducible.
//!
//! # Format
//!
//! ```toml
//! [[dependencies]]
//! name = "helloworld"
//! full_name = "helloworld_0.1.2"
//! version = "0.1.2"
//! sum = "f9q0…="
//! reg = "ghcr.io"
//! repo = "kcl-lang/helloworld"
//! oci_tag = "0.1.2"
//! ```
//!
//! A missing lockfile is not an error; it parses as empty and is
//! synthesized from the manifest during load.

use crate::deps::{DepStore, Dependency};
use crate::error::Result;
use crate::source::{GitRef, GitSource, Local, OciSource, Remote, Source};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Lockfile name, fixed by the ecosystem.
pub const MOD_LOCK_FILE: &str = "kcl.mod.lock";

/// In-memory form of `kcl.mod.lock`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockFile {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<LockedDep>,
}

/// One resolved dependency as recorded on disk. Source identity is
/// flattened into optional fields: `reg`/`repo`/`oci_tag` for registry
/// artifacts, `url`/`commit` for git trees, `path` for local packages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockedDep {
    pub name: String,
    pub full_name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oci_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl LockFile {
    /// Load `dir/kcl.mod.lock`; a missing file yields the empty lock.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MOD_LOCK_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LockFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Convert into the ordered dependency store used by the pipeline.
    pub fn into_store(self) -> DepStore {
        let mut store = DepStore::new();
        for locked in self.dependencies {
            store.set(locked.into_dependency());
        }
        store
    }

    /// Snapshot a dependency store into lockfile form, in store order.
    pub fn from_store(store: &DepStore) -> Self {
        LockFile {
            dependencies: store.values().map(LockedDep::from_dependency).collect(),
        }
    }
}

impl LockedDep {
    pub fn from_dependency(dep: &Dependency) -> Self {
        let mut locked = LockedDep {
            name: dep.name.clone(),
            full_name: dep.full_name.clone(),
            version: dep.version.clone(),
            sum: dep.sum.clone(),
            ..LockedDep::default()
        };

        match &dep.source {
            Source::Remote(Remote::Oci(o)) => {
                locked.reg = Some(o.reg.clone());
                locked.repo = Some(o.repo.clone());
                locked.oci_tag = Some(o.tag.clone());
            }
            Source::Remote(Remote::Registry(r)) => {
                locked.reg = Some(r.oci.reg.clone());
                locked.repo = Some(r.oci.repo.clone());
                locked.oci_tag = Some(r.oci.tag.clone());
            }
            Source::Remote(Remote::Git(g)) => {
                locked.url = Some(g.url.clone());
                locked.commit = g.reference.value().map(str::to_string);
            }
            Source::Local(l) => {
                locked.path = Some(l.path.to_string_lossy().into_owned());
            }
            Source::LocalVirtual(v) => {
                locked.path = Some(v.path.to_string_lossy().into_owned());
            }
            Source::LocalArchive(a) => {
                locked.path = Some(a.path.to_string_lossy().into_owned());
            }
            Source::Nil(_) => {}
        }

        locked
    }

    pub fn into_dependency(self) -> Dependency {
        let source = if let (Some(reg), Some(repo)) = (&self.reg, &self.repo) {
            Source::Remote(Remote::Oci(OciSource {
                reg: reg.clone(),
                repo: repo.clone(),
                tag: self.oci_tag.clone().unwrap_or_default(),
                pkg_name: None,
                pkg_version: None,
            }))
        } else if let Some(url) = &self.url {
            Source::Remote(Remote::Git(GitSource {
                url: url.clone(),
                reference: match &self.commit {
                    Some(value) => GitRef::Commit(value.clone()),
                    None => GitRef::Default,
                },
            }))
        } else if let Some(path) = &self.path {
            Source::Local(Local {
                path: PathBuf::from(path),
            })
        } else {
            Source::Nil(crate::source::NilSource { spec: None })
        };

        let local_full_path = self
            .path
            .as_ref()
            .map(PathBuf::from)
            .filter(|p| p.is_absolute());

        Dependency {
            name: self.name,
            full_name: self.full_name,
            version: self.version,
            sum: self.sum,
            local_full_path,
            source,
        }
    }
}
