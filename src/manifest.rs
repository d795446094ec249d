// src/manifest.rs

//! `kcl.mod` manifest parsing and serialization
//!
//! The manifest is TOML keyed by `package`, `dependencies`, and `profile`.
//! Dependency entries come in four shapes:
//!
//! ```toml
//! [dependencies]
//! helloworld = "0.1.1"
//! konfig = { git = "https://github.com/kcl-lang/konfig", tag = "v0.4.0" }
//! oci_dep = { oci = "oci://ghcr.io/kcl-lang/helloworld", tag = "0.1.4" }
//! local_dep = { path = "../local" }
//! ```
//!
//! Key order is preserved through parse/serialize round trips: parsing
//! collects dependencies into an insertion-ordered store and serialization
//! walks it in the same order. An inline version string declares a
//! default-registry dependency and parses to the nil source, which the
//! loader expands against configured defaults.

use crate::deps::{full_name_of, DepStore, Dependency};
use crate::error::{Error, Result};
use crate::source::{GitRef, GitSource, NilSource, OciSource, PkgSpec, Remote, Source};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Manifest file name, fixed by the ecosystem.
pub const MOD_FILE: &str = "kcl.mod";

/// In-memory form of `kcl.mod`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModFile {
    pub pkg: PackageSection,
    pub deps: DepStore,
    pub profile: Option<Profile>,
}

/// The `[package]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition: Option<String>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The optional `[profile]` section, passed through untouched to the
/// evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_keys: Option<bool>,
}

#[derive(Deserialize)]
struct RawModFile {
    package: PackageSection,
    #[serde(default)]
    dependencies: IndexMap<String, DepSpec>,
    #[serde(default)]
    profile: Option<Profile>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DepSpec {
    Simple(String),
    Detailed(DetailedDep),
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetailedDep {
    #[serde(default)]
    git: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    commit: Option<String>,
    #[serde(default)]
    oci: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

impl ModFile {
    /// A fresh manifest with no dependencies.
    pub fn new(name: &str, version: &str) -> Self {
        ModFile {
            pkg: PackageSection {
                name: name.to_string(),
                edition: None,
                version: version.to_string(),
                description: None,
            },
            deps: DepStore::new(),
            profile: None,
        }
    }

    /// Load the manifest at `dir/kcl.mod`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MOD_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ManifestMissing { path: dir.to_path_buf() }
            } else {
                Error::Io(e)
            }
        })?;

        Self::parse(&content).map_err(|e| Error::ManifestMalformed {
            path,
            reason: e.to_string(),
        })
    }

    /// Parse manifest text.
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawModFile = toml::from_str(content)?;

        let mut deps = DepStore::new();
        for (name, spec) in raw.dependencies {
            deps.set(dep_from_spec(&name, spec)?);
        }

        Ok(ModFile {
            pkg: raw.package,
            deps,
            profile: raw.profile,
        })
    }

    /// Serialize back to manifest text. Dependency entries appear in store
    /// order; parsing the output yields a value equal to `self`.
    pub fn to_toml_string(&self) -> String {
        let mut out = String::new();
        out.push_str("[package]\n");
        let _ = writeln!(out, "name = {}", toml_str(&self.pkg.name));
        if let Some(edition) = &self.pkg.edition {
            let _ = writeln!(out, "edition = {}", toml_str(edition));
        }
        let _ = writeln!(out, "version = {}", toml_str(&self.pkg.version));
        if let Some(description) = &self.pkg.description {
            let _ = writeln!(out, "description = {}", toml_str(description));
        }

        if !self.deps.is_empty() {
            out.push_str("\n[dependencies]\n");
            for (name, dep) in self.deps.iter() {
                let _ = writeln!(out, "{} = {}", toml_key(name), dep_spec_string(dep));
            }
        }

        if let Some(profile) = &self.profile {
            out.push_str("\n[profile]\n");
            if let Some(entries) = &profile.entries {
                let items: Vec<String> = entries.iter().map(|e| toml_str(e)).collect();
                let _ = writeln!(out, "entries = [{}]", items.join(", "));
            }
            if let Some(sort_keys) = profile.sort_keys {
                let _ = writeln!(out, "sort_keys = {sort_keys}");
            }
        }

        out
    }
}

fn dep_from_spec(name: &str, spec: DepSpec) -> Result<Dependency> {
    match spec {
        DepSpec::Simple(version) => {
            let mut dep = Dependency::new(
                name,
                &version,
                Source::Nil(NilSource {
                    spec: Some(PkgSpec {
                        name: name.to_string(),
                        version: version.clone(),
                    }),
                }),
            );
            dep.full_name = full_name_of(name, &version);
            Ok(dep)
        }
        DepSpec::Detailed(d) => dep_from_detailed(name, d),
    }
}

fn dep_from_detailed(name: &str, d: DetailedDep) -> Result<Dependency> {
    let inhabited = [d.git.is_some(), d.oci.is_some(), d.path.is_some()]
        .iter()
        .filter(|present| **present)
        .count();
    if inhabited != 1 {
        return Err(Error::UnsupportedSource(format!(
            "dependency '{name}' must declare exactly one of git, oci, or path"
        )));
    }

    if let Some(url) = d.git {
        let reference = if let Some(tag) = &d.tag {
            GitRef::Tag(tag.clone())
        } else if let Some(branch) = &d.branch {
            GitRef::Branch(branch.clone())
        } else if let Some(commit) = &d.commit {
            GitRef::Commit(commit.clone())
        } else {
            GitRef::Default
        };

        let version = d.version.or(d.tag).unwrap_or_default();
        return Ok(Dependency::new(
            name,
            &version,
            Source::Remote(Remote::Git(GitSource { url, reference })),
        ));
    }

    if let Some(url) = d.oci {
        let source = Source::from_url(&url)?;
        let mut oci = match source {
            Source::Remote(Remote::Oci(oci)) => oci,
            _ => {
                return Err(Error::UnsupportedSource(format!(
                    "dependency '{name}': '{url}' is not an oci:// url"
                )))
            }
        };
        if let Some(tag) = d.tag {
            oci.tag = tag;
        }
        // An explicit version selects a sub-package of the artifact.
        if let Some(version) = &d.version {
            oci.pkg_name = Some(name.to_string());
            oci.pkg_version = Some(version.clone());
        }

        let version = d.version.unwrap_or_else(|| oci.tag.clone());
        return Ok(Dependency::new(
            name,
            &version,
            Source::Remote(Remote::Oci(oci)),
        ));
    }

    let path = d.path.unwrap_or_default();
    let version = d.version.unwrap_or_default();
    Ok(Dependency::new(
        name,
        &version,
        Source::Local(crate::source::Local {
            path: PathBuf::from(path),
        }),
    ))
}

fn dep_spec_string(dep: &Dependency) -> String {
    match &dep.source {
        Source::Nil(_) | Source::Remote(Remote::Registry(_)) => toml_str(&dep.version),
        Source::Remote(Remote::Git(g)) => {
            let mut out = format!("{{ git = {}", toml_str(&g.url));
            match &g.reference {
                GitRef::Tag(tag) => {
                    let _ = write!(out, ", tag = {}", toml_str(tag));
                }
                GitRef::Branch(branch) => {
                    let _ = write!(out, ", branch = {}", toml_str(branch));
                }
                GitRef::Commit(commit) => {
                    let _ = write!(out, ", commit = {}", toml_str(commit));
                }
                GitRef::Default => {}
            }
            // Tags double as the version; anything else is spelled out.
            if !dep.version.is_empty() && Some(dep.version.as_str()) != g.reference.value() {
                let _ = write!(out, ", version = {}", toml_str(&dep.version));
            }
            out.push_str(" }");
            out
        }
        Source::Remote(Remote::Oci(o)) => {
            let mut out = format!(
                "{{ oci = {}",
                toml_str(&format!("oci://{}/{}", o.reg, o.repo))
            );
            if !o.tag.is_empty() {
                let _ = write!(out, ", tag = {}", toml_str(&o.tag));
            }
            if let Some(version) = &o.pkg_version {
                let _ = write!(out, ", version = {}", toml_str(version));
            }
            out.push_str(" }");
            out
        }
        Source::Local(l) => {
            let mut out = format!(
                "{{ path = {}",
                toml_str(&l.path.to_string_lossy())
            );
            if !dep.version.is_empty() {
                let _ = write!(out, ", version = {}", toml_str(&dep.version));
            }
            out.push_str(" }");
            out
        }
        Source::LocalVirtual(v) => format!("{{ path = {} }}", toml_str(&v.path.to_string_lossy())),
        Source::LocalArchive(a) => format!("{{ path = {} }}", toml_str(&a.path.to_string_lossy())),
    }
}

fn toml_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn toml_key(s: &str) -> String {
    let bare = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare {
        s.to_string()
    } else {
        toml_str(s)
    }
}
