// src/source.rs

//! Source model: where a package's bytes come from
//!
//! A [`Source`] is a tagged description of package storage — a local
//! directory, a local archive, a git working tree, an OCI artifact, a
//! default-registry indirection, or the nil placeholder that manifest
//! normalization expands. Exactly one arm is inhabited per value.
//!
//! The URL grammar accepted by [`Source::from_url`]:
//!
//! ```text
//! oci://ghcr.io/kcl-lang/helloworld?tag=0.1.4&name=subhelloworld&version=0.0.1
//! git+https://github.com/kcl-lang/konfig?tag=v0.4.0
//! ../local/pkg          (directory)
//! ./pkg.tar  ./pkg.tgz  (archives, by extension)
//! ```

use crate::archive::ArchiveKind;
use crate::error::{Error, Result};
use crate::hash;
use crate::manifest::MOD_FILE;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Tagged description of package storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A filesystem directory containing a `kcl.mod`.
    Local(Local),
    /// An archive file that extracts to a `Local`.
    LocalArchive(LocalArchive),
    /// A filesystem directory without a `kcl.mod`; synthesized into a
    /// throwaway package at visit time.
    LocalVirtual(LocalVirtual),
    /// A remotely fetched package.
    Remote(Remote),
    /// Placeholder expanded during manifest normalization; never present
    /// in a resolved dep store.
    Nil(NilSource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArchive {
    pub path: PathBuf,
    pub kind: ArchiveKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVirtual {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remote {
    Git(GitSource),
    Oci(OciSource),
    Registry(RegistrySource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    pub url: String,
    pub reference: GitRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    Tag(String),
    Branch(String),
    Commit(String),
    Default,
}

impl GitRef {
    /// The ref value, or `None` for the remote's default branch.
    pub fn value(&self) -> Option<&str> {
        match self {
            GitRef::Tag(v) | GitRef::Branch(v) | GitRef::Commit(v) => Some(v),
            GitRef::Default => None,
        }
    }
}

/// A container-registry artifact. `pkg_name`/`pkg_version` select a
/// sub-package inside the artifact when the addressed module bundles more
/// than one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciSource {
    pub reg: String,
    pub repo: String,
    pub tag: String,
    pub pkg_name: Option<String>,
    pub pkg_version: Option<String>,
}

/// Default-registry indirection; resolves to an [`OciSource`] filled from
/// configured defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySource {
    pub name: String,
    pub version: String,
    pub oci: OciSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NilSource {
    pub spec: Option<PkgSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgSpec {
    pub name: String,
    pub version: String,
}

impl Source {
    /// Parse a source from its URL or path form.
    pub fn from_url(url: &str) -> Result<Source> {
        if let Some(rest) = url.strip_prefix("oci://") {
            return parse_oci(rest);
        }
        if let Some(rest) = url.strip_prefix("git+") {
            return parse_git(rest);
        }
        if (url.starts_with("https://") || url.starts_with("http://") || url.starts_with("ssh://"))
            && url.split('?').next().unwrap_or(url).ends_with(".git")
        {
            return parse_git(url);
        }

        let path = PathBuf::from(url);
        if let Some(kind) = ArchiveKind::from_path(&path) {
            Ok(Source::LocalArchive(LocalArchive { path, kind }))
        } else {
            Ok(Source::Local(Local { path }))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Source::Remote(_))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Source::Local(_) | Source::LocalVirtual(_))
    }

    pub fn is_local_tar(&self) -> bool {
        matches!(
            self,
            Source::LocalArchive(LocalArchive { kind: ArchiveKind::Tar, .. })
        )
    }

    pub fn is_local_tgz(&self) -> bool {
        matches!(
            self,
            Source::LocalArchive(LocalArchive { kind: ArchiveKind::Tgz, .. })
        )
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Source::Nil(_))
    }

    /// The local filesystem path for local arms, if any.
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Source::Local(l) => Some(&l.path),
            Source::LocalVirtual(v) => Some(&v.path),
            Source::LocalArchive(a) => Some(&a.path),
            _ => None,
        }
    }

    /// Ascend from a local path until a directory containing `kcl.mod` is
    /// found. Fails with `SourceRootNotFound` when the filesystem root is
    /// reached without one.
    pub fn find_root_path(&self) -> Result<PathBuf> {
        let start = self
            .local_path()
            .ok_or_else(|| Error::UnsupportedSource(self.to_string()))?;

        let mut current = if start.is_file() {
            start.parent().map(Path::to_path_buf)
        } else {
            Some(start.to_path_buf())
        };

        while let Some(dir) = current {
            if dir.join(MOD_FILE).exists() {
                return Ok(dir);
            }
            current = dir.parent().map(Path::to_path_buf);
        }

        Err(Error::SourceRootNotFound(start.to_path_buf()))
    }

    /// Stable identity string used as the cache fingerprint.
    ///
    /// Remote sources use `reg/repo:tag` or `url#ref`; local archives use
    /// absolute path plus mtime so a rebuilt archive invalidates its slot.
    /// Plain local directories are not cached and fingerprint as their path.
    pub fn fingerprint(&self) -> String {
        match self {
            Source::Local(l) => l.path.display().to_string(),
            Source::LocalVirtual(v) => v.path.display().to_string(),
            Source::LocalArchive(a) => {
                format!("{}@{}", a.path.display(), archive_mtime_secs(&a.path))
            }
            Source::Remote(Remote::Git(g)) => {
                format!("{}#{}", g.url, g.reference.value().unwrap_or("HEAD"))
            }
            Source::Remote(Remote::Oci(o)) => format!("{}/{}:{}", o.reg, o.repo, o.tag),
            Source::Remote(Remote::Registry(r)) => {
                format!("{}/{}:{}", r.oci.reg, r.oci.repo, r.oci.tag)
            }
            Source::Nil(_) => "nil".to_string(),
        }
    }

    /// On-disk directory name for this source under the cache root.
    ///
    /// Remote sources with a known `(name, version)` identity use the
    /// `<name>_<version>` convention shared with the vendor tree.
    pub fn cache_slot(&self) -> String {
        match self {
            Source::Remote(Remote::Oci(o)) => {
                let name = o.repo.rsplit('/').next().unwrap_or(&o.repo);
                sanitize_slot(&format!("{}_{}", name, o.tag))
            }
            Source::Remote(Remote::Registry(r)) => {
                sanitize_slot(&format!("{}_{}", r.name, r.version))
            }
            Source::Remote(Remote::Git(g)) => {
                let stem = g
                    .url
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or(&g.url)
                    .trim_end_matches(".git");
                sanitize_slot(&format!(
                    "{}_{}",
                    stem,
                    g.reference.value().unwrap_or("HEAD")
                ))
            }
            _ => {
                let stem = self
                    .local_path()
                    .and_then(|p| p.file_stem())
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "pkg".to_string());
                let digest = hash::sha256_hex(self.fingerprint().as_bytes());
                sanitize_slot(&format!("{}_{}", stem, &digest[..8]))
            }
        }
    }

    /// The `(name, version)` a caller asked for, when the source carries
    /// one (OCI sub-package selection, registry indirection, nil spec).
    pub fn pkg_spec(&self) -> Option<PkgSpec> {
        match self {
            Source::Remote(Remote::Oci(o)) => match (&o.pkg_name, &o.pkg_version) {
                (Some(name), Some(version)) => Some(PkgSpec {
                    name: name.clone(),
                    version: version.clone(),
                }),
                _ => None,
            },
            Source::Remote(Remote::Registry(r)) => Some(PkgSpec {
                name: r.name.clone(),
                version: r.version.clone(),
            }),
            Source::Nil(n) => n.spec.clone(),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(l) => write!(f, "{}", l.path.display()),
            Source::LocalVirtual(v) => write!(f, "{}", v.path.display()),
            Source::LocalArchive(a) => write!(f, "{}", a.path.display()),
            Source::Remote(Remote::Git(g)) => match &g.reference {
                GitRef::Tag(tag) => write!(f, "git+{}?tag={tag}", g.url),
                GitRef::Branch(branch) => write!(f, "git+{}?branch={branch}", g.url),
                GitRef::Commit(commit) => write!(f, "git+{}?commit={commit}", g.url),
                GitRef::Default => write!(f, "git+{}", g.url),
            },
            Source::Remote(Remote::Oci(o)) => {
                write!(f, "oci://{}/{}:{}", o.reg, o.repo, o.tag)
            }
            Source::Remote(Remote::Registry(r)) => {
                write!(f, "{}:{}", r.name, r.version)
            }
            Source::Nil(_) => write!(f, "<nil>"),
        }
    }
}

fn parse_oci(rest: &str) -> Result<Source> {
    let (path_part, query) = split_query(rest);
    if path_part.is_empty() {
        return Err(Error::UnsupportedSource(format!("oci://{rest}")));
    }

    let mut segments = path_part.splitn(2, '/');
    let reg = segments.next().unwrap_or_default().to_string();
    let repo = segments.next().unwrap_or_default().to_string();
    if repo.is_empty() {
        return Err(Error::UnsupportedSource(format!(
            "oci://{rest}: missing repository path"
        )));
    }

    let mut oci = OciSource {
        reg,
        repo,
        tag: String::new(),
        pkg_name: None,
        pkg_version: None,
    };
    for (key, value) in query {
        match key.as_str() {
            "tag" => oci.tag = value,
            "name" => oci.pkg_name = Some(value),
            "version" => oci.pkg_version = Some(value),
            _ => {}
        }
    }

    Ok(Source::Remote(Remote::Oci(oci)))
}

fn parse_git(rest: &str) -> Result<Source> {
    let (url, query) = split_query(rest);
    if url.is_empty() {
        return Err(Error::UnsupportedSource(format!("git+{rest}")));
    }

    let mut reference = GitRef::Default;
    for (key, value) in query {
        match key.as_str() {
            "tag" => reference = GitRef::Tag(value),
            "branch" => reference = GitRef::Branch(value),
            "commit" => reference = GitRef::Commit(value),
            _ => {}
        }
    }

    Ok(Source::Remote(Remote::Git(GitSource {
        url: url.to_string(),
        reference,
    })))
}

fn split_query(s: &str) -> (&str, Vec<(String, String)>) {
    match s.split_once('?') {
        Some((base, query)) => {
            let pairs = query
                .split('&')
                .filter_map(|kv| {
                    kv.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect();
            (base, pairs)
        }
        None => (s, Vec::new()),
    }
}

fn sanitize_slot(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn archive_mtime_secs(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
