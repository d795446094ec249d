// src/archive.rs

//! Local package archive handling
//!
//! Packages can be stored as plain tarballs (`.tar`) or gzipped tarballs
//! (`.tgz` / `.tar.gz`). Extraction sanitizes entry paths: absolute paths
//! and `..` components are rejected rather than written outside the
//! destination.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};
use tar::Archive;
use tracing::debug;

/// Archive flavor, detected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    Tgz,
}

impl ArchiveKind {
    /// Detect the archive kind of `path`, or `None` for non-archives.
    pub fn from_path(path: &Path) -> Option<ArchiveKind> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
            Some(ArchiveKind::Tgz)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }
}

/// Extract `archive` into `dest`, creating it if needed.
pub fn extract(archive: &Path, kind: ArchiveKind, dest: &Path) -> Result<()> {
    debug!("extracting '{}' into '{}'", archive.display(), dest.display());
    std::fs::create_dir_all(dest)?;

    let file = File::open(archive)?;
    match kind {
        ArchiveKind::Tar => unpack_sanitized(Archive::new(file), dest),
        ArchiveKind::Tgz => unpack_sanitized(Archive::new(GzDecoder::new(file)), dest),
    }
}

fn unpack_sanitized<R: Read>(mut archive: Archive<R>, dest: &Path) -> Result<()> {
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        if !is_safe_entry_path(&path) {
            return Err(Error::UnsupportedSource(format!(
                "archive entry '{}' escapes the extraction root",
                path.display()
            )));
        }

        let target = dest.join(&path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }
    Ok(())
}

fn is_safe_entry_path(path: &Path) -> bool {
    path.components().all(|c| match c {
        Component::Normal(_) | Component::CurDir => true,
        Component::ParentDir | Component::RootDir | Component::Prefix(_) => false,
    })
}
