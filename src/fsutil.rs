// src/fsutil.rs

//! Small filesystem helpers shared by the cache, vendor, and loader layers.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Advisory file lock, exclusive, released on drop.
///
/// Acquisition polls rather than blocking so contention can be bounded;
/// exceeding `timeout` reports `LockContention`.
pub struct AdvisoryLock {
    #[allow(dead_code)]
    file: fs::File,
}

impl AdvisoryLock {
    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(AdvisoryLock { file }),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockContention {
                            path: path.to_path_buf(),
                        });
                    }
                    std::thread::sleep(Self::POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Resolve `path` against the current directory and normalize `.` and
/// `..` components lexically, without touching the filesystem.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

/// True if `path` exists and is a directory.
pub fn dir_exists(path: &Path) -> bool {
    path.is_dir()
}

/// True if `path` is a directory with no entries (or cannot be read).
pub fn dir_is_empty(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// Recursively copy `src` into `dst`, creating `dst` if needed.
///
/// Symlinks are followed; the copy is a plain content snapshot.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Write `contents` to `path` atomically: stage into a temp file in the
/// same directory, then rename over the destination. Readers never observe
/// a partially written file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let tmp = NamedTempFile::new_in(dir)?;
    fs::write(tmp.path(), contents)?;
    tmp.persist(path)
        .map_err(|e| crate::error::Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_dir_recursive() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("a.k"), "a").unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/b.k"), "b").unwrap();

        let dst = TempDir::new().unwrap();
        let target = dst.path().join("copy");
        copy_dir(src.path(), &target).unwrap();

        assert_eq!(fs::read_to_string(target.join("a.k")).unwrap(), "a");
        assert_eq!(fs::read_to_string(target.join("sub/b.k")).unwrap(), "b");
    }

    #[test]
    fn test_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(dir_is_empty(dir.path()));

        fs::write(dir.path().join("f"), "x").unwrap();
        assert!(!dir_is_empty(dir.path()));
    }

    #[test]
    fn test_absolutize_normalizes() {
        let abs = absolutize(Path::new("/a/b/../c/./d")).unwrap();
        assert_eq!(abs, PathBuf::from("/a/c/d"));

        let rel = absolutize(Path::new("x/y")).unwrap();
        assert!(rel.is_absolute());
        assert!(rel.ends_with("x/y"));
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kcl.mod");

        write_atomic(&path, "first").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");

        write_atomic(&path, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }
}
