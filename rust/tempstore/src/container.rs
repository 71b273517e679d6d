//! Preparation and ownership of the store's working directory.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The prepared working directory that all temp content lives in.
///
/// [`prepare`](TempContainer::prepare) owns leftover recovery: content that a
/// previous run failed to clean up is removed the next time the directory is
/// prepared. The directory itself is never deleted by this component.
#[derive(Debug)]
pub struct TempContainer {
    path: PathBuf,
}

impl TempContainer {
    /// Prepares `path` as the working directory.
    ///
    /// If the directory already exists, all of its direct and nested contents
    /// are deleted and the empty directory is left in place. Every entry is
    /// attempted even after a failure, and the first error is reported once
    /// the pass is complete, so one stubborn entry does not shield the rest
    /// from removal.
    ///
    /// If the directory does not exist, it is created non-recursively; the
    /// parent (the platform temp root in the default configuration) is
    /// expected to exist.
    ///
    /// Any failure is fatal: the error carries
    /// [`ErrorKind::Initialization`](crate::error::ErrorKind::Initialization)
    /// and the store must not be used.
    pub fn prepare(path: impl Into<PathBuf>) -> Result<TempContainer> {
        let path = path.into();
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                purge_dir(&path).map_err(|e| Error::initialization(&path, e))?;
            }
            Ok(_) => {
                return Err(Error::initialization(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::NotADirectory,
                        "working directory path exists but is not a directory",
                    ),
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::create_dir(&path).map_err(|e| Error::initialization(&path, e))?;
                log::debug!("created temp working directory {}", path.display());
            }
            Err(e) => return Err(Error::initialization(&path, e)),
        }
        Ok(TempContainer { path })
    }

    /// Returns the path of the working directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Removes every entry of `dir`, attempting all of them before reporting the
/// first failure.
fn purge_dir(dir: &Path) -> std::io::Result<()> {
    let mut first_err = None;
    let mut removed = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let res = entry.and_then(|entry| {
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(entry.path())
            } else {
                std::fs::remove_file(entry.path())
            }
        });
        match res {
            Ok(()) => removed += 1,
            Err(e) => {
                log::warn!("failed to remove stale entry in {}: {e}", dir.display());
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    if removed != 0 {
        log::debug!("purged {removed} stale entries from {}", dir.display());
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_prepare_creates_missing_directory() {
        let parent = tempfile::tempdir().expect("tempdir");
        let root = parent.path().join("work");
        assert!(!root.exists());

        let container = TempContainer::prepare(&root).expect("prepare");
        assert!(root.is_dir());
        assert_eq!(container.path(), root);
    }

    #[test]
    fn test_prepare_accepts_existing_empty_directory() {
        let parent = tempfile::tempdir().expect("tempdir");
        let root = parent.path().join("work");
        std::fs::create_dir(&root).expect("create");

        TempContainer::prepare(&root).expect("prepare");
        assert!(root.is_dir());
    }

    #[test]
    fn test_prepare_purges_leftover_content() {
        let parent = tempfile::tempdir().expect("tempdir");
        let root = parent.path().join("work");
        std::fs::create_dir(&root).expect("create");

        std::fs::write(root.join("stale.tmp"), b"old").expect("write");
        std::fs::create_dir_all(root.join("nested/deeper")).expect("nested");
        std::fs::write(root.join("nested/deeper/leftover"), b"old").expect("write");

        TempContainer::prepare(&root).expect("prepare");

        assert!(root.is_dir());
        assert_eq!(std::fs::read_dir(&root).expect("read_dir").count(), 0);
    }

    #[test]
    fn test_prepare_twice_is_harmless() {
        let parent = tempfile::tempdir().expect("tempdir");
        let root = parent.path().join("work");

        TempContainer::prepare(&root).expect("first prepare");
        std::fs::write(root.join("between-runs"), b"x").expect("write");
        TempContainer::prepare(&root).expect("second prepare");

        assert_eq!(std::fs::read_dir(&root).expect("read_dir").count(), 0);
    }

    #[test]
    fn test_prepare_rejects_file_path() {
        let parent = tempfile::tempdir().expect("tempdir");
        let root = parent.path().join("work");
        std::fs::write(&root, b"not a dir").expect("write");

        let err = TempContainer::prepare(&root).expect_err("must fail");
        assert!(matches!(err.kind(), ErrorKind::Initialization { .. }));
    }

    #[test]
    fn test_prepare_rejects_missing_parent() {
        let parent = tempfile::tempdir().expect("tempdir");
        let root = parent.path().join("no-such-parent/work");

        let err = TempContainer::prepare(&root).expect_err("must fail");
        assert!(matches!(err.kind(), ErrorKind::Initialization { .. }));
    }
}
