//! File-based run lock so two runs never crawl or generate at once.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::warn;

use crate::error::{Error, Result};

/// Exclusive lock guard; released and removed on drop.
pub struct RunLock {
    path: PathBuf,
    lock_file: Option<File>,
}

impl RunLock {
    /// Acquire an exclusive lock on `path`, failing fast if it is held.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::LockError(format!("Failed to open lock file: {}", e)))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                lock_file: Some(lock_file),
            }),
            Err(_) => {
                warn!(
                    lock = %path.display(),
                    "Another run holds the lock; wait for it to finish and retry"
                );
                Err(Error::RunLocked)
            }
        }
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(file) = self.lock_file.take() {
            let _ = file.unlock();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_file_is_removed_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.lock");

        {
            let _lock = RunLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let mut first = RunLock::acquire(&path).unwrap();
        // fs2 locks are per open file description, so a second handle in the
        // same process conflicts too
        let second = RunLock::acquire(&path);
        assert!(matches!(second, Err(Error::RunLocked)));

        first.release();
        assert!(RunLock::acquire(&path).is_ok());
    }

    #[test]
    fn unwritable_location_is_lock_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("run.lock");
        assert!(matches!(RunLock::acquire(&path), Err(Error::LockError(_))));
    }
}
