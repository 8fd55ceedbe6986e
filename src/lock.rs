//! Process-wide run lock
//!
//! Only one streak run may drive the browser at a time. The lock is an
//! exclusive `flock`-style lock on a file, so it also excludes a one-shot
//! `run` started from another process while the daemon is busy.
//!
//! The lock file is never unlinked, so every caller locks the same inode.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Guard that holds the run lock until dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    lock_file: Option<File>,
}

impl RunLock {
    /// Try to take the lock without waiting.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::LockError(format!("Failed to open lock file: {}", e)))?;

        lock_file.try_lock_exclusive().map_err(lock_failure)?;
        debug!(path = %path.display(), "Run lock acquired");
        Ok(Self {
            path,
            lock_file: Some(lock_file),
        })
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(file) = self.lock_file.take() {
            let _ = file.unlock();
            debug!(path = %self.path.display(), "Run lock released");
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Contention means another holder; anything else is a real failure.
fn lock_failure(err: io::Error) -> Error {
    let contended = fs2::lock_contended_error();
    if err.kind() == io::ErrorKind::WouldBlock
        || (err.raw_os_error().is_some() && err.raw_os_error() == contended.raw_os_error())
    {
        Error::RunAlreadyInProgress
    } else {
        Error::LockError(format!("Failed to lock {}", err))
    }
}
