//! File-backed advisory locks: the system lock guards mutation of
//! partitions/state for the duration of an install or update; the cache
//! lock serializes cache mutation. Both use `nix::fcntl::flock` with
//! `LOCK_EX | LOCK_NB` so contention surfaces immediately as `Transient`
//! rather than blocking.

use std::{
    fs::{File, OpenOptions},
    os::fd::AsRawFd,
    path::Path,
};

use nix::fcntl::{flock, FlockArg};
use trident_api::{Kind, ReportError, TridentError};

pub struct FileLock {
    _file: File,
    path: std::path::PathBuf,
}

impl FileLock {
    /// Acquire an exclusive, non-blocking lock on the file at `path`,
    /// creating it (and its parent directory) if necessary.
    pub fn acquire(path: &Path) -> Result<Self, TridentError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .structured(Kind::Fatal, "failed to create lock directory")?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .structured(Kind::Fatal, format!("failed to open lock file {}", path.display()))?;

        flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock).map_err(|_| {
            TridentError::new(
                Kind::Transient,
                format!(
                    "another nbc operation already holds the lock at {}",
                    path.display()
                ),
            )
        })?;

        Ok(FileLock {
            _file: file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the file descriptor releases the flock automatically;
        // nothing to do here beyond logging for diagnosability.
        log::debug!("released lock at {}", self.path.display());
    }
}

pub fn system_lock() -> Result<FileLock, TridentError> {
    FileLock::acquire(Path::new(trident_api::constants::SYSTEM_LOCK_PATH))
}

pub fn cache_lock() -> Result<FileLock, TridentError> {
    FileLock::acquire(Path::new(trident_api::constants::CACHE_LOCK_PATH))
}
