//! Advisory locking for the state database.
//!
//! Multiple loaders may hold the shared lock at once; exactly one saver
//! holds the exclusive lock. Locks are advisory and local to one host.
//! Guards release on drop, so every exit path — including panics — unlocks.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

/// Errors from lock operations. Any of these is fatal to the invocation.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds a conflicting lock (non-blocking acquire only).
    #[error("state file is locked by another process: {0}")]
    Locked(PathBuf),

    /// The lock target could not be opened.
    #[error("failed to open '{path}' for locking: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The lock could not be acquired.
    #[error("failed to acquire {mode} lock on '{path}': {source}")]
    Acquire {
        mode: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A held advisory lock on the state-database file.
///
/// The descriptor is the lock: reads and writes of the locked file go
/// through [`FileLock::file`] / [`FileLock::file_mut`].
pub struct FileLock {
    file: File,
    path: PathBuf,
    mode: &'static str,
}

impl FileLock {
    /// Acquire a shared (read) lock, blocking until available.
    ///
    /// The file must already exist; loading an absent database is handled
    /// before any lock is taken.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the file cannot be opened or locked.
    pub fn shared(path: &Path) -> Result<Self, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|source| LockError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        log::debug!("Acquiring shared lock on '{}'...", path.display());
        // Fully qualified: newer std has inherent File locking methods
        // with different signatures that would otherwise shadow fs2's.
        FileExt::lock_shared(&file).map_err(|source| LockError::Acquire {
            mode: "shared",
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode: "shared",
        })
    }

    /// Acquire an exclusive (write) lock, blocking until available.
    /// Creates the file if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the file cannot be opened or locked.
    pub fn exclusive(path: &Path) -> Result<Self, LockError> {
        let file = open_for_exclusive(path)?;
        log::debug!("Acquiring exclusive lock on '{}'...", path.display());
        FileExt::lock_exclusive(&file).map_err(|source| LockError::Acquire {
            mode: "exclusive",
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode: "exclusive",
        })
    }

    /// Try to acquire an exclusive lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Locked`] immediately when another process holds
    /// a conflicting lock.
    pub fn try_exclusive(path: &Path) -> Result<Self, LockError> {
        let file = open_for_exclusive(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Self {
                file,
                path: path.to_path_buf(),
                mode: "exclusive",
            }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(LockError::Locked(path.to_path_buf()))
            }
            Err(source) => Err(LockError::Acquire {
                mode: "exclusive",
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// The locked descriptor.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// The locked descriptor, mutably (for reads that track position).
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Path of the locked file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_for_exclusive(path: &Path) -> Result<File, LockError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LockError::Open {
            path: path.to_path_buf(),
            source,
        })
}

impl Drop for FileLock {
    fn drop(&mut self) {
        log::debug!("Releasing {} lock on '{}'", self.mode, self.path.display());
        if let Err(e) = FileExt::unlock(&self.file) {
            log::debug!("Failed to release lock on '{}': {}", self.path.display(), e);
        }
    }
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exclusive_then_try_exclusive_conflicts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");

        let _guard = FileLock::exclusive(&path).unwrap();
        let second = FileLock::try_exclusive(&path);
        assert!(matches!(second, Err(LockError::Locked(_))));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");

        let guard = FileLock::exclusive(&path).unwrap();
        drop(guard);

        let again = FileLock::try_exclusive(&path);
        assert!(again.is_ok());
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.dat");
        std::fs::write(&path, b"x").unwrap();

        let _a = FileLock::shared(&path).unwrap();
        let _b = FileLock::shared(&path).unwrap();
    }

    #[test]
    fn test_shared_requires_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.dat");
        assert!(matches!(
            FileLock::shared(&path),
            Err(LockError::Open { .. })
        ));
    }
}
