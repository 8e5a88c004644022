// src/db/lock.rs

//! Exclusive advisory locks over the administrative directory.
//!
//! The database lock guards the status area for the whole session; the
//! frontend lock serializes cooperating front-ends. A front-end that already
//! holds the outer lock exports `DPKG_FRONTEND_LOCKED`, in which case only
//! the inner database lock is taken.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// An exclusive advisory lock, released on drop
pub struct AdminLock {
    // Kept open to hold the flock
    _file: File,
    path: PathBuf,
}

impl AdminLock {
    /// Try to take an exclusive lock on a sentinel file without blocking
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("acquired lock {}", path.display());
                Ok(Self {
                    _file: file,
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(Error::Lock(format!(
                "the database area is locked by another process (lock file {})",
                path.display()
            ))),
            Err(e) => Err(Error::Lock(format!(
                "unable to lock {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AdminLock {
    fn drop(&mut self) {
        // flock is released when the descriptor closes
        debug!("released lock {}", self.path.display());
    }
}

/// Both session locks in acquisition order
pub struct SessionLocks {
    _frontend: Option<AdminLock>,
    _database: AdminLock,
}

impl SessionLocks {
    /// Take the frontend lock (unless a front-end already holds it) and then
    /// the database lock.
    pub fn acquire(admin: &Path) -> Result<Self> {
        let frontend = if std::env::var_os("DPKG_FRONTEND_LOCKED").is_some() {
            None
        } else {
            Some(AdminLock::acquire(&super::paths::lock_frontend_file(
                admin,
            ))?)
        };
        let database = AdminLock::acquire(&super::paths::lock_file(admin))?;
        Ok(Self {
            _frontend: frontend,
            _database: database,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");

        let lock = AdminLock::acquire(&path).unwrap();
        assert!(path.exists());

        // A second acquisition in the same process still conflicts through
        // a separate descriptor
        let second = AdminLock::acquire(&path);
        assert!(second.is_err());
        assert!(second.err().unwrap().is_lock_contention());

        drop(lock);
        let third = AdminLock::acquire(&path);
        assert!(third.is_ok());
    }

    #[test]
    fn test_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep/nested/lock");
        let _lock = AdminLock::acquire(&path).unwrap();
        assert!(path.exists());
    }
}
