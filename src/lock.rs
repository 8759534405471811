//! Single-run lock on the target directory
//!
//! Runs are not designed to overlap: two concurrent materializations of the
//! same tier could both pass the existence check. Every mutating engine
//! operation therefore holds an advisory `fs2` lock on
//! `<target>/.tiersnap.lock` for its whole duration. The lock is released on
//! drop, and by the OS if the process dies.

use crate::error::{Result, SnapError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Lock file name inside the target directory (hidden, so never listed)
pub const LOCK_FILE: &str = ".tiersnap.lock";

/// Guard holding the exclusive run lock
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock for `root` without blocking
    ///
    /// # Errors
    ///
    /// - [`SnapError::Locked`] if another run holds the lock
    pub fn acquire(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(SnapError::Locked(path));
            }
            return Err(e.into());
        }
        trace!("Acquired run lock {:?}", path);
        Ok(Self { file, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        trace!("Released run lock {:?}", self.path);
    }
}
