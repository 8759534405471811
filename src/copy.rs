//! Mirror copy primitive
//!
//! Directory snapshots are produced by mirroring the source tree into the
//! snapshot location. The materializer only depends on the [`CopyPrimitive`]
//! trait and its status-code contract:
//!
//! | code bit | meaning |
//! |----------|---------|
//! | `0`      | nothing needed copying |
//! | `1`      | one or more files copied |
//! | `2`      | extra entries removed from the target |
//! | `8`      | some files could not be copied after all retries |
//! | `16`     | fatal: source unreadable or target not creatable |
//!
//! Any code below [`CopyStatus::FAILURE_THRESHOLD`] is a success, including
//! benign conditions; anything at or above it fails the snapshot. Callers do
//! not interpret individual bits beyond that split.
//!
//! [`MirrorCopy`] is the native implementation. Transient I/O errors are
//! retried a bounded number of times with a bounded wait between attempts;
//! this is the only retry layer in the engine.

use crate::utils;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Status code reported by a copy primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyStatus(pub u32);

impl CopyStatus {
    /// Files were copied
    pub const FILES_COPIED: u32 = 1;
    /// Extra target entries were removed
    pub const EXTRAS_REMOVED: u32 = 2;
    /// Some files failed after all retries
    pub const FILES_FAILED: u32 = 8;
    /// The copy could not run at all
    pub const FATAL: u32 = 16;
    /// Lowest code that signals failure
    pub const FAILURE_THRESHOLD: u32 = 8;

    /// Whether the code is inside the success range
    pub fn is_success(self) -> bool {
        self.0 < Self::FAILURE_THRESHOLD
    }

    /// Raw status code
    pub fn code(self) -> u32 {
        self.0
    }

    fn set(&mut self, flag: u32) {
        self.0 |= flag;
    }
}

/// Capability that mirrors one directory tree onto another
pub trait CopyPrimitive: Send + Sync {
    /// Make `target` an exact mirror of `source` and report a status code
    fn mirror(&self, source: &Path, target: &Path) -> CopyStatus;
}

/// Native recursive mirror copy with bounded retries
///
/// Applies the same hidden/deny-list exclusion as the fingerprint walk, so a
/// directory snapshot contains exactly the files its fingerprint describes.
/// Symbolic links inside the source are recreated as links.
#[derive(Debug, Clone)]
pub struct MirrorCopy {
    retries: u32,
    wait: Duration,
}

impl Default for MirrorCopy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

impl MirrorCopy {
    /// Create a mirror copy retrying each failed file `retries` times, `wait` apart
    pub fn new(retries: u32, wait: Duration) -> Self {
        Self { retries, wait }
    }

    /// Run `op`, retrying on error up to the configured bound
    fn with_retries<T>(&self, what: &Path, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    debug!("Retry {}/{} for {:?}: {}", attempt, self.retries, what, e);
                    if !self.wait.is_zero() {
                        thread::sleep(self.wait);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn copy_entry(&self, src: &Path, dst: &Path, file_type: fs::FileType) -> io::Result<bool> {
        if file_type.is_dir() {
            fs::create_dir_all(dst)?;
            return Ok(false);
        }
        if file_type.is_symlink() {
            let link_target = fs::read_link(src)?;
            if fs::symlink_metadata(dst).is_ok() {
                fs::remove_file(dst)?;
            }
            utils::create_symlink(&link_target, dst).map_err(|e| io::Error::other(e.to_string()))?;
            return Ok(true);
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        Ok(true)
    }

    /// Delete target entries that have no counterpart in the source
    fn purge_extras(&self, target: &Path, keep: &HashSet<PathBuf>, status: &mut CopyStatus) {
        let extras: Vec<(PathBuf, bool)> = WalkDir::new(target)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let relative = e.path().strip_prefix(target).ok()?.to_path_buf();
                (!keep.contains(&relative))
                    .then(|| (e.path().to_path_buf(), e.file_type().is_dir()))
            })
            .collect();

        for (path, is_dir) in extras {
            let removed = if is_dir {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match removed {
                Ok(()) => {
                    trace!("Removed extra {:?}", path);
                    status.set(CopyStatus::EXTRAS_REMOVED);
                }
                // a parent directory may already have taken it along
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Cannot remove extra {:?}: {}", path, e);
                    status.set(CopyStatus::FILES_FAILED);
                }
            }
        }
    }
}

impl CopyPrimitive for MirrorCopy {
    fn mirror(&self, source: &Path, target: &Path) -> CopyStatus {
        let mut status = CopyStatus::default();

        if !source.is_dir() {
            warn!("Mirror source {:?} is not a directory", source);
            status.set(CopyStatus::FATAL);
            return status;
        }
        if let Err(e) = self.with_retries(target, || fs::create_dir_all(target)) {
            warn!("Cannot create mirror target {:?}: {}", target, e);
            status.set(CopyStatus::FATAL);
            return status;
        }

        let mut keep = HashSet::new();
        let walker = WalkDir::new(source)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1)
            .into_iter()
            .filter_entry(utils::is_backed_up_entry);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot read source entry: {}", e);
                    status.set(CopyStatus::FILES_FAILED);
                    continue;
                }
            };
            let relative = match entry.path().strip_prefix(source) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => continue,
            };
            let dst = target.join(&relative);
            keep.insert(relative);

            let copied = self.with_retries(entry.path(), || {
                self.copy_entry(entry.path(), &dst, entry.file_type())
            });
            match copied {
                Ok(true) => status.set(CopyStatus::FILES_COPIED),
                Ok(false) => {}
                Err(e) => {
                    warn!("Giving up on {:?} after {} retries: {}", entry.path(), self.retries, e);
                    status.set(CopyStatus::FILES_FAILED);
                }
            }
        }

        self.purge_extras(target, &keep, &mut status);
        debug!("Mirror {:?} -> {:?} finished with status {}", source, target, status.code());
        status
    }
}
