//! Utility functions for tiersnap
//!
//! This module provides helpers shared by the fingerprint walk, the archive
//! writer, the mirror copy and the snapshot store:
//!
//! ### Source filtering
//! - The hidden-entry and deny-list rule applied to every source walk
//!
//! ### Path manipulation
//! - Converting absolute paths to relative, `/`-separated paths
//!
//! ### File operations
//! - Atomic file writing
//! - Cross-platform symbolic link creation, detection and removal
//!
//! ### Formatting
//! - Human-readable byte counts

use crate::error::{Result, SnapError};
use crate::metadata::METADATA_FILE;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};
use walkdir::DirEntry;

/// Names starting with this marker are never backed up
pub const HIDDEN_MARKER: char = '.';

/// Operating system housekeeping directories that are never backed up
pub const SKIPPED_DIRS: &[&str] = &["$RECYCLE.BIN", "System Volume Information"];

/// Names at the top of a snapshot that belong to its record, not to the source
///
/// The second entry is the temporary file [`atomic_write`] renames into the
/// record.
pub const RESERVED_ROOT_NAMES: &[&str] = &[METADATA_FILE, "backup_info.tmp"];

/// Whether a file or directory name is excluded from backups
///
/// Applies the hidden-marker rule to every entry and the deny list to
/// directories only.
pub fn is_excluded_name(name: &str, is_dir: bool) -> bool {
    name.starts_with(HIDDEN_MARKER) || (is_dir && SKIPPED_DIRS.contains(&name))
}

/// `walkdir` entry filter built on [`is_excluded_name`]
///
/// The walk root itself (depth 0) is always kept, even when the source
/// directory's own name is hidden. Top-level entries named like the
/// snapshot record ([`RESERVED_ROOT_NAMES`]) are skipped, since the copy
/// would collide with the record written beside it.
pub fn is_backed_up_entry(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    if entry.depth() == 1 && RESERVED_ROOT_NAMES.contains(&name.as_ref()) {
        debug!("Not backing up {:?}: name is reserved for the snapshot record", entry.path());
        return false;
    }
    !is_excluded_name(&name, entry.file_type().is_dir())
}

/// Make a path relative to a base path
///
/// Tries a lexical strip first so that symbolic links inside the tree are
/// not resolved, then falls back to canonicalising both paths.
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| SnapError::internal(format!(
            "Path {:?} is not relative to {:?}",
            path_canon, base_canon
        )))
}

/// Render a relative path with `/` separators on every platform
///
/// Used both as fingerprint input and as archive entry name, so the same
/// tree yields the same digest and the same zip layout on Unix and Windows.
pub fn slash_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Format bytes in human-readable form
///
/// Uses binary units (1024-based).
///
/// ```rust,ignore
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write (write to temp file then rename)
///
/// The target is either complete or absent; metadata records rely on this so
/// that a crash never leaves a half-written record behind.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        fs::remove_file(&temp_path).ok();
        return Err(e.into());
    }

    Ok(())
}

/// Create a symlink (cross-platform)
#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    use std::os::unix::fs::symlink;
    symlink(target, link)?;
    Ok(())
}

/// Create a symlink (Windows)
#[cfg(windows)]
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    use std::os::windows::fs::{symlink_dir, symlink_file};

    if target.is_dir() {
        symlink_dir(target, link)?;
    } else {
        symlink_file(target, link)?;
    }
    Ok(())
}

/// Whether `path` itself is a symbolic link (the link is not followed)
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Remove a symbolic link entry without touching its target
pub fn remove_link(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        // Windows directory symlinks are removed as directories
        Err(e) if cfg!(windows) && path.is_dir() => {
            trace!("remove_file on link {:?} failed ({}), retrying as dir", path, e);
            fs::remove_dir(path)?;
        }
        Err(e) => return Err(e.into()),
    }
    trace!("Removed link: {:?}", path);
    Ok(())
}
