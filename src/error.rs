//! Error types for the tiersnap library
//!
//! This module defines every error that can surface from a backup run.
//! Errors are contained at the granularity of a single tier or a single
//! snapshot: the orchestrator records them and moves on, so one failed
//! materialization, one unreadable metadata record or one failed deletion
//! never aborts the whole run.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the tiersnap library
pub type Result<T> = std::result::Result<T, SnapError>;

/// Main error type for all tiersnap operations
#[derive(Debug, Error)]
pub enum SnapError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors reading or writing a zip container
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Fingerprint walk failed; callers treat this as "no fingerprint"
    #[error("Scan of {path:?} failed: {message}")]
    Scan {
        /// Root of the scan
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Source directory does not exist or is not a directory
    #[error("Source directory missing: {0:?}")]
    SourceMissing(PathBuf),

    /// The copy primitive reported a failure code
    #[error("Copy to {target:?} failed with status {code}")]
    CopyFailure {
        /// Snapshot location being written
        target: PathBuf,
        /// Status code returned by the copy primitive
        code: u32,
    },

    /// Building the archive representation failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// A snapshot's metadata record is missing or malformed
    #[error("Cannot read metadata for {path:?}: {message}")]
    MetadataRead {
        /// Snapshot entry whose record could not be read
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// A reference snapshot points at storage that no longer exists
    #[error("Reference {snapshot} points at missing target {target:?}")]
    ReferenceTargetMissing {
        /// Id of the orphaned reference
        snapshot: String,
        /// Target the reference was created against
        target: PathBuf,
    },

    /// Disk usage could not be measured
    #[error("Disk usage probe failed for {path:?}: {message}")]
    DiskProbe {
        /// Path whose file system was probed
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// A snapshot already occupies the target location
    #[error("Snapshot already exists at {0:?}")]
    SnapshotExists(PathBuf),

    /// Another run holds the target directory's lock
    #[error("Target directory is locked by another run: {0:?}")]
    Locked(PathBuf),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SnapError {
    /// Create a scan error for `path`
    pub fn scan(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        SnapError::Scan {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a metadata read error for `path`
    pub fn metadata_read(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        SnapError::MetadataRead {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a disk probe error for `path`
    pub fn disk_probe(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        SnapError::DiskProbe {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a compression error with a custom message
    pub fn compression(msg: impl Into<String>) -> Self {
        SnapError::Compression(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        SnapError::InvalidConfiguration(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SnapError::Internal(msg.into())
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors degrade a decision (no fingerprint, skipped entry,
    /// orphaned reference) instead of failing the snapshot being worked on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SnapError::Scan { .. }
                | SnapError::MetadataRead { .. }
                | SnapError::ReferenceTargetMissing { .. }
        )
    }

    /// Check if this error fails a single tier's materialization
    pub fn is_materialization_failure(&self) -> bool {
        matches!(
            self,
            SnapError::SourceMissing(_)
                | SnapError::CopyFailure { .. }
                | SnapError::Compression(_)
                | SnapError::SnapshotExists(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SnapError::SourceMissing(path) => {
                format!(
                    "Source directory {:?} does not exist. Check 'source_directory'.",
                    path
                )
            }
            SnapError::SnapshotExists(path) => {
                format!(
                    "A snapshot already exists at {:?}. One snapshot per tier period.",
                    path
                )
            }
            SnapError::Locked(path) => {
                format!("Another backup run holds {:?}. Wait for it to finish and retry.", path)
            }
            SnapError::InvalidConfiguration(msg) => {
                format!("Invalid configuration: {}. Fix the configuration file and retry.", msg)
            }
            _ => self.to_string(),
        }
    }
}
