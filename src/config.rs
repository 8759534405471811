//! Backup configuration
//!
//! Configuration is a JSON document, by default `config/back_config.json`:
//!
//! ```json
//! {
//!     "source_directory": "/data",
//!     "target_directory": "/mnt/backup",
//!     "compress_backup": false,
//!     "compression_level": 6,
//!     "enable_symlink": true,
//!     "max_disk_usage_percent": 85
//! }
//! ```
//!
//! Only the two directories are required; every other key falls back to
//! the defaults documented on [`BackupConfig`].

use crate::archive::MAX_COMPRESSION_LEVEL;
use crate::error::{Result, SnapError};
use crate::fingerprint::DEFAULT_MAX_FILES;
use crate::materializer::MaterializeOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/back_config.json";

/// Engine configuration as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Tree to back up
    pub source_directory: PathBuf,
    /// Base directory holding the tier directories
    pub target_directory: PathBuf,
    /// Store full copies as zip archives (default `false`)
    #[serde(default)]
    pub compress_backup: bool,
    /// Deflate level 0-9 (default 6)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    /// Create references for unchanged sources (default `true`)
    #[serde(default = "default_true")]
    pub enable_symlink: bool,
    /// Usage percentage that triggers space reclamation (default 85)
    #[serde(default = "default_max_disk_usage")]
    pub max_disk_usage_percent: f64,
    /// File cap of the change-detection fingerprint (default 1000)
    #[serde(default = "default_max_hash_files")]
    pub max_hash_files: usize,
    /// Retries per file in the mirror copy (default 3)
    #[serde(default = "default_copy_retries")]
    pub copy_retries: u32,
    /// Seconds between mirror copy retries (default 5)
    #[serde(default = "default_copy_wait")]
    pub copy_wait_seconds: u64,
}

fn default_compression_level() -> u32 {
    6
}

fn default_true() -> bool {
    true
}

fn default_max_disk_usage() -> f64 {
    85.0
}

fn default_max_hash_files() -> usize {
    DEFAULT_MAX_FILES
}

fn default_copy_retries() -> u32 {
    3
}

fn default_copy_wait() -> u64 {
    5
}

impl BackupConfig {
    /// Configuration with default settings for the given directories
    pub fn new(source_directory: impl Into<PathBuf>, target_directory: impl Into<PathBuf>) -> Self {
        Self {
            source_directory: source_directory.into(),
            target_directory: target_directory.into(),
            compress_backup: false,
            compression_level: default_compression_level(),
            enable_symlink: true,
            max_disk_usage_percent: default_max_disk_usage(),
            max_hash_files: default_max_hash_files(),
            copy_retries: default_copy_retries(),
            copy_wait_seconds: default_copy_wait(),
        }
    }

    /// Load and validate the configuration file at `path`
    ///
    /// # Errors
    ///
    /// - [`SnapError::InvalidConfiguration`] if the file is missing, is not
    ///   valid JSON, or holds out-of-range values
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| SnapError::invalid_config(format!("cannot read {:?}: {}", path, e)))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| SnapError::invalid_config(format!("{:?}: {}", path, e)))?;
        config.validate()?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Write the configuration to `path` as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject out-of-range values and overlapping directories
    pub fn validate(&self) -> Result<()> {
        if self.source_directory.as_os_str().is_empty() {
            return Err(SnapError::invalid_config("source_directory is empty"));
        }
        if self.target_directory.as_os_str().is_empty() {
            return Err(SnapError::invalid_config("target_directory is empty"));
        }
        if self.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(SnapError::invalid_config(format!(
                "compression_level {} is outside 0..={}",
                self.compression_level, MAX_COMPRESSION_LEVEL
            )));
        }
        if !(self.max_disk_usage_percent > 0.0 && self.max_disk_usage_percent <= 100.0) {
            return Err(SnapError::invalid_config(format!(
                "max_disk_usage_percent {} is outside (0, 100]",
                self.max_disk_usage_percent
            )));
        }
        if self.max_hash_files == 0 {
            return Err(SnapError::invalid_config("max_hash_files must be at least 1"));
        }

        let source = normalize(&self.source_directory);
        let target = normalize(&self.target_directory);
        if target.starts_with(&source) {
            return Err(SnapError::invalid_config(format!(
                "target_directory {:?} lies inside source_directory {:?}",
                self.target_directory, self.source_directory
            )));
        }
        Ok(())
    }

    /// Materializer switches derived from this configuration
    pub fn materialize_options(&self) -> MaterializeOptions {
        MaterializeOptions {
            compress: self.compress_backup,
            compression_level: self.compression_level,
            dedup: self.enable_symlink,
        }
    }

    /// Wait between mirror copy retries
    pub fn copy_wait(&self) -> Duration {
        Duration::from_secs(self.copy_wait_seconds)
    }
}

/// Lexically normalized absolute form of `path`, for overlap checks only
fn normalize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
