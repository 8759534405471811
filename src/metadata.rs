//! Per-snapshot metadata records
//!
//! Every snapshot carries exactly one `backup_info.json` record. Where the
//! record lives depends on the snapshot:
//!
//! ```text
//! <target>/hourly/
//! ├── 2025-01-15_1000/                     # materialized directory
//! │   └── backup_info.json                 #   record inside the copy
//! ├── 2025-01-15_1100 -> 2025-01-15_1000   # reference (link)
//! ├── 2025-01-15_1100.backup_info.json     #   sidecar record beside the link
//! └── 2025-01-15_1200.zip                  # materialized archive
//!                                          #   record is a zip entry
//! ```
//!
//! A reference's record is never written through its link: that would
//! overwrite the record of the snapshot it points at.

use crate::error::{Result, SnapError};
use crate::types::{Representation, Snapshot, StorageKind, Tier};
use crate::utils;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// File name of the record inside directories and archives
pub const METADATA_FILE: &str = "backup_info.json";

/// Suffix appended to a reference's file name to form its sidecar record
pub const SIDECAR_SUFFIX: &str = ".backup_info.json";

/// The metadata record of one snapshot
///
/// Field names are the on-disk format and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Snapshot id (tier timestamp label)
    pub timestamp: String,
    /// Creation instant
    #[serde(deserialize_with = "deserialize_created_at")]
    pub created_at: DateTime<Utc>,
    /// Owning tier
    #[serde(rename = "type")]
    pub tier: Tier,
    /// Source directory that was backed up
    pub source_directory: PathBuf,
    /// Whether the snapshot uses the archive representation
    #[serde(default)]
    pub compressed: bool,
    /// Deflate level used for archives
    #[serde(default)]
    pub compression_level: Option<u32>,
    /// Fingerprint of the source at creation time
    #[serde(default)]
    pub directory_hash: Option<String>,
    /// Files counted by the fingerprint
    #[serde(default)]
    pub file_count: usize,
    /// Whether the snapshot is a reference
    #[serde(default)]
    pub is_symlink: bool,
    /// Location the reference points at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink_target: Option<PathBuf>,
}

impl BackupInfo {
    /// Storage kind recorded in this record
    pub fn storage_kind(&self) -> StorageKind {
        if self.is_symlink {
            StorageKind::Reference
        } else {
            StorageKind::Materialized
        }
    }

    /// Representation recorded in this record
    pub fn representation(&self) -> Representation {
        Representation::from_compressed(self.compressed)
    }

    /// Check the record against the entry it was read from
    pub fn validate(&self, tier: Tier, id: &str) -> Result<()> {
        if self.tier != tier {
            return Err(SnapError::metadata_read(
                id,
                format!("record is for tier '{}', found under '{}'", self.tier, tier),
            ));
        }
        if self.timestamp != id {
            return Err(SnapError::metadata_read(
                id,
                format!("record timestamp '{}' does not match entry", self.timestamp),
            ));
        }
        if self.is_symlink && self.symlink_target.is_none() {
            return Err(SnapError::metadata_read(id, "reference record without symlink_target"));
        }
        Ok(())
    }

    /// Build the in-memory snapshot for a record found at `location`
    ///
    /// For references, `target_missing` is resolved against the file system
    /// here, at read time.
    pub fn into_snapshot(self, location: PathBuf) -> Snapshot {
        let storage_kind = self.storage_kind();
        let representation = self.representation();
        let target_missing = match (&storage_kind, &self.symlink_target) {
            (StorageKind::Reference, Some(target)) => !target.exists(),
            _ => false,
        };
        Snapshot {
            id: self.timestamp,
            tier: self.tier,
            created_at: self.created_at,
            representation,
            storage_kind,
            source_fingerprint: self.directory_hash,
            file_count: self.file_count,
            location,
            link_target: self.symlink_target,
            target_missing,
        }
    }

    /// Pretty-printed JSON form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a record, attributing failures to `origin`
    pub fn from_json(json: &str, origin: &Path) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SnapError::metadata_read(origin, e.to_string()))
    }
}

/// Accept RFC 3339 instants as well as offset-less local ISO-8601 stamps
fn deserialize_created_at<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(instant) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(serde::de::Error::custom)?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| serde::de::Error::custom(format!("nonexistent local time '{}'", raw)))
}

/// Suffix of a sidecar record still being written
pub const SIDECAR_TEMP_SUFFIX: &str = ".backup_info.tmp";

/// Path of the sidecar record for a reference located at `location`
pub fn sidecar_path(location: &Path) -> PathBuf {
    let mut name = location
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(SIDECAR_SUFFIX);
    location.with_file_name(name)
}

/// Whether a tier directory entry name is a sidecar record
pub fn is_sidecar_name(name: &str) -> bool {
    name.ends_with(SIDECAR_SUFFIX)
}

/// Write the record inside a materialized directory snapshot
pub fn write_directory_record(dir: &Path, info: &BackupInfo) -> Result<()> {
    let path = dir.join(METADATA_FILE);
    utils::atomic_write(&path, info.to_json()?.as_bytes())?;
    trace!("Wrote metadata record {:?}", path);
    Ok(())
}

/// Read the record inside a materialized directory snapshot
pub fn read_directory_record(dir: &Path) -> Result<BackupInfo> {
    let path = dir.join(METADATA_FILE);
    let json = fs::read_to_string(&path)
        .map_err(|e| SnapError::metadata_read(&path, e.to_string()))?;
    BackupInfo::from_json(&json, &path)
}

/// Write the sidecar record of a reference located at `location`
pub fn write_sidecar_record(location: &Path, info: &BackupInfo) -> Result<()> {
    let path = sidecar_path(location);
    utils::atomic_write(&path, info.to_json()?.as_bytes())?;
    trace!("Wrote sidecar record {:?}", path);
    Ok(())
}

/// Read the sidecar record of a reference located at `location`
pub fn read_sidecar_record(location: &Path) -> Result<BackupInfo> {
    let path = sidecar_path(location);
    let json = fs::read_to_string(&path)
        .map_err(|e| SnapError::metadata_read(&path, e.to_string()))?;
    BackupInfo::from_json(&json, &path)
}
