//! Core data types used throughout the tiersnap library
//!
//! The types in this module represent:
//! - **Tiers**: `Tier` - backup cadence classes with fixed retention limits
//! - **Snapshots**: `Snapshot`, `Representation`, `StorageKind` - one backed-up
//!   instance of the source tree and how its bytes are stored
//! - **Change detection**: `Fingerprint` - the digest used to decide between a
//!   full copy and a reference
//! - **Operation results**: `RetentionStats`, `ReclaimStats`, `RunReport`
//!
//! ## Examples
//!
//! ```rust
//! use tiersnap::types::Tier;
//! use chrono::{Local, TimeZone};
//!
//! let now = Local.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
//! assert_eq!(Tier::Hourly.label_for(&now), "2025-01-15_1000");
//! assert_eq!(Tier::Daily.label_for(&now), "2025-01-15");
//! assert_eq!(Tier::Weekly.retention_limit(), 52);
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::SnapError;

/// A backup cadence class
///
/// Each tier owns its own directory below the target base directory and its
/// own fixed retention limit. Tiers are independent namespaces: a snapshot
/// belongs to exactly one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Taken every hour, 24 kept
    Hourly,
    /// Taken once a day, 30 kept
    Daily,
    /// Taken once a week, 52 kept
    Weekly,
}

impl Tier {
    /// All tiers in cadence order
    pub const ALL: [Tier; 3] = [Tier::Hourly, Tier::Daily, Tier::Weekly];

    /// Maximum number of snapshots kept for this tier
    pub fn retention_limit(self) -> usize {
        match self {
            Tier::Hourly => 24,
            Tier::Daily => 30,
            Tier::Weekly => 52,
        }
    }

    /// Directory name and metadata `type` value for this tier
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Hourly => "hourly",
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
        }
    }

    /// `strftime` pattern of the snapshot id
    ///
    /// Both patterns sort lexicographically in time order, which is what
    /// `SnapshotStore::list_snapshots` relies on.
    pub fn label_format(self) -> &'static str {
        match self {
            Tier::Hourly => "%Y-%m-%d_%H%M",
            Tier::Daily | Tier::Weekly => "%Y-%m-%d",
        }
    }

    /// Snapshot id for a snapshot taken at `now`
    pub fn label_for<Tz: TimeZone>(self, now: &DateTime<Tz>) -> String
    where
        Tz::Offset: fmt::Display,
    {
        now.format(self.label_format()).to_string()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = SnapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hourly" => Ok(Tier::Hourly),
            "daily" => Ok(Tier::Daily),
            "weekly" => Ok(Tier::Weekly),
            other => Err(SnapError::invalid_config(format!("unknown tier '{}'", other))),
        }
    }
}

/// How a snapshot's bytes are laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Representation {
    /// A plain directory mirroring the source tree
    Directory,
    /// A single compressed zip container
    Archive,
}

impl Representation {
    /// Representation chosen by the `compress` flag
    pub fn from_compressed(compressed: bool) -> Self {
        if compressed {
            Representation::Archive
        } else {
            Representation::Directory
        }
    }

    /// Location of a snapshot with id `id` inside `tier_dir`
    pub fn location(self, tier_dir: &Path, id: &str) -> PathBuf {
        match self {
            Representation::Directory => tier_dir.join(id),
            Representation::Archive => {
                tier_dir.join(format!("{}.{}", id, crate::archive::ARCHIVE_EXTENSION))
            }
        }
    }
}

/// Whether a snapshot owns its content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Holds its own copied or archived content
    Materialized,
    /// Holds no content; points at another snapshot's storage
    Reference,
}

/// One backed-up instance of the source tree
///
/// Snapshots are built from their metadata record by the
/// [`SnapshotStore`](crate::store::SnapshotStore) and are never mutated
/// after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Tier-specific timestamp label, unique within the tier
    pub id: String,
    /// Owning tier
    pub tier: Tier,
    /// Wall-clock creation instant, the ordering key across tiers
    pub created_at: DateTime<Utc>,
    /// Directory or archive
    pub representation: Representation,
    /// Materialized or reference
    pub storage_kind: StorageKind,
    /// Fingerprint of the source at creation time
    pub source_fingerprint: Option<String>,
    /// Files counted when the fingerprint was computed
    pub file_count: usize,
    /// Where the snapshot (or its link) lives
    pub location: PathBuf,
    /// For references, the materialized location the reference resolves to
    pub link_target: Option<PathBuf>,
    /// Set on references whose target no longer exists
    pub target_missing: bool,
}

impl Snapshot {
    /// Whether this snapshot is a reference to another snapshot
    pub fn is_reference(&self) -> bool {
        self.storage_kind == StorageKind::Reference
    }

    /// Whether this is a reference whose target has been deleted
    pub fn is_orphan(&self) -> bool {
        self.is_reference() && self.target_missing
    }

    /// Location holding the actual content of this snapshot
    ///
    /// For a materialized snapshot that is its own location; for a
    /// reference it is the link target.
    pub fn content_location(&self) -> &Path {
        match (&self.storage_kind, &self.link_target) {
            (StorageKind::Reference, Some(target)) => target,
            _ => &self.location,
        }
    }

    /// One-line human readable description
    pub fn display_format(&self) -> String {
        let kind = match self.storage_kind {
            StorageKind::Materialized => "materialized",
            StorageKind::Reference if self.target_missing => "reference (orphan)",
            StorageKind::Reference => "reference",
        };
        format!(
            "{}/{} [{}, {:?}] {} files, created {}",
            self.tier,
            self.id,
            kind,
            self.representation,
            self.file_count,
            self.created_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Identity hash of a directory tree's state
///
/// `digest` is `None` when the scan failed; a missing fingerprint never
/// matches anything, which forces the full-copy path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fingerprint {
    /// Hex-encoded digest, `None` if the scan failed
    pub digest: Option<String>,
    /// Number of files fed into the digest
    pub file_count: usize,
    /// Whether the walk stopped at the file cap
    pub truncated: bool,
}

impl Fingerprint {
    /// Result of a failed scan
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Whether a digest was produced
    pub fn is_available(&self) -> bool {
        self.digest.is_some()
    }

    /// Whether this fingerprint equals a stored digest
    pub fn matches(&self, stored: Option<&str>) -> bool {
        match (self.digest.as_deref(), stored) {
            (Some(current), Some(stored)) => current == stored,
            _ => false,
        }
    }
}

/// Outcome of a retention pass over one tier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionStats {
    /// Tier that was enforced
    pub tier: Option<Tier>,
    /// Snapshots remaining after the pass
    pub kept: usize,
    /// Ids deleted
    pub deleted: Vec<String>,
    /// Ids whose deletion failed
    pub failed: Vec<String>,
}

/// Outcome of a space reclamation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReclaimStats {
    /// Usage percentage measured before any deletion
    pub initial_usage: f64,
    /// Usage percentage measured after the last deletion
    pub final_usage: f64,
    /// Usage percentage the pass aimed for
    pub target_usage: f64,
    /// `tier/name` of partial entries without a record, removed first
    pub purged: Vec<String>,
    /// `tier/id` of every deleted snapshot, oldest first
    pub deleted: Vec<String>,
    /// `tier/id` of snapshots whose deletion failed
    pub failed: Vec<String>,
}

impl ReclaimStats {
    /// Whether any eviction was needed
    pub fn was_triggered(&self) -> bool {
        !self.purged.is_empty()
            || !self.deleted.is_empty()
            || !self.failed.is_empty()
            || self.initial_usage > self.final_usage
    }

    /// Whether usage ended at or below the target
    pub fn target_reached(&self) -> bool {
        self.final_usage <= self.target_usage
    }
}

/// A tier whose materialization failed during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierFailure {
    /// Tier that failed
    pub tier: Tier,
    /// Rendered error
    pub error: String,
}

/// Result of one orchestrator run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Snapshots created in this run
    pub created: Vec<Snapshot>,
    /// Tiers whose materialization failed
    pub failures: Vec<TierFailure>,
    /// `tier/name` of partial entries removed before materializing
    pub purged: Vec<String>,
    /// Retention outcome per tier (empty when nothing was created)
    pub retention: Vec<RetentionStats>,
    /// Reclamation outcome, `None` when skipped or aborted
    pub reclaim: Option<ReclaimStats>,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

impl RunReport {
    /// Whether the run mutated the target directory
    pub fn has_changes(&self) -> bool {
        !self.created.is_empty()
    }

    /// Tiers created in this run
    pub fn created_tiers(&self) -> Vec<Tier> {
        self.created.iter().map(|s| s.tier).collect()
    }
}
