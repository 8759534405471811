//! Disk space reclamation
//!
//! After a run creates snapshots, the reclaimer checks how full the file
//! system holding the target directory is. If usage exceeds the configured
//! maximum it deletes snapshots oldest-first, across all tiers, re-measuring
//! after every deletion, until usage falls to [`RECLAIM_MARGIN`] points below
//! the maximum or nothing is left to delete. The margin keeps the next run
//! from immediately triggering another pass.
//!
//! Usage is measured through the [`DiskProbe`] trait so tests can drive the
//! pass with simulated numbers.

use crate::error::{Result, SnapError};
use crate::store::SnapshotStore;
use crate::types::ReclaimStats;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Percentage points below the maximum that a reclaim pass aims for
pub const RECLAIM_MARGIN: f64 = 5.0;

/// Space figures of one file system, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskUsage {
    /// Total size
    pub total: u64,
    /// Bytes in use
    pub used: u64,
    /// Bytes available to unprivileged users
    pub free: u64,
}

impl DiskUsage {
    /// Used space as a percentage of the total (0 for an empty file system)
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64 * 100.0
        }
    }
}

/// Measures the file system holding a path
pub trait DiskProbe: Send + Sync {
    /// Current usage of the file system containing `path`
    fn usage(&self, path: &Path) -> Result<DiskUsage>;
}

/// [`DiskProbe`] backed by `statvfs`/`GetDiskFreeSpaceEx` through `fs2`
#[derive(Debug, Clone, Copy, Default)]
pub struct Fs2DiskProbe;

impl DiskProbe for Fs2DiskProbe {
    fn usage(&self, path: &Path) -> Result<DiskUsage> {
        let probe_err = |e: std::io::Error| SnapError::disk_probe(path, e.to_string());
        let total = fs2::total_space(path).map_err(probe_err)?;
        let unused = fs2::free_space(path).map_err(probe_err)?;
        let free = fs2::available_space(path).map_err(probe_err)?;
        Ok(DiskUsage {
            total,
            used: total.saturating_sub(unused),
            free,
        })
    }
}

/// Evicts the globally oldest snapshots while the disk is too full
pub struct SpaceReclaimer {
    probe: Box<dyn DiskProbe>,
}

impl std::fmt::Debug for SpaceReclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceReclaimer").finish_non_exhaustive()
    }
}

impl Default for SpaceReclaimer {
    fn default() -> Self {
        Self::new(Box::new(Fs2DiskProbe))
    }
}

impl SpaceReclaimer {
    /// Create a reclaimer measuring usage with `probe`
    pub fn new(probe: Box<dyn DiskProbe>) -> Self {
        Self { probe }
    }

    /// Current usage of the file system holding `path`
    pub fn usage(&self, path: &Path) -> Result<DiskUsage> {
        self.probe.usage(path)
    }

    /// Delete oldest snapshots until usage is at most `max_percent - 5`
    ///
    /// Nothing happens when usage is already at or below `max_percent`.
    /// Otherwise partial entries without a record are purged first (see
    /// [`SnapshotStore::purge_invalid`]), then snapshots are taken from every
    /// tier ordered by creation time; a snapshot that cannot be deleted is
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// - [`SnapError::DiskProbe`] if usage cannot be measured, before or
    ///   during the pass; deletions already made stay made
    #[instrument(skip(self, store))]
    pub fn reclaim(
        &self,
        store: &SnapshotStore,
        disk_root: &Path,
        max_percent: f64,
    ) -> Result<ReclaimStats> {
        let initial = self.probe.usage(disk_root)?.percent();
        let target = max_percent - RECLAIM_MARGIN;
        let mut stats = ReclaimStats {
            initial_usage: initial,
            final_usage: initial,
            target_usage: target,
            ..Default::default()
        };

        if initial <= max_percent {
            debug!("Disk usage {:.1}% within limit {:.1}%", initial, max_percent);
            return Ok(stats);
        }

        warn!(
            "Disk usage {:.1}% exceeds {:.1}%, reclaiming down to {:.1}%",
            initial, max_percent, target
        );

        stats.purged = store.purge_invalid();
        if !stats.purged.is_empty() {
            stats.final_usage = self.probe.usage(disk_root)?.percent();
            debug!(
                "Disk usage {:.1}% after purging {} partial entries",
                stats.final_usage,
                stats.purged.len()
            );
            if stats.final_usage <= target {
                info!("Reclaimed space from partial entries alone");
                return Ok(stats);
            }
        }

        for snapshot in store.all_snapshots() {
            let name = format!("{}/{}", snapshot.tier, snapshot.id);
            match store.delete(&snapshot) {
                Ok(()) => stats.deleted.push(name),
                Err(e) => {
                    warn!("Cannot reclaim {}: {}", name, e);
                    stats.failed.push(name);
                    continue;
                }
            }

            stats.final_usage = self.probe.usage(disk_root)?.percent();
            debug!("Disk usage now {:.1}%", stats.final_usage);
            if stats.final_usage <= target {
                break;
            }
        }

        if stats.target_reached() {
            info!(
                "Reclaimed space: deleted {} snapshots, usage {:.1}% -> {:.1}%",
                stats.deleted.len(),
                stats.initial_usage,
                stats.final_usage
            );
        } else {
            warn!(
                "Usage still {:.1}% after deleting {} snapshots",
                stats.final_usage,
                stats.deleted.len()
            );
        }
        Ok(stats)
    }
}
