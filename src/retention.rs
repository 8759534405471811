//! Per-tier retention
//!
//! Each tier keeps at most [`Tier::retention_limit`] snapshots. When a tier
//! holds more, the oldest ids are deleted until the limit is met. References
//! get no special treatment and neither do the snapshots they point at:
//! pruning a materialized snapshot that a newer reference resolves to leaves
//! that reference orphaned, which the store and materializer both tolerate.

use crate::error::Result;
use crate::store::SnapshotStore;
use crate::types::{RetentionStats, Tier};
use tracing::{debug, info, instrument, warn};

/// Enforces the fixed per-tier snapshot count limits
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionEnforcer;

impl RetentionEnforcer {
    /// Create an enforcer
    pub fn new() -> Self {
        Self
    }

    /// Delete the oldest snapshots of `tier` beyond its limit
    ///
    /// A deletion failure is logged and recorded in
    /// [`RetentionStats::failed`]; the pass continues with the next id.
    ///
    /// # Errors
    ///
    /// Only listing the tier can fail the pass.
    #[instrument(skip(self, store))]
    pub fn enforce(&self, store: &SnapshotStore, tier: Tier) -> Result<RetentionStats> {
        let snapshots = store.list_snapshots(tier)?;
        let limit = tier.retention_limit();
        let mut stats = RetentionStats {
            tier: Some(tier),
            kept: snapshots.len(),
            ..Default::default()
        };

        if snapshots.len() <= limit {
            debug!("{} holds {} of {} snapshots", tier, snapshots.len(), limit);
            return Ok(stats);
        }

        let excess = snapshots.len() - limit;
        for snapshot in snapshots.iter().take(excess) {
            match store.delete(snapshot) {
                Ok(()) => {
                    stats.deleted.push(snapshot.id.clone());
                    stats.kept -= 1;
                }
                Err(e) => {
                    warn!("Cannot prune {}/{}: {}", tier, snapshot.id, e);
                    stats.failed.push(snapshot.id.clone());
                }
            }
        }

        info!(
            "Retention for {}: deleted {}, kept {}",
            tier,
            stats.deleted.len(),
            stats.kept
        );
        Ok(stats)
    }

    /// Enforce every tier, skipping (and logging) tiers that cannot be listed
    pub fn enforce_all(&self, store: &SnapshotStore) -> Vec<RetentionStats> {
        Tier::ALL
            .into_iter()
            .filter_map(|tier| match self.enforce(store, tier) {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!("Retention for {} skipped: {}", tier, e);
                    None
                }
            })
            .collect()
    }
}
