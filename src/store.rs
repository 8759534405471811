//! Snapshot store
//!
//! The store is the only component that interprets the on-disk layout of the
//! target base directory:
//!
//! ```text
//! <target>/
//! ├── hourly/     # one entry per snapshot, see `metadata` for entry shapes
//! ├── daily/
//! └── weekly/
//! ```
//!
//! Snapshots are rebuilt from their metadata records on every enumeration;
//! nothing is cached between calls. An entry whose record is missing or
//! malformed (for example a copy interrupted before its record was written)
//! is skipped with a warning and never aborts the listing.

use crate::archive::{self, ARCHIVE_EXTENSION};
use crate::error::{Result, SnapError};
use crate::metadata::{self, BackupInfo};
use crate::types::{Representation, Snapshot, StorageKind, Tier};
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// Reads, enumerates and deletes snapshots under a target base directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Open a store rooted at `root` (nothing is created)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the tier directories if they are missing
    pub fn init(&self) -> Result<()> {
        for tier in Tier::ALL {
            fs::create_dir_all(self.tier_dir(tier))?;
        }
        debug!("Initialized snapshot store at {:?}", self.root);
        Ok(())
    }

    /// Target base directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the snapshots of `tier`
    pub fn tier_dir(&self, tier: Tier) -> PathBuf {
        self.root.join(tier.as_str())
    }

    /// Snapshots of `tier`, ascending by id
    ///
    /// A missing tier directory yields an empty list.
    ///
    /// # Errors
    ///
    /// - [`SnapError::Io`] if the tier directory exists but cannot be read
    pub fn list_snapshots(&self, tier: Tier) -> Result<Vec<Snapshot>> {
        let dir = self.tier_dir(tier);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot read entry in {:?}: {}", dir, e);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = snapshot_id(&name, &entry.path()) else {
                trace!("Ignoring non-snapshot entry {:?}", entry.path());
                continue;
            };

            match self.load(tier, &id, entry.path()) {
                Ok(snapshot) => {
                    if snapshot.is_orphan() {
                        warn!(
                            "{}",
                            SnapError::ReferenceTargetMissing {
                                snapshot: format!("{}/{}", tier, snapshot.id),
                                target: snapshot.link_target.clone().unwrap_or_default(),
                            }
                        );
                    }
                    snapshots.push(snapshot);
                }
                Err(e) => warn!("Skipping {}/{}: {}", tier, name, e),
            }
        }

        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }

    /// The most recently created snapshot of `tier`
    ///
    /// Ordered by `created_at`, ties broken by id.
    pub fn last_snapshot(&self, tier: Tier) -> Result<Option<Snapshot>> {
        Ok(self
            .list_snapshots(tier)?
            .into_iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))))
    }

    /// Every snapshot across all tiers, oldest `created_at` first
    ///
    /// A tier that cannot be listed is logged and left out.
    pub fn all_snapshots(&self) -> Vec<Snapshot> {
        let mut all = Vec::new();
        for tier in Tier::ALL {
            match self.list_snapshots(tier) {
                Ok(snapshots) => all.extend(snapshots),
                Err(e) => warn!("Cannot list {} snapshots: {}", tier, e),
            }
        }
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.tier.cmp(&b.tier))
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    /// Load the snapshot stored at `location`
    fn load(&self, tier: Tier, id: &str, location: PathBuf) -> Result<Snapshot> {
        let info = read_record(&location)?;
        info.validate(tier, id)?;
        if info.storage_kind() == StorageKind::Materialized && utils::is_symlink(&location) {
            return Err(SnapError::metadata_read(
                &location,
                "link without a reference record",
            ));
        }
        Ok(info.into_snapshot(location))
    }

    /// Delete tier entries that hold content but no valid record
    ///
    /// Covers copies and archives interrupted before their record was
    /// written, links left without their sidecar record and unfinished
    /// sidecar temp files. Entries are only removed when their record is
    /// missing or malformed; any other failure to read them leaves them in
    /// place. Returns `tier/name` of every removed entry.
    pub fn purge_invalid(&self) -> Vec<String> {
        let mut purged = Vec::new();
        for tier in Tier::ALL {
            let dir = self.tier_dir(tier);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("Cannot scan {:?} for partial snapshots: {}", dir, e);
                    continue;
                }
            };

            for entry in entries.filter_map(|e| e.ok()) {
                let name = entry.file_name().to_string_lossy().into_owned();
                let path = entry.path();
                let reason = if name.ends_with(metadata::SIDECAR_TEMP_SUFFIX) {
                    "unfinished sidecar record".to_string()
                } else {
                    let Some(id) = snapshot_id(&name, &path) else {
                        continue;
                    };
                    match self.load(tier, &id, path.clone()) {
                        Ok(_) => continue,
                        Err(e @ SnapError::MetadataRead { .. }) => e.to_string(),
                        Err(e) => {
                            warn!("Leaving {}/{} in place: {}", tier, name, e);
                            continue;
                        }
                    }
                };

                match remove_entry(&path) {
                    Ok(()) => {
                        info!("Purged {}/{} ({})", tier, name, reason);
                        purged.push(format!("{}/{}", tier, name));
                    }
                    Err(e) => warn!("Cannot purge {}/{}: {}", tier, name, e),
                }
            }
        }
        purged
    }

    /// Remove a snapshot's storage and metadata
    ///
    /// Links are removed as links, never followed: deleting a reference
    /// leaves its target untouched. Deleting a snapshot that is already gone
    /// succeeds.
    pub fn delete(&self, snapshot: &Snapshot) -> Result<()> {
        let location = &snapshot.location;

        if utils::is_symlink(location) {
            utils::remove_link(location)?;
        } else if location.exists() {
            match snapshot.representation {
                Representation::Directory if location.is_dir() => fs::remove_dir_all(location)?,
                _ => fs::remove_file(location)?,
            }
        } else {
            debug!("Snapshot {}/{} already absent", snapshot.tier, snapshot.id);
        }

        if snapshot.is_reference() {
            let sidecar = metadata::sidecar_path(location);
            match fs::remove_file(&sidecar) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!("Deleted snapshot {}/{}", snapshot.tier, snapshot.id);
        Ok(())
    }
}

/// Remove a tier directory entry and any sidecar beside it, never following links
fn remove_entry(path: &Path) -> Result<()> {
    if utils::is_symlink(path) {
        utils::remove_link(path)?;
    } else if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    match fs::remove_file(metadata::sidecar_path(path)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Snapshot id for a tier directory entry, or `None` if the entry is not a snapshot
fn snapshot_id(name: &str, path: &Path) -> Option<String> {
    if name.starts_with(utils::HIDDEN_MARKER)
        || metadata::is_sidecar_name(name)
        || name.ends_with(".tmp")
    {
        return None;
    }
    if metadata::sidecar_path(path).exists() {
        // reference entries keep the name the materializer gave them
        return Some(
            name.strip_suffix(&format!(".{}", ARCHIVE_EXTENSION))
                .unwrap_or(name)
                .to_string(),
        );
    }
    if path.is_dir() {
        return Some(name.to_string());
    }
    name.strip_suffix(&format!(".{}", ARCHIVE_EXTENSION))
        .map(str::to_string)
}

/// Read the record of the entry at `location`, wherever it lives
///
/// A sidecar record wins: it marks a reference, whose own location resolves
/// into another snapshot whose record must not be picked up.
fn read_record(location: &Path) -> Result<BackupInfo> {
    if metadata::sidecar_path(location).exists() {
        return metadata::read_sidecar_record(location);
    }
    if location.is_dir() {
        metadata::read_directory_record(location)
    } else {
        archive::read_archive_record(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn base_time() -> DateTime<Utc> {
        "2025-01-15T00:00:00Z".parse().unwrap()
    }

    fn record(tier: Tier, id: &str, created_at: DateTime<Utc>) -> BackupInfo {
        BackupInfo {
            timestamp: id.to_string(),
            created_at,
            tier,
            source_directory: PathBuf::from("/data"),
            compressed: false,
            compression_level: None,
            directory_hash: Some(format!("hash-{}", id)),
            file_count: 1,
            is_symlink: false,
            symlink_target: None,
        }
    }

    fn put_directory(
        store: &SnapshotStore,
        tier: Tier,
        id: &str,
        created_at: DateTime<Utc>,
    ) -> PathBuf {
        let dir = store.tier_dir(tier).join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("file.txt"), id).unwrap();
        metadata::write_directory_record(&dir, &record(tier, id, created_at)).unwrap();
        dir
    }

    #[test]
    fn test_list_sorted_by_id_and_skips_broken_entries() {
        let root = TempDir::new().unwrap();
        let store = SnapshotStore::new(root.path());
        store.init().unwrap();

        put_directory(&store, Tier::Hourly, "2025-01-15_1100", base_time());
        put_directory(&store, Tier::Hourly, "2025-01-15_0900", base_time());
        // content without record: an interrupted copy
        fs::create_dir_all(store.tier_dir(Tier::Hourly).join("2025-01-15_1000")).unwrap();
        // malformed record
        let bad = store.tier_dir(Tier::Hourly).join("2025-01-15_1200");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join(metadata::METADATA_FILE), "{oops").unwrap();
        // stray file
        fs::write(store.tier_dir(Tier::Hourly).join("notes.txt"), "x").unwrap();

        let ids: Vec<String> = store
            .list_snapshots(Tier::Hourly)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["2025-01-15_0900", "2025-01-15_1100"]);
    }

    #[test]
    fn test_missing_tier_dir_is_empty() {
        let root = TempDir::new().unwrap();
        let store = SnapshotStore::new(root.path().join("never-created"));
        assert!(store.list_snapshots(Tier::Weekly).unwrap().is_empty());
        assert!(store.last_snapshot(Tier::Weekly).unwrap().is_none());
    }

    #[test]
    fn test_last_snapshot_uses_created_at() {
        let root = TempDir::new().unwrap();
        let store = SnapshotStore::new(root.path());
        store.init().unwrap();

        put_directory(&store, Tier::Daily, "2025-01-16", base_time());
        put_directory(&store, Tier::Daily, "2025-01-15", base_time() + Duration::hours(1));

        let last = store.last_snapshot(Tier::Daily).unwrap().unwrap();
        assert_eq!(last.id, "2025-01-15");
    }

    #[test]
    fn test_all_snapshots_oldest_first_across_tiers() {
        let root = TempDir::new().unwrap();
        let store = SnapshotStore::new(root.path());
        store.init().unwrap();

        put_directory(&store, Tier::Weekly, "2025-01-12", base_time() + Duration::hours(3));
        put_directory(&store, Tier::Hourly, "2025-01-15_0100", base_time() + Duration::hours(1));
        put_directory(&store, Tier::Daily, "2025-01-14", base_time() + Duration::hours(2));

        let order: Vec<Tier> = store.all_snapshots().into_iter().map(|s| s.tier).collect();
        assert_eq!(order, vec![Tier::Hourly, Tier::Daily, Tier::Weekly]);
    }

    #[test]
    #[traced_test]
    fn test_record_under_wrong_tier_is_skipped() {
        let root = TempDir::new().unwrap();
        let store = SnapshotStore::new(root.path());
        store.init().unwrap();

        let dir = store.tier_dir(Tier::Daily).join("2025-01-15");
        fs::create_dir_all(&dir).unwrap();
        let info = record(Tier::Weekly, "2025-01-15", base_time());
        metadata::write_directory_record(&dir, &info).unwrap();

        assert!(store.list_snapshots(Tier::Daily).unwrap().is_empty());
        assert!(logs_contain("Skipping daily/2025-01-15"));
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_reference_keeps_target() {
        let root = TempDir::new().unwrap();
        let store = SnapshotStore::new(root.path());
        store.init().unwrap();

        let target = put_directory(&store, Tier::Hourly, "2025-01-15_1000", base_time());
        let link = store.tier_dir(Tier::Hourly).join("2025-01-15_1100");
        utils::create_symlink(&target, &link).unwrap();
        let mut info = record(Tier::Hourly, "2025-01-15_1100", base_time() + Duration::hours(1));
        info.is_symlink = true;
        info.symlink_target = Some(target.clone());
        metadata::write_sidecar_record(&link, &info).unwrap();

        let snapshots = store.list_snapshots(Tier::Hourly).unwrap();
        assert_eq!(snapshots.len(), 2);
        let reference = snapshots.iter().find(|s| s.is_reference()).unwrap();
        assert_eq!(reference.link_target.as_deref(), Some(target.as_path()));
        assert!(!reference.is_orphan());

        store.delete(reference).unwrap();
        assert!(!utils::is_symlink(&link));
        assert!(!metadata::sidecar_path(&link).exists());
        assert!(target.join("file.txt").exists());
        assert_eq!(store.list_snapshots(Tier::Hourly).unwrap().len(), 1);

        // idempotent
        store.delete(reference).unwrap();
    }

    #[test]
    fn test_purge_invalid_removes_partial_entries_only() {
        let root = TempDir::new().unwrap();
        let store = SnapshotStore::new(root.path());
        store.init().unwrap();

        let valid = put_directory(&store, Tier::Hourly, "2025-01-15_1000", base_time());
        let hourly = store.tier_dir(Tier::Hourly);
        fs::create_dir_all(hourly.join("2025-01-14_0900")).unwrap();
        fs::write(hourly.join("2025-01-14_0900/big.bin"), vec![0u8; 4096]).unwrap();
        fs::write(store.tier_dir(Tier::Daily).join("2025-01-14.zip"), b"PK half").unwrap();
        fs::write(hourly.join("2025-01-15_1100.backup_info.tmp"), b"{").unwrap();
        fs::write(hourly.join("notes.txt"), b"not a snapshot").unwrap();

        let mut purged = store.purge_invalid();
        purged.sort();

        assert_eq!(
            purged,
            vec![
                "daily/2025-01-14.zip",
                "hourly/2025-01-14_0900",
                "hourly/2025-01-15_1100.backup_info.tmp",
            ]
        );
        assert!(!hourly.join("2025-01-14_0900").exists());
        assert!(valid.join("file.txt").exists());
        assert!(hourly.join("notes.txt").exists());
        assert!(store.purge_invalid().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_purge_invalid_unlinks_reference_without_record() {
        let root = TempDir::new().unwrap();
        let store = SnapshotStore::new(root.path());
        store.init().unwrap();

        let target = put_directory(&store, Tier::Hourly, "2025-01-15_1000", base_time());
        let link = store.tier_dir(Tier::Hourly).join("2025-01-15_1100");
        utils::create_symlink(&target, &link).unwrap();

        assert_eq!(store.purge_invalid(), vec!["hourly/2025-01-15_1100"]);
        assert!(!utils::is_symlink(&link));
        assert!(target.join("file.txt").exists());
        assert_eq!(store.list_snapshots(Tier::Hourly).unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_reference_to_deleted_target_is_listed_as_orphan() {
        let root = TempDir::new().unwrap();
        let store = SnapshotStore::new(root.path());
        store.init().unwrap();

        let target = put_directory(&store, Tier::Hourly, "2025-01-15_1000", base_time());
        let link = store.tier_dir(Tier::Hourly).join("2025-01-15_1100");
        utils::create_symlink(&target, &link).unwrap();
        let mut info = record(Tier::Hourly, "2025-01-15_1100", base_time() + Duration::hours(1));
        info.is_symlink = true;
        info.symlink_target = Some(target.clone());
        metadata::write_sidecar_record(&link, &info).unwrap();

        let materialized = store.list_snapshots(Tier::Hourly).unwrap().remove(0);
        store.delete(&materialized).unwrap();

        let remaining = store.list_snapshots(Tier::Hourly).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_orphan());

        store.delete(&remaining[0]).unwrap();
        assert!(store.list_snapshots(Tier::Hourly).unwrap().is_empty());
    }
}
