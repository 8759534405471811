//! Integration tests for tiersnap
//!
//! Drives whole runs through [`BackupEngine`] with a simulated disk and a
//! pinned clock, covering deduplication, retention, reclamation and crash
//! consistency across components.

use ::tiersnap::*;
use chrono::{DateTime, Duration, Local, TimeZone};
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tiersnap::archive::ArchiveWriter;
use tiersnap::metadata;

/// Disk whose usage is set by the test
#[derive(Clone, Default)]
pub struct SimulatedDisk {
    used: Arc<AtomicU64>,
}

impl SimulatedDisk {
    pub fn set(&self, percent: u64) {
        self.used.store(percent, Ordering::SeqCst);
    }
}

impl DiskProbe for SimulatedDisk {
    fn usage(&self, _path: &Path) -> Result<DiskUsage> {
        let used = self.used.load(Ordering::SeqCst);
        Ok(DiskUsage {
            total: 100,
            used,
            free: 100 - used,
        })
    }
}

/// Usage grows by a fixed amount per snapshot on the target
pub struct SnapshotWeightedDisk {
    store: SnapshotStore,
    base: u64,
    per_snapshot: u64,
}

impl DiskProbe for SnapshotWeightedDisk {
    fn usage(&self, _path: &Path) -> Result<DiskUsage> {
        let used = self.base + self.per_snapshot * self.store.all_snapshots().len() as u64;
        Ok(DiskUsage {
            total: 100,
            used,
            free: 100u64.saturating_sub(used),
        })
    }
}

/// Test harness owning a source tree, a target directory and an engine
pub struct BackupHarness {
    pub dir: TempDir,
    pub source: PathBuf,
    pub target: PathBuf,
    pub disk: SimulatedDisk,
    pub engine: BackupEngine,
}

impl BackupHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut BackupConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        let target = dir.path().join("backup");
        create_source_tree(&source);

        let mut config = BackupConfig::new(&source, &target);
        config.copy_retries = 0;
        config.copy_wait_seconds = 0;
        adjust(&mut config);

        let disk = SimulatedDisk::default();
        disk.set(10);
        let engine = BackupEngineBuilder::new(config)
            .disk_probe(Box::new(disk.clone()))
            .build()
            .unwrap();

        Self {
            dir,
            source,
            target,
            disk,
            engine,
        }
    }

    pub fn hourly(&self, at: DateTime<Local>) -> Snapshot {
        let report = self
            .engine
            .run(DueTiers::from_tiers(&[Tier::Hourly]), at)
            .unwrap();
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        report.created.into_iter().next().unwrap()
    }

    pub fn touch_source(&self, n: usize) {
        let path = self.source.join(format!("change_{}.txt", n));
        fs::write(&path, format!("change {}", n)).unwrap();
    }

    pub fn hourly_ids(&self) -> Vec<String> {
        self.engine
            .store()
            .list_snapshots(Tier::Hourly)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect()
    }
}

/// Source tree used by all scenarios, with pinned modification times
pub fn create_source_tree(root: &Path) {
    let files = [
        ("main.py", "print('hello')\n"),
        ("config.json", "{\"debug\": false}\n"),
        ("documents/readme.txt", "read me\n"),
        ("documents/notes.txt", "notes\n"),
        ("logs/app.log", "started\n"),
        (".git/HEAD", "ref: refs/heads/main\n"),
    ];
    for (i, (name, content)) in files.iter().enumerate() {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(1_736_900_000 + i as i64, 0)).unwrap();
    }
}

fn hour(h: i64) -> DateTime<Local> {
    Local.with_ymd_and_hms(2025, 1, 14, 0, 0, 0).unwrap() + Duration::hours(h)
}

#[cfg(unix)]
#[test]
fn test_unchanged_source_links_to_first_snapshot() {
    let h = BackupHarness::new();

    let first = h.hourly(hour(10));
    let second = h.hourly(hour(11));

    assert!(!first.is_reference());
    assert_eq!(first.file_count, 5);
    assert!(second.is_reference());
    assert_eq!(second.link_target.as_deref(), Some(first.location.as_path()));
    assert_eq!(fs::read_link(&second.location).unwrap(), first.location);
    // the reference resolves to the same content
    assert_eq!(
        fs::read_to_string(second.location.join("main.py")).unwrap(),
        "print('hello')\n"
    );
    assert!(!second.location.join(".git").exists());
}

#[test]
fn test_changed_source_gets_full_copy_each_hour() {
    let h = BackupHarness::new();
    h.hourly(hour(0));
    h.touch_source(1);
    let second = h.hourly(hour(1));
    h.touch_source(2);
    let third = h.hourly(hour(2));

    assert!(!second.is_reference());
    assert!(!third.is_reference());
    assert!(third.location.join("change_1.txt").exists());
    assert!(third.location.join("change_2.txt").exists());
    assert!(!second.location.join("change_2.txt").exists());
}

#[test]
fn test_twenty_six_hours_keep_the_newest_twenty_four() {
    let h = BackupHarness::new();
    let mut ids = Vec::new();
    for i in 0..26 {
        h.touch_source(i);
        ids.push(h.hourly(hour(i as i64)).id);
    }

    assert_eq!(h.hourly_ids(), ids[2..].to_vec());
    assert!(!h.engine.store().tier_dir(Tier::Hourly).join(&ids[0]).exists());
    assert!(!h.engine.store().tier_dir(Tier::Hourly).join(&ids[1]).exists());
}

#[cfg(unix)]
#[test]
fn test_pruned_target_orphans_references_until_next_full_copy() {
    let h = BackupHarness::new();
    let first = h.hourly(hour(0));
    for i in 1..25 {
        assert!(h.hourly(hour(i)).is_reference());
    }
    // hour 24 pushed the count to 25: the materialized hour 0 is pruned
    assert!(!first.location.exists());

    let listed = h.engine.store().list_snapshots(Tier::Hourly).unwrap();
    assert_eq!(listed.len(), 24);
    assert!(listed.iter().all(|s| s.is_orphan()));

    // unchanged source, but the last snapshot is an orphan: full copy again
    let fresh = h.hourly(hour(25));
    assert!(!fresh.is_reference());
    assert!(fresh.location.join("main.py").exists());

    let next = h.hourly(hour(26));
    assert_eq!(next.link_target.as_deref(), Some(fresh.location.as_path()));
}

#[test]
fn test_interrupted_copies_are_invisible() {
    let h = BackupHarness::new();
    let store = h.engine.store();
    store.init().unwrap();

    // a directory copy that never got its record
    let partial_dir = store.tier_dir(Tier::Hourly).join("2025-01-14_0900");
    fs::create_dir_all(&partial_dir).unwrap();
    fs::write(partial_dir.join("main.py"), "half").unwrap();
    // an archive whose body finished but whose record was never appended
    let partial_zip = store.tier_dir(Tier::Daily).join("2025-01-13.zip");
    ArchiveWriter::new(1).write_body(&h.source, &partial_zip).unwrap();

    assert!(store.list_snapshots(Tier::Hourly).unwrap().is_empty());
    assert!(store.list_snapshots(Tier::Daily).unwrap().is_empty());

    // the next run does not deduplicate against the partial copy
    let snapshot = h.hourly(hour(10));
    assert!(!snapshot.is_reference());
    assert_eq!(h.hourly_ids(), vec!["2025-01-14_1000".to_string()]);
    // and the run cleared them away
    assert!(!partial_dir.exists());
    assert!(!partial_zip.exists());
}

#[cfg(unix)]
#[test]
fn test_link_without_record_is_invisible() {
    let h = BackupHarness::new();
    let first = h.hourly(hour(10));

    // crash between creating the link and writing its sidecar
    let dangling = h.engine.store().tier_dir(Tier::Hourly).join("2025-01-14_1100");
    std::os::unix::fs::symlink(&first.location, &dangling).unwrap();

    assert_eq!(h.hourly_ids(), vec![first.id.clone()]);
    assert!(!metadata::sidecar_path(&dangling).exists());

    // the rerun of that hour replaces the dangling link with a complete reference
    let retry = h.hourly(hour(11));
    assert!(retry.is_reference());
    assert!(metadata::sidecar_path(&dangling).exists());
    assert_eq!(h.hourly_ids(), vec![first.id.clone(), retry.id]);
}

#[cfg(unix)]
#[test]
fn test_archive_mode_with_dedup() {
    let h = BackupHarness::with_config(|c| {
        c.compress_backup = true;
        c.compression_level = 9;
    });
    let first = h.hourly(hour(10));
    let second = h.hourly(hour(11));

    assert_eq!(first.representation, Representation::Archive);
    assert!(first.location.extension().is_some_and(|e| e == "zip"));
    assert!(second.is_reference());
    assert_eq!(second.representation, Representation::Archive);
    assert_eq!(second.link_target.as_deref(), Some(first.location.as_path()));

    let entries = tiersnap::archive::list_entries(&second.location).unwrap();
    assert!(entries.contains(&"documents/readme.txt".to_string()));
    assert!(!entries.iter().any(|e| e.starts_with(".git")));
}

#[test]
fn test_dedup_disabled_never_creates_references() {
    let h = BackupHarness::with_config(|c| c.enable_symlink = false);
    h.hourly(hour(10));
    let second = h.hourly(hour(11));
    assert!(!second.is_reference());
    assert!(second.location.join("main.py").exists());
}

#[test]
fn test_full_disk_evicts_oldest_across_tiers() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    create_source_tree(&source);
    let config = BackupConfig::new(&source, dir.path().join("backup"));
    let store = SnapshotStore::new(&config.target_directory);
    let engine = BackupEngineBuilder::new(config)
        .disk_probe(Box::new(SnapshotWeightedDisk {
            store: store.clone(),
            base: 70,
            per_snapshot: 2,
        }))
        .build()
        .unwrap();

    let materializer = Materializer::default();
    let options = MaterializeOptions {
        dedup: false,
        ..Default::default()
    };
    let mut created = Vec::new();
    for i in 0..11i64 {
        let tier = Tier::ALL[(i % 3) as usize];
        created.push(
            materializer
                .materialize(&source, &store, tier, &options, hour(i * 25))
                .unwrap(),
        );
    }

    // 70 + 2 * 11 = 92% against a limit of 85%: evict down to 80%
    let stats = engine.reclaim(85.0).unwrap();
    assert_eq!(stats.initial_usage, 92.0);
    assert_eq!(stats.final_usage, 80.0);
    let expected: Vec<String> = created[..6]
        .iter()
        .map(|s| format!("{}/{}", s.tier, s.id))
        .collect();
    assert_eq!(stats.deleted, expected);
    assert_eq!(store.all_snapshots().len(), 5);
}

#[test]
fn test_probe_failure_leaves_snapshots_alone() {
    struct BrokenProbe;
    impl DiskProbe for BrokenProbe {
        fn usage(&self, path: &Path) -> Result<DiskUsage> {
            Err(SnapError::disk_probe(path, "unsupported"))
        }
    }

    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    create_source_tree(&source);
    let engine = BackupEngineBuilder::new(BackupConfig::new(&source, dir.path().join("backup")))
        .disk_probe(Box::new(BrokenProbe))
        .build()
        .unwrap();

    let report = engine.run(DueTiers::from_tiers(&[Tier::Daily]), hour(23)).unwrap();
    assert_eq!(report.created.len(), 1);
    assert!(report.reclaim.is_none());
    assert_eq!(engine.store().all_snapshots().len(), 1);
}

#[test]
fn test_run_with_nothing_due_changes_nothing() {
    let h = BackupHarness::new();
    h.disk.set(99);

    let report = h.engine.run(DueTiers::default(), hour(10)).unwrap();
    assert!(!report.has_changes());
    assert!(report.reclaim.is_none());
    // not even the lock file or the tier directories
    assert!(!h.target.exists());

    h.disk.set(10);
    h.hourly(hour(11));
    let partial = h.target.join("hourly").join("2025-01-13_0900");
    fs::create_dir_all(&partial).unwrap();
    h.disk.set(99);

    let report = h.engine.run(DueTiers::default(), hour(12)).unwrap();
    assert!(report.purged.is_empty());
    assert!(report.reclaim.is_none());
    assert!(partial.is_dir());
    assert_eq!(h.hourly_ids(), vec!["2025-01-14_1100"]);
}

#[test]
fn test_run_purges_partial_copies_before_materializing() {
    let h = BackupHarness::new();
    h.hourly(hour(10));
    let partial = h.target.join("hourly").join("2025-01-14_0900");
    fs::create_dir_all(&partial).unwrap();
    fs::write(partial.join("big.bin"), vec![0u8; 4096]).unwrap();

    let report = h.engine.run(DueTiers::from_tiers(&[Tier::Hourly]), hour(11)).unwrap();

    assert_eq!(report.purged, vec!["hourly/2025-01-14_0900"]);
    assert!(!partial.exists());
    assert_eq!(h.hourly_ids(), vec!["2025-01-14_1000", "2025-01-14_1100"]);
}
