//! Property-based testing for tiersnap
//!
//! Uses proptest to verify the fingerprint and retention invariants across
//! randomly generated source trees and snapshot counts.

use ::tiersnap::*;
use chrono::{Duration, TimeZone, Utc};
use filetime::{set_file_mtime, FileTime};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tiersnap::metadata::{self, BackupInfo};

/// Generate random relative file paths (never hidden)
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let dir_strategy = prop::collection::vec("[a-z]{1,8}", 0..=3);
    let filename_strategy = prop_oneof![
        "file[0-9]{1,3}\\.txt".prop_map(|s| s),
        "[a-z]{3,10}\\.(rs|md|json)".prop_map(|s| s),
    ];
    (dir_strategy, filename_strategy).prop_map(|(dirs, filename)| {
        let mut path = PathBuf::new();
        for dir in dirs {
            path.push(format!("d_{}", dir));
        }
        path.join(filename)
    })
}

/// Generate a tree: relative path -> (content, mtime seconds)
fn tree_strategy() -> impl Strategy<Value = BTreeMap<PathBuf, (Vec<u8>, i64)>> {
    prop::collection::btree_map(
        path_strategy(),
        (
            prop::collection::vec(any::<u8>(), 0..256),
            1_600_000_000i64..1_700_000_000,
        ),
        0..20,
    )
}

fn write_tree(root: &Path, tree: &BTreeMap<PathBuf, (Vec<u8>, i64)>) {
    fs::create_dir_all(root).unwrap();
    for (path, (content, mtime)) in tree {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, content).unwrap();
        set_file_mtime(&full, FileTime::from_unix_time(*mtime, 0)).unwrap();
    }
}

fn put_hourly(store: &SnapshotStore, index: i64) -> String {
    let created_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::hours(index);
    let id = created_at.format("%Y-%m-%d_%H%M").to_string();
    let dir = store.tier_dir(Tier::Hourly).join(&id);
    fs::create_dir_all(&dir).unwrap();
    let info = BackupInfo {
        timestamp: id.clone(),
        created_at,
        tier: Tier::Hourly,
        source_directory: PathBuf::from("/data"),
        compressed: false,
        compression_level: None,
        directory_hash: None,
        file_count: 0,
        is_symlink: false,
        symlink_target: None,
    };
    metadata::write_directory_record(&dir, &info).unwrap();
    id
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_identical_trees_have_identical_fingerprints(tree in tree_strategy()) {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write_tree(a.path(), &tree);
        write_tree(b.path(), &tree);

        let calc = FingerprintCalculator::default();
        let fa = calc.fingerprint(a.path());
        let fb = calc.fingerprint(b.path());
        prop_assert!(fa.is_available());
        prop_assert_eq!(fa.file_count, tree.len());
        prop_assert_eq!(fa, fb);
    }

    #[test]
    fn prop_adding_a_file_changes_the_fingerprint(
        tree in tree_strategy(),
        extra in path_strategy(),
    ) {
        prop_assume!(!tree.contains_key(&extra));
        // a new file must not replace an existing file or directory
        prop_assume!(!tree.keys().any(|p| p.starts_with(&extra) || extra.starts_with(p)));

        let dir = TempDir::new().unwrap();
        write_tree(dir.path(), &tree);
        let calc = FingerprintCalculator::default();
        let before = calc.fingerprint(dir.path());

        let full = dir.path().join(&extra);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, b"extra").unwrap();
        let after = calc.fingerprint(dir.path());

        prop_assert_eq!(after.file_count, before.file_count + 1);
        prop_assert_ne!(after.digest, before.digest);
    }

    #[test]
    fn prop_retention_keeps_newest_up_to_limit(count in 0i64..40) {
        let root = TempDir::new().unwrap();
        let store = SnapshotStore::new(root.path());
        store.init().unwrap();
        let ids: Vec<String> = (0..count).map(|i| put_hourly(&store, i)).collect();

        let stats = RetentionEnforcer::new().enforce(&store, Tier::Hourly).unwrap();
        let limit = Tier::Hourly.retention_limit();
        let expected_deleted = ids.len().saturating_sub(limit);

        prop_assert_eq!(stats.deleted.len(), expected_deleted);
        let remaining: Vec<String> = store
            .list_snapshots(Tier::Hourly)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        prop_assert_eq!(remaining, ids[expected_deleted..].to_vec());
    }
}
