//! Main test module for tiersnap
//!
//! This module includes all test suites:
//! - Integration tests for whole-run scenarios
//! - Property-based tests for invariants
//! - Edge cases that do not fit elsewhere

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::tiersnap::*;
    use chrono::{Local, TimeZone};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_source_directory() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        let config = BackupConfig::new(&source, dir.path().join("backup"));
        let engine = BackupEngine::from_config(config).unwrap();
        let now = Local.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();

        let report = engine.run(DueTiers::from_tiers(&[Tier::Hourly]), now).unwrap();

        assert_eq!(report.created.len(), 1);
        let snapshot = &report.created[0];
        assert_eq!(snapshot.file_count, 0);
        assert!(snapshot.source_fingerprint.is_some());
    }

    #[test]
    fn test_python_era_record_is_listed() {
        // records written by the earlier tool carry a local time without offset
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.init().unwrap();
        let snap = store.tier_dir(Tier::Hourly).join("2025-01-15_1000");
        fs::create_dir_all(&snap).unwrap();
        fs::write(
            snap.join("backup_info.json"),
            r#"{
                "timestamp": "2025-01-15_1000",
                "created_at": "2025-01-15T10:00:03.518223",
                "type": "hourly",
                "source_directory": "C:\\data",
                "compressed": false,
                "compression_level": null,
                "directory_hash": "0cc175b9c0f1b6a831c399e269772661",
                "file_count": 12,
                "is_symlink": false
            }"#,
        )
        .unwrap();

        let listed = store.list_snapshots(Tier::Hourly).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].file_count, 12);
        assert_eq!(
            listed[0].created_at.with_timezone(&Local).format("%H:%M:%S").to_string(),
            "10:00:03"
        );
    }

    #[test]
    fn test_hidden_and_tmp_entries_in_tier_dir_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.init().unwrap();
        let tier_dir = store.tier_dir(Tier::Daily);
        fs::create_dir_all(tier_dir.join(".staging")).unwrap();
        fs::write(tier_dir.join("2025-01-15.backup_info.tmp"), b"{}").unwrap();
        fs::write(tier_dir.join("Thumbs.db"), b"x").unwrap();

        assert!(store.list_snapshots(Tier::Daily).unwrap().is_empty());
    }
}
