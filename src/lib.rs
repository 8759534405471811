//! # tiersnap - Tiered snapshot backups
//!
//! A backup engine that keeps hourly, daily and weekly snapshots of one
//! source directory, each tier with its own fixed retention, and evicts the
//! oldest snapshots when the backup disk fills up.
//!
//! ## Overview
//!
//! tiersnap is meant to be run once an hour by an external scheduler. Every
//! run:
//! - Decides which tiers are due (hourly always, daily and weekly near the
//!   end of the day and week)
//! - Fingerprints the source tree and, when nothing changed since the tier's
//!   last snapshot, records a cheap *reference* to that snapshot instead of
//!   copying again
//! - Otherwise copies the tree into a plain directory or a zip archive
//! - Prunes each tier down to its retention limit (24 / 30 / 52)
//! - Deletes the globally oldest snapshots while disk usage stays above the
//!   configured maximum
//!
//! ## Architecture
//!
//! - **Fingerprint**: SHA-256 over `path:mtime:size` of every backed-up file,
//!   capped at a configurable number of files
//! - **Store**: the tier directories are the only state; each snapshot carries
//!   a `backup_info.json` record and anything without a readable record is
//!   ignored
//! - **Materializer**: creates exactly one snapshot per call, writing content
//!   before its record so an interrupted run never registers a partial copy
//! - **Retention / Reclaimer**: count-based pruning per tier and usage-based
//!   eviction across tiers
//! - **Engine**: runs the above in order under an exclusive lock on the
//!   target directory
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tiersnap::{BackupConfig, BackupEngine};
//!
//! # fn main() -> tiersnap::Result<()> {
//! let mut config = BackupConfig::new("/data", "/mnt/backup");
//! config.compress_backup = true;
//!
//! let engine = BackupEngine::from_config(config)?;
//! let report = engine.run_now()?;
//! println!("created {} snapshots", report.created.len());
//!
//! for snapshot in engine.store().all_snapshots() {
//!     println!("{}", snapshot.display_format());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Target Layout
//!
//! ```text
//! /mnt/backup/
//! ├── .tiersnap.lock
//! ├── hourly/
//! │   ├── 2025-01-15_1000/                    # directory snapshot
//! │   ├── 2025-01-15_1100 -> .../2025-01-15_1000
//! │   └── 2025-01-15_1100.backup_info.json    # reference record
//! ├── daily/
//! │   └── 2025-01-15.zip                      # archive snapshot
//! └── weekly/
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, SnapError>`. Errors are contained per
//! tier and per snapshot: a run reports failed tiers in its
//! [`RunReport`] rather than aborting.
//!
//! ## Module Organization
//!
//! - [`engine`]: run orchestration and builder
//! - [`materializer`]: full copies and references
//! - [`store`]: enumeration and deletion of snapshots
//! - [`fingerprint`]: change detection
//! - [`archive`]: the zip representation
//! - [`copy`]: the mirror copy primitive
//! - [`retention`] and [`reclaim`]: pruning and eviction
//! - [`schedule`]: which tiers are due
//! - [`config`]: the JSON configuration file
//! - [`types`]: common types and data structures
//! - [`error`]: error types and handling

// Public API modules
pub mod archive;
pub mod config;
pub mod copy;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod lock;
pub mod materializer;
pub mod metadata;
pub mod reclaim;
pub mod retention;
pub mod schedule;
pub mod store;
pub mod types;

// Internal modules (not part of public API)
mod utils;

// Re-export main types for convenience
pub use config::BackupConfig;
pub use copy::{CopyPrimitive, CopyStatus, MirrorCopy};
pub use engine::{BackupEngine, BackupEngineBuilder};
pub use error::{Result, SnapError};
pub use fingerprint::FingerprintCalculator;
pub use materializer::{MaterializeOptions, Materializer};
pub use reclaim::{DiskProbe, DiskUsage, Fs2DiskProbe, SpaceReclaimer};
pub use retention::RetentionEnforcer;
pub use schedule::{DueTiers, Schedule};
pub use store::SnapshotStore;
pub use types::*;
