//! Backup orchestration
//!
//! [`BackupEngine`] ties the components together. One run:
//!
//! 1. takes the run lock on the target directory,
//! 2. materializes one snapshot per due tier (a failing tier is recorded and
//!    the remaining tiers still run),
//! 3. if at least one snapshot was created, enforces retention on every tier
//!    and then runs one space reclamation pass.
//!
//! A run that creates nothing leaves the target directory untouched apart
//! from the lock file.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tiersnap::{BackupConfig, BackupEngine};
//! use std::path::Path;
//!
//! # fn main() -> tiersnap::Result<()> {
//! let config = BackupConfig::load(Path::new("config/back_config.json"))?;
//! let engine = BackupEngine::from_config(config)?;
//!
//! let report = engine.run_now()?;
//! for snapshot in &report.created {
//!     println!("{}", snapshot.display_format());
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::BackupConfig;
use crate::copy::{CopyPrimitive, MirrorCopy};
use crate::error::Result;
use crate::fingerprint::FingerprintCalculator;
use crate::lock::RunLock;
use crate::materializer::{MaterializeOptions, Materializer};
use crate::reclaim::{DiskProbe, DiskUsage, Fs2DiskProbe, SpaceReclaimer};
use crate::retention::RetentionEnforcer;
use crate::schedule::{DueTiers, Schedule};
use crate::store::SnapshotStore;
use crate::types::{Fingerprint, ReclaimStats, RetentionStats, RunReport, TierFailure};
use chrono::{DateTime, Local};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Runs tiered backups of one source directory into one target directory
#[derive(Debug)]
pub struct BackupEngine {
    config: BackupConfig,
    options: MaterializeOptions,
    store: SnapshotStore,
    materializer: Materializer,
    retention: RetentionEnforcer,
    reclaimer: SpaceReclaimer,
    schedule: Schedule,
}

impl BackupEngine {
    /// Engine with the native copy primitive, disk probe and default schedule
    ///
    /// # Errors
    ///
    /// - [`SnapError::InvalidConfiguration`](crate::SnapError::InvalidConfiguration)
    ///   if `config` does not validate
    pub fn from_config(config: BackupConfig) -> Result<Self> {
        BackupEngineBuilder::new(config).build()
    }

    /// Configuration the engine was built from
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Store over the target directory
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Schedule used by [`run_at`](Self::run_at)
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Run the tiers due right now
    pub fn run_now(&self) -> Result<RunReport> {
        self.run_at(Local::now())
    }

    /// Run the tiers the schedule marks as due at `now`
    pub fn run_at(&self, now: DateTime<Local>) -> Result<RunReport> {
        self.run(self.schedule.due_at(&now), now)
    }

    /// Materialize the `due` tiers at `now`, then prune and reclaim
    ///
    /// Per-tier materialization failures end up in
    /// [`RunReport::failures`]; retention and reclamation problems are logged
    /// and reflected in the report.
    ///
    /// # Errors
    ///
    /// - [`SnapError::Locked`](crate::SnapError::Locked) if another run is
    ///   active on the same target
    /// - [`SnapError::Io`](crate::SnapError::Io) if the tier directories
    ///   cannot be created
    #[instrument(skip(self))]
    pub fn run(&self, due: DueTiers, now: DateTime<Local>) -> Result<RunReport> {
        let start = Instant::now();
        let mut report = RunReport::default();
        if due.is_empty() {
            info!("No tier due, nothing to do");
            return Ok(report);
        }

        let _lock = RunLock::acquire(self.store.root())?;
        self.store.init()?;
        report.purged = self.store.purge_invalid();

        for tier in due.tiers() {
            match self.materializer.materialize(
                &self.config.source_directory,
                &self.store,
                tier,
                &self.options,
                now,
            ) {
                Ok(snapshot) => report.created.push(snapshot),
                Err(e) => {
                    if e.is_materialization_failure() {
                        warn!("{} snapshot not taken: {}", tier, e);
                    } else {
                        error!("{} snapshot failed: {}", tier, e);
                    }
                    report.failures.push(TierFailure {
                        tier,
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.has_changes() {
            report.retention = self.retention.enforce_all(&self.store);
            report.reclaim = match self.reclaimer.reclaim(
                &self.store,
                self.store.root(),
                self.config.max_disk_usage_percent,
            ) {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!("Space reclamation skipped: {}", e);
                    None
                }
            };
        } else {
            info!("No snapshot created, skipping retention and reclamation");
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Run finished: {} created, {} failed in {}ms",
            report.created.len(),
            report.failures.len(),
            report.duration_ms
        );
        Ok(report)
    }

    /// Enforce retention on every tier outside a run
    pub fn prune(&self) -> Result<Vec<RetentionStats>> {
        let _lock = RunLock::acquire(self.store.root())?;
        Ok(self.retention.enforce_all(&self.store))
    }

    /// Run one reclamation pass against `max_percent` outside a run
    pub fn reclaim(&self, max_percent: f64) -> Result<ReclaimStats> {
        let _lock = RunLock::acquire(self.store.root())?;
        self.reclaimer.reclaim(&self.store, self.store.root(), max_percent)
    }

    /// Usage of the file system holding the target directory
    pub fn disk_usage(&self) -> Result<DiskUsage> {
        self.reclaimer.usage(self.store.root())
    }

    /// Current fingerprint of the source directory
    pub fn fingerprint(&self) -> Fingerprint {
        self.materializer
            .fingerprinter()
            .fingerprint(&self.config.source_directory)
    }
}

/// Builder for [`BackupEngine`]
///
/// Defaults to [`MirrorCopy`] configured from the config's retry settings,
/// [`Fs2DiskProbe`] and [`Schedule::default`].
///
/// # Example
///
/// ```rust,no_run
/// use tiersnap::{BackupConfig, BackupEngineBuilder, Schedule};
///
/// # fn main() -> tiersnap::Result<()> {
/// let engine = BackupEngineBuilder::new(BackupConfig::new("/data", "/mnt/backup"))
///     .schedule(Schedule::default())
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct BackupEngineBuilder {
    config: BackupConfig,
    copier: Option<Box<dyn CopyPrimitive>>,
    probe: Option<Box<dyn DiskProbe>>,
    schedule: Schedule,
}

impl BackupEngineBuilder {
    /// Start from `config`
    pub fn new(config: BackupConfig) -> Self {
        Self {
            config,
            copier: None,
            probe: None,
            schedule: Schedule::default(),
        }
    }

    /// Use `copier` for directory snapshots
    pub fn copy_primitive(mut self, copier: Box<dyn CopyPrimitive>) -> Self {
        self.copier = Some(copier);
        self
    }

    /// Measure disk usage with `probe`
    pub fn disk_probe(mut self, probe: Box<dyn DiskProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Decide due tiers with `schedule`
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Validate the configuration and build the engine
    pub fn build(self) -> Result<BackupEngine> {
        self.config.validate()?;

        let copier = self.copier.unwrap_or_else(|| {
            Box::new(MirrorCopy::new(self.config.copy_retries, self.config.copy_wait()))
        });
        let probe = self.probe.unwrap_or_else(|| Box::new(Fs2DiskProbe));

        Ok(BackupEngine {
            options: self.config.materialize_options(),
            store: SnapshotStore::new(&self.config.target_directory),
            materializer: Materializer::new(
                copier,
                FingerprintCalculator::new(self.config.max_hash_files),
            ),
            retention: RetentionEnforcer::new(),
            reclaimer: SpaceReclaimer::new(probe),
            schedule: self.schedule,
            config: self.config,
        })
    }
}
