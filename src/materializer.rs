//! Snapshot materialization
//!
//! The materializer turns "take a snapshot of this tier now" into exactly one
//! new entry in the tier directory. It picks one of two paths:
//!
//! - **Reference**: deduplication is enabled, the source fingerprint is
//!   available and equals the fingerprint recorded by the tier's most recent
//!   snapshot. A link to that snapshot's content plus a sidecar record is
//!   written; no content bytes are copied. References always point at
//!   materialized storage, so a run of unchanged hours never builds a chain.
//! - **Full copy**: everything else. The source is either mirrored into a
//!   directory through the [`CopyPrimitive`] or streamed into a zip archive.
//!
//! In both paths the content (or link) exists before its record is written,
//! and a failed full copy removes whatever it left behind. A snapshot whose
//! record is missing is invisible to the store, so an interrupted run never
//! registers a partial snapshot.

use crate::archive::ArchiveWriter;
use crate::copy::{CopyPrimitive, MirrorCopy};
use crate::error::{Result, SnapError};
use crate::fingerprint::FingerprintCalculator;
use crate::metadata::{self, BackupInfo};
use crate::store::SnapshotStore;
use crate::types::{Fingerprint, Representation, Snapshot, Tier};
use crate::utils;
use chrono::{DateTime, Local, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Per-call switches for [`Materializer::materialize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeOptions {
    /// Store full copies as zip archives instead of directories
    pub compress: bool,
    /// Deflate level for archives (0-9)
    pub compression_level: u32,
    /// Create references for unchanged sources
    pub dedup: bool,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            compress: false,
            compression_level: 6,
            dedup: true,
        }
    }
}

/// Creates new snapshots in a [`SnapshotStore`]
pub struct Materializer {
    copier: Box<dyn CopyPrimitive>,
    fingerprinter: FingerprintCalculator,
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer")
            .field("fingerprinter", &self.fingerprinter)
            .finish_non_exhaustive()
    }
}

impl Default for Materializer {
    fn default() -> Self {
        Self::new(Box::new(MirrorCopy::default()), FingerprintCalculator::default())
    }
}

impl Materializer {
    /// Create a materializer using `copier` for directory snapshots
    pub fn new(copier: Box<dyn CopyPrimitive>, fingerprinter: FingerprintCalculator) -> Self {
        Self {
            copier,
            fingerprinter,
        }
    }

    /// Fingerprint calculator used for change detection
    pub fn fingerprinter(&self) -> &FingerprintCalculator {
        &self.fingerprinter
    }

    /// Create the snapshot of `source` for `tier` taken at `now`
    ///
    /// # Arguments
    ///
    /// * `source` - Directory tree to back up
    /// * `store` - Store owning the target base directory
    /// * `tier` - Tier the snapshot belongs to; `now` formatted with the
    ///   tier's label pattern becomes the snapshot id
    /// * `options` - Representation and deduplication switches
    /// * `now` - Creation instant, used for both the id and `created_at`
    ///
    /// # Errors
    ///
    /// - [`SnapError::SourceMissing`] if `source` is not a directory (nothing
    ///   is written)
    /// - [`SnapError::SnapshotExists`] if the tier already holds a snapshot
    ///   with the same id (nothing is written)
    /// - [`SnapError::CopyFailure`] / [`SnapError::Compression`] if the full
    ///   copy fails; the partial target is removed
    #[instrument(skip(self, store, options))]
    pub fn materialize(
        &self,
        source: &Path,
        store: &SnapshotStore,
        tier: Tier,
        options: &MaterializeOptions,
        now: DateTime<Local>,
    ) -> Result<Snapshot> {
        if !source.is_dir() {
            return Err(SnapError::SourceMissing(source.to_path_buf()));
        }

        let id = tier.label_for(&now);
        let tier_dir = store.tier_dir(tier);
        if let Some(existing) = occupied_location(&tier_dir, &id) {
            return Err(SnapError::SnapshotExists(existing));
        }
        fs::create_dir_all(&tier_dir)?;

        let mut fingerprint = None;
        if options.dedup {
            let current = self.fingerprinter.fingerprint(source);
            if let Some(last) = self.dedup_candidate(store, tier, &current) {
                return self.create_reference(
                    source, &tier_dir, tier, &id, &last, &current, options, now,
                );
            }
            fingerprint = Some(current);
        }

        let fingerprint = fingerprint.unwrap_or_else(|| self.fingerprinter.fingerprint(source));
        self.create_full_copy(source, &tier_dir, tier, &id, &fingerprint, options, now)
    }

    /// The tier's last snapshot, if `current` allows deduplicating against it
    fn dedup_candidate(
        &self,
        store: &SnapshotStore,
        tier: Tier,
        current: &Fingerprint,
    ) -> Option<Snapshot> {
        if !current.is_available() {
            return None;
        }
        let last = match store.last_snapshot(tier) {
            Ok(last) => last?,
            Err(e) => {
                warn!("Cannot read last {} snapshot, forcing full copy: {}", tier, e);
                return None;
            }
        };
        if !current.matches(last.source_fingerprint.as_deref()) {
            debug!("Source changed since {}/{}", tier, last.id);
            return None;
        }
        if last.is_orphan() {
            warn!(
                "Source unchanged since {}/{} but its target is gone, forcing full copy",
                tier, last.id
            );
            return None;
        }
        Some(last)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_reference(
        &self,
        source: &Path,
        tier_dir: &Path,
        tier: Tier,
        id: &str,
        last: &Snapshot,
        fingerprint: &Fingerprint,
        options: &MaterializeOptions,
        now: DateTime<Local>,
    ) -> Result<Snapshot> {
        let mut target = last.content_location().to_path_buf();
        if target.is_relative() {
            target = fs::canonicalize(&target)?;
        }
        let location = last.representation.location(tier_dir, id);
        let compressed = last.representation == Representation::Archive;

        let linked = match utils::create_symlink(&target, &location) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Cannot create link {:?} -> {:?} ({}), keeping a pointer record only",
                    location, target, e
                );
                false
            }
        };

        let info = BackupInfo {
            timestamp: id.to_string(),
            created_at: now.with_timezone(&Utc),
            tier,
            source_directory: source.to_path_buf(),
            compressed,
            compression_level: compressed.then_some(options.compression_level),
            directory_hash: fingerprint.digest.clone(),
            file_count: fingerprint.file_count,
            is_symlink: true,
            symlink_target: Some(target.clone()),
        };
        if let Err(e) = metadata::write_sidecar_record(&location, &info) {
            if linked {
                utils::remove_link(&location).ok();
            }
            return Err(e);
        }

        info!("Created {} reference {} -> {:?}", tier, id, target);
        Ok(info.into_snapshot(location))
    }

    #[allow(clippy::too_many_arguments)]
    fn create_full_copy(
        &self,
        source: &Path,
        tier_dir: &Path,
        tier: Tier,
        id: &str,
        fingerprint: &Fingerprint,
        options: &MaterializeOptions,
        now: DateTime<Local>,
    ) -> Result<Snapshot> {
        let start = Instant::now();
        let representation = Representation::from_compressed(options.compress);
        let location = representation.location(tier_dir, id);
        let writer = ArchiveWriter::new(options.compression_level);

        let info = BackupInfo {
            timestamp: id.to_string(),
            created_at: now.with_timezone(&Utc),
            tier,
            source_directory: source.to_path_buf(),
            compressed: options.compress,
            compression_level: options.compress.then_some(writer.level()),
            directory_hash: fingerprint.digest.clone(),
            file_count: fingerprint.file_count,
            is_symlink: false,
            symlink_target: None,
        };

        let written = match representation {
            Representation::Archive => writer
                .write_body(source, &location)
                .and_then(|_| writer.append_metadata(&location, &info))
                .map_err(|e| match e {
                    SnapError::Compression(_) | SnapError::SnapshotExists(_) => e,
                    other => SnapError::compression(other.to_string()),
                }),
            Representation::Directory => {
                let status = self.copier.mirror(source, &location);
                if status.is_success() {
                    metadata::write_directory_record(&location, &info)
                } else {
                    Err(SnapError::CopyFailure {
                        target: location.clone(),
                        code: status.code(),
                    })
                }
            }
        };

        if let Err(e) = written {
            if !matches!(e, SnapError::SnapshotExists(_)) {
                discard_partial(&location);
            }
            return Err(e);
        }

        info!(
            "Created {} snapshot {} ({:?}, {} files) in {:?}",
            tier,
            id,
            representation,
            fingerprint.file_count,
            start.elapsed()
        );
        Ok(info.into_snapshot(location))
    }
}

/// First path already claimed by snapshot `id` inside `tier_dir`, if any
fn occupied_location(tier_dir: &Path, id: &str) -> Option<PathBuf> {
    [Representation::Directory, Representation::Archive]
        .into_iter()
        .map(|r| r.location(tier_dir, id))
        .flat_map(|location| {
            let sidecar = metadata::sidecar_path(&location);
            [location, sidecar]
        })
        .find(|path| fs::symlink_metadata(path).is_ok())
}

/// Best-effort removal of a failed full copy
fn discard_partial(location: &Path) {
    let removed = match fs::symlink_metadata(location) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(location),
        Ok(_) => fs::remove_file(location),
        Err(_) => return,
    };
    match removed {
        Ok(()) => debug!("Removed partial snapshot {:?}", location),
        Err(e) => warn!("Cannot remove partial snapshot {:?}: {}", location, e),
    }
}
