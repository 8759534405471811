//! Compressed archive representation of a snapshot
//!
//! An archive snapshot is a single zip container holding every backed-up
//! file of the source tree (deflate at a configurable level) plus the
//! snapshot's `backup_info.json` record as one extra entry.
//!
//! ## Two-phase write
//!
//! The container body is written and finalized first. Only after that
//! succeeds is the container reopened in append mode and the metadata entry
//! added. A crash in the middle of the body therefore leaves a container
//! without a record, which the store refuses to list, and never a container
//! whose record describes content that is not there.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tiersnap::archive::ArchiveWriter;
//! use std::path::Path;
//!
//! # fn main() -> tiersnap::Result<()> {
//! let writer = ArchiveWriter::new(6);
//! let stats = writer.write_body(Path::new("./data"), Path::new("/backup/daily/2025-01-15.zip"))?;
//! println!("{} files, ratio {:.2}", stats.files_archived, stats.compression_ratio());
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SnapError};
use crate::metadata::{BackupInfo, METADATA_FILE};
use crate::utils;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// File extension of archive snapshots
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Highest accepted deflate level
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Statistics from writing one archive body
#[derive(Debug, Clone, Default)]
pub struct ArchiveStats {
    /// Number of files stored in the container
    pub files_archived: usize,
    /// Files that could not be read and were left out
    pub files_skipped: usize,
    /// Total uncompressed bytes read from the source
    pub bytes_in: u64,
    /// Size of the finished container
    pub bytes_out: u64,
    /// Time spent writing the body in milliseconds
    pub duration_ms: u64,
}

impl ArchiveStats {
    /// Compressed size divided by original size (1.0 when nothing was read)
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_in == 0 {
            1.0
        } else {
            self.bytes_out as f64 / self.bytes_in as f64
        }
    }
}

/// Writes and reads zip snapshot containers
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    level: u32,
}

impl ArchiveWriter {
    /// Create a writer using deflate `level` (clamped to 0..=9)
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(MAX_COMPRESSION_LEVEL),
        }
    }

    /// Deflate level of this writer
    pub fn level(&self) -> u32 {
        self.level
    }

    fn options(&self) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.level as i64))
    }

    /// Phase one: stream the source tree into a new container at `dest`
    ///
    /// Entries are named by their `/`-separated path relative to `source` and
    /// follow the same hidden/deny-list exclusion as the fingerprint walk.
    /// Unreadable files are skipped with a warning; failing to create or
    /// finalize the container is an error.
    ///
    /// # Errors
    ///
    /// - [`SnapError::SnapshotExists`] if `dest` already exists
    /// - [`SnapError::Compression`] if the container cannot be written
    pub fn write_body(&self, source: &Path, dest: &Path) -> Result<ArchiveStats> {
        let start = Instant::now();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => SnapError::SnapshotExists(dest.to_path_buf()),
                _ => SnapError::compression(format!("cannot create {:?}: {}", dest, e)),
            })?;
        let mut zip = ZipWriter::new(BufWriter::new(file));
        let mut stats = ArchiveStats::default();

        let walker = WalkDir::new(source)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(utils::is_backed_up_entry);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(SnapError::compression(format!(
                        "cannot read source {:?}: {}",
                        source, e
                    )));
                }
                Err(e) => {
                    warn!("Skipping unreadable entry while archiving: {}", e);
                    continue;
                }
            };
            // Linked files are archived by content; linked directories are not descended
            let is_file = entry.file_type().is_file()
                || (entry.path_is_symlink() && entry.path().is_file());
            if !is_file {
                continue;
            }

            let relative = utils::make_relative(entry.path(), source)?;
            let name = utils::slash_path(&relative);
            let mut input = match File::open(entry.path()) {
                Ok(input) => input,
                Err(e) => {
                    warn!("Cannot open {:?} for archiving: {}", entry.path(), e);
                    stats.files_skipped += 1;
                    continue;
                }
            };
            let size = input.metadata().map(|m| m.len()).unwrap_or(0);

            zip.start_file(name.as_str(), self.options().large_file(size >= u32::MAX as u64))
                .map_err(|e| SnapError::compression(format!("cannot add {}: {}", name, e)))?;
            let copied = io::copy(&mut input, &mut zip)
                .map_err(|e| SnapError::compression(format!("cannot archive {}: {}", name, e)))?;
            trace!("Archived {} ({} bytes)", name, copied);

            stats.files_archived += 1;
            stats.bytes_in += copied;
        }

        let mut inner = zip
            .finish()
            .map_err(|e| SnapError::compression(format!("cannot finalize {:?}: {}", dest, e)))?;
        inner.flush()?;
        inner
            .into_inner()
            .map_err(|e| SnapError::compression(format!("cannot flush {:?}: {}", dest, e.error())))?
            .sync_all()?;

        stats.bytes_out = fs::metadata(dest)?.len();
        stats.duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Archived {} files into {:?}: {} -> {}",
            stats.files_archived,
            dest,
            utils::format_bytes(stats.bytes_in),
            utils::format_bytes(stats.bytes_out)
        );
        Ok(stats)
    }

    /// Phase two: append the metadata record to a finalized container
    pub fn append_metadata(&self, dest: &Path, info: &BackupInfo) -> Result<()> {
        let file = OpenOptions::new().read(true).write(true).open(dest)?;
        let mut zip = ZipWriter::new_append(file)?;
        zip.start_file(METADATA_FILE, self.options())?;
        zip.write_all(info.to_json()?.as_bytes())?;
        zip.finish()?.sync_all()?;
        trace!("Appended metadata record to {:?}", dest);
        Ok(())
    }
}

/// Read the metadata record embedded in an archive snapshot
pub fn read_archive_record(path: &Path) -> Result<BackupInfo> {
    let file = File::open(path).map_err(|e| SnapError::metadata_read(path, e.to_string()))?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| SnapError::metadata_read(path, e.to_string()))?;
    let mut entry = archive
        .by_name(METADATA_FILE)
        .map_err(|e| SnapError::metadata_read(path, format!("{}: {}", METADATA_FILE, e)))?;
    let mut json = String::new();
    entry
        .read_to_string(&mut json)
        .map_err(|e| SnapError::metadata_read(path, e.to_string()))?;
    BackupInfo::from_json(&json, path)
}

/// Names of every entry in an archive, in container order
pub fn list_entries(path: &Path) -> Result<Vec<String>> {
    let archive = ZipArchive::new(File::open(path)?)?;
    Ok(archive.file_names().map(str::to_string).collect())
}
