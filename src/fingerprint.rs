//! Directory fingerprinting for change detection
//!
//! A fingerprint summarizes the *shape* of a source tree: for every backed-up
//! file it hashes `relative_path:mtime:size`, never the file contents. Two
//! scans of an untouched tree yield the same digest, while adding, removing,
//! resizing or touching a file changes it. A content edit that preserves both
//! size and modification time is not detected.
//!
//! ## Walk order
//!
//! Entries are visited in lexicographic file-name order within each
//! directory, so the digest does not depend on the order in which the file
//! system enumerates entries.
//!
//! ## File cap
//!
//! The walk stops after `max_files` files. Trees that differ only beyond the
//! cap produce the same digest.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tiersnap::fingerprint::FingerprintCalculator;
//! use std::path::Path;
//!
//! let calculator = FingerprintCalculator::new(1000);
//! let fp = calculator.fingerprint(Path::new("./data"));
//! if let Some(digest) = &fp.digest {
//!     println!("{} ({} files)", digest, fp.file_count);
//! }
//! ```

use crate::error::{Result, SnapError};
use crate::types::Fingerprint;
use crate::utils;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

/// Default cap on the number of files fed into a fingerprint
pub const DEFAULT_MAX_FILES: usize = 1000;

/// Computes fingerprints of source trees
#[derive(Debug, Clone)]
pub struct FingerprintCalculator {
    max_files: usize,
}

impl Default for FingerprintCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILES)
    }
}

impl FingerprintCalculator {
    /// Create a calculator that stops after `max_files` files (minimum 1)
    pub fn new(max_files: usize) -> Self {
        Self {
            max_files: max_files.max(1),
        }
    }

    /// File cap of this calculator
    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Fingerprint `source`, degrading to [`Fingerprint::unavailable`] on failure
    ///
    /// Scan failures are logged and never propagated: a missing fingerprint
    /// simply forces the full-copy path.
    pub fn fingerprint(&self, source: &Path) -> Fingerprint {
        match self.try_fingerprint(source) {
            Ok(fp) => fp,
            Err(e) if e.is_recoverable() => {
                warn!("Fingerprint unavailable: {}", e);
                Fingerprint::unavailable()
            }
            Err(e) => {
                error!("Fingerprint of {:?} failed: {}", source, e);
                Fingerprint::unavailable()
            }
        }
    }

    /// Fingerprint `source`, reporting unrecoverable scan failures
    ///
    /// # Errors
    ///
    /// - [`SnapError::Scan`] if the root is missing, is not a directory, or
    ///   cannot be read during the walk
    ///
    /// Errors on individual entries below the root are logged and skipped.
    pub fn try_fingerprint(&self, source: &Path) -> Result<Fingerprint> {
        if !source.is_dir() {
            return Err(SnapError::scan(source, "not a directory"));
        }

        let mut hasher = Sha256::new();
        let mut file_count = 0usize;
        let mut truncated = false;

        let walker = WalkDir::new(source)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(utils::is_backed_up_entry);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(SnapError::scan(source, e.to_string()));
                }
                Err(e) => {
                    warn!("Skipping unreadable entry during fingerprint: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Cannot stat {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            let mtime = match metadata.modified() {
                Ok(modified) => match modified.duration_since(UNIX_EPOCH) {
                    Ok(d) => format!("{}.{:09}", d.as_secs(), d.subsec_nanos()),
                    Err(e) => format!("-{}", e.duration().as_secs_f64()),
                },
                Err(e) => {
                    warn!("No modification time for {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            let relative = utils::make_relative(entry.path(), source)?;

            let record = format!("{}:{}:{}", utils::slash_path(&relative), mtime, metadata.len());
            hasher.update(record.as_bytes());
            file_count += 1;

            if file_count >= self.max_files {
                debug!("File cap of {} reached, fingerprint truncated", self.max_files);
                truncated = true;
                break;
            }
        }

        // The root can vanish after the walk started without walkdir noticing
        if !source.is_dir() {
            return Err(SnapError::scan(source, "source vanished during scan"));
        }

        hasher.update(format!("file_count:{}", file_count).as_bytes());
        let digest = hex::encode(hasher.finalize());
        debug!("Fingerprint of {:?}: {} ({} files)", source, &digest[..8], file_count);

        Ok(Fingerprint {
            digest: Some(digest),
            file_count,
            truncated,
        })
    }
}
