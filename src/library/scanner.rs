//! Books directory scanner.
//!
//! Walks the books directory one file at a time, skips paths already in the
//! database, extracts EPUB/PDF metadata and stores a row per new file. A file
//! whose extraction degraded still gets a row (filename title, placeholder
//! cover); only database failures count as errors.

use crate::config::BookFormat;
use crate::covers::CoverStore;
use crate::db::{Database, NewBook, StoredBook};
use crate::error::Result;
use crate::formats;
use serde::{Deserialize, Serialize};
use std::path::Path;
use walkdir::WalkDir;

/// Overall outcome of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// The directory was walked.
    Success,
    /// The directory could not be walked at all.
    Error,
}

/// Scan summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Overall outcome.
    pub status: ScanStatus,
    /// Human-readable summary.
    pub message: String,
    /// Regular files visited.
    pub scanned_files: usize,
    /// Books created.
    pub new_books: usize,
    /// Books created from a degraded extraction.
    pub degraded: usize,
    /// Files that could not be stored.
    pub errors: usize,
}

impl ScanReport {
    fn empty() -> Self {
        Self {
            status: ScanStatus::Success,
            message: String::new(),
            scanned_files: 0,
            new_books: 0,
            degraded: 0,
            errors: 0,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            status: ScanStatus::Error,
            message,
            ..Self::empty()
        }
    }
}

/// Scans a directory into the database.
pub struct Scanner<'a> {
    db: &'a Database,
    covers: &'a CoverStore,
    recursive: bool,
}

impl<'a> Scanner<'a> {
    /// Create a scanner that only looks at the top level of the directory.
    pub fn new(db: &'a Database, covers: &'a CoverStore) -> Self {
        Self {
            db,
            covers,
            recursive: false,
        }
    }

    /// Descend into subdirectories.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Scan `dir`, creating a book for every new EPUB/PDF file.
    pub fn scan(&self, dir: &Path) -> ScanReport {
        if !dir.is_dir() {
            tracing::warn!(path = %dir.display(), "Books directory does not exist");
            return ScanReport::failed(format!(
                "Scanning failed: {} is not a directory",
                dir.display()
            ));
        }

        if let Err(e) = self.covers.ensure_dir() {
            return ScanReport::failed(format!("Scanning failed: {}", e));
        }

        let start = std::time::Instant::now();
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut report = ScanReport::empty();

        tracing::info!(path = %dir.display(), recursive = self.recursive, "Scanning books directory");

        let entries = WalkDir::new(dir)
            .follow_links(true)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file());

        for entry in entries {
            report.scanned_files += 1;
            let path = entry.path();
            let file_path = path.to_string_lossy().to_string();

            match self.db.get_book_by_path(&file_path) {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %file_path, error = %e, "Failed to look up book");
                    report.errors += 1;
                    continue;
                }
            }

            let Some(format) = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(BookFormat::from_extension)
            else {
                continue;
            };

            let file_size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            match self.import(path, format, file_size) {
                Ok((_, degraded)) => {
                    report.new_books += 1;
                    if degraded {
                        report.degraded += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %file_path, error = %e, "Failed to store book");
                    report.errors += 1;
                }
            }
        }

        report.message = "Scanning completed".to_string();
        tracing::info!(
            scanned = report.scanned_files,
            new = report.new_books,
            degraded = report.degraded,
            errors = report.errors,
            elapsed = ?start.elapsed(),
            "Scan complete"
        );

        report
    }

    /// Extract one file and insert it. The flag tells whether extraction degraded.
    pub fn import(
        &self,
        path: &Path,
        format: BookFormat,
        file_size: u64,
    ) -> Result<(StoredBook, bool)> {
        let extraction = formats::get_handler(format).extract(path, self.covers);
        let degraded = extraction.is_degraded();
        let metadata = extraction.into_metadata();

        let book = NewBook {
            title: metadata.title,
            author: metadata.author,
            file_path: path.to_string_lossy().to_string(),
            file_type: format.as_str().to_string(),
            file_size: i64::try_from(file_size).unwrap_or(i64::MAX),
            pages: metadata.pages.map(i64::from),
            cover_path: metadata
                .cover_path
                .map(|p| p.to_string_lossy().to_string()),
            isbn: metadata.isbn,
        };

        let stored = self.db.insert_book(&book)?;
        tracing::debug!(id = stored.id, title = %stored.title, "Added book");
        Ok((stored, degraded))
    }
}
