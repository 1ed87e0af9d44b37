pub mod cover;
mod epub;
pub mod opf;
mod pdf;

pub use epub::EpubHandler;
pub use pdf::PdfHandler;

use crate::config::BookFormat;
use crate::covers::{CoverStore, SourceDigest};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Author recorded when a file does not name one.
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// What extraction learned about one book file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookMetadata {
    /// Book title, the file stem when the file has none.
    pub title: String,
    /// First author, [`UNKNOWN_AUTHOR`] when absent.
    pub author: String,
    /// Page count for formats that have one.
    pub pages: Option<u32>,
    /// JPEG cover written by the [`CoverStore`].
    pub cover_path: Option<PathBuf>,
    /// Declared language, EPUB only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// ISBN found among the package identifiers, EPUB only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
}

impl BookMetadata {
    /// Defaults derived from the file name alone.
    pub fn from_path(path: &Path) -> Self {
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string();

        Self {
            title,
            author: UNKNOWN_AUTHOR.to_string(),
            pages: None,
            cover_path: None,
            language: None,
            isbn: None,
        }
    }
}

/// Result of extracting one file. Never an error: failures degrade.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Every step succeeded.
    Complete(BookMetadata),
    /// A step failed; the metadata holds defaults for what could not be read.
    Degraded {
        /// Best-effort metadata.
        metadata: BookMetadata,
        /// First failure encountered.
        reason: String,
    },
}

impl Extraction {
    /// Metadata, whatever happened.
    pub fn into_metadata(self) -> BookMetadata {
        match self {
            Extraction::Complete(metadata) | Extraction::Degraded { metadata, .. } => metadata,
        }
    }

    /// Borrow the metadata.
    pub fn metadata(&self) -> &BookMetadata {
        match self {
            Extraction::Complete(metadata) | Extraction::Degraded { metadata, .. } => metadata,
        }
    }

    /// Whether something went wrong along the way.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Extraction::Degraded { .. })
    }
}

/// Accumulates a [`BookMetadata`] and remembers the first failure.
pub(crate) struct ExtractionBuilder {
    metadata: BookMetadata,
    failure: Option<String>,
}

impl ExtractionBuilder {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            metadata: BookMetadata::from_path(path),
            failure: None,
        }
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut BookMetadata {
        &mut self.metadata
    }

    /// Record a failure; only the first one is kept as the reason.
    pub(crate) fn degrade(&mut self, reason: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(reason.into());
        }
    }

    /// Write a placeholder at the digest-derived path.
    pub(crate) fn placeholder(&mut self, covers: &CoverStore, digest: &SourceDigest) {
        match covers.placeholder_for_digest(&self.metadata.title, digest) {
            Ok(path) => self.metadata.cover_path = Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to write placeholder cover");
                self.metadata.cover_path = None;
                self.degrade(format!("placeholder: {}", e));
            }
        }
    }

    pub(crate) fn finish(self) -> Extraction {
        match self.failure {
            None => Extraction::Complete(self.metadata),
            Some(reason) => Extraction::Degraded {
                metadata: self.metadata,
                reason,
            },
        }
    }
}

/// Trait for format-specific metadata extractors.
pub trait FormatHandler: Send + Sync {
    /// Extract metadata and materialize a cover (real or placeholder).
    fn extract(&self, path: &Path, covers: &CoverStore) -> Extraction;
}

/// Get the appropriate handler for a book format.
pub fn get_handler(format: BookFormat) -> Box<dyn FormatHandler> {
    match format {
        BookFormat::Epub => Box::new(EpubHandler),
        BookFormat::Pdf => Box::new(PdfHandler),
    }
}

/// Extract a file, picking the handler from its extension.
pub fn extract_file(path: &Path, covers: &CoverStore) -> Option<Extraction> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(BookFormat::from_extension)?;

    Some(get_handler(format).extract(path, covers))
}

/// Read a book file and digest it. When the file cannot be read the digest
/// falls back to the path string so a placeholder still has a stable name.
pub(crate) fn read_source(
    path: &Path,
    builder: &mut ExtractionBuilder,
) -> (Option<Vec<u8>>, SourceDigest) {
    match std::fs::read(path) {
        Ok(data) => {
            let digest = SourceDigest::of_bytes(&data);
            (Some(data), digest)
        }
        Err(e) => {
            builder.degrade(format!("read {}: {}", path.display(), e));
            let digest = SourceDigest::of_bytes(path.to_string_lossy().as_bytes());
            (None, digest)
        }
    }
}
