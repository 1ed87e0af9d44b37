//! EPUB format handler.

use crate::covers::{CoverStore, SourceDigest};
use crate::formats::cover::{self, CoverCandidate, CoverLookup};
use crate::formats::opf::{self, EpubContainer};
use crate::formats::{Extraction, ExtractionBuilder, FormatHandler, read_source};
use std::path::Path;

/// Handler for EPUB files.
pub struct EpubHandler;

impl EpubHandler {
    /// Extract from an archive already held in memory.
    ///
    /// `digest` names the cover file; callers pass the digest of the source
    /// file the bytes came from.
    pub fn extract_bytes(
        path: &Path,
        data: Vec<u8>,
        digest: &SourceDigest,
        covers: &CoverStore,
    ) -> Extraction {
        let mut builder = ExtractionBuilder::new(path);
        Self::extract_into(&mut builder, data, digest, covers);
        builder.finish()
    }

    fn extract_into(
        builder: &mut ExtractionBuilder,
        data: Vec<u8>,
        digest: &SourceDigest,
        covers: &CoverStore,
    ) {
        let mut container = match EpubContainer::from_bytes(data) {
            Ok(container) => container,
            Err(e) => {
                builder.degrade(format!("archive: {}", e));
                builder.placeholder(covers, digest);
                return;
            }
        };

        let package = opf::locate_package(&mut container);
        match &package {
            Some(package) => {
                let metadata = builder.metadata_mut();
                if let Some(title) = package.document.title() {
                    metadata.title = title.to_string();
                }
                if let Some(author) = package.document.creator() {
                    metadata.author = author.to_string();
                }
                metadata.language = package.document.language().map(String::from);
                metadata.isbn = package.document.isbn();
            }
            None => builder.degrade("no package document"),
        }

        match cover::resolve_cover(&mut container, package.as_ref()) {
            CoverLookup::Found(candidate) => {
                if let Err(reason) =
                    Self::save_candidate(&mut container, &candidate, digest, covers, builder)
                {
                    tracing::debug!(
                        path = %candidate.path,
                        error = %reason,
                        "Cover candidate unusable"
                    );
                    builder.degrade(reason);
                    builder.placeholder(covers, digest);
                }
            }
            CoverLookup::NotFound => builder.placeholder(covers, digest),
        }
    }

    fn save_candidate(
        container: &mut EpubContainer,
        candidate: &CoverCandidate,
        digest: &SourceDigest,
        covers: &CoverStore,
        builder: &mut ExtractionBuilder,
    ) -> std::result::Result<(), String> {
        let raw = container
            .read(&candidate.path)
            .map_err(|e| format!("cover {}: {}", candidate.path, e))?;
        let saved = covers
            .save_for_digest(&raw, digest)
            .map_err(|e| format!("cover {}: {}", candidate.path, e))?;

        builder.metadata_mut().cover_path = Some(saved);
        Ok(())
    }
}

impl FormatHandler for EpubHandler {
    fn extract(&self, path: &Path, covers: &CoverStore) -> Extraction {
        let mut builder = ExtractionBuilder::new(path);
        let (data, digest) = read_source(path, &mut builder);

        match data {
            Some(data) => Self::extract_into(&mut builder, data, &digest, covers),
            None => builder.placeholder(covers, &digest),
        }

        let extraction = builder.finish();
        if let Extraction::Degraded { reason, .. } = &extraction {
            tracing::warn!(path = %path.display(), reason = %reason, "EPUB extraction degraded");
        }
        extraction
    }
}
