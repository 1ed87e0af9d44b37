//! EPUB cover resolution.
//!
//! Real-world EPUBs point at their cover in several incompatible ways, or not
//! at all. Resolution runs an ordered list of strategies and stops at the
//! first one that names an archive entry:
//!
//! 1. the OPF metadata pointer (`<meta name="cover">`) and cover-flagged
//!    manifest items,
//! 2. guide references of type `cover`, following the referenced page to its
//!    first `<img>`,
//! 3. archive entry names and sizes.
//!
//! Each strategy swallows its own parse failures and reports
//! [`CoverLookup::NotFound`] so the next one still runs.

use crate::formats::opf::{self, ArchiveEntry, EpubContainer, Package};
use scraper::{Html, Selector};

/// Strategy that produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverSource {
    /// OPF metadata pointer or cover-flagged manifest item.
    Metadata,
    /// Guide reference of type `cover`.
    Guide,
    /// Entry name or size.
    Heuristic,
}

impl CoverSource {
    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverSource::Metadata => "metadata",
            CoverSource::Guide => "guide",
            CoverSource::Heuristic => "heuristic",
        }
    }
}

/// Archive entry believed to hold the cover image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverCandidate {
    /// Normalized path inside the archive.
    pub path: String,
    /// Strategy that found it.
    pub source: CoverSource,
}

/// Outcome of one strategy, or of the whole chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverLookup {
    /// A candidate was found.
    Found(CoverCandidate),
    /// Nothing usable.
    NotFound,
}

impl CoverLookup {
    fn found(path: String, source: CoverSource) -> Self {
        CoverLookup::Found(CoverCandidate { path, source })
    }

    /// Candidate, if any.
    pub fn candidate(self) -> Option<CoverCandidate> {
        match self {
            CoverLookup::Found(candidate) => Some(candidate),
            CoverLookup::NotFound => None,
        }
    }
}

/// Signature shared by every strategy.
pub type CoverStrategy = fn(&mut EpubContainer, Option<&Package>) -> CoverLookup;

/// Strategies in priority order.
pub const STRATEGIES: [CoverStrategy; 3] = [from_metadata, from_guide, from_entries];

/// Run the strategies in order and return the first hit.
pub fn resolve_cover(container: &mut EpubContainer, package: Option<&Package>) -> CoverLookup {
    for strategy in STRATEGIES {
        if let CoverLookup::Found(candidate) = strategy(container, package) {
            tracing::debug!(
                path = %candidate.path,
                source = candidate.source.as_str(),
                "Resolved cover candidate"
            );
            return CoverLookup::Found(candidate);
        }
    }

    CoverLookup::NotFound
}

/// Whether a name ends in `.jpg`, `.jpeg` or `.png`, ignoring case.
pub fn is_cover_image_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".jpg") || lower.ends_with(".jpeg") || lower.ends_with(".png")
}

fn mentions_cover(text: &str) -> bool {
    text.to_ascii_lowercase().contains("cover")
}

/// Manifest items that are images and either match the declared cover id or
/// carry "cover" in their id or properties. First match in manifest order.
pub fn from_metadata(_container: &mut EpubContainer, package: Option<&Package>) -> CoverLookup {
    let Some(package) = package else {
        return CoverLookup::NotFound;
    };
    let declared = package.document.metadata.cover_id.as_deref();

    package
        .document
        .manifest
        .iter()
        .find(|item| {
            let matches_id = declared.is_some_and(|id| item.id == id);
            let has_keyword = mentions_cover(&item.id) || mentions_cover(&item.properties);
            is_cover_image_name(&item.href) && (matches_id || has_keyword)
        })
        .map(|item| {
            CoverLookup::found(
                opf::resolve_href(&package.dir, &item.href),
                CoverSource::Metadata,
            )
        })
        .unwrap_or(CoverLookup::NotFound)
}

/// Guide references of type `cover`: open the referenced page and take its
/// first `<img src>`. Unreadable pages are skipped.
pub fn from_guide(container: &mut EpubContainer, package: Option<&Package>) -> CoverLookup {
    let Some(package) = package else {
        return CoverLookup::NotFound;
    };

    for reference in package.document.guide.iter().filter(|r| r.kind == "cover") {
        let page_path = opf::resolve_href(&package.dir, &reference.href);

        let content = match container.read_text(&page_path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(page = %page_path, error = %e, "Cover page unreadable");
                continue;
            }
        };

        if let Some(src) = first_image_src(&content) {
            let page_dir = opf::parent_dir(&page_path);
            return CoverLookup::found(opf::resolve_href(page_dir, &src), CoverSource::Guide);
        }
    }

    CoverLookup::NotFound
}

/// First non-empty `<img src>` of an XHTML page.
///
/// Well-formed XML is read with roxmltree; anything else (HTML entities,
/// unclosed tags) goes through the lenient HTML parser.
pub fn first_image_src(content: &str) -> Option<String> {
    if let Ok(doc) = opf::parse_xml(content) {
        return doc
            .descendants()
            .filter(|n| n.has_tag_name("img"))
            .filter_map(|n| n.attribute("src"))
            .find(|src| !src.trim().is_empty())
            .map(|src| src.trim().to_string());
    }

    let html = Html::parse_document(content);
    let selector = Selector::parse("img").ok()?;
    html.select(&selector)
        .filter_map(|el| el.value().attr("src"))
        .find(|src| !src.trim().is_empty())
        .map(|src| src.trim().to_string())
}

/// Image entries by name: the first containing "cover" wins, otherwise the
/// largest one. Size ties go to the entry seen first. Entries declaring more
/// than [`opf::MAX_ENTRY_SIZE`] are never picked.
pub fn from_entries(container: &mut EpubContainer, _package: Option<&Package>) -> CoverLookup {
    pick_by_heuristics(container.entries())
        .map(|entry| CoverLookup::found(entry.name.clone(), CoverSource::Heuristic))
        .unwrap_or(CoverLookup::NotFound)
}

/// Name/size heuristic over a list of archive entries.
pub fn pick_by_heuristics(entries: &[ArchiveEntry]) -> Option<&ArchiveEntry> {
    let mut largest: Option<&ArchiveEntry> = None;

    let readable = entries
        .iter()
        .filter(|e| e.size <= opf::MAX_ENTRY_SIZE && is_cover_image_name(&e.name));

    for entry in readable {
        if mentions_cover(&entry.name) {
            return Some(entry);
        }
        if largest.is_none_or(|best| entry.size > best.size) {
            largest = Some(entry);
        }
    }

    largest
}
