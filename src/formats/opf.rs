//! EPUB container access and OPF package parsing.

use crate::error::{AppError, Result};
use crate::isbn;
use roxmltree::{Document, Node, ParsingOptions};
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// Well-known pointer to the package document.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Largest entry the container will inflate into memory.
pub const MAX_ENTRY_SIZE: u64 = 64 * 1024 * 1024;

const OPF_NS: &str = "http://www.idpf.org/2007/opf";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Name and uncompressed size of one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
}

/// Read-only view over an EPUB's ZIP archive.
pub struct EpubContainer {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    entries: Vec<ArchiveEntry>,
}

impl EpubContainer {
    /// Open an archive held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(data))?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let Ok(file) = archive.by_index_raw(index) else {
                continue;
            };
            if file.is_dir() {
                continue;
            }
            entries.push(ArchiveEntry {
                name: file.name().to_string(),
                size: file.size(),
            });
        }

        Ok(Self { archive, entries })
    }

    /// File entries in archive order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Read an entry, falling back to a case-insensitive name match.
    ///
    /// Entries larger than [`MAX_ENTRY_SIZE`], whether declared or actual,
    /// are rejected with `InvalidFormat`.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let actual = if self.entries.iter().any(|e| e.name == name) {
            name.to_string()
        } else {
            self.entries
                .iter()
                .find(|e| e.name.eq_ignore_ascii_case(name))
                .map(|e| e.name.clone())
                .ok_or_else(|| AppError::NotFound(format!("{} not in archive", name)))?
        };

        let file = self.archive.by_name(&actual)?;
        if file.size() > MAX_ENTRY_SIZE {
            return Err(AppError::InvalidFormat(format!(
                "{} declares {} bytes",
                actual,
                file.size()
            )));
        }

        let mut data = Vec::new();
        file.take(MAX_ENTRY_SIZE + 1).read_to_end(&mut data)?;
        if data.len() as u64 > MAX_ENTRY_SIZE {
            return Err(AppError::InvalidFormat(format!("{} is too large", actual)));
        }
        Ok(data)
    }

    /// Read an entry as text.
    pub fn read_text(&mut self, name: &str) -> Result<String> {
        let data = self.read(name)?;
        let text = String::from_utf8_lossy(&data);
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}

/// Metadata entry with its optional refinement attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataValue {
    /// Text content.
    pub value: String,
    /// `xml:lang`, `opf:scheme` or `opf:role`, whichever the element carries.
    pub qualifier: Option<String>,
}

/// `<metadata>` block of a package document.
#[derive(Debug, Clone, Default)]
pub struct PackageMetadata {
    /// `dc:title` entries in document order.
    pub titles: Vec<MetadataValue>,
    /// `dc:creator` entries in document order.
    pub creators: Vec<MetadataValue>,
    /// `dc:identifier` entries.
    pub identifiers: Vec<MetadataValue>,
    /// `dc:language` entries.
    pub languages: Vec<MetadataValue>,
    /// Manifest id declared by `<meta name="cover" content="...">`.
    pub cover_id: Option<String>,
}

/// One `<item>` of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    /// Item id.
    pub id: String,
    /// Href relative to the package document.
    pub href: String,
    /// Space-separated EPUB 3 properties.
    pub properties: String,
}

/// One `<reference>` of the guide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideReference {
    /// Reference type, e.g. `cover` or `toc`.
    pub kind: String,
    /// Href relative to the package document.
    pub href: String,
}

/// Parsed OPF package document.
#[derive(Debug, Clone, Default)]
pub struct PackageDocument {
    /// Metadata block.
    pub metadata: PackageMetadata,
    /// Manifest items in document order.
    pub manifest: Vec<ManifestItem>,
    /// Guide references in document order.
    pub guide: Vec<GuideReference>,
}

impl PackageDocument {
    /// Parse OPF text.
    pub fn parse(content: &str) -> Result<Self> {
        let doc = parse_xml(content)?;
        let mut package = PackageDocument::default();

        if let Some(metadata) = doc.descendants().find(|n| n.has_tag_name("metadata")) {
            package.metadata = parse_metadata(metadata);
        }

        if let Some(manifest) = doc.descendants().find(|n| n.has_tag_name("manifest")) {
            package.manifest = manifest
                .descendants()
                .filter(|n| n.has_tag_name("item"))
                .map(|n| ManifestItem {
                    id: n.attribute("id").unwrap_or_default().to_string(),
                    href: n.attribute("href").unwrap_or_default().to_string(),
                    properties: n.attribute("properties").unwrap_or_default().to_string(),
                })
                .collect();
        }

        package.guide = doc
            .descendants()
            .filter(|n| n.has_tag_name("reference"))
            .map(|n| GuideReference {
                kind: n.attribute("type").unwrap_or_default().to_string(),
                href: n.attribute("href").unwrap_or_default().to_string(),
            })
            .collect();

        Ok(package)
    }

    /// First non-empty title.
    pub fn title(&self) -> Option<&str> {
        self.metadata.titles.first().map(|v| v.value.as_str())
    }

    /// First non-empty creator.
    pub fn creator(&self) -> Option<&str> {
        self.metadata.creators.first().map(|v| v.value.as_str())
    }

    /// First declared language.
    pub fn language(&self) -> Option<&str> {
        self.metadata.languages.first().map(|v| v.value.as_str())
    }

    /// First identifier that is an ISBN, normalized.
    ///
    /// Accepts `urn:isbn:` / `isbn:` prefixed values and identifiers whose
    /// `opf:scheme` is `ISBN`.
    pub fn isbn(&self) -> Option<String> {
        self.metadata.identifiers.iter().find_map(|id| {
            let value = id.value.trim();
            let lower = value.to_ascii_lowercase();
            let stripped = ["urn:isbn:", "isbn:"]
                .iter()
                .find_map(|prefix| lower.starts_with(prefix).then(|| &value[prefix.len()..]));
            let declared = id
                .qualifier
                .as_deref()
                .is_some_and(|q| q.eq_ignore_ascii_case("isbn"));

            let candidate = match stripped {
                Some(rest) => rest,
                None if declared => value,
                None => return None,
            };
            isbn::normalize_isbn(candidate).ok()
        })
    }
}

fn parse_metadata(node: Node<'_, '_>) -> PackageMetadata {
    let mut metadata = PackageMetadata::default();

    for child in node.descendants().filter(|n| n.is_element()) {
        let bucket = match child.tag_name().name() {
            "title" => &mut metadata.titles,
            "creator" => &mut metadata.creators,
            "identifier" => &mut metadata.identifiers,
            "language" => &mut metadata.languages,
            "meta" => {
                if metadata.cover_id.is_none() && child.attribute("name") == Some("cover") {
                    metadata.cover_id = child.attribute("content").map(String::from);
                }
                continue;
            }
            _ => continue,
        };

        if let Some(value) = metadata_value(child) {
            bucket.push(value);
        }
    }

    metadata
}

fn metadata_value(node: Node<'_, '_>) -> Option<MetadataValue> {
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    let value = text.trim();
    if value.is_empty() {
        return None;
    }

    let qualifier = node
        .attribute((XML_NS, "lang"))
        .or_else(|| node.attribute((OPF_NS, "scheme")))
        .or_else(|| node.attribute((OPF_NS, "role")))
        .map(String::from);

    Some(MetadataValue {
        value: value.to_string(),
        qualifier,
    })
}

/// Package document located through `container.xml`.
#[derive(Debug, Clone)]
pub struct Package {
    /// Archive path of the OPF file.
    pub path: String,
    /// Directory hrefs in the OPF are relative to (empty at archive root).
    pub dir: String,
    /// Parsed document.
    pub document: PackageDocument,
}

/// Find and parse the package document. Any failure yields `None`.
pub fn locate_package(container: &mut EpubContainer) -> Option<Package> {
    match try_locate_package(container) {
        Ok(package) => Some(package),
        Err(e) => {
            tracing::debug!(error = %e, "No package document");
            None
        }
    }
}

fn try_locate_package(container: &mut EpubContainer) -> Result<Package> {
    let content = container.read_text(CONTAINER_PATH)?;
    let doc = parse_xml(&content)?;

    let path = doc
        .descendants()
        .find(|n| n.has_tag_name("rootfile"))
        .and_then(|n| n.attribute("full-path"))
        .map(String::from)
        .ok_or_else(|| AppError::InvalidFormat("No rootfile in container.xml".into()))?;

    let opf_content = container.read_text(&path)?;
    let document = PackageDocument::parse(&opf_content)?;

    Ok(Package {
        dir: parent_dir(&path).to_string(),
        path,
        document,
    })
}

/// Parse XML, tolerating a DOCTYPE declaration.
pub fn parse_xml(content: &str) -> Result<Document<'_>> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Ok(Document::parse_with_options(content, options)?)
}

/// Directory part of an archive path.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolve `href` against `base_dir` into a normalized archive path.
///
/// The fragment is dropped, percent-escapes are decoded, and `.`/`..`
/// segments are folded. A leading `/` anchors at the archive root.
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or_default();
    let decoded = urlencoding::decode(href)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| href.to_string());

    let base = if decoded.starts_with('/') { "" } else { base_dir };

    let mut parts: Vec<&str> = Vec::new();
    for segment in base.split('/').chain(decoded.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    parts.join("/")
}
