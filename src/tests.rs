use crate::config::{BookFormat, Config};
use crate::covers::{self, CoverStore, SourceDigest};
use crate::db::{BookUpdate, Database, NewBook};
use crate::error::AppError;
use crate::formats::cover::{self, CoverLookup, CoverSource};
use crate::formats::opf::{self, ArchiveEntry, EpubContainer, PackageDocument};
use crate::formats::{EpubHandler, Extraction, FormatHandler, PdfHandler, UNKNOWN_AUTHOR};
use crate::isbn::{self, OpenLibraryClient};
use crate::library::Scanner;
use crate::library::book::{ProgressChange, ReadingStatus, validate_rating};
use crate::library::scanner::ScanStatus;
use crate::server::{self, AppState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use lopdf::dictionary;
use std::io::{Cursor, Write};
use std::path::Path;
use tower::ServiceExt;
use zip::write::SimpleFileOptions;

// ============================================================================
// FIXTURES
// ============================================================================

const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

const METADATA_COVER_OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:title>The Left Hand of Darkness</dc:title>
    <dc:creator opf:role="aut">Ursula K. Le Guin</dc:creator>
    <dc:identifier id="uid">urn:isbn:9780441478125</dc:identifier>
    <dc:language>en</dc:language>
    <meta name="cover" content="cover-image"/>
  </metadata>
  <manifest>
    <item id="chapter1" href="text/chapter1.xhtml" media-type="application/xhtml+xml"/>
    <item id="cover-image" href="images/cover.jpg" media-type="image/jpeg"/>
  </manifest>
  <spine>
    <itemref idref="chapter1"/>
  </spine>
</package>"#;

const GUIDE_COVER_OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Guided</dc:title>
  </metadata>
  <manifest>
    <item id="titlepage" href="Text/front.xhtml" media-type="application/xhtml+xml"/>
    <item id="art" href="Images/front.png" media-type="image/png"/>
  </manifest>
  <spine>
    <itemref idref="titlepage"/>
  </spine>
  <guide>
    <reference type="cover" title="Cover" href="Text/front.xhtml#start"/>
  </guide>
</package>"#;

const FRONT_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
  <head><title>Cover</title></head>
  <body><div><img src="../Images/front.png" alt="cover"/></div></body>
</html>"#;

fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

/// Overwrite the uncompressed size of the first central directory record.
fn forge_declared_size(mut data: Vec<u8>, size: u32) -> Vec<u8> {
    let record = data.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
    data[record + 24..record + 28].copy_from_slice(&size.to_le_bytes());
    data
}

fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

fn jpeg_bytes() -> Vec<u8> {
    let img = RgbImage::from_pixel(40, 60, Rgb([200, 30, 30]));
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_pixel(30, 45, Rgb([10, 120, 200]));
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
}

fn metadata_cover_epub() -> Vec<u8> {
    let jpeg = jpeg_bytes();
    build_zip(&[
        ("mimetype", b"application/epub+zip".as_slice()),
        ("META-INF/container.xml", CONTAINER_XML.as_bytes()),
        ("OEBPS/content.opf", METADATA_COVER_OPF.as_bytes()),
        ("OEBPS/text/chapter1.xhtml", b"<html/>".as_slice()),
        ("OEBPS/images/cover.jpg", jpeg.as_slice()),
    ])
}

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn new_book(path: &str, title: &str, pages: Option<i64>) -> NewBook {
    NewBook {
        title: title.to_string(),
        author: "Test Author".to_string(),
        file_path: path.to_string(),
        file_type: "epub".to_string(),
        file_size: 1000,
        pages,
        cover_path: None,
        isbn: None,
    }
}

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.database.path = root.join("test.db");
    config.library.books_dir = root.join("books");
    config.covers.dir = root.join("covers");
    config
}

// ============================================================================
// PATH RESOLUTION
// ============================================================================

#[test]
fn resolve_href_joins_and_normalizes() {
    assert_eq!(opf::resolve_href("OEBPS", "images/cover.jpg"), "OEBPS/images/cover.jpg");
    assert_eq!(opf::resolve_href("", "cover.png"), "cover.png");
    assert_eq!(opf::resolve_href("OEBPS/Text", "../Images/a.png"), "OEBPS/Images/a.png");
    assert_eq!(opf::resolve_href("OEBPS", "./img/./b.jpg"), "OEBPS/img/b.jpg");
    assert_eq!(opf::resolve_href("OEBPS", "/root.jpg"), "root.jpg");
}

#[test]
fn resolve_href_drops_fragment_and_decodes() {
    assert_eq!(
        opf::resolve_href("OEBPS", "Text/cover%20page.xhtml#top"),
        "OEBPS/Text/cover page.xhtml"
    );
}

#[test]
fn parent_dir_of_archive_paths() {
    assert_eq!(opf::parent_dir("OEBPS/content.opf"), "OEBPS");
    assert_eq!(opf::parent_dir("content.opf"), "");
    assert_eq!(opf::parent_dir("a/b/c.xhtml"), "a/b");
}

// ============================================================================
// COVER RESOLUTION
// ============================================================================

#[test]
fn metadata_pointer_resolves_relative_to_package() {
    let mut container = EpubContainer::from_bytes(metadata_cover_epub()).unwrap();
    let package = opf::locate_package(&mut container).unwrap();

    assert_eq!(package.path, "OEBPS/content.opf");
    assert_eq!(package.document.title(), Some("The Left Hand of Darkness"));
    assert_eq!(package.document.creator(), Some("Ursula K. Le Guin"));
    assert_eq!(package.document.language(), Some("en"));
    assert_eq!(package.document.isbn().as_deref(), Some("9780441478125"));

    let candidate = cover::resolve_cover(&mut container, Some(&package))
        .candidate()
        .unwrap();
    assert_eq!(candidate.path, "OEBPS/images/cover.jpg");
    assert_eq!(candidate.source, CoverSource::Metadata);
}

#[test]
fn guide_reference_follows_first_image() {
    let png = png_bytes();
    let data = build_zip(&[
        ("META-INF/container.xml", CONTAINER_XML.as_bytes()),
        ("OEBPS/content.opf", GUIDE_COVER_OPF.as_bytes()),
        ("OEBPS/Text/front.xhtml", FRONT_PAGE.as_bytes()),
        ("OEBPS/Images/front.png", png.as_slice()),
    ]);
    let mut container = EpubContainer::from_bytes(data).unwrap();
    let package = opf::locate_package(&mut container).unwrap();

    assert_eq!(
        cover::from_metadata(&mut container, Some(&package)),
        CoverLookup::NotFound
    );

    let candidate = cover::resolve_cover(&mut container, Some(&package))
        .candidate()
        .unwrap();
    assert_eq!(candidate.path, "OEBPS/Images/front.png");
    assert_eq!(candidate.source, CoverSource::Guide);
}

#[test]
fn broken_guide_page_falls_through_to_heuristics() {
    let png = png_bytes();
    let data = build_zip(&[
        ("META-INF/container.xml", CONTAINER_XML.as_bytes()),
        ("OEBPS/content.opf", GUIDE_COVER_OPF.as_bytes()),
        ("OEBPS/Images/front.png", png.as_slice()),
    ]);
    let mut container = EpubContainer::from_bytes(data).unwrap();
    let package = opf::locate_package(&mut container).unwrap();

    let candidate = cover::resolve_cover(&mut container, Some(&package))
        .candidate()
        .unwrap();
    assert_eq!(candidate.path, "OEBPS/Images/front.png");
    assert_eq!(candidate.source, CoverSource::Heuristic);
}

#[test]
fn first_image_src_handles_html_soup() {
    let page = "<html><body><p>&nbsp;<br><img src=''><img src=\"pics/front.jpg\"></body>";
    assert_eq!(cover::first_image_src(page).as_deref(), Some("pics/front.jpg"));
    assert_eq!(cover::first_image_src("<html><body/></html>"), None);
}

#[test]
fn largest_image_wins_without_hints() {
    let small = vec![0u8; 500];
    let large = vec![0u8; 20000];
    let data = build_zip(&[
        ("img/fig1.png", small.as_slice()),
        ("img/fig2.png", large.as_slice()),
    ]);
    let mut container = EpubContainer::from_bytes(data).unwrap();

    assert!(opf::locate_package(&mut container).is_none());

    let candidate = cover::resolve_cover(&mut container, None).candidate().unwrap();
    assert_eq!(candidate.path, "img/fig2.png");
    assert_eq!(candidate.source, CoverSource::Heuristic);
}

#[test]
fn heuristics_prefer_cover_name_then_first_largest() {
    let entry = |name: &str, size: u64| ArchiveEntry {
        name: name.to_string(),
        size,
    };

    let named = [
        entry("big.jpg", 90000),
        entry("Images/Cover.JPEG", 10),
        entry("Images/back-cover.jpg", 80000),
    ];
    assert_eq!(cover::pick_by_heuristics(&named).unwrap().name, "Images/Cover.JPEG");

    let tied = [entry("a.png", 700), entry("b.png", 700), entry("c.png", 300)];
    assert_eq!(cover::pick_by_heuristics(&tied).unwrap().name, "a.png");

    let no_images = [entry("cover.gif", 5000), entry("text.xhtml", 9000)];
    assert!(cover::pick_by_heuristics(&no_images).is_none());

    let oversized = [entry("cover.jpg", opf::MAX_ENTRY_SIZE + 1), entry("art.png", 400)];
    assert_eq!(cover::pick_by_heuristics(&oversized).unwrap().name, "art.png");
}

#[test]
fn container_rejects_entries_declaring_huge_sizes() {
    let data = forge_declared_size(
        build_zip(&[("META-INF/container.xml", CONTAINER_XML.as_bytes())]),
        0xF000_0000,
    );
    let mut container = EpubContainer::from_bytes(data).unwrap();
    assert_eq!(container.entries()[0].size, 0xF000_0000);

    assert!(matches!(
        container.read(opf::CONTAINER_PATH),
        Err(AppError::InvalidFormat(_))
    ));
    assert!(opf::locate_package(&mut container).is_none());
}

#[test]
fn forged_entry_size_degrades_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let covers = CoverStore::new(dir.path().join("covers"));
    let data = forge_declared_size(
        build_zip(&[
            ("META-INF/container.xml", CONTAINER_XML.as_bytes()),
            ("OEBPS/content.opf", METADATA_COVER_OPF.as_bytes()),
        ]),
        0xF000_0000,
    );
    let digest = SourceDigest::of_bytes(&data);

    let extraction = EpubHandler::extract_bytes(Path::new("forged.epub"), data, &digest, &covers);
    assert!(extraction.is_degraded());

    let metadata = extraction.into_metadata();
    assert_eq!(metadata.title, "forged");
    assert_eq!(metadata.cover_path, Some(covers.path_for(&digest)));
}

#[test]
fn package_metadata_keeps_qualifiers() {
    let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:title xml:lang="en">Kindred</dc:title>
    <dc:title>  </dc:title>
    <dc:creator opf:role="aut">Octavia E. Butler</dc:creator>
    <dc:creator>Anonymous</dc:creator>
    <dc:identifier>calibre:42</dc:identifier>
    <dc:identifier opf:scheme="ISBN">978-0-8070-8305-8</dc:identifier>
    <dc:language>en-US</dc:language>
  </metadata>
</package>"#;

    let package = PackageDocument::parse(opf).unwrap();
    let metadata = &package.metadata;

    assert_eq!(metadata.titles.len(), 1);
    assert_eq!(metadata.titles[0].value, "Kindred");
    assert_eq!(metadata.titles[0].qualifier.as_deref(), Some("en"));
    assert_eq!(metadata.creators[0].qualifier.as_deref(), Some("aut"));
    assert_eq!(metadata.creators[1].qualifier, None);
    assert_eq!(metadata.identifiers[1].qualifier.as_deref(), Some("ISBN"));

    assert_eq!(package.isbn().as_deref(), Some("9780807083058"));
    assert_eq!(package.language(), Some("en-US"));
}

#[test]
fn container_reads_case_insensitively() {
    let data = build_zip(&[("OEBPS/Images/Cover.jpg", b"x".as_slice())]);
    let mut container = EpubContainer::from_bytes(data).unwrap();

    assert_eq!(container.read("oebps/images/cover.jpg").unwrap(), b"x");
    assert!(matches!(
        container.read("missing.jpg"),
        Err(AppError::NotFound(_))
    ));
}

// ============================================================================
// EXTRACTION
// ============================================================================

#[test]
fn epub_extraction_saves_metadata_cover() {
    let dir = tempfile::tempdir().unwrap();
    let covers = CoverStore::new(dir.path().join("covers"));
    let data = metadata_cover_epub();
    let digest = SourceDigest::of_bytes(&data);

    let extraction = EpubHandler::extract_bytes(Path::new("book.epub"), data, &digest, &covers);
    assert!(!extraction.is_degraded());

    let metadata = extraction.into_metadata();
    assert_eq!(metadata.title, "The Left Hand of Darkness");
    assert_eq!(metadata.author, "Ursula K. Le Guin");
    assert_eq!(metadata.pages, None);
    assert_eq!(metadata.language.as_deref(), Some("en"));
    assert_eq!(metadata.isbn.as_deref(), Some("9780441478125"));

    let cover_path = metadata.cover_path.unwrap();
    assert_eq!(cover_path, covers.path_for(&digest));
    let saved = image::open(&cover_path).unwrap();
    assert_eq!((saved.width(), saved.height()), (40, 60));
}

#[test]
fn invalid_archive_yields_filename_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let covers = CoverStore::new(dir.path().join("covers"));
    let path = dir.path().join("Not A Book.epub");
    std::fs::write(&path, b"definitely not a zip archive").unwrap();

    let extraction = EpubHandler.extract(&path, &covers);
    let Extraction::Degraded { metadata, .. } = extraction else {
        panic!("expected degraded extraction");
    };

    assert_eq!(metadata.title, "Not A Book");
    assert_eq!(metadata.author, UNKNOWN_AUTHOR);
    assert_eq!(metadata.pages, None);

    let expected = covers.path_for(&SourceDigest::of_bytes(b"definitely not a zip archive"));
    assert_eq!(metadata.cover_path.as_deref(), Some(expected.as_path()));
    assert!(expected.exists());
}

#[test]
fn archive_without_package_degrades_but_keeps_cover() {
    let dir = tempfile::tempdir().unwrap();
    let covers = CoverStore::new(dir.path().join("covers"));
    let png = png_bytes();
    let data = build_zip(&[("images/cover.png", png.as_slice())]);
    let digest = SourceDigest::of_bytes(&data);

    let extraction = EpubHandler::extract_bytes(Path::new("loose.epub"), data, &digest, &covers);
    assert!(extraction.is_degraded());

    let metadata = extraction.metadata();
    assert_eq!(metadata.title, "loose");
    assert_eq!(metadata.cover_path.as_deref(), Some(covers.path_for(&digest).as_path()));
}

#[test]
fn undecodable_cover_falls_back_to_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let covers = CoverStore::new(dir.path().join("covers"));
    let data = build_zip(&[
        ("META-INF/container.xml", CONTAINER_XML.as_bytes()),
        ("OEBPS/content.opf", METADATA_COVER_OPF.as_bytes()),
        ("OEBPS/images/cover.jpg", b"not really a jpeg".as_slice()),
    ]);
    let digest = SourceDigest::of_bytes(&data);

    let extraction = EpubHandler::extract_bytes(Path::new("x.epub"), data, &digest, &covers);
    assert!(extraction.is_degraded());

    let metadata = extraction.into_metadata();
    assert_eq!(metadata.title, "The Left Hand of Darkness");
    let placeholder = image::open(metadata.cover_path.unwrap()).unwrap();
    assert_eq!(
        (placeholder.width(), placeholder.height()),
        (covers::PLACEHOLDER_WIDTH, covers::PLACEHOLDER_HEIGHT)
    );
}

fn build_pdf(title: &str, author: &str) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 200.into(), 300.into()],
    });
    doc.objects.insert(
        pages_id,
        lopdf::Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => lopdf::Object::string_literal(title),
        "Author" => lopdf::Object::string_literal(author),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

#[test]
fn pdf_extraction_reads_info_and_pages() {
    let dir = tempfile::tempdir().unwrap();
    let covers = CoverStore::new(dir.path().join("covers"));
    let path = dir.path().join("scan.pdf");
    let data = build_pdf("A Pattern Language", "Christopher Alexander");
    std::fs::write(&path, &data).unwrap();

    let extraction = PdfHandler.extract(&path, &covers);
    assert!(!extraction.is_degraded());

    let metadata = extraction.into_metadata();
    assert_eq!(metadata.title, "A Pattern Language");
    assert_eq!(metadata.author, "Christopher Alexander");
    assert_eq!(metadata.pages, Some(1));
    assert_eq!(
        metadata.cover_path,
        Some(covers.path_for(&SourceDigest::of_bytes(&data)))
    );
}

#[test]
fn unreadable_pdf_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let covers = CoverStore::new(dir.path().join("covers"));
    let path = dir.path().join("Broken Scan.pdf");
    std::fs::write(&path, b"%PDF-1.4 truncated").unwrap();

    let extraction = PdfHandler.extract(&path, &covers);
    assert!(extraction.is_degraded());
    assert_eq!(extraction.metadata().title, "Broken Scan");
    assert!(extraction.metadata().cover_path.is_some());
}

// ============================================================================
// COVER STORE
// ============================================================================

#[test]
fn cover_store_save_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let covers = CoverStore::new(dir.path().join("covers"));
    let source = dir.path().join("book.epub");
    std::fs::write(&source, b"source bytes").unwrap();

    let first = covers.save(&png_bytes(), &source).unwrap();
    let second = covers.save(&png_bytes(), &source).unwrap();

    assert_eq!(first, second);
    assert_eq!(
        first.file_name().unwrap().to_string_lossy(),
        format!("cover_{}.jpg", SourceDigest::of_bytes(b"source bytes"))
    );
    assert_eq!(std::fs::read_dir(covers.dir()).unwrap().count(), 1);
}

#[test]
fn cover_store_normalizes_to_rgb_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let covers = CoverStore::new(dir.path());
    let rgba = RgbaImage::from_pixel(16, 16, Rgba([0, 255, 0, 128]));
    let raw = encode(DynamicImage::ImageRgba8(rgba), ImageFormat::Png);

    let path = covers
        .save_for_digest(&raw, &SourceDigest::of_bytes(b"rgba"))
        .unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    assert!(matches!(image::load_from_memory(&bytes).unwrap(), DynamicImage::ImageRgb8(_)));
}

#[test]
fn to_rgb_flattens_other_color_types() {
    let luma_alpha = DynamicImage::ImageLumaA8(image::ImageBuffer::from_pixel(
        3,
        2,
        image::LumaA([90, 255]),
    ));
    let rgb = covers::to_rgb(luma_alpha);
    assert_eq!(rgb.dimensions(), (3, 2));
    assert_eq!(rgb.get_pixel(0, 0), &Rgb([90, 90, 90]));

    let wide = DynamicImage::ImageRgb16(image::ImageBuffer::from_pixel(
        2,
        2,
        image::Rgb([65535u16, 0, 0]),
    ));
    assert_eq!(covers::to_rgb(wide).get_pixel(1, 1), &Rgb([255, 0, 0]));
}

#[test]
fn cover_store_converts_cmyk_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let covers = CoverStore::new(dir.path());

    let cmyk: Vec<u8> = [0u8, 255, 255, 0].repeat(8 * 8);
    let mut raw = Vec::new();
    jpeg_encoder::Encoder::new(&mut raw, 90)
        .encode(&cmyk, 8, 8, jpeg_encoder::ColorType::Cmyk)
        .unwrap();

    let path = covers
        .save_for_digest(&raw, &SourceDigest::of_bytes(b"cmyk"))
        .unwrap();

    let saved = image::load_from_memory(&std::fs::read(&path).unwrap()).unwrap();
    let DynamicImage::ImageRgb8(rgb) = saved else {
        panic!("cover is not RGB");
    };
    let Rgb([r, g, b]) = *rgb.get_pixel(4, 4);
    assert!(r > 200 && g < 60 && b < 60, "unexpected pixel {:?}", [r, g, b]);
}

#[test]
fn cover_store_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let covers = CoverStore::new(dir.path());
    assert!(
        covers
            .save_for_digest(b"garbage", &SourceDigest::of_bytes(b"g"))
            .is_err()
    );
}

#[test]
fn wrap_title_packs_words() {
    assert_eq!(
        covers::wrap_title("The Quick Brown Fox Jumps Over The Lazy Dog"),
        vec!["The Quick Brown Fox", "Jumps Over The Lazy", "Dog"]
    );
    assert_eq!(covers::wrap_title("Short"), vec!["Short"]);
    assert!(covers::wrap_title("   ").is_empty());
}

#[test]
fn wrap_title_keeps_three_lines() {
    let lines = covers::wrap_title(
        "Supercalifragilistic Antidisestablishment Floccinaucinihilipilification Extra Words",
    );
    assert_eq!(lines.len(), covers::MAX_TITLE_LINES);
    assert_eq!(lines[0], "Supercalifragilistic");
    assert_eq!(lines[1], "Antidisestablishment");
}

#[test]
fn placeholder_draws_title_on_grey() {
    let img = covers::render_placeholder("Dune");
    assert_eq!(
        img.dimensions(),
        (covers::PLACEHOLDER_WIDTH, covers::PLACEHOLDER_HEIGHT)
    );
    assert_eq!(img.get_pixel(0, 0), &Rgb([240, 240, 240]));

    let inked = (100..108)
        .flat_map(|y| (10..42).map(move |x| (x, y)))
        .filter(|&(x, y)| img.get_pixel(x, y) == &Rgb([0, 0, 0]))
        .count();
    assert!(inked > 0);
}

// ============================================================================
// READING STATE
// ============================================================================

#[test]
fn progress_derives_status_and_page() {
    let change = ProgressChange::new(0.5, None, Some(200)).unwrap();
    assert_eq!(change.status, ReadingStatus::Reading);
    assert_eq!(change.current_page, Some(100));

    let done = ProgressChange::new(1.0, None, None).unwrap();
    assert_eq!(done.status, ReadingStatus::Finished);
    assert_eq!(done.current_page, None);

    let unread = ProgressChange::new(0.0, Some(0), Some(10)).unwrap();
    assert_eq!(unread.status, ReadingStatus::Unread);

    let explicit = ProgressChange::new(0.25, Some(7), Some(100)).unwrap();
    assert_eq!(explicit.current_page, Some(7));
}

#[test]
fn progress_out_of_range_rejected() {
    assert!(ProgressChange::new(1.5, None, None).is_err());
    assert!(ProgressChange::new(-0.1, None, None).is_err());
    assert!(ProgressChange::new(f64::NAN, None, None).is_err());
    assert!(ProgressChange::new(0.5, Some(-1), None).is_err());
}

#[test]
fn rating_bounds() {
    assert_eq!(validate_rating(0).unwrap(), 0);
    assert_eq!(validate_rating(5).unwrap(), 5);
    assert!(matches!(validate_rating(6), Err(AppError::InvalidInput(_))));
    assert!(validate_rating(-1).is_err());
}

#[test]
fn reading_status_parse() {
    assert_eq!(ReadingStatus::parse("completed"), ReadingStatus::Finished);
    assert_eq!(ReadingStatus::parse("reading"), ReadingStatus::Reading);
    assert_eq!(ReadingStatus::parse("whatever"), ReadingStatus::Unread);
    assert_eq!(ReadingStatus::Finished.as_str(), "finished");
}

// ============================================================================
// DATABASE
// ============================================================================

#[test]
fn db_insert_and_get_book() {
    let db = test_db();
    let stored = db.insert_book(&new_book("/books/a.epub", "A", Some(120))).unwrap();

    assert_eq!(stored.title, "A");
    assert_eq!(stored.status, "unread");
    assert_eq!(stored.progress, 0.0);
    assert!(!stored.hidden);

    let by_path = db.get_book_by_path("/books/a.epub").unwrap().unwrap();
    assert_eq!(by_path.id, stored.id);
    assert!(db.get_book(stored.id + 100).unwrap().is_none());
}

#[test]
fn db_duplicate_path_conflicts() {
    let db = test_db();
    db.insert_book(&new_book("/books/a.epub", "A", None)).unwrap();
    assert!(matches!(
        db.insert_book(&new_book("/books/a.epub", "Again", None)),
        Err(AppError::Conflict(_))
    ));
}

#[test]
fn db_update_book_fields() {
    let db = test_db();
    let stored = db.insert_book(&new_book("/books/a.epub", "A", Some(100))).unwrap();

    let update = BookUpdate {
        progress: Some(0.3),
        current_page: Some(30),
        status: Some("reading".to_string()),
        rating_stars: Some(4),
        review: Some(Some("Good".to_string())),
    };
    let updated = db.update_book(stored.id, &update).unwrap().unwrap();

    assert_eq!(updated.progress, 0.3);
    assert_eq!(updated.current_page, 30);
    assert_eq!(updated.status, "reading");
    assert_eq!(updated.rating_stars, 4);
    assert_eq!(updated.review.as_deref(), Some("Good"));

    let cleared = BookUpdate {
        review: Some(None),
        ..Default::default()
    };
    let updated = db.update_book(stored.id, &cleared).unwrap().unwrap();
    assert_eq!(updated.review, None);
    assert_eq!(updated.rating_stars, 4);

    assert!(db.update_book(9999, &update).unwrap().is_none());
}

#[test]
fn db_hidden_books_filtered() {
    let db = test_db();
    let a = db.insert_book(&new_book("/books/a.epub", "A", None)).unwrap();
    db.insert_book(&new_book("/books/b.epub", "B", None)).unwrap();

    db.set_hidden(a.id, true).unwrap().unwrap();

    assert_eq!(db.list_books(0, 100, false).unwrap().len(), 1);
    assert_eq!(db.list_books(0, 100, true).unwrap().len(), 2);
    assert_eq!(db.list_hidden_books().unwrap()[0].id, a.id);
    assert_eq!(db.list_books(1, 1, true).unwrap()[0].title, "B");
    assert_eq!(db.count_books().unwrap(), 2);
}

#[test]
fn db_collection_membership_is_idempotent() {
    let db = test_db();
    let book = db.insert_book(&new_book("/books/a.epub", "A", None)).unwrap();
    let collection = db.create_collection("Favourites", Some("best")).unwrap();

    assert!(db.add_book_to_collection(collection.id, book.id).unwrap());
    assert!(!db.add_book_to_collection(collection.id, book.id).unwrap());
    assert_eq!(db.get_collection(collection.id).unwrap().unwrap().book_count, 1);
    assert_eq!(db.book_collections(book.id).unwrap()[0].name, "Favourites");

    assert!(db.remove_book_from_collection(collection.id, book.id).unwrap());
    assert!(!db.remove_book_from_collection(collection.id, book.id).unwrap());
    assert!(db.collection_books(collection.id).unwrap().is_empty());
}

#[test]
fn db_duplicate_collection_conflicts() {
    let db = test_db();
    db.create_collection("Sci-Fi", None).unwrap();
    assert!(matches!(
        db.create_collection("Sci-Fi", None),
        Err(AppError::Conflict(_))
    ));
}

#[test]
fn db_deletes_cascade_to_membership() {
    let db = test_db();
    let a = db.insert_book(&new_book("/books/a.epub", "A", None)).unwrap();
    let b = db.insert_book(&new_book("/books/b.epub", "B", None)).unwrap();
    let shelf = db.create_collection("Shelf", None).unwrap();
    db.add_book_to_collection(shelf.id, a.id).unwrap();
    db.add_book_to_collection(shelf.id, b.id).unwrap();

    assert!(db.delete_book(a.id).unwrap());
    assert!(!db.delete_book(a.id).unwrap());
    let remaining = db.collection_books(shelf.id).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, b.id);

    assert!(db.delete_collection(shelf.id).unwrap());
    assert!(db.book_collections(b.id).unwrap().is_empty());
    assert!(db.get_book(b.id).unwrap().is_some());
}

// ============================================================================
// SCANNER
// ============================================================================

#[test]
fn scanner_adds_new_books_once() {
    let root = tempfile::tempdir().unwrap();
    let books = root.path().join("books");
    std::fs::create_dir_all(books.join("nested")).unwrap();
    std::fs::write(books.join("good.epub"), metadata_cover_epub()).unwrap();
    std::fs::write(books.join("broken.EPUB"), b"nope").unwrap();
    std::fs::write(books.join("notes.txt"), b"not a book").unwrap();
    std::fs::write(books.join("nested").join("deep.epub"), metadata_cover_epub()).unwrap();

    let db = test_db();
    let covers = CoverStore::new(root.path().join("covers"));

    let report = Scanner::new(&db, &covers).scan(&books);
    assert_eq!(report.status, ScanStatus::Success);
    assert_eq!(report.scanned_files, 3);
    assert_eq!(report.new_books, 2);
    assert_eq!(report.degraded, 1);
    assert_eq!(report.errors, 0);

    let good = db
        .get_book_by_path(&books.join("good.epub").to_string_lossy())
        .unwrap()
        .unwrap();
    assert_eq!(good.title, "The Left Hand of Darkness");
    assert_eq!(good.file_type, "epub");
    assert_eq!(good.isbn.as_deref(), Some("9780441478125"));
    assert!(good.cover_path.is_some());

    let broken = db
        .get_book_by_path(&books.join("broken.EPUB").to_string_lossy())
        .unwrap()
        .unwrap();
    assert_eq!(broken.title, "broken");
    assert_eq!(broken.author, UNKNOWN_AUTHOR);

    let again = Scanner::new(&db, &covers).scan(&books);
    assert_eq!(again.scanned_files, 3);
    assert_eq!(again.new_books, 0);

    let deep = Scanner::new(&db, &covers).recursive(true).scan(&books);
    assert_eq!(deep.scanned_files, 4);
    assert_eq!(deep.new_books, 1);
    assert_eq!(db.count_books().unwrap(), 3);
}

#[test]
fn scanner_missing_directory_reports_error() {
    let root = tempfile::tempdir().unwrap();
    let db = test_db();
    let covers = CoverStore::new(root.path().join("covers"));

    let report = Scanner::new(&db, &covers).scan(&root.path().join("absent"));
    assert_eq!(report.status, ScanStatus::Error);
    assert_eq!(report.new_books, 0);
    assert_eq!(report.scanned_files, 0);
    assert!(!report.message.is_empty());
}

// ============================================================================
// CONFIG
// ============================================================================

#[test]
fn config_parse_toml() {
    let toml = r#"
[server]
bind = "127.0.0.1:9090"
title = "Test Library"

[database]
path = "/tmp/test.db"

[library]
books_dir = "/srv/books"
recursive = true

[covers]
jpeg_quality = 75

[isbn]
timeout_seconds = 3
"#;
    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.server.bind.port(), 9090);
    assert_eq!(config.server.title, "Test Library");
    assert_eq!(config.library.books_dir, Path::new("/srv/books"));
    assert!(config.library.recursive);
    assert!(!config.library.scan_on_start);
    assert_eq!(config.covers.dir, Path::new("covers"));
    assert_eq!(config.covers.jpeg_quality, 75);
    assert_eq!(config.isbn.timeout_seconds, 3);
    assert_eq!(config.isbn.base_url, "https://openlibrary.org");
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert_eq!(config.server.bind.port(), 8000);
    assert_eq!(config.database.path, Path::new("book-lib.db"));
    assert_eq!(config.library.books_dir, Path::new("books"));
    assert!(!config.library.recursive);
    assert_eq!(config.covers.jpeg_quality, 90);
}

#[test]
fn config_generated_default_parses() {
    let config: Config = toml::from_str(&Config::generate_default()).unwrap();
    assert_eq!(config.server.title, "LocalRead");
    assert_eq!(config.isbn.covers_url, "https://covers.openlibrary.org");
}

#[test]
fn book_format_from_extension() {
    assert_eq!(BookFormat::from_extension("epub"), Some(BookFormat::Epub));
    assert_eq!(BookFormat::from_extension("PDF"), Some(BookFormat::Pdf));
    assert_eq!(BookFormat::from_extension("mobi"), None);
    assert_eq!(BookFormat::Epub.mime_type(), "application/epub+zip");
    assert_eq!(BookFormat::Pdf.as_str(), "pdf");
}

// ============================================================================
// ISBN
// ============================================================================

#[test]
fn isbn_normalization() {
    assert_eq!(isbn::normalize_isbn("978-0-14-032872-1").unwrap(), "9780140328721");
    assert_eq!(isbn::normalize_isbn(" 0 306 40615 x ").unwrap(), "030640615X");
    assert!(isbn::normalize_isbn("12345").is_err());
    assert!(isbn::normalize_isbn("97801403287AB").is_err());
    assert!(isbn::normalize_isbn("X306406152").is_err());
}

fn mock_isbn_config(url: &str) -> crate::config::IsbnConfig {
    crate::config::IsbnConfig {
        base_url: url.to_string(),
        covers_url: url.to_string(),
        timeout_seconds: 5,
    }
}

#[tokio::test]
async fn isbn_lookup_joins_authors() {
    let mut server = mockito::Server::new_async().await;
    let edition = server
        .mock("GET", "/isbn/9780140328721.json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"title": "Fantastic Mr Fox", "number_of_pages": 96,
                "authors": [{"key": "/authors/OL34184A"}, {"key": "/authors/OL2A"}]}"#,
        )
        .create_async()
        .await;
    let first = server
        .mock("GET", "/authors/OL34184A.json")
        .with_status(200)
        .with_body(r#"{"name": "Roald Dahl"}"#)
        .create_async()
        .await;
    let second = server
        .mock("GET", "/authors/OL2A.json")
        .with_status(200)
        .with_body(r#"{"name": "Quentin Blake"}"#)
        .create_async()
        .await;

    let client = OpenLibraryClient::new(&mock_isbn_config(&server.url())).unwrap();
    let record = client.lookup("9780140328721").await.unwrap().unwrap();

    assert_eq!(record.title, "Fantastic Mr Fox");
    assert_eq!(record.author, "Roald Dahl, Quentin Blake");
    assert_eq!(record.pages, Some(96));
    assert!(record.cover_url.ends_with("/b/isbn/9780140328721-L.jpg?default=false"));

    edition.assert_async().await;
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn isbn_lookup_defaults_and_not_found() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/isbn/0306406152.json")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    server
        .mock("GET", "/isbn/9999999999.json")
        .with_status(404)
        .create_async()
        .await;

    let client = OpenLibraryClient::new(&mock_isbn_config(&server.url())).unwrap();

    let record = client.lookup("0306406152").await.unwrap().unwrap();
    assert_eq!(record.title, isbn::UNKNOWN_TITLE);
    assert_eq!(record.author, UNKNOWN_AUTHOR);
    assert_eq!(record.pages, None);

    assert!(client.lookup("9999999999").await.unwrap().is_none());
}

// ============================================================================
// HTTP API
// ============================================================================

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn api_health_and_banner() {
    let root = tempfile::tempdir().unwrap();
    let state = AppState::new(test_config(root.path()), test_db()).unwrap();
    let app = server::create_router(state);

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");

    let response = app.oneshot(get("/")).await.unwrap();
    assert!(
        body_json(response).await["message"]
            .as_str()
            .unwrap()
            .contains("LocalRead")
    );
}

#[tokio::test]
async fn api_progress_rating_and_visibility() {
    let root = tempfile::tempdir().unwrap();
    let db = test_db();
    let book = db.insert_book(&new_book("/books/a.epub", "A", Some(300))).unwrap();
    let state = AppState::new(test_config(root.path()), db).unwrap();
    let app = server::create_router(state);

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/books/{}/progress", book.id),
            serde_json::json!({"progress": 0.5}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "reading");
    assert_eq!(json["current_page"], 150);

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/books/{}/progress", book.id),
            serde_json::json!({"progress": 1.2}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/books/{}/rating", book.id),
            serde_json::json!({"rating_stars": 9}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/books/{}", book.id),
            serde_json::json!({"progress": 1.0, "rating_stars": 5, "review": "Loved it"}),
        ))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["status"], "finished");
    assert_eq!(json["rating_stars"], 5);
    assert_eq!(json["review"], "Loved it");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/books/{}/hide", book.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["hidden"], true);

    let response = app.clone().oneshot(get("/books")).await.unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 0);

    let response = app.clone().oneshot(get("/books/hidden")).await.unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

    let response = app.oneshot(get("/books/424242")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_collections_roundtrip() {
    let root = tempfile::tempdir().unwrap();
    let db = test_db();
    let book = db.insert_book(&new_book("/books/a.epub", "A", None)).unwrap();
    let state = AppState::new(test_config(root.path()), db).unwrap();
    let app = server::create_router(state);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/collections",
            serde_json::json!({"name": "Classics"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/collections",
            serde_json::json!({"name": "Classics"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let add = || {
        Request::builder()
            .method("POST")
            .uri(format!("/collections/{}/books/{}", id, book.id))
            .body(Body::empty())
            .unwrap()
    };
    app.clone().oneshot(add()).await.unwrap();
    let response = app.clone().oneshot(add()).await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json["book_count"], 1);
    assert_eq!(json["books"].as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/books/{}", book.id)))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["collections"][0]["name"], "Classics");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/collections/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(get(&format!("/collections/{}", id))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_scan_and_download() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    std::fs::create_dir_all(&config.library.books_dir).unwrap();
    let epub = metadata_cover_epub();
    std::fs::write(config.library.books_dir.join("novel.epub"), &epub).unwrap();

    let state = AppState::new(config, test_db()).unwrap();
    let app = server::create_router(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scan")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["status"], "success");
    assert_eq!(report["new_books"], 1);

    let response = app.clone().oneshot(get("/books")).await.unwrap();
    let books = body_json(response).await;
    let id = books[0]["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!("/books/{}/file", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        BookFormat::Epub.mime_type()
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.len(), epub.len());

    let cover = books[0]["cover_path"].as_str().unwrap().to_string();
    let file_name = Path::new(&cover).file_name().unwrap().to_string_lossy().to_string();
    let response = app
        .oneshot(get(&format!("/covers/{}", file_name)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_add_book_from_isbn() {
    let mut upstream = mockito::Server::new_async().await;
    upstream
        .mock("GET", "/isbn/9780140328721.json")
        .with_status(200)
        .with_body(r#"{"title": "Fantastic Mr Fox", "number_of_pages": 96, "authors": []}"#)
        .create_async()
        .await;

    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.isbn = mock_isbn_config(&upstream.url());
    let state = AppState::new(config, test_db()).unwrap();
    let app = server::create_router(state.clone());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/books/isbn",
            serde_json::json!({"isbn": "978-0-14-032872-1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["title"], "Fantastic Mr Fox");
    assert_eq!(json["file_type"], "isbn");
    assert_eq!(json["file_path"], "isbn:9780140328721");
    assert_eq!(json["pages"], 96);

    let expected_cover = state
        .covers
        .path_for(&SourceDigest::of_bytes(b"9780140328721"));
    assert!(expected_cover.exists());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/books/isbn",
            serde_json::json!({"isbn": "9780140328721"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let id = json["id"].as_i64().unwrap();
    let response = app
        .clone()
        .oneshot(get(&format!("/books/{}/file", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(json_request(
            "POST",
            "/books/isbn",
            serde_json::json!({"isbn": "abc"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
