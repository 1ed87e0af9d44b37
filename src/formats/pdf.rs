use crate::covers::CoverStore;
use crate::error::{AppError, Result};
use crate::formats::{Extraction, ExtractionBuilder, FormatHandler, read_source};
use lopdf::{Document, Object};
use std::path::Path;

/// Handler for PDF files.
pub struct PdfHandler;

impl PdfHandler {
    /// Extract text content from a PDF info dictionary value.
    fn extract_text(obj: &Object) -> Option<String> {
        match obj {
            Object::String(bytes, _) => {
                // UTF-16BE when it starts with a BOM
                if bytes.starts_with(&[0xFE, 0xFF]) {
                    let utf16: Vec<u16> = bytes[2..]
                        .chunks(2)
                        .map(|chunk| {
                            u16::from_be_bytes([chunk[0], chunk.get(1).copied().unwrap_or(0)])
                        })
                        .collect();
                    String::from_utf16(&utf16).ok()
                } else {
                    // UTF-8, else Latin-1
                    Some(
                        String::from_utf8(bytes.clone())
                            .unwrap_or_else(|_| bytes.iter().map(|&b| b as char).collect()),
                    )
                }
            }
            Object::Name(name) => String::from_utf8(name.clone()).ok(),
            _ => None,
        }
    }

    /// Non-empty, trimmed Info dictionary entry.
    fn info_entry(doc: &Document, key: &[u8]) -> Option<String> {
        let info_ref = doc.trailer.get(b"Info").ok()?.as_reference().ok()?;
        let info = doc.get_dictionary(info_ref).ok()?;
        let text = Self::extract_text(info.get(key).ok()?)?;
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// First embedded image on the first page, as encoded bytes.
    fn first_page_image(doc: &Document) -> Option<Vec<u8>> {
        let pages = doc.get_pages();
        let &first_page_id = pages.values().next()?;
        let page = doc.get_dictionary(first_page_id).ok()?;

        let resources = match page.get(b"Resources") {
            Ok(Object::Reference(r)) => doc.get_dictionary(*r).ok(),
            Ok(Object::Dictionary(d)) => Some(d),
            _ => None,
        }?;

        let xobjects = match resources.get(b"XObject") {
            Ok(Object::Reference(r)) => doc.get_dictionary(*r).ok(),
            Ok(Object::Dictionary(d)) => Some(d),
            _ => None,
        }?;

        for (_name, obj) in xobjects.iter() {
            let Object::Reference(xobj_ref) = obj else {
                continue;
            };
            let Ok(Object::Stream(stream)) = doc.get_object(*xobj_ref) else {
                continue;
            };

            let is_image = matches!(
                stream.dict.get(b"Subtype"),
                Ok(Object::Name(n)) if n == b"Image"
            );
            if !is_image {
                continue;
            }

            let is_dct = match stream.dict.get(b"Filter") {
                Ok(Object::Name(n)) => n == b"DCTDecode",
                Ok(Object::Array(arr)) => arr
                    .iter()
                    .any(|item| matches!(item, Object::Name(n) if n == b"DCTDecode")),
                _ => false,
            };

            // DCTDecode streams are JPEG files as-is
            if is_dct && stream.content.starts_with(&[0xFF, 0xD8, 0xFF]) {
                return Some(stream.content.clone());
            }

            let Ok(data) = stream.decompressed_content() else {
                continue;
            };
            if data.starts_with(&[0xFF, 0xD8, 0xFF]) || data.starts_with(&[0x89, b'P', b'N', b'G'])
            {
                return Some(data);
            }

            // Raw 8-bit RGB samples
            let dimension = |key: &[u8]| match stream.dict.get(key) {
                Ok(Object::Integer(i)) => u32::try_from(*i).ok(),
                _ => None,
            };
            if let (Some(w), Some(h)) = (dimension(b"Width"), dimension(b"Height"))
                && let Some(img) = image::RgbImage::from_raw(w, h, data)
            {
                let mut png_data = Vec::new();
                if image::DynamicImage::ImageRgb8(img)
                    .write_to(
                        &mut std::io::Cursor::new(&mut png_data),
                        image::ImageFormat::Png,
                    )
                    .is_ok()
                {
                    return Some(png_data);
                }
            }
        }

        None
    }

    fn load(data: &[u8]) -> Result<Document> {
        Document::load_mem(data).map_err(|e| AppError::Pdf(e.to_string()))
    }
}

impl FormatHandler for PdfHandler {
    fn extract(&self, path: &Path, covers: &CoverStore) -> Extraction {
        let mut builder = ExtractionBuilder::new(path);
        let (data, digest) = read_source(path, &mut builder);

        let doc = data.and_then(|data| match Self::load(&data) {
            Ok(doc) => Some(doc),
            Err(e) => {
                builder.degrade(e.to_string());
                None
            }
        });

        let Some(doc) = doc else {
            builder.placeholder(covers, &digest);
            return builder.finish();
        };

        let metadata = builder.metadata_mut();
        metadata.pages = u32::try_from(doc.get_pages().len()).ok();
        if let Some(title) = Self::info_entry(&doc, b"Title") {
            metadata.title = title;
        }
        if let Some(author) = Self::info_entry(&doc, b"Author") {
            metadata.author = author;
        }

        match Self::first_page_image(&doc).map(|raw| covers.save_for_digest(&raw, &digest)) {
            Some(Ok(saved)) => builder.metadata_mut().cover_path = Some(saved),
            Some(Err(e)) => {
                tracing::debug!(path = %path.display(), error = %e, "PDF cover unusable");
                builder.degrade(format!("cover: {}", e));
                builder.placeholder(covers, &digest);
            }
            None => builder.placeholder(covers, &digest),
        }

        let extraction = builder.finish();
        if let Extraction::Degraded { reason, .. } = &extraction {
            tracing::warn!(path = %path.display(), reason = %reason, "PDF extraction degraded");
        }
        extraction
    }
}
