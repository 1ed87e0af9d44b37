//! Content-addressed cover storage.
//!
//! Every cover lands in a flat directory as `cover_<md5>.jpg`, where the
//! digest is taken over the *source* book file rather than the image. Scanning
//! the same file twice therefore rewrites the same cover instead of adding a
//! second one.

use crate::error::{AppError, Result};
use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use md5::{Digest, Md5};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Default JPEG quality (1-100).
pub const DEFAULT_QUALITY: u8 = 90;

/// Placeholder canvas width in pixels.
pub const PLACEHOLDER_WIDTH: u32 = 200;

/// Placeholder canvas height in pixels.
pub const PLACEHOLDER_HEIGHT: u32 = 300;

/// Longest placeholder title line, in characters.
pub const WRAP_WIDTH: usize = 20;

/// Maximum number of title lines drawn on a placeholder.
pub const MAX_TITLE_LINES: usize = 3;

const PLACEHOLDER_BACKGROUND: Rgb<u8> = Rgb([240, 240, 240]);
const PLACEHOLDER_INK: Rgb<u8> = Rgb([0, 0, 0]);
const TEXT_LEFT: u32 = 10;
const TEXT_TOP: u32 = 100;
const LINE_STEP: u32 = 30;

/// Hex MD5 digest identifying a cover's source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceDigest(String);

impl SourceDigest {
    /// Digest of raw bytes.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(data);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Digest of a file's content.
    pub fn of_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::of_bytes(&data))
    }
}

impl std::fmt::Display for SourceDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Writes normalized JPEG covers into a flat directory.
#[derive(Debug, Clone)]
pub struct CoverStore {
    dir: PathBuf,
    quality: u8,
}

impl CoverStore {
    /// Create a store writing into `dir` with the default quality.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_quality(dir, DEFAULT_QUALITY)
    }

    /// Create a store with an explicit JPEG quality.
    pub fn with_quality(dir: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            quality: quality.clamp(1, 100),
        }
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the output directory if it does not exist yet.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Path a cover for the given source digest is written to.
    pub fn path_for(&self, digest: &SourceDigest) -> PathBuf {
        self.dir.join(format!("cover_{}.jpg", digest))
    }

    /// Decode `raw`, re-encode it as JPEG and store it under the digest of
    /// `source`.
    pub fn save(&self, raw: &[u8], source: &Path) -> Result<PathBuf> {
        let digest = SourceDigest::of_file(source)?;
        self.save_for_digest(raw, &digest)
    }

    /// Same as [`CoverStore::save`] with a digest computed by the caller.
    pub fn save_for_digest(&self, raw: &[u8], digest: &SourceDigest) -> Result<PathBuf> {
        let img = ImageReader::new(Cursor::new(raw))
            .with_guessed_format()?
            .decode()?;

        let output = self.path_for(digest);
        self.ensure_dir()?;
        self.write_jpeg(&to_rgb(img), &output)?;

        tracing::debug!(path = %output.display(), "Saved cover");
        Ok(output)
    }

    /// Render a placeholder cover showing `title` and write it to `output`.
    pub fn create_placeholder(&self, title: &str, output: &Path) -> Result<PathBuf> {
        let img = render_placeholder(title);

        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        self.write_jpeg(&img, output)?;

        tracing::debug!(path = %output.display(), title, "Created placeholder cover");
        Ok(output.to_path_buf())
    }

    /// Placeholder stored at the digest-derived cover path.
    pub fn placeholder_for_digest(&self, title: &str, digest: &SourceDigest) -> Result<PathBuf> {
        self.create_placeholder(title, &self.path_for(digest))
    }

    fn write_jpeg(&self, img: &RgbImage, output: &Path) -> Result<()> {
        let mut jpeg_data = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_data, self.quality);
        encoder.encode_image(img)?;

        std::fs::write(output, jpeg_data)
            .map_err(|e| AppError::Internal(format!("Failed to write {}: {}", output.display(), e)))
    }
}

/// Normalize any decoded image to 8-bit RGB.
///
/// The JPEG decoder already hands CMYK and YCCK sources back as RGB; this
/// drops alpha and narrows 16-bit and float channels, none of which JPEG can
/// carry.
pub fn to_rgb(img: DynamicImage) -> RgbImage {
    match img {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    }
}

/// Word-wrap a title the way placeholders print it.
///
/// Words are packed greedily into lines of at most [`WRAP_WIDTH`] characters;
/// a single word longer than that gets a line of its own. Only the first
/// [`MAX_TITLE_LINES`] lines are kept.
pub fn wrap_title(title: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in title.split_whitespace() {
        let candidate_len = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };

        if candidate_len > WRAP_WIDTH && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        lines.push(current);
    }

    lines.truncate(MAX_TITLE_LINES);
    lines
}

/// Draw the placeholder canvas.
pub fn render_placeholder(title: &str) -> RgbImage {
    let mut img = RgbImage::from_pixel(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, PLACEHOLDER_BACKGROUND);

    let mut y = TEXT_TOP;
    for line in wrap_title(title) {
        draw_text(&mut img, TEXT_LEFT, y, &line);
        y += LINE_STEP;
    }

    img
}

/// Blit 8x8 glyphs; characters without a glyph are drawn as '?'.
fn draw_text(img: &mut RgbImage, left: u32, top: u32, text: &str) {
    let (width, height) = img.dimensions();

    for (index, ch) in text.chars().enumerate() {
        let glyph = BASIC_FONTS
            .get(ch)
            .or_else(|| BASIC_FONTS.get('?'))
            .unwrap_or([0; 8]);
        let origin_x = left + index as u32 * 8;

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..8u32 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                let x = origin_x + col;
                let y = top + row as u32;
                if x < width && y < height {
                    img.put_pixel(x, y, PLACEHOLDER_INK);
                }
            }
        }
    }
}
