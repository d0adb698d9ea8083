//! Rasterises referral pages through PDFium for the OCR fallback.
//!
//! The library location is resolved once, at construction. Each call binds
//! a fresh `Pdfium` handle since the upstream type is `!Send`.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageOutputFormat;
use pdfium_render::prelude::*;

use super::types::PdfPageRenderer;
use super::ExtractionError;

/// Resolution pages are rasterised at before OCR.
pub const OCR_RENDER_DPI: u32 = 300;

/// Longest edge of any rendered page, in pixels.
const PAGE_EDGE_LIMIT_PX: u32 = 4096;

/// Explicit library override, checked before any search.
const LIBRARY_ENV: &str = "PDFIUM_DYNAMIC_LIB_PATH";

/// Pixel size of one rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RasterSize {
    width: u32,
    height: u32,
}

impl RasterSize {
    /// Scale a page measured in points (1/72 inch) to `dpi`, shrinking both
    /// edges by the same factor when the longer one would pass the limit.
    fn for_page(width_pt: f32, height_pt: f32, dpi: u32) -> Self {
        let scale = dpi as f32 / 72.0;
        let width = (width_pt * scale).max(1.0);
        let height = (height_pt * scale).max(1.0);
        let shrink = (PAGE_EDGE_LIMIT_PX as f32 / width.max(height)).min(1.0);
        let px = |edge: f32| ((edge * shrink) as u32).clamp(1, PAGE_EDGE_LIMIT_PX);
        Self {
            width: px(width),
            height: px(height),
        }
    }
}

#[derive(Debug, Clone)]
enum LibrarySource {
    File(PathBuf),
    System,
}

/// Page renderer backed by the PDFium shared library.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    source: LibrarySource,
}

impl PdfiumRenderer {
    /// Locate PDFium: the `PDFIUM_DYNAMIC_LIB_PATH` file, then next to the
    /// executable (or in its `pdfium/` folder), then the system search path.
    pub fn new() -> Result<Self, ExtractionError> {
        let renderer = Self {
            source: locate_library()?,
        };
        tracing::debug!(source = ?renderer.source, "PDFium located");
        Ok(renderer)
    }

    fn bind(&self) -> Result<Pdfium, ExtractionError> {
        let bindings = match &self.source {
            LibrarySource::File(path) => Pdfium::bind_to_library(path),
            LibrarySource::System => Pdfium::bind_to_system_library(),
        };
        bindings
            .map(Pdfium::new)
            .map_err(|e| render_error(0, format!("PDFium could not be bound: {e}")))
    }

    /// Open the document and hand it to `f`. The handle lives only for the call.
    fn with_document<T>(
        &self,
        pdf_bytes: &[u8],
        f: impl FnOnce(&PdfDocument<'_>) -> Result<T, ExtractionError>,
    ) -> Result<T, ExtractionError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(classify_load_error)?;
        f(&document)
    }
}

fn locate_library() -> Result<LibrarySource, ExtractionError> {
    if let Ok(path) = std::env::var(LIBRARY_ENV) {
        return match Pdfium::bind_to_library(&path) {
            Ok(_) => Ok(LibrarySource::File(PathBuf::from(path))),
            Err(e) => Err(render_error(0, format!("{LIBRARY_ENV} does not load: {e}"))),
        };
    }

    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| [dir.to_path_buf(), dir.join("pdfium")]));
    for dir in beside_exe.iter().flatten() {
        let candidate = library_file_in(dir);
        if Pdfium::bind_to_library(&candidate).is_ok() {
            return Ok(LibrarySource::File(candidate));
        }
    }

    Pdfium::bind_to_system_library()
        .map(|_| LibrarySource::System)
        .map_err(|e| {
            render_error(0, format!("PDFium not found; set {LIBRARY_ENV} or install it: {e}"))
        })
}

/// Platform-specific PDFium file name inside `dir`.
fn library_file_in(dir: &Path) -> PathBuf {
    PathBuf::from(Pdfium::pdfium_platform_library_name_at_path(
        dir.to_string_lossy().as_ref(),
    ))
}

fn render_error(page: usize, reason: String) -> ExtractionError {
    ExtractionError::PdfRendering { page, reason }
}

/// Password-protected files surface as `PdfEncrypted`; anything else that
/// stops PDFium opening the bytes is a rendering failure.
fn classify_load_error(e: PdfiumError) -> ExtractionError {
    let message = e.to_string().to_lowercase();
    if ["password", "encrypt"].iter().any(|hint| message.contains(hint)) {
        ExtractionError::PdfEncrypted
    } else {
        render_error(0, format!("PDFium could not open the document: {e}"))
    }
}

impl PdfPageRenderer for PdfiumRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        self.with_document(pdf_bytes, |document| Ok(document.pages().len() as usize))
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        self.with_document(pdf_bytes, |document| {
            let pages = document.pages();
            let page = u16::try_from(page_index)
                .ok()
                .and_then(|index| pages.get(index).ok())
                .ok_or_else(|| {
                    render_error(page_index, format!("no such page in a {}-page document", pages.len()))
                })?;

            let size = RasterSize::for_page(page.width().value, page.height().value, dpi);
            let bitmap = page
                .render_with_config(
                    &PdfRenderConfig::new()
                        .set_target_width(size.width as i32)
                        .set_maximum_height(size.height as i32),
                )
                .map_err(|e| render_error(page_index, e.to_string()))?;

            let png = encode_png(&bitmap.as_image())?;
            tracing::debug!(
                page = page_index,
                width = size.width,
                height = size.height,
                "Page rasterised for OCR"
            );
            Ok(png)
        })
    }
}

fn encode_png(image: &image::DynamicImage) -> Result<Vec<u8>, ExtractionError> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(out.into_inner())
}

/// Renders every in-range page as a blank white square.
///
/// Drives the OCR path in tests without the PDFium library.
pub struct BlankPageRenderer {
    pages: usize,
}

impl BlankPageRenderer {
    pub fn new(pages: usize) -> Self {
        Self { pages }
    }
}

impl PdfPageRenderer for BlankPageRenderer {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        Ok(self.pages)
    }

    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page_index: usize,
        _dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        if page_index >= self.pages {
            return Err(render_error(
                page_index,
                format!("no such page in a {}-page document", self.pages),
            ));
        }
        let blank = image::RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255]));
        encode_png(&image::DynamicImage::ImageRgb8(blank))
    }
}
