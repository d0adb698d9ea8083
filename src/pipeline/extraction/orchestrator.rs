use zeroize::Zeroizing;

use super::pdfium::OCR_RENDER_DPI;
use super::sanitize::sanitize_extracted_text;
use super::types::{
    ExtractedPage, ExtractedText, ExtractionMethod, OcrEngine, PdfExtractor, PdfPageRenderer,
    RawDocument, TextExtractor,
};
use super::ExtractionError;

/// Native text shorter than this (after trimming) is treated as a scanned page.
const MIN_NATIVE_CHARS: usize = 20;

/// OCR output below this mean confidence is treated as noise.
const MIN_OCR_CONFIDENCE: f32 = 0.30;

/// Confidence reported for a usable native text layer.
const NATIVE_TEXT_CONFIDENCE: f32 = 0.95;

/// Concrete implementation of the text extractor.
/// Uses trait objects for OCR and PDF extraction, enabling dependency injection.
pub struct DocumentExtractor {
    pdf_extractor: Box<dyn PdfExtractor + Send + Sync>,
    ocr_engine: Option<Box<dyn OcrEngine + Send + Sync>>,
    pdf_renderer: Option<Box<dyn PdfPageRenderer + Send + Sync>>,
}

impl DocumentExtractor {
    pub fn new(pdf_extractor: Box<dyn PdfExtractor + Send + Sync>) -> Self {
        Self {
            pdf_extractor,
            ocr_engine: None,
            pdf_renderer: None,
        }
    }

    pub fn with_ocr_engine(mut self, engine: Box<dyn OcrEngine + Send + Sync>) -> Self {
        self.ocr_engine = Some(engine);
        self
    }

    /// Add a PDF page renderer for per-page OCR of scanned pages.
    pub fn with_pdf_renderer(mut self, renderer: Box<dyn PdfPageRenderer + Send + Sync>) -> Self {
        self.pdf_renderer = Some(renderer);
        self
    }

    fn ocr_available(&self) -> bool {
        self.ocr_engine.is_some() && self.pdf_renderer.is_some()
    }

    fn extract_pdf(&self, bytes: &[u8]) -> Result<Vec<ExtractedPage>, ExtractionError> {
        let native = self.pdf_extractor.extract_pages(bytes)?;

        // A PDF with no text layer at all may report zero pages through
        // pdf-extract; ask the renderer how many there really are.
        let page_count = match (&self.pdf_renderer, native.is_empty()) {
            (Some(renderer), true) if self.ocr_available() => renderer.page_count(bytes)?,
            _ => native.len(),
        };

        let mut pages = Vec::with_capacity(page_count);
        for index in 0..page_count {
            let native_text = Zeroizing::new(
                native
                    .get(index)
                    .map(|t| sanitize_extracted_text(t))
                    .unwrap_or_default(),
            );

            if native_text.trim().chars().count() >= MIN_NATIVE_CHARS || !self.ocr_available() {
                pages.push(ExtractedPage {
                    index,
                    confidence: if native_text.is_empty() { 0.0 } else { NATIVE_TEXT_CONFIDENCE },
                    text: native_text,
                    method: ExtractionMethod::PdfText,
                });
                continue;
            }

            match self.ocr_page(bytes, index) {
                Ok(Some(page)) => pages.push(page),
                Ok(None) => pages.push(ExtractedPage {
                    index,
                    confidence: 0.0,
                    text: native_text,
                    method: ExtractionMethod::PdfText,
                }),
                Err(e) => {
                    tracing::warn!(page = index, error = %e, "OCR failed, keeping native text");
                    pages.push(ExtractedPage {
                        index,
                        confidence: 0.0,
                        text: native_text,
                        method: ExtractionMethod::PdfText,
                    });
                }
            }
        }

        Ok(pages)
    }

    /// Render one page, OCR it and drop the raster. `None` when the OCR
    /// output is too weak to trust.
    fn ocr_page(&self, bytes: &[u8], index: usize) -> Result<Option<ExtractedPage>, ExtractionError> {
        let (Some(renderer), Some(engine)) = (&self.pdf_renderer, &self.ocr_engine) else {
            return Ok(None);
        };

        let raster = Zeroizing::new(renderer.render_page(bytes, index, OCR_RENDER_DPI)?);
        let result = engine.ocr_image(&raster)?;
        drop(raster);

        let text = Zeroizing::new(sanitize_extracted_text(&result.text));
        let mut ocr_raw = result.text;
        zeroize::Zeroize::zeroize(&mut ocr_raw);

        if result.confidence < MIN_OCR_CONFIDENCE || !text.chars().any(char::is_alphanumeric) {
            tracing::warn!(
                page = index,
                confidence = result.confidence,
                "OCR output discarded as unreadable"
            );
            return Ok(None);
        }

        Ok(Some(ExtractedPage {
            index,
            text,
            method: ExtractionMethod::Ocr,
            confidence: result.confidence,
        }))
    }
}

impl TextExtractor for DocumentExtractor {
    fn extract(&self, document: &RawDocument) -> Result<ExtractedText, ExtractionError> {
        if document.is_empty() {
            return Err(ExtractionError::Empty);
        }

        let pages = if document.is_pdf() {
            self.extract_pdf(document.bytes())?
        } else {
            let raw = std::str::from_utf8(document.bytes())
                .map_err(|e| ExtractionError::EncodingError(e.to_string()))?;
            vec![ExtractedPage {
                index: 0,
                text: Zeroizing::new(sanitize_extracted_text(raw)),
                method: ExtractionMethod::PlainText,
                confidence: 0.99,
            }]
        };

        let extracted = ExtractedText::new(pages, document.source_name());
        if !extracted.has_text() {
            return Err(ExtractionError::Empty);
        }

        tracing::info!(
            pages = extracted.page_count(),
            ocr_pages = extracted
                .pages
                .iter()
                .filter(|p| p.method == ExtractionMethod::Ocr)
                .count(),
            chars = extracted.char_count(),
            "Text extraction complete"
        );

        Ok(extracted)
    }
}
