use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::ExtractionError;
use crate::crypto::secure_delete_file;

/// PDF magic bytes.
const PDF_MAGIC: &[u8] = b"%PDF";

/// A referral exactly as received: binary content plus the name it was
/// uploaded under.
///
/// Ephemeral. The bytes are zeroized when the value is dropped, and a document
/// created with [`RawDocument::from_upload`] also securely deletes the upload
/// file, so every exit path of a pipeline run destroys the source.
pub struct RawDocument {
    bytes: Zeroizing<Vec<u8>>,
    source_name: Zeroizing<String>,
    upload_path: Option<PathBuf>,
}

impl RawDocument {
    /// Wrap in-memory content. Nothing on disk is touched on drop.
    pub fn new(bytes: Vec<u8>, source_name: impl Into<String>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
            source_name: Zeroizing::new(source_name.into()),
            upload_path: None,
        }
    }

    /// Take ownership of an uploaded file. The file is overwritten and
    /// removed when the document is dropped.
    pub fn from_upload(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            bytes: Zeroizing::new(bytes),
            source_name: Zeroizing::new(source_name),
            upload_path: Some(path.to_path_buf()),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn is_pdf(&self) -> bool {
        // Some producers emit a few bytes of junk before the header.
        self.bytes
            .windows(PDF_MAGIC.len())
            .take(1024)
            .any(|w| w == PDF_MAGIC)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for RawDocument {
    fn drop(&mut self) {
        if let Some(path) = self.upload_path.take() {
            if let Err(e) = secure_delete_file(&path) {
                tracing::error!(error = %e, "Failed to destroy uploaded referral");
            }
        }
    }
}

impl fmt::Debug for RawDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDocument")
            .field("len", &self.bytes.len())
            .field("owns_upload", &self.upload_path.is_some())
            .finish()
    }
}

/// How a page's text was obtained
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    PdfText,
    Ocr,
    PlainText,
}

/// One page of extracted text. Text is zeroized on drop.
pub struct ExtractedPage {
    /// Zero-based position in the source document.
    pub index: usize,
    pub text: Zeroizing<String>,
    pub method: ExtractionMethod,
    pub confidence: f32,
}

impl ExtractedPage {
    pub fn has_text(&self) -> bool {
        self.text.chars().any(char::is_alphanumeric)
    }
}

impl fmt::Debug for ExtractedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractedPage")
            .field("index", &self.index)
            .field("chars", &self.text.chars().count())
            .field("method", &self.method)
            .field("confidence", &self.confidence)
            .finish()
    }
}

/// Plain text of a referral, page by page, in source order.
///
/// Owned by exactly one pipeline run and never persisted. Carries the source
/// name forward because the anonymizer may need it for hashing, so no later
/// stage has to look at the raw document again.
pub struct ExtractedText {
    pub pages: Vec<ExtractedPage>,
    source_name: Zeroizing<String>,
}

impl ExtractedText {
    pub fn new(pages: Vec<ExtractedPage>, source_name: &str) -> Self {
        Self {
            pages,
            source_name: Zeroizing::new(source_name.to_string()),
        }
    }

    /// Single plain-text page, mostly for callers that already hold text.
    pub fn from_plain_text(text: &str, source_name: &str) -> Self {
        Self::new(
            vec![ExtractedPage {
                index: 0,
                text: Zeroizing::new(text.to_string()),
                method: ExtractionMethod::PlainText,
                confidence: 0.99,
            }],
            source_name,
        )
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn has_text(&self) -> bool {
        self.pages.iter().any(ExtractedPage::has_text)
    }

    pub fn char_count(&self) -> usize {
        self.pages.iter().map(|p| p.text.chars().count()).sum()
    }
}

impl fmt::Debug for ExtractedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractedText")
            .field("pages", &self.pages)
            .finish_non_exhaustive()
    }
}

/// Raw OCR result from the engine
#[derive(Debug, Clone)]
pub struct OcrPageResult {
    pub text: String,
    pub confidence: f32,
}

/// OCR engine abstraction (allows mocking for tests)
pub trait OcrEngine {
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError>;
}

/// Native PDF text layer extraction, one string per page in document order.
pub trait PdfExtractor {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError>;
}

/// Renders a single PDF page to an encoded image for OCR.
pub trait PdfPageRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError>;

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError>;
}

/// Stage contract: raw document in, page-ordered text out.
pub trait TextExtractor {
    fn extract(&self, document: &RawDocument) -> Result<ExtractedText, ExtractionError>;
}
