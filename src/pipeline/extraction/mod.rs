pub mod types;
pub mod sanitize;
pub mod pdf;
pub mod ocr;
pub mod pdfium;
pub mod orchestrator;

pub use types::*;
pub use sanitize::*;
pub use pdf::*;
pub use ocr::*;
pub use pdfium::*;
pub use orchestrator::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure category surfaced in results and audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionErrorKind {
    /// Not a format we can read (encrypted, unsupported encoding, I/O).
    Unreadable,
    /// Claims to be a PDF but cannot be parsed.
    Corrupt,
    /// Parsed, but no page yielded any text.
    Empty,
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tesseract OCR initialization failed: {0}")]
    OcrInit(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF is password protected")]
    PdfEncrypted,

    #[error("Failed to render page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Text encoding error: {0}")]
    EncodingError(String),

    #[error("No page yielded any text")]
    Empty,
}

impl ExtractionError {
    pub fn kind(&self) -> ExtractionErrorKind {
        match self {
            Self::PdfParsing(_) => ExtractionErrorKind::Corrupt,
            Self::Empty => ExtractionErrorKind::Empty,
            Self::Io(_)
            | Self::OcrInit(_)
            | Self::OcrProcessing(_)
            | Self::PdfEncrypted
            | Self::PdfRendering { .. }
            | Self::ImageProcessing(_)
            | Self::EncodingError(_) => ExtractionErrorKind::Unreadable,
        }
    }
}
