use super::types::PdfExtractor;
use super::ExtractionError;

/// PDF text extractor using the pdf-extract crate.
/// Handles digital PDFs with embedded text layers.
pub struct PdfTextExtractor;

impl PdfExtractor for PdfTextExtractor {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        // pdf-extract panics on some malformed inputs instead of returning an error.
        let outcome = std::panic::catch_unwind(|| {
            pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
        });

        match outcome {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(map_output_error(&e.to_string())),
            Err(_) => Err(ExtractionError::PdfParsing(
                "parser aborted on malformed input".into(),
            )),
        }
    }
}

fn map_output_error(msg: &str) -> ExtractionError {
    let lower = msg.to_lowercase();
    if lower.contains("encrypt") || lower.contains("password") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfParsing(msg.to_string())
    }
}
