use super::types::{OcrEngine, OcrPageResult};
use super::ExtractionError;

/// Tesseract reading English referrals. Compiled in with the `ocr` feature.
#[cfg(feature = "ocr")]
pub struct BundledTesseract {
    tessdata: String,
}

#[cfg(feature = "ocr")]
impl BundledTesseract {
    const LANGUAGE: &'static str = "eng";

    /// Fails unless `tessdata_dir` is a UTF-8 path holding `eng.traineddata`.
    pub fn new(tessdata_dir: &std::path::Path) -> Result<Self, ExtractionError> {
        let model = tessdata_dir.join(format!("{}.traineddata", Self::LANGUAGE));
        if !model.is_file() {
            return Err(ExtractionError::OcrInit(format!(
                "{} is missing",
                model.display()
            )));
        }
        let tessdata = tessdata_dir
            .to_str()
            .ok_or_else(|| ExtractionError::OcrInit("tessdata path is not UTF-8".into()))?
            .to_owned();
        Ok(Self { tessdata })
    }
}

#[cfg(feature = "ocr")]
fn processing(e: impl std::fmt::Debug) -> ExtractionError {
    ExtractionError::OcrProcessing(format!("{e:?}"))
}

#[cfg(feature = "ocr")]
impl OcrEngine for BundledTesseract {
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        let mut page = tesseract::Tesseract::new(Some(self.tessdata.as_str()), Some(Self::LANGUAGE))
            .map_err(|e| ExtractionError::OcrInit(format!("{e:?}")))?
            .set_image_from_mem(image_bytes)
            .map_err(processing)?;
        let text = page.get_text().map_err(processing)?;
        // Tesseract reports 0-100, or -1 when it recognised nothing.
        let confidence = page.mean_text_conf().clamp(0, 100) as f32 / 100.0;

        Ok(OcrPageResult { text, confidence })
    }
}

/// Returns the same text and confidence for every page.
pub struct MockOcrEngine {
    result: OcrPageResult,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            result: OcrPageResult {
                text: text.to_owned(),
                confidence,
            },
        }
    }
}

impl OcrEngine for MockOcrEngine {
    fn ocr_image(&self, _image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        Ok(self.result.clone())
    }
}

/// Fails every page, as an engine with a broken install would.
pub struct FailingOcrEngine;

impl OcrEngine for FailingOcrEngine {
    fn ocr_image(&self, _image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        Err(ExtractionError::OcrProcessing("engine unavailable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_returns_configured_text() {
        let engine = MockOcrEngine::new("Troponin raised", 0.87);
        let result = engine.ocr_image(&[]).unwrap();
        assert_eq!(result.text, "Troponin raised");
        assert!((result.confidence - 0.87).abs() < f32::EPSILON);
    }

    #[test]
    fn failing_engine_reports_processing_error() {
        let err = FailingOcrEngine.ocr_image(&[]).unwrap_err();
        assert!(matches!(err, ExtractionError::OcrProcessing(_)));
    }

    #[cfg(feature = "ocr")]
    #[test]
    fn tesseract_requires_english_model() {
        let dir = tempfile::tempdir().unwrap();
        let err = BundledTesseract::new(dir.path()).err().unwrap();
        assert!(matches!(err, ExtractionError::OcrInit(_)));
    }
}
