pub mod types;
pub mod detectors;
pub mod hash;
pub(crate) mod redact;

pub use types::*;
pub use detectors::*;
pub use hash::{CanonicalBasis, PatientHash};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::extraction::ExtractedText;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnonymizationErrorKind {
    NoIdentifiableEntity,
}

/// Anonymization never blocks a referral; its only error is a warning that
/// the hash had to be built without a patient name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnonymizationError {
    #[error("No patient name found; hash derived from fallback material")]
    NoIdentifiableEntity,
}

impl AnonymizationError {
    pub fn kind(&self) -> AnonymizationErrorKind {
        match self {
            Self::NoIdentifiableEntity => AnonymizationErrorKind::NoIdentifiableEntity,
        }
    }
}

/// Result of the anonymization stage.
#[derive(Debug)]
pub struct AnonymizationOutput {
    pub redacted: RedactedText,
    pub patient_hash: PatientHash,
    /// Soft warning; processing continues either way.
    pub warning: Option<AnonymizationError>,
    pub basis: CanonicalBasis,
}

const NAME_TITLES: &[&str] = &["mr", "mrs", "ms", "miss", "mx", "master", "dr"];

/// Detects identifiers, redacts them and derives the patient hash.
pub struct Anonymizer {
    detectors: Vec<Detector>,
    salt: String,
}

impl Anonymizer {
    pub fn new(salt: impl Into<String>) -> Self {
        Self::with_detectors(default_detectors(), salt)
    }

    pub fn with_detectors(detectors: Vec<Detector>, salt: impl Into<String>) -> Self {
        Self {
            detectors,
            salt: salt.into(),
        }
    }

    pub fn anonymize(&self, text: &ExtractedText) -> AnonymizationOutput {
        let detected: Vec<Vec<PiiSpan>> = text
            .pages
            .iter()
            .map(|page| {
                self.detectors
                    .iter()
                    .flat_map(|d| d.detect(&page.text))
                    .collect()
            })
            .collect();
        let all: Vec<PiiSpan> = detected.iter().flatten().cloned().collect();

        let (patient_hash, basis) = self.derive_hash(&all, text.source_name());

        // Every value seen anywhere is hunted for on every page.
        let known = redact::known_values(&all);
        let mut placeholders = 0;
        let mut pages = Vec::with_capacity(text.pages.len());
        for (page, spans) in text.pages.iter().zip(detected) {
            let mut spans = spans;
            spans.extend(redact::propagate(&page.text, &known));
            let ranges = redact::merge_spans(spans);
            let (redacted, n) = redact::apply_placeholders(&page.text, &ranges);
            let (redacted, extra) = redact::scrub_residual(redacted, &all);
            placeholders += n + extra;
            pages.push(redacted);
        }

        let warning = (!basis.is_identifying()).then_some(AnonymizationError::NoIdentifiableEntity);
        if warning.is_some() {
            tracing::warn!(identity_basis = ?basis, "No patient name detected, using fallback identity");
        }

        tracing::info!(
            pages = pages.len(),
            spans = all.len(),
            placeholders,
            identity_basis = ?basis,
            "Anonymization complete"
        );

        AnonymizationOutput {
            redacted: RedactedText::new(pages, placeholders),
            patient_hash,
            warning,
            basis,
        }
    }

    fn derive_hash(&self, spans: &[PiiSpan], source: &str) -> (PatientHash, CanonicalBasis) {
        let clinicians: Vec<String> = spans
            .iter()
            .filter(|s| s.category == PiiCategory::Name && s.clinician)
            .map(|s| strip_titles(s.raw_value()))
            .collect();

        let name = best(spans, |s| {
            s.category == PiiCategory::Name
                && !s.clinician
                && !clinicians.contains(&strip_titles(s.raw_value()))
        })
        .map(|s| strip_titles(s.raw_value()));
        let dob = best(spans, |s| s.category == PiiCategory::DateOfBirth);
        let nhs = best(spans, |s| s.category == PiiCategory::NhsNumber);

        let (identifier, basis) = hash::canonical_identifier(
            name.as_deref(),
            dob.map(|s| s.raw_value()),
            nhs.map(|s| s.raw_value()),
            source,
        );
        (PatientHash::derive(&self.salt, &identifier), basis)
    }
}

/// Highest-confidence span matching `pred`; the earliest wins a tie.
fn best<'a>(spans: &'a [PiiSpan], pred: impl Fn(&PiiSpan) -> bool) -> Option<&'a PiiSpan> {
    spans
        .iter()
        .filter(|s| pred(s))
        .fold(None, |acc: Option<&PiiSpan>, s| match acc {
            Some(a) if a.confidence >= s.confidence => Some(a),
            _ => Some(s),
        })
}

fn strip_titles(name: &str) -> String {
    let normalized = hash::normalize_text(name);
    normalized
        .split(' ')
        .skip_while(|w| NAME_TITLES.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}
