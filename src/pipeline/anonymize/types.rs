use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// What kind of identifier a span carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiCategory {
    Name,
    DateOfBirth,
    NhsNumber,
    Address,
    Contact,
    Other,
}

impl PiiCategory {
    /// Replacement token. Carries the category only, never the original
    /// content or its length.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Name => "[NAME]",
            Self::DateOfBirth => "[DATE_OF_BIRTH]",
            Self::NhsNumber => "[NHS_NUMBER]",
            Self::Address => "[ADDRESS]",
            Self::Contact => "[CONTACT]",
            Self::Other => "[REDACTED]",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::DateOfBirth => "date_of_birth",
            Self::NhsNumber => "nhs_number",
            Self::Address => "address",
            Self::Contact => "contact",
            Self::Other => "other",
        }
    }

    pub const ALL: [PiiCategory; 6] = [
        Self::Name,
        Self::DateOfBirth,
        Self::NhsNumber,
        Self::Address,
        Self::Contact,
        Self::Other,
    ];
}

/// A detected identifier: byte range into one page's text plus the matched
/// value. The value never leaves the anonymizer and is zeroized on drop.
#[derive(Clone)]
pub struct PiiSpan {
    pub category: PiiCategory,
    pub start: usize,
    pub end: usize,
    pub confidence: f32,
    /// Set for names found in a clinician context (GP, consultant,
    /// signature block). Redacted, but never used as patient identity.
    pub clinician: bool,
    raw_value: Zeroizing<String>,
}

impl PiiSpan {
    pub fn new(category: PiiCategory, start: usize, end: usize, raw_value: &str, confidence: f32) -> Self {
        Self {
            category,
            start,
            end,
            confidence,
            clinician: false,
            raw_value: Zeroizing::new(raw_value.to_string()),
        }
    }

    pub fn clinician(mut self) -> Self {
        self.clinician = true;
        self
    }

    pub(crate) fn raw_value(&self) -> &str {
        &self.raw_value
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &PiiSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Debug for PiiSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PiiSpan")
            .field("category", &self.category)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("confidence", &self.confidence)
            .field("clinician", &self.clinician)
            .finish_non_exhaustive()
    }
}

/// Referral text with every detected identifier replaced by its category
/// placeholder. The only text form allowed past the anonymizer.
///
/// Constructed only by the anonymizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactedText {
    pages: Vec<String>,
    placeholder_count: usize,
}

impl RedactedText {
    pub(crate) fn new(pages: Vec<String>, placeholder_count: usize) -> Self {
        Self {
            pages,
            placeholder_count,
        }
    }

    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    /// Pages joined with a blank line, in source order.
    pub fn as_text(&self) -> String {
        self.pages.join("\n\n")
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholder_count
    }

    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.trim().is_empty())
    }

    pub fn word_count(&self) -> usize {
        self.pages.iter().map(|p| p.split_whitespace().count()).sum()
    }
}

/// Test-only constructor so downstream stages can be exercised without
/// running detection.
#[cfg(test)]
impl RedactedText {
    pub(crate) fn from_redacted(text: &str) -> Self {
        Self::new(vec![text.to_string()], 0)
    }
}
