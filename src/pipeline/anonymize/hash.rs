use std::fmt;

use base64::Engine;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Fixed label whose digest marks runs that never produced a patient hash.
const UNIDENTIFIABLE_LABEL: &[u8] = b"referral-triage/unidentifiable";

/// One-way patient identifier: base64 SHA-256 of the salted canonical
/// identifier. Always 44 characters.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientHash(String);

impl PatientHash {
    pub(crate) fn derive(salt: &str, canonical: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        Self(base64::engine::general_purpose::STANDARD.encode(hasher.finalize()))
    }

    /// Sentinel recorded when a run fails before anonymization produced a hash.
    pub fn unidentifiable() -> Self {
        Self(base64::engine::general_purpose::STANDARD.encode(Sha256::digest(UNIDENTIFIABLE_LABEL)))
    }

    pub fn is_unidentifiable(&self) -> bool {
        *self == Self::unidentifiable()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PatientHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PatientHash({})", self.0)
    }
}

/// Which material the canonical identifier was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalBasis {
    NameAndDob,
    NameAndSource,
    NhsNumberAndSource,
    DobAndSource,
    SourceOnly,
}

impl CanonicalBasis {
    /// Whether the identifier contains a patient-distinguishing field from
    /// the letter itself.
    pub fn is_identifying(&self) -> bool {
        matches!(self, Self::NameAndDob | Self::NameAndSource)
    }
}

/// Build the canonical identifier from normalized parts. Preference order:
/// name + date of birth, name + source, NHS number + source, date of birth +
/// source, source.
pub(crate) fn canonical_identifier(
    name: Option<&str>,
    dob: Option<&str>,
    nhs: Option<&str>,
    source: &str,
) -> (Zeroizing<String>, CanonicalBasis) {
    let source = normalize_text(source);
    let name = name.map(normalize_text).filter(|n| !n.is_empty());
    let dob = dob.map(normalize_dob).filter(|d| !d.is_empty());
    let nhs = nhs.map(normalize_digits).filter(|n| !n.is_empty());

    let (value, basis) = match (name, dob, nhs) {
        (Some(n), Some(d), _) => (format!("name:{n}|dob:{d}"), CanonicalBasis::NameAndDob),
        (Some(n), None, _) => (format!("name:{n}|file:{source}"), CanonicalBasis::NameAndSource),
        (None, _, Some(nhs)) => (
            format!("nhs:{nhs}|file:{source}"),
            CanonicalBasis::NhsNumberAndSource,
        ),
        (None, Some(d), None) => (format!("dob:{d}|file:{source}"), CanonicalBasis::DobAndSource),
        (None, None, None) => (format!("file:{source}"), CanonicalBasis::SourceOnly),
    };
    (Zeroizing::new(value), basis)
}

/// Case-fold and collapse whitespace.
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .map(|w| w.trim_matches(|c: char| c == ',' || c == '.'))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn normalize_digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d %B %Y", "%d %b %Y", "%B %d %Y",
    "%b %d %Y",
];

const SHORT_YEAR_FORMATS: &[&str] = &["%d/%m/%y", "%d-%m-%y", "%d.%m.%y"];

/// Normalize a date of birth to ISO 8601 so "01/01/1950", "1 January 1950"
/// and "1950-01-01" hash identically. Unparseable dates fall back to the
/// text normalization.
pub fn normalize_dob(raw: &str) -> String {
    let cleaned = strip_ordinals(&raw.replace(',', " "));
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    for fmt in DATE_FORMATS {
        // %Y happily accepts "50"; two-digit years are handled below.
        match NaiveDate::parse_from_str(&cleaned, fmt) {
            Ok(date) if date.year() >= 1000 => return date.format("%Y-%m-%d").to_string(),
            _ => {}
        }
    }
    for fmt in SHORT_YEAR_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, fmt) {
            // A birth date is never in the future.
            let this_year = chrono::Utc::now().year();
            let date = if date.year() > this_year {
                date.with_year(date.year() - 100).unwrap_or(date)
            } else {
                date
            };
            return date.format("%Y-%m-%d").to_string();
        }
    }
    normalize_text(raw)
}

fn strip_ordinals(raw: &str) -> String {
    raw.split_whitespace()
        .map(|w| {
            let lower = w.to_ascii_lowercase();
            let digits = w.trim_end_matches(|c: char| c.is_ascii_alphabetic());
            if !digits.is_empty()
                && digits.chars().all(|c| c.is_ascii_digit())
                && ["st", "nd", "rd", "th"].iter().any(|s| lower.ends_with(s))
            {
                digits.to_string()
            } else {
                w.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
