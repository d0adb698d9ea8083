use std::sync::LazyLock;

use regex::Regex;

use super::types::{PiiCategory, PiiSpan};
use crate::pipeline::assessment::lexicon;

/// A PII detector. New detection strategies are added as variants.
pub enum Detector {
    /// Regular-expression rules for structured identifiers and labelled fields.
    Pattern(PatternDetector),
    /// Context heuristics for free-text names and address blocks.
    Entity(EntityDetector),
}

impl Detector {
    pub fn detect(&self, text: &str) -> Vec<PiiSpan> {
        match self {
            Self::Pattern(d) => d.detect(text),
            Self::Entity(d) => d.detect(text),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pattern(_) => "pattern",
            Self::Entity(_) => "entity",
        }
    }
}

/// Detector set used by the pipeline.
pub fn default_detectors() -> Vec<Detector> {
    vec![
        Detector::Pattern(PatternDetector::standard()),
        Detector::Entity(EntityDetector),
    ]
}

// ── Pattern rules ──────────────────────────────────────────

/// A compiled rule with the metadata of the spans it produces.
pub struct PatternRule {
    regex: Regex,
    category: PiiCategory,
    confidence: f32,
    /// Capture group holding the identifier (0 = whole match).
    group: usize,
    /// Returns the byte length of the accepted prefix of a match, or `None`
    /// to reject it.
    accept: fn(&str) -> Option<usize>,
    clinician: bool,
}

const NAME: &str = r"[A-Z][A-Za-z'\-]+(?:[ \t]+[A-Z][A-Za-z'\-]+){0,2}";

const DATE: &str = r"\d{4}-\d{1,2}-\d{1,2}|\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4}|\d{1,2}(?:st|nd|rd|th)?[ \t]+(?i:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?,?[ \t]+\d{4}";

fn rule(pattern: &str, category: PiiCategory, confidence: f32, group: usize) -> PatternRule {
    PatternRule {
        regex: Regex::new(pattern).expect("invalid PII pattern"),
        category,
        confidence,
        group,
        accept: whole,
        clinician: false,
    }
}

impl PatternRule {
    fn accepting(mut self, accept: fn(&str) -> Option<usize>) -> Self {
        self.accept = accept;
        self
    }

    fn clinician(mut self) -> Self {
        self.clinician = true;
        self
    }
}

static STRUCTURED_RULES: LazyLock<Vec<PatternRule>> = LazyLock::new(|| {
    vec![
        // Dates of birth, labelled
        rule(
            &format!(r"\b(?i:dob|d\.o\.b\.?|date\s+of\s+birth|born(?:\s+on)?)\s*[:\-]?[ \t]*({DATE})"),
            PiiCategory::DateOfBirth,
            0.95,
            1,
        ),
        // Any other full date
        rule(&format!(r"\b({DATE})\b"), PiiCategory::Other, 0.5, 1),
        // NHS number, labelled
        rule(
            r"\b(?i:nhs)\s*(?i:no\.?|number|num|#)?\s*[:\-]?[ \t]*(\d{3}[ \-]?\d{3}[ \-]?\d{4})\b",
            PiiCategory::NhsNumber,
            0.98,
            1,
        ),
        // Bare ten-digit numbers passing the NHS check digit
        rule(r"\b(\d{3}[ \-]?\d{3}[ \-]?\d{4})\b", PiiCategory::NhsNumber, 0.8, 1)
            .accepting(valid_nhs_number),
        // Hospital / MRN numbers
        rule(
            r"\b(?i:mrn|hospital\s+(?:no\.?|number)|hosp\.?\s*no\.?|unit\s+no\.?|patient\s+id|pas\s+no\.?)\s*[:\-]?[ \t]*([A-Za-z]{0,3}\d[A-Za-z0-9]{3,11})\b",
            PiiCategory::Other,
            0.9,
            1,
        ),
        // Email
        rule(
            r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b",
            PiiCategory::Contact,
            0.99,
            0,
        ),
        // Phone, labelled
        rule(
            r"\b(?i:tel(?:ephone)?|phone|mob(?:ile)?|fax|contact\s+(?:no\.?|number))\.?\s*[:\-]?[ \t]*(\+?\(?\d[\d \t()\-]{6,}\d)",
            PiiCategory::Contact,
            0.95,
            1,
        ),
        // UK mobile
        rule(
            r"(?:\+44[ \t]?7\d{3}|\b07\d{3})[ \t]?\d{3}[ \t]?\d{3}\b",
            PiiCategory::Contact,
            0.85,
            0,
        ),
        // UK landline with spaced area code
        rule(
            r"(?:\+44[ \t]?|\b0)\d{2,4}[ \t]\d{3,4}[ \t]?\d{3,4}\b",
            PiiCategory::Contact,
            0.7,
            0,
        ),
        // UK postcode
        rule(
            r"\b[A-Z]{1,2}\d[A-Z\d]?[ \t]*\d[A-Z]{2}\b",
            PiiCategory::Address,
            0.9,
            0,
        ),
        // Labelled address, rest of line
        rule(
            r"\b(?i:home\s+address|address|addr\.?)\s*[:\-][ \t]*([^\n]+)",
            PiiCategory::Address,
            0.9,
            1,
        ),
        // Street line
        rule(
            r"\b\d{1,4}[A-Za-z]?,?[ \t]+(?:[A-Z][a-z]+[ \t]+){1,3}(?:Street|St|Road|Rd|Avenue|Ave|Lane|Ln|Close|Drive|Way|Crescent|Court|Place|Terrace|Gardens|Grove|Park|Square|Hill|View|Row|Walk)\b\.?",
            PiiCategory::Address,
            0.85,
            0,
        ),
        // Labelled patient names
        rule(
            &format!(r"\b(?i:patient\s+name|full\s+name|surname|forenames?|name|patient)\b\s*[:\-]?[ \t]*({NAME})"),
            PiiCategory::Name,
            0.95,
            1,
        )
        .accepting(plausible_name),
        // Subject lines often carry the patient's name, or the complaint
        rule(
            &format!(r"\b(?i:re)\b\s*[:\-]?[ \t]*({NAME})"),
            PiiCategory::Name,
            0.9,
            1,
        )
        .accepting(plausible_name),
        // Titled names
        rule(
            &format!(r"\b(?:Mr|Mrs|Ms|Miss|Mx)\.?[ \t]+({NAME})"),
            PiiCategory::Name,
            0.85,
            1,
        )
        .accepting(plausible_name),
        // Clinician names, titled
        rule(
            &format!(r"\b(?:Dr|Doctor|Prof|Professor)\.?[ \t]+({NAME})"),
            PiiCategory::Name,
            0.85,
            1,
        )
        .accepting(plausible_name)
        .clinician(),
        // Clinician names, by role label
        rule(
            &format!(r"\b(?i:gp|general\s+practitioner|referring\s+(?:gp|clinician|doctor|physician)|consultant|signed|from)\s*[:\-][ \t]*(?:(?:Dr|Doctor|Prof)\.?[ \t]+)?({NAME})"),
            PiiCategory::Name,
            0.8,
            1,
        )
        .accepting(plausible_name)
        .clinician(),
    ]
});

/// Regex rules for structured identifiers and labelled fields.
pub struct PatternDetector {
    rules: &'static [PatternRule],
}

impl PatternDetector {
    pub fn standard() -> Self {
        Self {
            rules: STRUCTURED_RULES.as_slice(),
        }
    }

    pub fn detect(&self, text: &str) -> Vec<PiiSpan> {
        let mut spans = Vec::new();
        for rule in self.rules {
            for caps in rule.regex.captures_iter(text) {
                let Some(m) = caps.get(rule.group) else {
                    continue;
                };
                if let Some(span) = accept_span(text, m.start(), m.as_str(), rule) {
                    spans.push(span);
                }
            }
        }
        spans
    }
}

fn accept_span(text: &str, start: usize, matched: &str, rule: &PatternRule) -> Option<PiiSpan> {
    let len = (rule.accept)(matched)?;
    let value = matched[..len].trim_end();
    if value.trim().is_empty() {
        return None;
    }
    let end = start + value.len();
    let span = PiiSpan::new(rule.category, start, end, &text[start..end], rule.confidence);
    Some(if rule.clinician { span.clinician() } else { span })
}

fn whole(matched: &str) -> Option<usize> {
    Some(matched.len())
}

/// NHS numbers carry a modulus 11 check digit.
pub fn valid_nhs_number(matched: &str) -> Option<usize> {
    let digits: Vec<u32> = matched.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 10 {
        return None;
    }
    let sum: u32 = digits[..9]
        .iter()
        .enumerate()
        .map(|(i, d)| d * (10 - i as u32))
        .sum();
    let check = match 11 - (sum % 11) {
        11 => 0,
        10 => return None,
        c => c,
    };
    (check == digits[9]).then_some(matched.len())
}

/// Words that start with a capital in referral letters without being part of
/// a person's name: headings, clinical terms, post-nominals.
const NAME_STOPWORDS: &[&str] = &[
    "a&e", "acute", "address", "allergies", "angina", "aortic", "assessment", "atrial",
    "background", "best", "birth", "breathlessness", "bsc", "cardiac", "cardiology",
    "centre", "chb", "chest", "clinic", "colleague", "complaint", "consultant", "date",
    "dear", "department", "diagnosis", "dob", "drcog", "dyspnoea", "ecg", "ed", "emergency",
    "examination", "failure", "faithfully", "family", "fcem", "fibrillation", "frcgp",
    "frcp", "gp", "health", "heart", "history", "hospital", "impression", "investigations",
    "kind", "letter", "management", "mbbs", "mbchb", "md", "medical", "medication",
    "medications", "mrcgp", "mrcp", "murmur", "nhs", "number", "pain", "palpitations",
    "patient", "phd", "plan", "practice", "presenting", "presents", "query", "re",
    "referral", "regards", "review", "routine", "service", "severe", "sincerely", "social",
    "summary", "surgery", "suspected", "team", "thanks", "the", "trust", "unstable",
    "urgent", "ward", "yours",
];

fn is_name_stopword(token: &str) -> bool {
    let lower = token
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '&')
        .to_lowercase();
    NAME_STOPWORDS.binary_search(&lower.as_str()).is_ok()
}

/// Accept the leading run of tokens that could be a person's name. A run
/// that spells a red-flag term ("Syncope", "Aortic Stenosis") is no name.
pub fn plausible_name(matched: &str) -> Option<usize> {
    let mut accepted = 0;
    let mut offset = 0;
    for token in matched.split_inclusive(|c: char| c == ' ' || c == '\t') {
        let word = token.trim_end();
        if word.len() < 2 || is_name_stopword(word) || lexicon::mentions_red_flag(word) {
            break;
        }
        offset += token.len();
        accepted = offset;
    }
    (accepted > 0 && !lexicon::mentions_red_flag(&matched[..accepted])).then_some(accepted)
}

// ── Entity heuristics ──────────────────────────────────────

static PERSON_CONTEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][a-z'\-]+[ \t]+[A-Z][a-z'\-]+)(?:,[ \t]*|[ \t]+)(?:(?i:aged?)[ \t]*\d{1,3}|\(\d{1,3}\)|(?i:is\s+an?|an?)[ \t]+\d{1,3}[ \-](?i:year)[ \-](?i:old))",
    )
    .expect("invalid person-context pattern")
});

static SIGN_OFF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:yours[ \t]+(?:sincerely|faithfully|truly)|kind[ \t]+regards|best[ \t]+wishes|many[ \t]+thanks|with[ \t]+thanks|regards)[ \t]*,?[ \t]*$",
    )
    .expect("invalid sign-off pattern")
});

static SIGNATURE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^(?:(?:Dr|Doctor|Prof|Mr|Mrs|Ms|Miss)\.?[ \t]+)?({NAME})"))
        .expect("invalid signature pattern")
});

static POSTCODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z]{1,2}\d[A-Z\d]?[ \t]*\d[A-Z]{2}\b").expect("invalid postcode pattern")
});

/// Longest line treated as part of a postal address block.
const ADDRESS_LINE_MAX_WORDS: usize = 8;
const ADDRESS_BLOCK_MAX_WORDS: usize = 5;

/// Context heuristics standing in for a named-entity model: names next to
/// age cues, signature blocks, and multi-line postal addresses anchored on a
/// postcode.
pub struct EntityDetector;

impl EntityDetector {
    pub fn detect(&self, text: &str) -> Vec<PiiSpan> {
        let mut spans = Vec::new();
        self.person_context(text, &mut spans);
        self.signature_blocks(text, &mut spans);
        self.address_blocks(text, &mut spans);
        spans
    }

    fn person_context(&self, text: &str, spans: &mut Vec<PiiSpan>) {
        for caps in PERSON_CONTEXT.captures_iter(text) {
            let Some(m) = caps.get(1) else { continue };
            if let Some(len) = plausible_name(m.as_str()) {
                let value = m.as_str()[..len].trim_end();
                let end = m.start() + value.len();
                spans.push(PiiSpan::new(
                    PiiCategory::Name,
                    m.start(),
                    end,
                    &text[m.start()..end],
                    0.75,
                ));
            }
        }
    }

    fn signature_blocks(&self, text: &str, spans: &mut Vec<PiiSpan>) {
        for sign_off in SIGN_OFF.find_iter(text) {
            let Some((line_start, line)) = lines_from(text, sign_off.end())
                .find(|(_, l)| !l.trim().is_empty())
            else {
                continue;
            };
            let indent = line.len() - line.trim_start().len();
            let trimmed = line.trim();
            let Some(caps) = SIGNATURE_NAME.captures(trimmed) else {
                continue;
            };
            let Some(m) = caps.get(1) else { continue };
            if let Some(len) = plausible_name(m.as_str()) {
                let value = m.as_str()[..len].trim_end();
                let start = line_start + indent + m.start();
                let end = start + value.len();
                spans.push(
                    PiiSpan::new(PiiCategory::Name, start, end, &text[start..end], 0.8).clinician(),
                );
            }
        }
    }

    fn address_blocks(&self, text: &str, spans: &mut Vec<PiiSpan>) {
        let lines: Vec<(usize, &str)> = lines_from(text, 0).collect();
        for (i, (start, line)) in lines.iter().enumerate() {
            if !POSTCODE.is_match(line) || word_count(line) > ADDRESS_LINE_MAX_WORDS {
                continue;
            }
            push_line(text, *start, line, 0.8, spans);

            // Preceding short lines belong to the same block until a labelled
            // or blank line interrupts it.
            for (prev_start, prev) in lines[..i].iter().rev().take(3) {
                let t = prev.trim();
                if t.is_empty()
                    || t.contains(':')
                    || word_count(t) > ADDRESS_BLOCK_MAX_WORDS
                    || !t.starts_with(|c: char| c.is_ascii_uppercase() || c.is_ascii_digit())
                    || t.split_whitespace().any(is_name_stopword)
                {
                    break;
                }
                push_line(text, *prev_start, prev, 0.6, spans);
            }
        }
    }
}

fn push_line(text: &str, line_start: usize, line: &str, confidence: f32, spans: &mut Vec<PiiSpan>) {
    let start = line_start + (line.len() - line.trim_start().len());
    let end = start + line.trim().len();
    if end > start {
        spans.push(PiiSpan::new(PiiCategory::Address, start, end, &text[start..end], confidence));
    }
}

/// Lines starting at or after `from`, with their byte offsets.
fn lines_from(text: &str, from: usize) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = from;
    text[from..].split('\n').map(move |line| {
        let start = offset;
        offset += line.len() + 1;
        (start, line.trim_end_matches('\r'))
    })
}

fn word_count(line: &str) -> usize {
    line.split_whitespace().count()
}
