use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

/// Which group of the red-flag lexicon a term belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalGroup {
    /// Acute, life-threatening presentations.
    Emergency,
    /// Presentations needing specialist review within two weeks.
    Urgent,
    /// Findings that may lead to cardiothoracic surgery.
    Surgical,
    /// The referrer asking for speed.
    UrgencyCue,
}

impl SignalGroup {
    pub fn weight(&self) -> f32 {
        match self {
            Self::Emergency => 6.0,
            Self::Urgent => 3.0,
            Self::Surgical => 1.0,
            Self::UrgencyCue => 1.5,
        }
    }
}

const EMERGENCY_TERMS: &[&str] = &[
    "stemi",
    "ongoing chest pain",
    "chest pain at rest",
    "at rest chest pain",
    "pain at rest",
    "rest pain",
    "ongoing ischaemia",
    "ongoing ischemia",
    "cardiogenic shock",
    "shock",
    "hypotension",
    "haemodynamic instability",
    "hemodynamic instability",
    "haemodynamically unstable",
    "aortic dissection",
    "type a dissection",
    "tearing chest pain",
    "back migrating chest pain",
    "mediastinal widening",
    "pulse deficit",
    "vf arrest",
    "vt arrest",
    "vt storm",
    "sustained ventricular tachycardia",
    "complete heart block",
    "pulmonary oedema",
    "pulmonary edema",
    "acute heart failure",
];

const URGENT_TERMS: &[&str] = &[
    "unstable angina",
    "nstemi",
    "acute coronary syndrome",
    "raised troponin",
    "elevated troponin",
    "myocardial infarction",
    "ischaemic chest pain",
    "ischemic chest pain",
    "sweating with chest pain",
    "diaphoresis",
    "radiation to arm or jaw",
    "syncope",
    "presyncope",
    "blackout",
    "collapse",
    "collapse during exercise",
    "severe aortic stenosis",
    "critical aortic stenosis",
    "infective endocarditis",
    "endocarditis",
    "vegetation",
];

const SURGICAL_TERMS: &[&str] = &[
    "severe valvular disease",
    "aortic stenosis",
    "mitral regurgitation",
    "coronary artery disease",
    "triple vessel disease",
    "left main stem stenosis",
    "ventricular septal defect",
    "aortic aneurysm",
    "cardiac transplant",
    "lvef <30%",
    "ejection fraction <30",
    "refractory heart failure",
];

const URGENCY_CUES: &[&str] = &[
    "urgent",
    "urgently",
    "as soon as possible",
    "asap",
    "same day",
    "same-day",
    "expedite",
    "two week wait",
    "2 week wait",
];

/// A compiled lexicon term.
pub struct LexiconTerm {
    pub term: &'static str,
    pub group: SignalGroup,
    pattern: Regex,
}

impl LexiconTerm {
    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Every term, grouped in weight order, each matched case-insensitively on
/// word boundaries with flexible spacing.
pub static LEXICON: LazyLock<Vec<LexiconTerm>> = LazyLock::new(|| {
    let groups: [(&[&'static str], SignalGroup); 4] = [
        (EMERGENCY_TERMS, SignalGroup::Emergency),
        (URGENT_TERMS, SignalGroup::Urgent),
        (SURGICAL_TERMS, SignalGroup::Surgical),
        (URGENCY_CUES, SignalGroup::UrgencyCue),
    ];
    groups
        .iter()
        .flat_map(|(terms, group)| {
            terms.iter().map(move |term| LexiconTerm {
                term: *term,
                group: *group,
                pattern: term_pattern(term),
            })
        })
        .collect()
});

fn term_pattern(term: &str) -> Regex {
    let body = term
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let start = if term.starts_with(|c: char| c.is_alphanumeric()) { r"\b" } else { "" };
    let end = if term.ends_with(|c: char| c.is_alphanumeric()) { r"\b" } else { "" };
    RegexBuilder::new(&format!("{start}{body}{end}"))
        .case_insensitive(true)
        .build()
        .expect("invalid lexicon term")
}

/// Whether `text` contains any red-flag term.
pub fn mentions_red_flag(text: &str) -> bool {
    LEXICON.iter().any(|t| t.is_match(text))
}

/// Terms of the lexicon found in `text`, in lexicon order. A term contained
/// in a longer matched term ("shock" in "cardiogenic shock") is dropped so
/// one phrase is counted once.
pub fn find_terms(text: &str) -> Vec<&'static LexiconTerm> {
    let found: Vec<&'static LexiconTerm> = LEXICON.iter().filter(|t| t.is_match(text)).collect();
    found
        .iter()
        .filter(|t| {
            !found
                .iter()
                .any(|other| other.term != t.term && other.term.contains(t.term))
        })
        .copied()
        .collect()
}
