use super::lexicon::{find_terms, SignalGroup};
use super::types::{RiskTier, TierClassifier};
use super::AssessmentError;
use crate::pipeline::anonymize::RedactedText;
use crate::pipeline::retrieval::GuidelineSnippet;

pub const EMERGENCY_THRESHOLD: f32 = 6.0;
pub const URGENT_THRESHOLD: f32 = 3.0;
/// A score this close below a threshold resolves to the higher tier.
pub const AMBIGUITY_BAND: f32 = 0.5;
/// Added once when retrieved guidance mentions a flag found in the letter.
pub const EVIDENCE_BONUS: f32 = 0.5;
/// Cap on the total contribution of referrer urgency wording.
const MAX_CUE_SCORE: f32 = 1.5;

/// Lexicon score for one referral.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleScore {
    pub score: f32,
    pub tier: RiskTier,
    pub red_flags: Vec<String>,
}

/// Deterministic lexicon classifier. Sums weighted red flags, adds urgency
/// wording and guideline corroboration, then maps the score to a tier with a
/// fail-safe ambiguity band.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedClassifier;

impl RuleBasedClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, text: &RedactedText, evidence: &[GuidelineSnippet]) -> RuleScore {
        let letter = text.as_text();
        let terms = find_terms(&letter);

        let mut score = 0.0f32;
        let mut cue_score = 0.0f32;
        for term in &terms {
            match term.group {
                SignalGroup::UrgencyCue => cue_score += term.group.weight(),
                group => score += group.weight(),
            }
        }
        score += cue_score.min(MAX_CUE_SCORE);

        let clinical: Vec<_> = terms
            .iter()
            .filter(|t| matches!(t.group, SignalGroup::Emergency | SignalGroup::Urgent))
            .collect();
        let corroborated = !clinical.is_empty()
            && evidence
                .iter()
                .any(|snippet| clinical.iter().any(|t| t.is_match(&snippet.text)));
        if corroborated {
            score += EVIDENCE_BONUS;
        }

        RuleScore {
            score,
            tier: tier_for_score(score),
            red_flags: terms.iter().map(|t| t.term.to_string()).collect(),
        }
    }
}

/// Map a score to a tier. Scores within the ambiguity band below a threshold
/// round up.
pub fn tier_for_score(score: f32) -> RiskTier {
    if score >= EMERGENCY_THRESHOLD - AMBIGUITY_BAND {
        RiskTier::Emergency
    } else if score >= URGENT_THRESHOLD - AMBIGUITY_BAND {
        RiskTier::Urgent
    } else {
        RiskTier::Routine
    }
}

impl TierClassifier for RuleBasedClassifier {
    fn classify(
        &self,
        text: &RedactedText,
        evidence: &[GuidelineSnippet],
    ) -> Result<RiskTier, AssessmentError> {
        Ok(self.score(text, evidence).tier)
    }
}
