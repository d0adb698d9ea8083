use std::sync::Arc;

use super::types::{RiskTier, TierClassifier};
use super::AssessmentError;
use crate::pipeline::anonymize::RedactedText;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::retrieval::GuidelineSnippet;

/// Evidence passages shown to the model.
const MAX_EVIDENCE_IN_CONTEXT: usize = 3;
/// Characters of each passage shown to the model.
const MAX_EVIDENCE_CHARS: usize = 400;

const SYSTEM: &str = "You are a triage assistant for a cardiology and cardiothoracic \
referral service in the NHS. Classify the urgency of the referral letter using NICE CG95 \
(chest pain), NG185 (acute coronary syndromes) and NG208 (heart valve disease). \
Identifiers in the letter have been replaced by bracketed placeholders. \
Answer with exactly one word: EMERGENCY, URGENT or ROUTINE. When unsure between two \
tiers, choose the more urgent one.";

/// Tier classifier backed by a local language model.
pub struct LlmTierClassifier {
    client: Arc<dyn LlmClient + Send + Sync>,
    model: String,
}

impl LlmTierClassifier {
    pub fn new(client: Arc<dyn LlmClient + Send + Sync>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

impl TierClassifier for LlmTierClassifier {
    fn classify(
        &self,
        text: &RedactedText,
        evidence: &[GuidelineSnippet],
    ) -> Result<RiskTier, AssessmentError> {
        let request = build_request(text, evidence);
        let answer = self.client.generate(&self.model, &request, SYSTEM)?;
        parse_tier(&answer).ok_or(AssessmentError::UnparseableResponse)
    }
}

pub(crate) fn build_request(text: &RedactedText, evidence: &[GuidelineSnippet]) -> String {
    let mut out = format!("Referral letter:\n{}\n", text.as_text());
    if !evidence.is_empty() {
        out.push_str("\nGuideline context:\n");
        for snippet in evidence.iter().take(MAX_EVIDENCE_IN_CONTEXT) {
            let excerpt: String = snippet.text.chars().take(MAX_EVIDENCE_CHARS).collect();
            out.push_str(&format!("[{}] {}\n---\n", snippet.id, excerpt));
        }
    }
    out.push_str("\nUrgency tier:");
    out
}

/// Read a tier from free model output. If several tiers are named the most
/// urgent one wins.
pub fn parse_tier(answer: &str) -> Option<RiskTier> {
    let upper = answer.to_uppercase();
    let words: Vec<&str> = upper
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    RiskTier::ALL
        .iter()
        .rev()
        .find(|tier| words.contains(&tier.as_str()))
        .copied()
}
