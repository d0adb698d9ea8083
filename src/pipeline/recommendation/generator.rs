use std::sync::Arc;

use super::RecommendationError;
use crate::pipeline::anonymize::RedactedText;
use crate::pipeline::assessment::{lexicon, RiskTier, SignalGroup};
use crate::pipeline::llm::LlmClient;
use crate::pipeline::retrieval::GuidelineSnippet;

/// Produces the action plan body for an assigned tier. The engine adds the
/// evidence line and checks tier consistency.
pub trait RecommendationGenerator {
    fn generate(
        &self,
        tier: RiskTier,
        text: &RedactedText,
        evidence: &[GuidelineSnippet],
    ) -> Result<String, RecommendationError>;
}

/// Offline generator: fixed wording per tier plus the clinical red flags found
/// in the letter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl RecommendationGenerator for TemplateGenerator {
    fn generate(
        &self,
        tier: RiskTier,
        text: &RedactedText,
        evidence: &[GuidelineSnippet],
    ) -> Result<String, RecommendationError> {
        let action = match tier {
            RiskTier::Emergency => {
                "Escalate immediately via the local emergency protocol (ED or on-call \
                 cardiology). Contact the referrer today to confirm the patient has been directed."
            }
            RiskTier::Urgent => {
                "Arrange specialist assessment within 2 weeks, aligned to NICE ACS/chest-pain \
                 pathways. Discuss with the cardiology registrar if symptoms progress before then."
            }
            RiskTier::Routine => {
                "Offer routine outpatient review and non-invasive diagnostics. Return advice to \
                 the referrer if specialist input is not needed."
            }
        };

        let mut lines = vec![format!("{}: {}", tier.as_str(), action)];
        lines.push(format!("Suggested timeframe: {}", tier.suggested_timeframe()));

        let flags: Vec<&str> = lexicon::find_terms(&text.as_text())
            .into_iter()
            .filter(|t| t.group != SignalGroup::UrgencyCue)
            .map(|t| t.term)
            .collect();
        if !flags.is_empty() {
            lines.push(format!("Red flags noted: {}.", flags.join(", ")));
        }
        if !evidence.is_empty() {
            lines.push("Review the cited guideline passages before booking.".to_string());
        }

        Ok(lines.join("\n"))
    }
}

const SYSTEM: &str = "You are an NHS decision-support assistant for cardiology and \
cardiothoracic teams. Write a short, conservative action plan for the referral at the \
urgency tier given. Prefer NICE CG95 (chest pain), NG185 (ACS), NG208 (valve disease) and \
the NHS England Adult Cardiac Surgery Service Specification. Identifiers have been replaced \
by bracketed placeholders; never guess them. Do not invent facts. Use 3 to 5 lines of plain \
text.";

const MAX_EVIDENCE_IN_CONTEXT: usize = 3;
const MAX_EVIDENCE_CHARS: usize = 400;

/// Generator backed by a local language model.
pub struct LlmRecommendationGenerator {
    client: Arc<dyn LlmClient + Send + Sync>,
    model: String,
}

impl LlmRecommendationGenerator {
    pub fn new(client: Arc<dyn LlmClient + Send + Sync>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

impl RecommendationGenerator for LlmRecommendationGenerator {
    fn generate(
        &self,
        tier: RiskTier,
        text: &RedactedText,
        evidence: &[GuidelineSnippet],
    ) -> Result<String, RecommendationError> {
        let mut request = format!(
            "Assigned tier: {}\nExpected timeframe: {}\n\nReferral letter:\n{}\n",
            tier,
            tier.suggested_timeframe(),
            text.as_text()
        );
        if !evidence.is_empty() {
            request.push_str("\nGuideline context:\n");
            for snippet in evidence.iter().take(MAX_EVIDENCE_IN_CONTEXT) {
                let excerpt: String = snippet.text.chars().take(MAX_EVIDENCE_CHARS).collect();
                request.push_str(&format!("[{}] {}\n---\n", snippet.id, excerpt));
            }
        }
        request.push_str("\nAction plan:");

        Ok(self.client.generate(&self.model, &request, SYSTEM)?)
    }
}
