pub mod generator;
pub mod summary;

pub use generator::*;
pub use summary::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::anonymize::RedactedText;
use crate::pipeline::assessment::RiskTier;
use crate::pipeline::llm::LlmError;
use crate::pipeline::retrieval::GuidelineSnippet;

/// Statement appended when no guideline passage informed the plan.
pub const UNGROUNDED_NOTICE: &str =
    "This recommendation was generated without guideline grounding; no guideline passages were available.";

/// Wording that proposes non-urgent handling. Not allowed above ROUTINE.
const ROUTINE_WORDING: &[&str] = &[
    "routine",
    "non-urgent",
    "non urgent",
    "elective",
    "waiting list",
    "no rush",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationErrorKind {
    GenerationFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecommendationError {
    #[error("Generator unavailable: {0}")]
    Model(#[from] LlmError),

    #[error("Generated plan proposes routine handling for a {tier} referral")]
    InconsistentWithTier { tier: RiskTier },

    #[error("Generator returned an empty plan")]
    Empty,

    #[error("Generation timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl RecommendationError {
    pub fn kind(&self) -> RecommendationErrorKind {
        RecommendationErrorKind::GenerationFailed
    }
}

/// Action plan returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub text: String,
    /// Ids of the guideline snippets cited in `text`.
    pub evidence_ids: Vec<String>,
    pub suggested_timeframe: String,
}

impl Recommendation {
    pub fn is_grounded(&self) -> bool {
        !self.evidence_ids.is_empty()
    }
}

/// Wraps a generator with the tier-consistency check and evidence citation.
pub struct RecommendationEngine {
    generator: Box<dyn RecommendationGenerator + Send + Sync>,
}

impl RecommendationEngine {
    pub fn new(generator: Box<dyn RecommendationGenerator + Send + Sync>) -> Self {
        Self { generator }
    }

    pub fn template() -> Self {
        Self::new(Box::new(TemplateGenerator::new()))
    }

    pub fn recommend(
        &self,
        tier: RiskTier,
        text: &RedactedText,
        evidence: &[GuidelineSnippet],
    ) -> Result<Recommendation, RecommendationError> {
        let body = self.generator.generate(tier, text, evidence)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(RecommendationError::Empty);
        }
        check_tier_consistency(tier, body)?;

        let evidence_ids: Vec<String> = evidence.iter().map(|s| s.id.clone()).collect();
        let citation = if evidence_ids.is_empty() {
            UNGROUNDED_NOTICE.to_string()
        } else {
            format!(
                "Evidence: {}",
                evidence_ids
                    .iter()
                    .map(|id| format!("[{id}]"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };

        tracing::info!(
            tier = %tier,
            evidence = evidence_ids.len(),
            "Recommendation generated"
        );

        Ok(Recommendation {
            text: format!("{body}\n{citation}"),
            evidence_ids,
            suggested_timeframe: tier.suggested_timeframe().to_string(),
        })
    }
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::template()
    }
}

fn check_tier_consistency(tier: RiskTier, body: &str) -> Result<(), RecommendationError> {
    if tier == RiskTier::Routine {
        return Ok(());
    }
    let lower = body.to_lowercase();
    if ROUTINE_WORDING.iter().any(|w| lower.contains(w)) {
        return Err(RecommendationError::InconsistentWithTier { tier });
    }
    Ok(())
}
