use std::fmt;

use serde::{Deserialize, Serialize};

use super::AssessmentError;
use crate::pipeline::anonymize::RedactedText;
use crate::pipeline::retrieval::GuidelineSnippet;

/// Ordered urgency tier. `Routine < Urgent < Emergency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Routine,
    Urgent,
    Emergency,
}

impl RiskTier {
    pub const ALL: [RiskTier; 3] = [RiskTier::Routine, RiskTier::Urgent, RiskTier::Emergency];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routine => "ROUTINE",
            Self::Urgent => "URGENT",
            Self::Emergency => "EMERGENCY",
        }
    }

    /// Expected time to specialist contact, worded after NICE CG95, NG185
    /// and NG208.
    pub fn suggested_timeframe(&self) -> &'static str {
        match self {
            Self::Emergency => "Immediate escalation via local emergency protocol (ED/cardiology).",
            Self::Urgent => "Urgent assessment within 2 weeks, aligned to NICE ACS/chest-pain pathways.",
            Self::Routine => "Routine outpatient review and non-invasive diagnostics.",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier decision capability. Must return the same tier for the same input.
pub trait TierClassifier {
    fn classify(
        &self,
        text: &RedactedText,
        evidence: &[GuidelineSnippet],
    ) -> Result<RiskTier, AssessmentError>;
}

/// Output of the risk assessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub tier: RiskTier,
    /// Tier from the lexicon rules alone; never above `tier`.
    pub rule_tier: RiskTier,
    /// Tier proposed by the model classifier, when one is configured.
    pub model_tier: Option<RiskTier>,
    pub score: f32,
    /// Lexicon terms found in the letter, in lexicon order.
    pub red_flags: Vec<String>,
}
