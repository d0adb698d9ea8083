pub mod types;
pub mod lexicon;
pub mod rules;
pub mod model;

pub use types::*;
pub use lexicon::SignalGroup;
pub use rules::*;
pub use model::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::anonymize::RedactedText;
use crate::pipeline::llm::LlmError;
use crate::pipeline::retrieval::GuidelineSnippet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentErrorKind {
    Unavailable,
}

/// Every assessment failure routes the referral to manual review.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssessmentError {
    #[error("Classifier unavailable: {0}")]
    Model(#[from] LlmError),

    #[error("Classifier returned no recognisable tier")]
    UnparseableResponse,

    #[error("Classification timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl AssessmentError {
    pub fn kind(&self) -> AssessmentErrorKind {
        AssessmentErrorKind::Unavailable
    }
}

/// Assigns the risk tier. The lexicon rules always run and set a floor; an
/// optional model classifier may raise the tier but never lower it.
pub struct RiskAssessor {
    rules: RuleBasedClassifier,
    model: Option<Box<dyn TierClassifier + Send + Sync>>,
}

impl RiskAssessor {
    /// Rules only.
    pub fn rule_based() -> Self {
        Self {
            rules: RuleBasedClassifier::new(),
            model: None,
        }
    }

    pub fn with_model(model: Box<dyn TierClassifier + Send + Sync>) -> Self {
        Self {
            rules: RuleBasedClassifier::new(),
            model: Some(model),
        }
    }

    pub fn assess(
        &self,
        text: &RedactedText,
        evidence: &[GuidelineSnippet],
    ) -> Result<RiskAssessment, AssessmentError> {
        let rule = self.rules.score(text, evidence);

        let model_tier = match &self.model {
            Some(model) => Some(model.classify(text, evidence).inspect_err(|e| {
                tracing::warn!(error = %e, rule_tier = %rule.tier, "Model classification failed");
            })?),
            None => None,
        };

        let tier = model_tier.map_or(rule.tier, |m| m.max(rule.tier));
        tracing::info!(
            tier = %tier,
            rule_tier = %rule.tier,
            model_tier = ?model_tier,
            score = rule.score,
            red_flags = rule.red_flags.len(),
            "Risk assessment complete"
        );

        Ok(RiskAssessment {
            tier,
            rule_tier: rule.tier,
            model_tier,
            score: rule.score,
            red_flags: rule.red_flags,
        })
    }
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::rule_based()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<RiskTier, AssessmentError>);

    impl TierClassifier for Fixed {
        fn classify(&self, _: &RedactedText, _: &[GuidelineSnippet]) -> Result<RiskTier, AssessmentError> {
            self.0.clone()
        }
    }

    fn text(s: &str) -> RedactedText {
        RedactedText::from_redacted(s)
    }

    #[test]
    fn tiers_are_totally_ordered() {
        assert!(RiskTier::Routine < RiskTier::Urgent);
        assert!(RiskTier::Urgent < RiskTier::Emergency);
    }

    #[test]
    fn batch_sorts_most_urgent_first() {
        let mut batch = vec![RiskTier::Routine, RiskTier::Emergency, RiskTier::Urgent];
        batch.sort_by(|a, b| b.cmp(a));
        assert_eq!(batch, vec![RiskTier::Emergency, RiskTier::Urgent, RiskTier::Routine]);
    }

    #[test]
    fn tier_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&RiskTier::Emergency).unwrap(), "\"EMERGENCY\"");
        let parsed: RiskTier = serde_json::from_str("\"URGENT\"").unwrap();
        assert_eq!(parsed, RiskTier::Urgent);
    }

    #[test]
    fn every_tier_has_a_timeframe() {
        assert!(RiskTier::Emergency.suggested_timeframe().contains("Immediate"));
        assert!(RiskTier::Urgent.suggested_timeframe().contains("2 weeks"));
        assert!(RiskTier::Routine.suggested_timeframe().contains("Routine"));
    }

    #[test]
    fn rule_based_assessment() {
        let out = RiskAssessor::rule_based()
            .assess(&text("Unstable angina, urgent review please."), &[])
            .unwrap();
        assert_eq!(out.tier, RiskTier::Urgent);
        assert_eq!(out.model_tier, None);
    }

    #[test]
    fn model_can_raise_tier() {
        let assessor = RiskAssessor::with_model(Box::new(Fixed(Ok(RiskTier::Emergency))));
        let out = assessor.assess(&text("Palpitations."), &[]).unwrap();
        assert_eq!(out.rule_tier, RiskTier::Routine);
        assert_eq!(out.tier, RiskTier::Emergency);
    }

    #[test]
    fn model_cannot_lower_tier() {
        let assessor = RiskAssessor::with_model(Box::new(Fixed(Ok(RiskTier::Routine))));
        let out = assessor.assess(&text("Confirmed STEMI."), &[]).unwrap();
        assert_eq!(out.model_tier, Some(RiskTier::Routine));
        assert_eq!(out.tier, RiskTier::Emergency);
    }

    #[test]
    fn model_failure_is_unavailable_not_routine() {
        let assessor = RiskAssessor::with_model(Box::new(Fixed(Err(AssessmentError::Model(
            LlmError::Connection("http://localhost:11434".into()),
        )))));
        let err = assessor.assess(&text("Palpitations."), &[]).unwrap_err();
        assert_eq!(err.kind(), AssessmentErrorKind::Unavailable);
    }

    #[test]
    fn assessment_is_deterministic() {
        let assessor = RiskAssessor::rule_based();
        let t = text("Exertional syncope with severe aortic stenosis.");
        let first = assessor.assess(&t, &[]).unwrap();
        for _ in 0..5 {
            assert_eq!(assessor.assess(&t, &[]).unwrap(), first);
        }
    }
}
