use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::anonymize::{AnonymizationErrorKind, PatientHash};
use crate::pipeline::assessment::{AssessmentErrorKind, RiskTier};
use crate::pipeline::audit::AuditErrorKind;
use crate::pipeline::extraction::ExtractionErrorKind;
use crate::pipeline::recommendation::RecommendationErrorKind;
use crate::pipeline::retrieval::RetrievalErrorKind;

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Extraction,
    Anonymization,
    Retrieval,
    Assessment,
    Recommendation,
    Audit,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Anonymization => "anonymization",
            Self::Retrieval => "retrieval",
            Self::Assessment => "assessment",
            Self::Recommendation => "recommendation",
            Self::Audit => "audit",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of failure kinds reported at the output boundary.
///
/// Only these values ever leave a run, so no error message (and no document
/// content an upstream library might echo) reaches the caller or the audit
/// trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unreadable,
    Corrupt,
    Empty,
    NoIdentifiableEntity,
    RetrievalUnavailable,
    CorpusInvalid,
    Unavailable,
    GenerationFailed,
    WriteFailed,
    /// Stopped at a stage boundary by the caller.
    Cancelled,
    /// A stage worker panicked or the worker pool was shut down.
    Internal,
}

impl From<ExtractionErrorKind> for FailureKind {
    fn from(kind: ExtractionErrorKind) -> Self {
        match kind {
            ExtractionErrorKind::Unreadable => Self::Unreadable,
            ExtractionErrorKind::Corrupt => Self::Corrupt,
            ExtractionErrorKind::Empty => Self::Empty,
        }
    }
}

impl From<AnonymizationErrorKind> for FailureKind {
    fn from(kind: AnonymizationErrorKind) -> Self {
        match kind {
            AnonymizationErrorKind::NoIdentifiableEntity => Self::NoIdentifiableEntity,
        }
    }
}

impl From<RetrievalErrorKind> for FailureKind {
    fn from(kind: RetrievalErrorKind) -> Self {
        match kind {
            RetrievalErrorKind::Unavailable => Self::RetrievalUnavailable,
            RetrievalErrorKind::CorpusInvalid => Self::CorpusInvalid,
        }
    }
}

impl From<AssessmentErrorKind> for FailureKind {
    fn from(kind: AssessmentErrorKind) -> Self {
        match kind {
            AssessmentErrorKind::Unavailable => Self::Unavailable,
        }
    }
}

impl From<RecommendationErrorKind> for FailureKind {
    fn from(kind: RecommendationErrorKind) -> Self {
        match kind {
            RecommendationErrorKind::GenerationFailed => Self::GenerationFailed,
        }
    }
}

impl From<AuditErrorKind> for FailureKind {
    fn from(kind: AuditErrorKind) -> Self {
        match kind {
            AuditErrorKind::WriteFailed => Self::WriteFailed,
        }
    }
}

/// A stage failure as seen by the caller: where, and what kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriageFailure {
    pub stage: PipelineStage,
    pub kind: FailureKind,
}

impl TriageFailure {
    pub fn new(stage: PipelineStage, kind: FailureKind) -> Self {
        Self { stage, kind }
    }
}

impl fmt::Display for TriageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed ({:?})", self.stage, self.kind)
    }
}

/// Per-document state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TriageState {
    Received,
    Extracted,
    Anonymized,
    Retrieved,
    Assessed,
    Recommended,
    Logged,
    Completed,
    Failed { stage: PipelineStage, kind: FailureKind },
}

impl TriageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    /// The state a successful run moves to next. Terminal states have none.
    pub fn successor(&self) -> Option<Self> {
        match self {
            Self::Received => Some(Self::Extracted),
            Self::Extracted => Some(Self::Anonymized),
            Self::Anonymized => Some(Self::Retrieved),
            Self::Retrieved => Some(Self::Assessed),
            Self::Assessed => Some(Self::Recommended),
            Self::Recommended => Some(Self::Logged),
            Self::Logged => Some(Self::Completed),
            Self::Completed | Self::Failed { .. } => None,
        }
    }

    /// Stage that runs when leaving this state.
    pub fn next_stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Received => Some(PipelineStage::Extraction),
            Self::Extracted => Some(PipelineStage::Anonymization),
            Self::Anonymized => Some(PipelineStage::Retrieval),
            Self::Retrieved => Some(PipelineStage::Assessment),
            Self::Assessed => Some(PipelineStage::Recommendation),
            Self::Recommended => Some(PipelineStage::Audit),
            Self::Logged | Self::Completed | Self::Failed { .. } => None,
        }
    }
}

/// Cooperative cancellation, checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a completed run hands back. Holds only the hash, the tier and
/// text derived from the redacted letter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    pub patient_hash: PatientHash,
    pub tier: RiskTier,
    /// Missing when plan generation failed; tier and hash are still valid.
    pub recommendation: Option<String>,
    /// Guideline passages that informed the decision.
    pub evidence_ids: Vec<String>,
    pub suggested_timeframe: String,
    pub red_flags: Vec<String>,
    /// Extractive summary of the redacted letter.
    pub summary: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriageOutcome {
    Completed { result: TriageResult },
    /// No tier could be assigned. Never defaulted to ROUTINE.
    NeedsManualReview {
        patient_hash: PatientHash,
        failure: TriageFailure,
        evidence_ids: Vec<String>,
        summary: String,
    },
    Failed {
        failure: TriageFailure,
        patient_hash: Option<PatientHash>,
    },
}

impl TriageOutcome {
    pub fn tier(&self) -> Option<RiskTier> {
        match self {
            Self::Completed { result } => Some(result.tier),
            Self::NeedsManualReview { .. } | Self::Failed { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn needs_manual_review(&self) -> bool {
        matches!(self, Self::NeedsManualReview { .. })
    }

    pub fn failure(&self) -> Option<TriageFailure> {
        match self {
            Self::Completed { .. } => None,
            Self::NeedsManualReview { failure, .. } | Self::Failed { failure, .. } => Some(*failure),
        }
    }
}

/// What a caller receives for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageReport {
    pub run_id: Uuid,
    pub outcome: TriageOutcome,
    /// Terminal state of the run.
    pub state: TriageState,
    /// Soft failures. The run continued past each of them.
    pub warnings: Vec<TriageFailure>,
    /// False when the audit sink rejected the event; the outcome stands.
    pub audit_recorded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_every_state_in_order() {
        let mut state = TriageState::Received;
        let mut stages = Vec::new();
        while let Some(next) = state.successor() {
            if let Some(stage) = state.next_stage() {
                stages.push(stage);
            }
            state = next;
        }
        assert_eq!(state, TriageState::Completed);
        assert_eq!(
            stages,
            vec![
                PipelineStage::Extraction,
                PipelineStage::Anonymization,
                PipelineStage::Retrieval,
                PipelineStage::Assessment,
                PipelineStage::Recommendation,
                PipelineStage::Audit,
            ]
        );
    }

    #[test]
    fn failed_is_terminal() {
        let failed = TriageState::Failed {
            stage: PipelineStage::Extraction,
            kind: FailureKind::Empty,
        };
        assert!(failed.is_terminal());
        assert_eq!(failed.successor(), None);
        assert!(!TriageState::Logged.is_terminal());
    }

    #[test]
    fn stage_kinds_map_to_closed_failure_set() {
        assert_eq!(FailureKind::from(ExtractionErrorKind::Corrupt), FailureKind::Corrupt);
        assert_eq!(
            FailureKind::from(RetrievalErrorKind::Unavailable),
            FailureKind::RetrievalUnavailable
        );
        assert_eq!(FailureKind::from(AssessmentErrorKind::Unavailable), FailureKind::Unavailable);
        assert_eq!(
            FailureKind::from(RecommendationErrorKind::GenerationFailed),
            FailureKind::GenerationFailed
        );
        assert_eq!(FailureKind::from(AuditErrorKind::WriteFailed), FailureKind::WriteFailed);
    }

    #[test]
    fn failure_serializes_as_stage_and_kind() {
        let failure = TriageFailure::new(PipelineStage::Assessment, FailureKind::Unavailable);
        let json = serde_json::to_value(failure).unwrap();
        assert_eq!(json["stage"], "assessment");
        assert_eq!(json["kind"], "unavailable");
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }
}
