use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::anonymize::PatientHash;
use crate::pipeline::assessment::RiskTier;
use crate::pipeline::processor::{FailureKind, PipelineStage, TriageFailure};

/// How a run ended, as recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Tier assigned. Soft failures along the way are listed.
    Completed { warnings: Vec<TriageFailure> },
    /// Tier could not be assigned; a clinician must triage by hand.
    ManualReview { stage: PipelineStage, kind: FailureKind },
    /// The run stopped before a tier could be attempted.
    Failed { stage: PipelineStage, kind: FailureKind },
}

impl AuditOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::ManualReview { .. } => "manual_review",
            Self::Failed { .. } => "failed",
        }
    }
}

/// One append-only audit record.
///
/// Every field is a typed, non-identifying value: a one-way hash, a tier,
/// a timestamp, a run id and closed outcome enums. There is no field that
/// could hold letter text, so identifying content cannot be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    run_id: Uuid,
    timestamp: DateTime<Utc>,
    patient_hash: PatientHash,
    tier: Option<RiskTier>,
    outcome: AuditOutcome,
}

impl AuditEvent {
    pub fn new(
        run_id: Uuid,
        patient_hash: PatientHash,
        tier: Option<RiskTier>,
        outcome: AuditOutcome,
    ) -> Self {
        Self::at(Utc::now(), run_id, patient_hash, tier, outcome)
    }

    pub fn at(
        timestamp: DateTime<Utc>,
        run_id: Uuid,
        patient_hash: PatientHash,
        tier: Option<RiskTier>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            run_id,
            timestamp,
            patient_hash,
            tier,
            outcome,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn patient_hash(&self) -> &PatientHash {
        &self.patient_hash
    }

    pub fn tier(&self) -> Option<RiskTier> {
        self.tier
    }

    pub fn outcome(&self) -> &AuditOutcome {
        &self.outcome
    }
}
