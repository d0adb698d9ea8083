//! Batch triage over a shared processor.
//!
//! Runs are independent; the processor's slot semaphore bounds how many sit
//! in the CPU-bound stages at once. Reports come back in input order, and
//! [`order_for_review`] turns them into a clinician work queue.

use std::cmp::Reverse;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::pipeline::assessment::RiskTier;
use crate::pipeline::extraction::RawDocument;
use crate::pipeline::processor::{CancelFlag, TriageOutcome, TriageProcessor, TriageReport};

pub struct TriagePool {
    processor: Arc<TriageProcessor>,
}

impl TriagePool {
    pub fn new(processor: Arc<TriageProcessor>) -> Self {
        Self { processor }
    }

    pub fn processor(&self) -> &TriageProcessor {
        &self.processor
    }

    /// Triage every document concurrently. One report per document, in input
    /// order. The cancel flag is shared by the whole batch.
    pub async fn process_batch(
        &self,
        documents: Vec<RawDocument>,
        cancel: &CancelFlag,
    ) -> Vec<TriageReport> {
        let total = documents.len();
        tracing::info!(documents = total, "Batch triage started");

        let runs = documents.into_iter().map(|document| {
            let processor = Arc::clone(&self.processor);
            let cancel = cancel.clone();
            async move { processor.process(document, &cancel).await }
        });
        let reports = join_all(runs).await;

        tracing::info!(
            documents = total,
            completed = reports.iter().filter(|r| r.outcome.is_completed()).count(),
            manual_review = reports.iter().filter(|r| r.outcome.needs_manual_review()).count(),
            "Batch triage finished"
        );
        reports
    }
}

/// Queue rank: manual review first, then EMERGENCY, URGENT, ROUTINE, then
/// runs that failed before any decision.
fn review_rank(outcome: &TriageOutcome) -> (u8, Reverse<Option<RiskTier>>) {
    match outcome {
        TriageOutcome::NeedsManualReview { .. } => (0, Reverse(None)),
        TriageOutcome::Completed { result } => (1, Reverse(Some(result.tier))),
        TriageOutcome::Failed { .. } => (2, Reverse(None)),
    }
}

/// Sort reports into review order. Stable, so arrival order is kept within a
/// tier.
pub fn order_for_review(reports: &mut [TriageReport]) {
    reports.sort_by_key(|r| review_rank(&r.outcome));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::pipeline::anonymize::{Anonymizer, PatientHash};
    use crate::pipeline::assessment::RiskAssessor;
    use crate::pipeline::audit::InMemoryAuditLog;
    use crate::pipeline::extraction::{DocumentExtractor, PdfTextExtractor};
    use crate::pipeline::processor::{
        FailureKind, PipelineStage, TriageFailure, TriageResult, TriageState,
    };
    use crate::pipeline::recommendation::RecommendationEngine;
    use crate::pipeline::retrieval::{GuidelineCorpus, HashingEmbedder, KnowledgeRetriever};

    fn processor(audit: Arc<InMemoryAuditLog>) -> Arc<TriageProcessor> {
        Arc::new(
            TriageProcessor::new(
                Arc::new(DocumentExtractor::new(Box::new(PdfTextExtractor))),
                Anonymizer::new("pool-salt"),
                KnowledgeRetriever::new(
                    Arc::new(GuidelineCorpus::empty()),
                    Arc::new(HashingEmbedder::new()),
                ),
                RiskAssessor::rule_based(),
                RecommendationEngine::template(),
                audit,
            )
            .with_worker_slots(2),
        )
    }

    fn report(outcome: TriageOutcome) -> TriageReport {
        TriageReport {
            run_id: Uuid::new_v4(),
            outcome,
            state: TriageState::Completed,
            warnings: vec![],
            audit_recorded: true,
        }
    }

    fn completed(tier: RiskTier, summary: &str) -> TriageReport {
        report(TriageOutcome::Completed {
            result: TriageResult {
                patient_hash: PatientHash::unidentifiable(),
                tier,
                recommendation: None,
                evidence_ids: vec![],
                suggested_timeframe: tier.suggested_timeframe().to_string(),
                red_flags: vec![],
                summary: summary.to_string(),
                processed_at: Utc::now(),
            },
        })
    }

    fn label(r: &TriageReport) -> String {
        match &r.outcome {
            TriageOutcome::Completed { result } => result.summary.clone(),
            TriageOutcome::NeedsManualReview { .. } => "review".into(),
            TriageOutcome::Failed { .. } => "failed".into(),
        }
    }

    #[test]
    fn review_order_puts_manual_review_then_most_urgent_first() {
        let mut reports = vec![
            completed(RiskTier::Routine, "routine-1"),
            report(TriageOutcome::Failed {
                failure: TriageFailure::new(PipelineStage::Extraction, FailureKind::Empty),
                patient_hash: None,
            }),
            completed(RiskTier::Emergency, "emergency"),
            completed(RiskTier::Urgent, "urgent"),
            report(TriageOutcome::NeedsManualReview {
                patient_hash: PatientHash::unidentifiable(),
                failure: TriageFailure::new(PipelineStage::Assessment, FailureKind::Unavailable),
                evidence_ids: vec![],
                summary: String::new(),
            }),
            completed(RiskTier::Routine, "routine-2"),
        ];
        order_for_review(&mut reports);
        let labels: Vec<String> = reports.iter().map(label).collect();
        assert_eq!(
            labels,
            vec!["review", "emergency", "urgent", "routine-1", "routine-2", "failed"]
        );
    }

    #[tokio::test]
    async fn batch_returns_one_report_per_document_in_order() {
        let audit = Arc::new(InMemoryAuditLog::new());
        let pool = TriagePool::new(processor(audit.clone()));
        let documents = vec![
            RawDocument::new(b"Patient A Jones. Routine review of mild palpitations.".to_vec(), "a.txt"),
            RawDocument::new(Vec::new(), "b.txt"),
            RawDocument::new(
                b"Patient C Khan. Chest pain at rest with cardiogenic shock.".to_vec(),
                "c.txt",
            ),
        ];

        let reports = pool.process_batch(documents, &CancelFlag::new()).await;

        assert_eq!(reports.len(), 3);
        assert!(reports[0].outcome.is_completed());
        assert_eq!(
            reports[1].outcome.failure(),
            Some(TriageFailure::new(PipelineStage::Extraction, FailureKind::Empty))
        );
        assert_eq!(reports[2].outcome.tier(), Some(RiskTier::Emergency));
        assert_eq!(audit.len(), 3);
    }

    #[tokio::test]
    async fn cancelled_batch_still_audits_every_document() {
        let audit = Arc::new(InMemoryAuditLog::new());
        let pool = TriagePool::new(processor(audit.clone()));
        let cancel = CancelFlag::new();
        cancel.cancel();

        let documents = (0..4)
            .map(|i| RawDocument::new(b"Chest pain".to_vec(), format!("{i}.txt")))
            .collect();
        let reports = pool.process_batch(documents, &cancel).await;

        assert!(reports
            .iter()
            .all(|r| r.outcome.failure().map(|f| f.kind) == Some(FailureKind::Cancelled)));
        assert_eq!(audit.len(), 4);
    }

    #[tokio::test]
    async fn batch_tiers_sort_most_urgent_first() {
        let pool = TriagePool::new(processor(Arc::new(InMemoryAuditLog::new())));
        let documents = vec![
            RawDocument::new(b"Patient R One. Mild exertional breathlessness.".to_vec(), "r.txt"),
            RawDocument::new(b"Patient E Two. Suspected aortic dissection.".to_vec(), "e.txt"),
            RawDocument::new(b"Patient U Three. Unstable angina.".to_vec(), "u.txt"),
        ];
        let mut reports = pool.process_batch(documents, &CancelFlag::new()).await;
        order_for_review(&mut reports);
        let tiers: Vec<Option<RiskTier>> = reports.iter().map(|r| r.outcome.tier()).collect();
        assert_eq!(
            tiers,
            vec![Some(RiskTier::Emergency), Some(RiskTier::Urgent), Some(RiskTier::Routine)]
        );
    }
}
