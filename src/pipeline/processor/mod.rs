//! Referral triage orchestrator.
//!
//! Drives one document through extract → anonymize → retrieve → assess →
//! recommend → audit. Every stage is a sync trait object run on the blocking
//! pool; this layer alone decides which failures are soft and which stop the
//! run, and it owns the raw document and extracted text so both are destroyed
//! on every exit path.

pub mod types;

pub use types::*;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::{
    default_worker_pool_size, AuditSink, ConfigError, EmbeddingBackend, StageTimeouts, TriageConfig,
    DEFAULT_RETRIEVAL_K,
};
use crate::pipeline::anonymize::{AnonymizationOutput, Anonymizer, PatientHash, RedactedText};
use crate::pipeline::assessment::{
    AssessmentError, LlmTierClassifier, RiskAssessment, RiskAssessor, RiskTier,
};
use crate::pipeline::audit::{
    AuditError, AuditEvent, AuditLogger, AuditOutcome, JsonlAuditLog, SqliteAuditLog,
};
use crate::pipeline::extraction::{
    DocumentExtractor, ExtractedText, ExtractionError, PdfTextExtractor, RawDocument, TextExtractor,
};
use crate::pipeline::llm::{LlmClient, LlmError, OllamaClient};
use crate::pipeline::recommendation::{
    summarize, LlmRecommendationGenerator, Recommendation, RecommendationEngine,
    RecommendationError, SUMMARY_MAX_WORDS,
};
use crate::pipeline::retrieval::{
    EmbeddingModel, GuidelineCorpus, GuidelineSnippet, HashingEmbedder, KnowledgeRetriever,
    OllamaEmbedder, RetrievalError,
};

/// Errors while wiring a processor from configuration.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Audit sink unavailable: {0}")]
    Audit(#[from] AuditError),

    #[error("Guideline corpus unavailable: {0}")]
    Corpus(#[from] RetrievalError),

    #[error("Inference client setup failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Extractor setup failed: {0}")]
    Extraction(#[from] ExtractionError),
}

/// Why a blocking stage call produced no value.
enum StageFault {
    TimedOut,
    Panicked,
}

/// Run `work` on the blocking pool, optionally bounded by `limit`. A call
/// that overruns is abandoned; it finishes on its own thread and its result
/// is discarded.
async fn run_blocking<T, F>(limit: Option<Duration>, work: F) -> Result<T, StageFault>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    match limit {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined.map_err(|_| StageFault::Panicked),
            Err(_) => Err(StageFault::TimedOut),
        },
        None => handle.await.map_err(|_| StageFault::Panicked),
    }
}

/// Bookkeeping for one run: current state, soft failures, hash once known.
struct Run {
    id: Uuid,
    state: TriageState,
    warnings: Vec<TriageFailure>,
    patient_hash: Option<PatientHash>,
    started: Instant,
}

impl Run {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            state: TriageState::Received,
            warnings: Vec::new(),
            patient_hash: None,
            started: Instant::now(),
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.state.successor() {
            tracing::debug!(run_id = %self.id, from = ?self.state, to = ?next, "Triage state advanced");
            self.state = next;
        }
    }

    fn warn(&mut self, stage: PipelineStage, kind: FailureKind) {
        tracing::warn!(run_id = %self.id, stage = %stage, kind = ?kind, "Soft stage failure, continuing");
        self.warnings.push(TriageFailure::new(stage, kind));
    }

    /// Stage that would run next; the stage a cancellation is attributed to.
    fn pending_stage(&self) -> PipelineStage {
        self.state.next_stage().unwrap_or(PipelineStage::Audit)
    }

    fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}

/// Orchestrates the triage pipeline for single documents.
///
/// Cheap to share behind an `Arc`: every stage is itself shared, and the
/// only cross-run state is the slot semaphore for CPU-bound stages.
pub struct TriageProcessor {
    extractor: Arc<dyn TextExtractor + Send + Sync>,
    anonymizer: Arc<Anonymizer>,
    retriever: Arc<KnowledgeRetriever>,
    assessor: Arc<RiskAssessor>,
    recommender: Arc<RecommendationEngine>,
    audit: Arc<dyn AuditLogger + Send + Sync>,
    retrieval_k: usize,
    retrieval_timeout: Duration,
    assessment_timeout: Duration,
    recommendation_timeout: Duration,
    cpu_slots: Arc<Semaphore>,
}

impl TriageProcessor {
    pub fn new(
        extractor: Arc<dyn TextExtractor + Send + Sync>,
        anonymizer: Anonymizer,
        retriever: KnowledgeRetriever,
        assessor: RiskAssessor,
        recommender: RecommendationEngine,
        audit: Arc<dyn AuditLogger + Send + Sync>,
    ) -> Self {
        let defaults = StageTimeouts::default();
        Self {
            extractor,
            anonymizer: Arc::new(anonymizer),
            retriever: Arc::new(retriever),
            assessor: Arc::new(assessor),
            recommender: Arc::new(recommender),
            audit,
            retrieval_k: DEFAULT_RETRIEVAL_K,
            retrieval_timeout: defaults.retrieval,
            assessment_timeout: defaults.assessment,
            recommendation_timeout: defaults.recommendation,
            cpu_slots: Arc::new(Semaphore::new(default_worker_pool_size())),
        }
    }

    pub fn with_retrieval_k(mut self, k: usize) -> Self {
        self.retrieval_k = k;
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.retrieval_timeout = timeouts.retrieval;
        self.assessment_timeout = timeouts.assessment;
        self.recommendation_timeout = timeouts.recommendation;
        self
    }

    /// Number of documents allowed in extraction or assessment at once.
    pub fn with_worker_slots(mut self, slots: usize) -> Self {
        self.cpu_slots = Arc::new(Semaphore::new(slots.max(1)));
        self
    }

    pub fn retriever(&self) -> &KnowledgeRetriever {
        &self.retriever
    }

    /// Triage one document. Never returns an error: every failure is folded
    /// into the report as a stage and kind.
    ///
    /// The document is consumed; it is destroyed before this returns.
    pub async fn process(&self, document: RawDocument, cancel: &CancelFlag) -> TriageReport {
        let mut run = Run::new(Uuid::new_v4());
        tracing::info!(run_id = %run.id, "Triage started");

        // Extraction
        if cancel.is_cancelled() {
            drop(document);
            return self.stop(run, FailureKind::Cancelled).await;
        }
        let extracted = match self.extract(document).await {
            Ok(text) => text,
            Err(kind) => return self.stop(run, kind).await,
        };
        run.advance();

        // Anonymization
        if cancel.is_cancelled() {
            drop(extracted);
            return self.stop(run, FailureKind::Cancelled).await;
        }
        let anonymized = match self.anonymize(extracted).await {
            Ok(output) => output,
            Err(kind) => return self.stop(run, kind).await,
        };
        run.patient_hash = Some(anonymized.patient_hash.clone());
        if let Some(warning) = &anonymized.warning {
            run.warn(PipelineStage::Anonymization, warning.kind().into());
        }
        let redacted = Arc::new(anonymized.redacted);
        run.advance();

        // Retrieval (soft)
        if cancel.is_cancelled() {
            return self.stop(run, FailureKind::Cancelled).await;
        }
        let evidence = match self.retrieve(Arc::clone(&redacted)).await {
            Ok(snippets) => snippets,
            Err(kind) => {
                run.warn(PipelineStage::Retrieval, kind);
                Vec::new()
            }
        };
        let evidence = Arc::new(evidence);
        run.advance();

        // Assessment (hard: manual review)
        if cancel.is_cancelled() {
            return self.stop(run, FailureKind::Cancelled).await;
        }
        let assessment = match self.assess(Arc::clone(&redacted), Arc::clone(&evidence)).await {
            Ok(assessment) => assessment,
            Err(kind) => return self.manual_review(run, &redacted, &evidence, kind).await,
        };
        run.advance();

        // Recommendation (soft: tier and hash still returned)
        if cancel.is_cancelled() {
            return self.stop(run, FailureKind::Cancelled).await;
        }
        let recommendation = match self
            .recommend(assessment.tier, Arc::clone(&redacted), Arc::clone(&evidence))
            .await
        {
            Ok(recommendation) => Some(recommendation),
            Err(kind) => {
                run.warn(PipelineStage::Recommendation, kind);
                None
            }
        };
        run.advance();

        let patient_hash = anonymized.patient_hash;
        let result = TriageResult {
            tier: assessment.tier,
            recommendation: recommendation.map(|r| r.text),
            evidence_ids: evidence.iter().map(|s| s.id.clone()).collect(),
            suggested_timeframe: assessment.tier.suggested_timeframe().to_string(),
            red_flags: assessment.red_flags,
            summary: summarize(&redacted, SUMMARY_MAX_WORDS),
            processed_at: Utc::now(),
            patient_hash: patient_hash.clone(),
        };

        let event = AuditEvent::new(
            run.id,
            patient_hash,
            Some(result.tier),
            AuditOutcome::Completed {
                warnings: run.warnings.clone(),
            },
        );
        let audit_recorded = self.record(&mut run, event).await;
        // Logged, then Completed.
        run.advance();
        run.advance();

        tracing::info!(
            run_id = %run.id,
            tier = %result.tier,
            evidence = result.evidence_ids.len(),
            warnings = run.warnings.len(),
            elapsed_ms = run.elapsed_ms(),
            "Triage completed"
        );

        TriageReport {
            run_id: run.id,
            outcome: TriageOutcome::Completed { result },
            state: run.state,
            warnings: run.warnings,
            audit_recorded,
        }
    }

    async fn extract(&self, document: RawDocument) -> Result<ExtractedText, FailureKind> {
        let permit = Arc::clone(&self.cpu_slots)
            .acquire_owned()
            .await
            .map_err(|_| FailureKind::Internal)?;
        let extractor = Arc::clone(&self.extractor);

        let outcome = run_blocking(None, move || {
            let _permit = permit;
            let result = extractor.extract(&document);
            drop(document);
            result
        })
        .await;

        match outcome {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, kind = ?e.kind(), "Extraction failed");
                Err(e.kind().into())
            }
            Err(_) => Err(FailureKind::Internal),
        }
    }

    async fn anonymize(&self, text: ExtractedText) -> Result<AnonymizationOutput, FailureKind> {
        let anonymizer = Arc::clone(&self.anonymizer);
        run_blocking(None, move || {
            let output = anonymizer.anonymize(&text);
            drop(text);
            output
        })
        .await
        .map_err(|_| FailureKind::Internal)
    }

    async fn retrieve(
        &self,
        text: Arc<RedactedText>,
    ) -> Result<Vec<GuidelineSnippet>, FailureKind> {
        let retriever = Arc::clone(&self.retriever);
        let k = self.retrieval_k;
        match run_blocking(Some(self.retrieval_timeout), move || retriever.retrieve(&text, k)).await {
            Ok(Ok(snippets)) => Ok(snippets),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Guideline retrieval failed");
                Err(e.kind().into())
            }
            Err(StageFault::TimedOut) => {
                tracing::warn!(
                    timeout_secs = self.retrieval_timeout.as_secs(),
                    "Guideline retrieval timed out"
                );
                Err(FailureKind::RetrievalUnavailable)
            }
            Err(StageFault::Panicked) => Err(FailureKind::Internal),
        }
    }

    async fn assess(
        &self,
        text: Arc<RedactedText>,
        evidence: Arc<Vec<GuidelineSnippet>>,
    ) -> Result<RiskAssessment, FailureKind> {
        let permit = Arc::clone(&self.cpu_slots)
            .acquire_owned()
            .await
            .map_err(|_| FailureKind::Internal)?;
        let assessor = Arc::clone(&self.assessor);

        let outcome = run_blocking(Some(self.assessment_timeout), move || {
            let _permit = permit;
            assessor.assess(&text, &evidence)
        })
        .await;

        let error = match outcome {
            Ok(Ok(assessment)) => return Ok(assessment),
            Ok(Err(e)) => e,
            Err(StageFault::TimedOut) => AssessmentError::Timeout {
                secs: self.assessment_timeout.as_secs(),
            },
            Err(StageFault::Panicked) => return Err(FailureKind::Internal),
        };
        tracing::warn!(error = %error, "Risk assessment unavailable");
        Err(error.kind().into())
    }

    async fn recommend(
        &self,
        tier: RiskTier,
        text: Arc<RedactedText>,
        evidence: Arc<Vec<GuidelineSnippet>>,
    ) -> Result<Recommendation, FailureKind> {
        let recommender = Arc::clone(&self.recommender);
        let outcome = run_blocking(Some(self.recommendation_timeout), move || {
            recommender.recommend(tier, &text, &evidence)
        })
        .await;

        let error = match outcome {
            Ok(Ok(recommendation)) => return Ok(recommendation),
            Ok(Err(e)) => e,
            Err(StageFault::TimedOut) => RecommendationError::Timeout {
                secs: self.recommendation_timeout.as_secs(),
            },
            Err(StageFault::Panicked) => return Err(FailureKind::Internal),
        };
        tracing::warn!(error = %error, tier = %tier, "Recommendation generation failed");
        Err(error.kind().into())
    }

    /// Append the event. A rejected write is reported but never undoes the
    /// outcome.
    async fn record(&self, run: &mut Run, event: AuditEvent) -> bool {
        let audit = Arc::clone(&self.audit);
        match run_blocking(None, move || audit.record(&event)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(run_id = %run.id, error = %e, "Audit write failed");
                run.warn(PipelineStage::Audit, e.kind().into());
                false
            }
            Err(_) => {
                tracing::error!(run_id = %run.id, "Audit writer panicked");
                run.warn(PipelineStage::Audit, FailureKind::WriteFailed);
                false
            }
        }
    }

    /// Terminal failure at the pending stage. Still audited, with the
    /// sentinel hash when none was derived.
    async fn stop(&self, mut run: Run, kind: FailureKind) -> TriageReport {
        let stage = run.pending_stage();
        let failure = TriageFailure::new(stage, kind);
        let event = AuditEvent::new(
            run.id,
            run.patient_hash
                .clone()
                .unwrap_or_else(PatientHash::unidentifiable),
            None,
            AuditOutcome::Failed { stage, kind },
        );
        let audit_recorded = self.record(&mut run, event).await;
        run.state = TriageState::Failed { stage, kind };

        tracing::warn!(
            run_id = %run.id,
            stage = %stage,
            kind = ?kind,
            elapsed_ms = run.elapsed_ms(),
            "Triage failed"
        );

        TriageReport {
            run_id: run.id,
            outcome: TriageOutcome::Failed {
                failure,
                patient_hash: run.patient_hash,
            },
            state: run.state,
            warnings: run.warnings,
            audit_recorded,
        }
    }

    /// Assessment could not assign a tier: flag for a clinician.
    async fn manual_review(
        &self,
        mut run: Run,
        text: &RedactedText,
        evidence: &[GuidelineSnippet],
        kind: FailureKind,
    ) -> TriageReport {
        let failure = TriageFailure::new(PipelineStage::Assessment, kind);
        let patient_hash = run
            .patient_hash
            .clone()
            .unwrap_or_else(PatientHash::unidentifiable);
        let event = AuditEvent::new(
            run.id,
            patient_hash.clone(),
            None,
            AuditOutcome::ManualReview {
                stage: PipelineStage::Assessment,
                kind,
            },
        );
        let audit_recorded = self.record(&mut run, event).await;
        run.state = TriageState::Failed {
            stage: PipelineStage::Assessment,
            kind,
        };

        tracing::warn!(
            run_id = %run.id,
            kind = ?kind,
            elapsed_ms = run.elapsed_ms(),
            "Referral flagged for manual review"
        );

        TriageReport {
            run_id: run.id,
            outcome: TriageOutcome::NeedsManualReview {
                patient_hash,
                failure,
                evidence_ids: evidence.iter().map(|s| s.id.clone()).collect(),
                summary: summarize(text, SUMMARY_MAX_WORDS),
            },
            state: run.state,
            warnings: run.warnings,
            audit_recorded,
        }
    }
}

/// Wire a processor from configuration: PDF text layer (plus OCR when the
/// `ocr` feature and tessdata are present), the configured audit sink, the
/// saved guideline corpus, and Ollama-backed classifier and generator when an
/// endpoint is set.
///
/// Holds blocking HTTP clients when Ollama is configured; build and drop it
/// outside an async context.
pub fn build_processor(config: &TriageConfig) -> Result<TriageProcessor, ProcessorError> {
    config.validate()?;

    let extractor = build_extractor(config)?;

    let audit: Arc<dyn AuditLogger + Send + Sync> = match &config.audit_sink {
        AuditSink::Jsonl { dir } => Arc::new(JsonlAuditLog::open(dir)?),
        AuditSink::Sqlite { path } => Arc::new(SqliteAuditLog::open(path)?),
    };

    let corpus = Arc::new(GuidelineCorpus::load_or_empty(&config.corpus_path)?);
    let embedder: Arc<dyn EmbeddingModel + Send + Sync> = match (&config.embedding_backend, &config.ollama_url) {
        (EmbeddingBackend::Ollama, Some(url)) => {
            let client = OllamaClient::new(url, config.timeouts.retrieval)?;
            Arc::new(OllamaEmbedder::new(client, &config.embedding_model))
        }
        _ => Arc::new(HashingEmbedder::new()),
    };
    let retriever = KnowledgeRetriever::new(corpus, embedder);

    let (assessor, recommender) = match &config.ollama_url {
        Some(url) => {
            let classifier: Arc<dyn LlmClient + Send + Sync> =
                Arc::new(OllamaClient::new(url, config.timeouts.assessment)?);
            let generator: Arc<dyn LlmClient + Send + Sync> =
                Arc::new(OllamaClient::new(url, config.timeouts.recommendation)?);
            (
                RiskAssessor::with_model(Box::new(LlmTierClassifier::new(
                    classifier,
                    &config.ollama_model,
                ))),
                RecommendationEngine::new(Box::new(LlmRecommendationGenerator::new(
                    generator,
                    &config.ollama_model,
                ))),
            )
        }
        None => (RiskAssessor::rule_based(), RecommendationEngine::template()),
    };

    tracing::info!(
        corpus_version = retriever.corpus().version(),
        passages = retriever.corpus().snapshot().len(),
        model_backed = config.ollama_url.is_some(),
        workers = config.worker_pool_size,
        "Triage processor ready"
    );

    Ok(TriageProcessor::new(
        extractor,
        Anonymizer::new(config.hash_salt.clone()),
        retriever,
        assessor,
        recommender,
        audit,
    )
    .with_retrieval_k(config.retrieval_k)
    .with_timeouts(config.timeouts)
    .with_worker_slots(config.worker_pool_size))
}

#[cfg(feature = "ocr")]
fn build_extractor(config: &TriageConfig) -> Result<Arc<dyn TextExtractor + Send + Sync>, ProcessorError> {
    use crate::pipeline::extraction::{BundledTesseract, PdfiumRenderer};

    let extractor = DocumentExtractor::new(Box::new(PdfTextExtractor));
    let Some(tessdata) = &config.tessdata_dir else {
        tracing::warn!("No tessdata directory configured, scanned pages cannot be read");
        return Ok(Arc::new(extractor));
    };
    let engine = BundledTesseract::new(tessdata)?;
    match PdfiumRenderer::new() {
        Ok(renderer) => Ok(Arc::new(
            extractor
                .with_ocr_engine(Box::new(engine))
                .with_pdf_renderer(Box::new(renderer)),
        )),
        Err(e) => {
            tracing::warn!(error = %e, "PDFium unavailable, OCR fallback disabled");
            Ok(Arc::new(extractor))
        }
    }
}

#[cfg(not(feature = "ocr"))]
fn build_extractor(config: &TriageConfig) -> Result<Arc<dyn TextExtractor + Send + Sync>, ProcessorError> {
    if config.tessdata_dir.is_some() {
        tracing::warn!("Built without the ocr feature, scanned pages cannot be read");
    }
    Ok(Arc::new(DocumentExtractor::new(Box::new(PdfTextExtractor))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::assessment::TierClassifier;
    use crate::pipeline::audit::{FailingAuditLog, InMemoryAuditLog};
    use crate::pipeline::extraction::pdf::test_pdfs::{blank_pdf, make_pdf};
    use crate::pipeline::llm::{FailingLlmClient, MockLlmClient, SlowLlmClient};
    use crate::pipeline::recommendation::UNGROUNDED_NOTICE;
    use crate::pipeline::retrieval::{CorpusBuilder, FailingEmbedder};

    const LETTER: &str = "Patient John Smith, DOB 1950-01-01, presents with unstable angina, \
                          requires urgent review.";

    fn guideline_corpus() -> Arc<GuidelineCorpus> {
        let embedder = HashingEmbedder::new();
        let corpus = GuidelineCorpus::empty();
        let mut builder = CorpusBuilder::new(&embedder);
        builder
            .add_text(
                "ng185.txt",
                "Unstable angina and suspected acute coronary syndrome require urgent assessment.",
            )
            .unwrap();
        builder
            .add_text("ng208.txt", "Heart valve disease. Offer echocardiography to people with a murmur.")
            .unwrap();
        builder.publish_to(&corpus);
        Arc::new(corpus)
    }

    fn retriever(corpus: Arc<GuidelineCorpus>) -> KnowledgeRetriever {
        KnowledgeRetriever::new(corpus, Arc::new(HashingEmbedder::new()))
    }

    fn processor_with(
        retriever: KnowledgeRetriever,
        assessor: RiskAssessor,
        recommender: RecommendationEngine,
        audit: Arc<dyn AuditLogger + Send + Sync>,
    ) -> TriageProcessor {
        TriageProcessor::new(
            Arc::new(DocumentExtractor::new(Box::new(PdfTextExtractor))),
            Anonymizer::new("test-salt"),
            retriever,
            assessor,
            recommender,
            audit,
        )
        .with_worker_slots(2)
    }

    fn default_processor(audit: Arc<InMemoryAuditLog>) -> TriageProcessor {
        processor_with(
            retriever(guideline_corpus()),
            RiskAssessor::rule_based(),
            RecommendationEngine::template(),
            audit,
        )
    }

    fn text_doc(text: &str) -> RawDocument {
        RawDocument::new(text.as_bytes().to_vec(), "referral.txt")
    }

    fn completed(report: &TriageReport) -> &TriageResult {
        match &report.outcome {
            TriageOutcome::Completed { result } => result,
            other => panic!("expected completed outcome, got {other:?}"),
        }
    }

    struct Unavailable;

    impl TierClassifier for Unavailable {
        fn classify(&self, _: &RedactedText, _: &[GuidelineSnippet]) -> Result<RiskTier, AssessmentError> {
            Err(AssessmentError::Model(LlmError::Connection("refused".into())))
        }
    }

    #[tokio::test]
    async fn scenario_letter_is_triaged_urgent_with_evidence() {
        let audit = Arc::new(InMemoryAuditLog::new());
        let processor = default_processor(audit.clone());

        let report = processor.process(text_doc(LETTER), &CancelFlag::new()).await;
        let result = completed(&report);

        assert!(result.tier >= RiskTier::Urgent);
        assert!(!result.patient_hash.is_unidentifiable());
        assert!(!result.evidence_ids.is_empty());
        let recommendation = result.recommendation.as_deref().unwrap();
        assert!(result.evidence_ids.iter().any(|id| recommendation.contains(id.as_str())));
        assert_eq!(report.state, TriageState::Completed);
        assert!(report.audit_recorded);

        let serialized = serde_json::to_string(&report).unwrap();
        assert!(!serialized.contains("John Smith"));
        assert!(!serialized.contains("1950-01-01"));

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tier(), Some(result.tier));
        assert_eq!(events[0].patient_hash(), &result.patient_hash);
        let logged = serde_json::to_string(&events[0]).unwrap();
        assert!(!logged.contains("John"));
        assert!(!logged.contains("Smith"));
        assert!(!logged.contains("1950"));
    }

    #[tokio::test]
    async fn same_patient_gets_same_hash_and_tier() {
        let processor = default_processor(Arc::new(InMemoryAuditLog::new()));
        let a = processor.process(text_doc(LETTER), &CancelFlag::new()).await;
        let b = processor.process(text_doc(LETTER), &CancelFlag::new()).await;
        let (a, b) = (completed(&a), completed(&b));
        assert_eq!(a.patient_hash, b.patient_hash);
        assert_eq!(a.tier, b.tier);
        assert_eq!(a.recommendation, b.recommendation);
        assert_eq!(a.evidence_ids, b.evidence_ids);
    }

    #[tokio::test]
    async fn blank_pdf_fails_extraction_and_is_audited_with_sentinel() {
        let audit = Arc::new(InMemoryAuditLog::new());
        let processor = default_processor(audit.clone());

        let doc = RawDocument::new(blank_pdf(1), "scan.pdf");
        let report = processor.process(doc, &CancelFlag::new()).await;

        assert_eq!(
            report.outcome.failure(),
            Some(TriageFailure::new(PipelineStage::Extraction, FailureKind::Empty))
        );
        assert_eq!(
            report.state,
            TriageState::Failed {
                stage: PipelineStage::Extraction,
                kind: FailureKind::Empty
            }
        );
        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].patient_hash().is_unidentifiable());
        assert_eq!(events[0].tier(), None);
        assert_eq!(
            events[0].outcome(),
            &AuditOutcome::Failed {
                stage: PipelineStage::Extraction,
                kind: FailureKind::Empty
            }
        );
    }

    #[tokio::test]
    async fn upload_is_destroyed_on_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ok_path = dir.path().join("ok.txt");
        let bad_path = dir.path().join("bad.pdf");
        std::fs::write(&ok_path, LETTER).unwrap();
        std::fs::write(&bad_path, blank_pdf(1)).unwrap();

        let processor = default_processor(Arc::new(InMemoryAuditLog::new()));
        let ok = processor
            .process(RawDocument::from_upload(&ok_path).unwrap(), &CancelFlag::new())
            .await;
        let bad = processor
            .process(RawDocument::from_upload(&bad_path).unwrap(), &CancelFlag::new())
            .await;

        assert!(ok.outcome.is_completed());
        assert!(!bad.outcome.is_completed());
        assert!(!ok_path.exists());
        assert!(!bad_path.exists());
    }

    #[tokio::test]
    async fn pdf_referral_is_triaged() {
        let processor = default_processor(Arc::new(InMemoryAuditLog::new()));
        let pdf = make_pdf(&[&[
            "Dear colleague, please see Mrs Jane Doe, DOB 12/03/1961.",
            "She reports crushing chest pain at rest with ST elevation on ECG.",
        ]]);
        let report = processor
            .process(RawDocument::new(pdf, "referral.pdf"), &CancelFlag::new())
            .await;
        assert_eq!(completed(&report).tier, RiskTier::Emergency);
    }

    #[tokio::test]
    async fn empty_corpus_yields_ungrounded_recommendation() {
        let processor = processor_with(
            retriever(Arc::new(GuidelineCorpus::empty())),
            RiskAssessor::rule_based(),
            RecommendationEngine::template(),
            Arc::new(InMemoryAuditLog::new()),
        );
        let report = processor.process(text_doc(LETTER), &CancelFlag::new()).await;
        let result = completed(&report);
        assert!(result.evidence_ids.is_empty());
        assert!(result.recommendation.as_deref().unwrap().contains(UNGROUNDED_NOTICE));
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn retrieval_outage_is_a_warning() {
        let corpus = guideline_corpus();
        let model = corpus.snapshot().embedding_model.clone();
        let retriever = KnowledgeRetriever::new(corpus, Arc::new(FailingEmbedder::impersonating(&model)));
        let processor = processor_with(
            retriever,
            RiskAssessor::rule_based(),
            RecommendationEngine::template(),
            Arc::new(InMemoryAuditLog::new()),
        );

        let report = processor.process(text_doc(LETTER), &CancelFlag::new()).await;
        let result = completed(&report);
        assert!(result.tier >= RiskTier::Urgent);
        assert!(result.evidence_ids.is_empty());
        assert!(report.warnings.contains(&TriageFailure::new(
            PipelineStage::Retrieval,
            FailureKind::RetrievalUnavailable
        )));
    }

    #[tokio::test]
    async fn classifier_outage_routes_to_manual_review() {
        let audit = Arc::new(InMemoryAuditLog::new());
        let processor = processor_with(
            retriever(guideline_corpus()),
            RiskAssessor::with_model(Box::new(Unavailable)),
            RecommendationEngine::template(),
            audit.clone(),
        );

        let report = processor
            .process(text_doc("Patient Anne Brown, DOB 1970-05-05, mild palpitations."), &CancelFlag::new())
            .await;

        assert!(report.outcome.needs_manual_review());
        assert_eq!(report.outcome.tier(), None);
        assert_eq!(
            report.outcome.failure(),
            Some(TriageFailure::new(PipelineStage::Assessment, FailureKind::Unavailable))
        );
        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].patient_hash().is_unidentifiable());
        assert_eq!(events[0].outcome().label(), "manual_review");
    }

    #[tokio::test]
    async fn classifier_timeout_routes_to_manual_review() {
        let slow = Arc::new(SlowLlmClient::new(Duration::from_millis(500), "EMERGENCY"));
        let processor = processor_with(
            retriever(guideline_corpus()),
            RiskAssessor::with_model(Box::new(LlmTierClassifier::new(slow, "test"))),
            RecommendationEngine::template(),
            Arc::new(InMemoryAuditLog::new()),
        )
        .with_timeouts(StageTimeouts {
            assessment: Duration::from_millis(50),
            ..StageTimeouts::default()
        });

        let report = processor.process(text_doc(LETTER), &CancelFlag::new()).await;
        assert!(report.outcome.needs_manual_review());
    }

    #[tokio::test]
    async fn generation_failure_keeps_tier_and_hash() {
        let failing = Arc::new(FailingLlmClient::new(LlmError::Connection("refused".into())));
        let processor = processor_with(
            retriever(guideline_corpus()),
            RiskAssessor::rule_based(),
            RecommendationEngine::new(Box::new(LlmRecommendationGenerator::new(failing, "test"))),
            Arc::new(InMemoryAuditLog::new()),
        );

        let report = processor.process(text_doc(LETTER), &CancelFlag::new()).await;
        let result = completed(&report);
        assert!(result.recommendation.is_none());
        assert!(result.tier >= RiskTier::Urgent);
        assert!(!result.patient_hash.is_unidentifiable());
        assert!(report.warnings.contains(&TriageFailure::new(
            PipelineStage::Recommendation,
            FailureKind::GenerationFailed
        )));
    }

    #[tokio::test]
    async fn model_classifier_can_raise_but_not_lower() {
        let lower = Arc::new(MockLlmClient::new("ROUTINE"));
        let processor = processor_with(
            retriever(guideline_corpus()),
            RiskAssessor::with_model(Box::new(LlmTierClassifier::new(lower, "test"))),
            RecommendationEngine::template(),
            Arc::new(InMemoryAuditLog::new()),
        );
        let report = processor.process(text_doc(LETTER), &CancelFlag::new()).await;
        assert!(completed(&report).tier >= RiskTier::Urgent);
    }

    #[tokio::test]
    async fn audit_failure_does_not_discard_the_decision() {
        let processor = processor_with(
            retriever(guideline_corpus()),
            RiskAssessor::rule_based(),
            RecommendationEngine::template(),
            Arc::new(FailingAuditLog),
        );
        let report = processor.process(text_doc(LETTER), &CancelFlag::new()).await;
        assert!(report.outcome.is_completed());
        assert!(!report.audit_recorded);
        assert!(report
            .warnings
            .contains(&TriageFailure::new(PipelineStage::Audit, FailureKind::WriteFailed)));
    }

    #[tokio::test]
    async fn cancelled_run_destroys_upload_and_is_audited() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.txt");
        std::fs::write(&path, LETTER).unwrap();

        let audit = Arc::new(InMemoryAuditLog::new());
        let processor = default_processor(audit.clone());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let report = processor
            .process(RawDocument::from_upload(&path).unwrap(), &cancel)
            .await;
        assert_eq!(
            report.outcome.failure(),
            Some(TriageFailure::new(PipelineStage::Extraction, FailureKind::Cancelled))
        );
        assert!(!path.exists());
        assert_eq!(audit.len(), 1);
    }

    #[tokio::test]
    async fn name_redaction_never_hides_red_flags() {
        let processor = default_processor(Arc::new(InMemoryAuditLog::new()));
        for letter in [
            "Dear Dr Ng,\nPlease see Mrs Ann Lee, DOB 02/05/1940, with unstable angina.",
            "Re: Syncope\nPatient John Smith, DOB 1950-01-01. Two episodes of syncope on exertion.",
        ] {
            let report = processor.process(text_doc(letter), &CancelFlag::new()).await;
            assert_eq!(completed(&report).tier, RiskTier::Urgent, "{letter}");
        }
    }

    #[tokio::test]
    async fn missing_name_is_a_soft_warning() {
        let processor = default_processor(Arc::new(InMemoryAuditLog::new()));
        let report = processor
            .process(text_doc("Referral: exertional chest tightness for three weeks."), &CancelFlag::new())
            .await;
        assert!(report.outcome.is_completed());
        assert!(report.warnings.contains(&TriageFailure::new(
            PipelineStage::Anonymization,
            FailureKind::NoIdentifiableEntity
        )));
    }

    #[test]
    fn build_processor_wires_offline_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TriageConfig {
            audit_sink: AuditSink::Sqlite {
                path: dir.path().join("audit.db"),
            },
            corpus_path: dir.path().join("missing-corpus.json"),
            ..TriageConfig::default()
        };
        let processor = build_processor(&config).unwrap();
        assert!(processor.retriever().corpus().snapshot().is_empty());
        assert!(dir.path().join("audit.db").exists());
    }

    #[test]
    fn build_processor_rejects_invalid_config() {
        let config = TriageConfig {
            worker_pool_size: 0,
            ..TriageConfig::default()
        };
        assert!(matches!(
            build_processor(&config),
            Err(ProcessorError::Config(ConfigError::EmptyWorkerPool))
        ));
    }
}
