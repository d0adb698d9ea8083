pub mod extraction;
pub mod anonymize;
pub mod llm;
pub mod retrieval;
pub mod assessment;
pub mod recommendation;
pub mod audit;
pub mod processor; // Referral triage orchestrator
pub mod pool; // Concurrent batch triage + review queue ordering
