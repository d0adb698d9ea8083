pub mod ollama;

pub use ollama::*;

use thiserror::Error;

/// Sampling seed pinned for every inference call.
pub const INFERENCE_SEED: u64 = 42;

/// Errors from an inference endpoint. Response bodies are never kept since
/// they may echo letter content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Cannot reach inference endpoint at {0}")]
    Connection(String),

    #[error("Inference request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Inference endpoint returned status {status}")]
    Status { status: u16 },

    #[error("Failed to parse inference response: {0}")]
    ResponseParsing(String),

    #[error("Model returned an empty response")]
    EmptyResponse,
}

/// Narrow text-generation capability behind the classifier and generator.
///
/// Implementations must be deterministic for identical input: temperature
/// zero and a fixed seed.
pub trait LlmClient {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError>;
}
