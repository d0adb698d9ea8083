pub mod types;
pub mod chunker;
pub mod corpus;
pub mod embedder;
pub mod retriever;

pub use types::*;
pub use chunker::*;
pub use corpus::*;
pub use embedder::*;
pub use retriever::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::extraction::ExtractionError;
use crate::pipeline::llm::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalErrorKind {
    /// The embedding backend could not be reached or timed out.
    Unavailable,
    /// The corpus or its file is unusable.
    CorpusInvalid,
}

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Embedding backend error: {0}")]
    Embedding(#[from] LlmError),

    #[error("Embedding dimension mismatch: corpus {corpus}, query {query}")]
    DimensionMismatch { corpus: usize, query: usize },

    #[error("Corpus embedded with {corpus} but retriever uses {query}")]
    ModelMismatch { corpus: String, query: String },

    #[error("Corpus file error: {0}")]
    CorpusFormat(#[from] serde_json::Error),

    #[error("Guideline document extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Unsupported guideline file type: {0}")]
    UnsupportedFile(String),
}

impl RetrievalError {
    pub fn kind(&self) -> RetrievalErrorKind {
        match self {
            Self::Embedding(_) => RetrievalErrorKind::Unavailable,
            _ => RetrievalErrorKind::CorpusInvalid,
        }
    }
}
