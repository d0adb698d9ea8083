use serde::{Deserialize, Serialize};

use super::RetrievalError;

/// A retrieved guideline passage returned as evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineSnippet {
    /// `<source>#<chunk>`, stable across snapshots built from the same files.
    pub id: String,
    pub source_document_id: String,
    pub text: String,
    pub relevance_score: f32,
}

/// One embedded chunk of a guideline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelinePassage {
    pub id: String,
    pub source_document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl GuidelinePassage {
    pub fn passage_id(source_document_id: &str, chunk_index: usize) -> String {
        format!("{source_document_id}#{chunk_index}")
    }

    pub(crate) fn to_snippet(&self, relevance_score: f32) -> GuidelineSnippet {
        GuidelineSnippet {
            id: self.id.clone(),
            source_document_id: self.source_document_id.clone(),
            text: self.text.clone(),
            relevance_score,
        }
    }
}

/// Immutable view of the guideline corpus at one version. Passages keep
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    pub version: u64,
    /// Embedder that produced the passage vectors.
    pub embedding_model: String,
    pub passages: Vec<GuidelinePassage>,
}

impl CorpusSnapshot {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Vector dimension of the stored embeddings, if any passage exists.
    pub fn dimension(&self) -> Option<usize> {
        self.passages.first().map(|p| p.embedding.len())
    }
}

/// Text embedding capability used for both corpus building and queries.
pub trait EmbeddingModel {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Identifier recorded in snapshots so mismatched vectors are caught.
    fn model_name(&self) -> &str;
}
