use std::sync::LazyLock;

use regex::Regex;

use super::types::EmbeddingModel;
use super::RetrievalError;
use crate::pipeline::llm::{LlmError, OllamaClient};

/// Output dimension of the offline embedder, matching all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

const BIGRAM_WEIGHT: f32 = 0.5;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[A-Z_]+\]").expect("invalid placeholder pattern"));

/// Words too common in letters and guidelines to carry signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "he", "her",
    "his", "in", "is", "it", "of", "on", "or", "she", "that", "the", "their", "they", "this",
    "to", "was", "were", "with",
];

/// Deterministic feature-hashing embedder. Unigrams and bigrams of the
/// lower-cased text are hashed into a fixed number of signed buckets and the
/// result is L2-normalized. Redaction placeholders are ignored.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(EMBEDDING_DIM)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimension];
        let tokens = tokenize(text);

        for token in &tokens {
            self.add_feature(&mut vec, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut vec, bigram.as_bytes(), BIGRAM_WEIGHT);
        }

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut vec {
                *val /= norm;
            }
        }
        vec
    }

    fn add_feature(&self, vec: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vec[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingModel for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(self.vectorize(text))
    }

    fn model_name(&self) -> &str {
        "feature-hashing-v1"
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let stripped = PLACEHOLDER.replace_all(text, " ");
    stripped
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// 64-bit FNV-1a. Stable across platforms and toolchains, unlike std's
/// `DefaultHasher`, so saved corpora stay valid.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, &b| (hash ^ b as u64).wrapping_mul(PRIME))
}

/// Embeddings from an Ollama `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

impl EmbeddingModel for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(self.client.embed(&self.model, text)?)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Embedder that always fails, for exercising the unavailable path.
pub struct FailingEmbedder {
    model: String,
}

impl FailingEmbedder {
    /// Fails while claiming to be `model`, so corpus checks pass first.
    pub fn impersonating(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }
}

impl EmbeddingModel for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
        Err(RetrievalError::Embedding(LlmError::Connection(
            "embedding backend offline".into(),
        )))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
