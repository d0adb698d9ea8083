use std::sync::Arc;

use super::corpus::GuidelineCorpus;
use super::embedder::cosine_similarity;
use super::types::{EmbeddingModel, GuidelineSnippet};
use super::RetrievalError;
use crate::pipeline::anonymize::RedactedText;

/// Returns the guideline passages most similar to a redacted referral.
///
/// Read-only against the corpus. Each call works on one snapshot, so a
/// concurrent publish never produces a mixed result.
pub struct KnowledgeRetriever {
    corpus: Arc<GuidelineCorpus>,
    embedder: Arc<dyn EmbeddingModel + Send + Sync>,
}

impl KnowledgeRetriever {
    pub fn new(corpus: Arc<GuidelineCorpus>, embedder: Arc<dyn EmbeddingModel + Send + Sync>) -> Self {
        Self { corpus, embedder }
    }

    pub fn corpus(&self) -> &GuidelineCorpus {
        &self.corpus
    }

    /// Top `k` passages by cosine similarity, highest first. Equal scores keep
    /// corpus insertion order. An empty corpus or `k == 0` yields no snippets
    /// without touching the embedder.
    pub fn retrieve(&self, text: &RedactedText, k: usize) -> Result<Vec<GuidelineSnippet>, RetrievalError> {
        let snapshot = self.corpus.snapshot();
        if k == 0 || snapshot.is_empty() {
            tracing::debug!(version = snapshot.version, k, "Retrieval skipped, nothing to search");
            return Ok(Vec::new());
        }

        if snapshot.embedding_model != self.embedder.model_name() {
            return Err(RetrievalError::ModelMismatch {
                corpus: snapshot.embedding_model.clone(),
                query: self.embedder.model_name().to_string(),
            });
        }

        let query = self.embedder.embed(&text.as_text())?;
        if let Some(dim) = snapshot.dimension() {
            if dim != query.len() {
                return Err(RetrievalError::DimensionMismatch {
                    corpus: dim,
                    query: query.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f32)> = snapshot
            .passages
            .iter()
            .enumerate()
            .map(|(i, p)| (i, cosine_similarity(&query, &p.embedding)))
            .collect();
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let snippets: Vec<GuidelineSnippet> = scored
            .into_iter()
            .take(k)
            .map(|(i, score)| snapshot.passages[i].to_snippet(score))
            .collect();

        tracing::info!(
            version = snapshot.version,
            k,
            returned = snippets.len(),
            top_score = snippets.first().map(|s| s.relevance_score).unwrap_or(0.0),
            "Guideline retrieval complete"
        );
        Ok(snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::retrieval::{
        CorpusBuilder, CorpusSnapshot, FailingEmbedder, GuidelinePassage, HashingEmbedder,
        RetrievalErrorKind,
    };

    fn corpus_of(docs: &[(&str, &str)]) -> Arc<GuidelineCorpus> {
        let embedder = HashingEmbedder::new();
        let corpus = GuidelineCorpus::empty();
        let mut builder = CorpusBuilder::new(&embedder);
        for (id, text) in docs {
            builder.add_text(id, text).unwrap();
        }
        builder.publish_to(&corpus);
        Arc::new(corpus)
    }

    fn retriever(corpus: Arc<GuidelineCorpus>) -> KnowledgeRetriever {
        KnowledgeRetriever::new(corpus, Arc::new(HashingEmbedder::new()))
    }

    fn query(text: &str) -> RedactedText {
        RedactedText::from_redacted(text)
    }

    #[test]
    fn empty_corpus_returns_no_snippets() {
        let r = retriever(Arc::new(GuidelineCorpus::empty()));
        assert!(r.retrieve(&query("chest pain"), 3).unwrap().is_empty());
    }

    #[test]
    fn empty_corpus_never_calls_embedder() {
        let r = KnowledgeRetriever::new(
            Arc::new(GuidelineCorpus::empty()),
            Arc::new(FailingEmbedder::impersonating("feature-hashing-v1")),
        );
        assert!(r.retrieve(&query("chest pain"), 3).unwrap().is_empty());
    }

    #[test]
    fn zero_k_returns_no_snippets() {
        let r = retriever(corpus_of(&[("a.txt", "chest pain")]));
        assert!(r.retrieve(&query("chest pain"), 0).unwrap().is_empty());
    }

    #[test]
    fn most_relevant_passage_first() {
        let r = retriever(corpus_of(&[
            ("veins.txt", "Varicose veins of the lower limb and compression hosiery."),
            ("acs.txt", "Unstable angina with chest pain at rest needs same-day assessment."),
            ("valve.txt", "Aortic stenosis is graded by valve area and gradient."),
        ]));
        let out = r
            .retrieve(&query("[NAME] presents with unstable angina and chest pain at rest"), 2)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "acs.txt#0");
        assert!(out[0].relevance_score >= out[1].relevance_score);
    }

    #[test]
    fn result_length_bounded_by_k_and_corpus() {
        let r = retriever(corpus_of(&[("a.txt", "one"), ("b.txt", "two")]));
        assert_eq!(r.retrieve(&query("one two"), 5).unwrap().len(), 2);
        assert_eq!(r.retrieve(&query("one two"), 1).unwrap().len(), 1);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let passage = |id: &str| GuidelinePassage {
            id: format!("{id}#0"),
            source_document_id: id.to_string(),
            chunk_index: 0,
            text: "same".into(),
            embedding: vec![1.0, 0.0],
        };
        let corpus = Arc::new(GuidelineCorpus::new(CorpusSnapshot {
            version: 1,
            embedding_model: "fixed".into(),
            passages: vec![passage("first"), passage("second"), passage("third")],
        }));

        struct Fixed;
        impl EmbeddingModel for Fixed {
            fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
                Ok(vec![1.0, 0.0])
            }
            fn model_name(&self) -> &str {
                "fixed"
            }
        }

        let r = KnowledgeRetriever::new(corpus, Arc::new(Fixed));
        let ids: Vec<String> = r.retrieve(&query("x"), 3).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["first#0", "second#0", "third#0"]);
    }

    #[test]
    fn retrieval_is_deterministic() {
        let r = retriever(corpus_of(&[
            ("a.txt", "Syncope on exertion with murmur."),
            ("b.txt", "Palpitations and atrial fibrillation."),
        ]));
        let q = query("exertional syncope");
        assert_eq!(r.retrieve(&q, 2).unwrap(), r.retrieve(&q, 2).unwrap());
    }

    #[test]
    fn retrieval_does_not_mutate_corpus() {
        let corpus = corpus_of(&[("a.txt", "Heart failure with reduced ejection fraction.")]);
        let before = corpus.snapshot();
        retriever(Arc::clone(&corpus)).retrieve(&query("heart failure"), 1).unwrap();
        assert_eq!(*before, *corpus.snapshot());
    }

    #[test]
    fn embedder_failure_is_unavailable() {
        let r = KnowledgeRetriever::new(
            corpus_of(&[("a.txt", "chest pain")]),
            Arc::new(FailingEmbedder::impersonating("feature-hashing-v1")),
        );
        let err = r.retrieve(&query("chest pain"), 3).unwrap_err();
        assert_eq!(err.kind(), RetrievalErrorKind::Unavailable);
    }

    #[test]
    fn model_mismatch_is_rejected() {
        let r = KnowledgeRetriever::new(
            corpus_of(&[("a.txt", "chest pain")]),
            Arc::new(FailingEmbedder::impersonating("all-minilm")),
        );
        let err = r.retrieve(&query("chest pain"), 3).unwrap_err();
        assert!(matches!(err, RetrievalError::ModelMismatch { .. }));
    }
}
