use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};

use super::chunker::GuidelineChunker;
use super::types::{CorpusSnapshot, EmbeddingModel, GuidelinePassage};
use super::RetrievalError;
use crate::pipeline::extraction::{PdfExtractor, PdfTextExtractor};

/// Shared, versioned guideline corpus.
///
/// Readers take an `Arc` to the current snapshot and keep it for the whole
/// retrieval; publishing swaps in a new snapshot without touching the old one.
pub struct GuidelineCorpus {
    current: RwLock<Arc<CorpusSnapshot>>,
}

impl GuidelineCorpus {
    pub fn new(snapshot: CorpusSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn empty() -> Self {
        Self::new(CorpusSnapshot::default())
    }

    /// The snapshot current at call time.
    pub fn snapshot(&self) -> Arc<CorpusSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    /// Replace the corpus with a new snapshot. Returns the new version.
    pub fn publish(&self, embedding_model: &str, passages: Vec<GuidelinePassage>) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let version = guard.version + 1;
        let count = passages.len();
        *guard = Arc::new(CorpusSnapshot {
            version,
            embedding_model: embedding_model.to_string(),
            passages,
        });
        tracing::info!(version, passages = count, "Guideline corpus published");
        version
    }

    /// Load a snapshot written by [`GuidelineCorpus::save`].
    pub fn load(path: &Path) -> Result<Self, RetrievalError> {
        let file = fs::File::open(path)?;
        let snapshot: CorpusSnapshot = serde_json::from_reader(BufReader::new(file))?;
        tracing::info!(
            version = snapshot.version,
            passages = snapshot.len(),
            "Guideline corpus loaded"
        );
        Ok(Self::new(snapshot))
    }

    /// Load the corpus if the file exists, otherwise start empty.
    pub fn load_or_empty(path: &Path) -> Result<Self, RetrievalError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!("No guideline corpus file, retrieval will return no evidence");
            Ok(Self::empty())
        }
    }

    /// Write the current snapshot as JSON. Written to a sibling temp file and
    /// renamed so readers never see a partial file.
    pub fn save(&self, path: &Path) -> Result<(), RetrievalError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let snapshot = self.snapshot();
        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(fs::File::create(&tmp)?);
            serde_json::to_writer(&mut writer, snapshot.as_ref())?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Default for GuidelineCorpus {
    fn default() -> Self {
        Self::empty()
    }
}

/// Builds the passages for a new corpus snapshot from guideline documents.
///
/// Administrative path only; nothing here runs during triage.
pub struct CorpusBuilder<'a> {
    embedder: &'a dyn EmbeddingModel,
    chunker: GuidelineChunker,
    passages: Vec<GuidelinePassage>,
}

impl<'a> CorpusBuilder<'a> {
    pub fn new(embedder: &'a dyn EmbeddingModel) -> Self {
        Self {
            embedder,
            chunker: GuidelineChunker::new(),
            passages: Vec::new(),
        }
    }

    /// Start from the passages of `snapshot`, so publishing adds to the corpus
    /// rather than replacing it. The embedder must be the one the snapshot was
    /// built with.
    pub fn extending(
        embedder: &'a dyn EmbeddingModel,
        snapshot: &CorpusSnapshot,
    ) -> Result<Self, RetrievalError> {
        if !snapshot.is_empty() && snapshot.embedding_model != embedder.model_name() {
            return Err(RetrievalError::ModelMismatch {
                corpus: snapshot.embedding_model.clone(),
                query: embedder.model_name().to_string(),
            });
        }
        let mut builder = Self::new(embedder);
        builder.passages = snapshot.passages.clone();
        Ok(builder)
    }

    /// Whether a document with this id is already in the builder.
    pub fn contains_document(&self, source_document_id: &str) -> bool {
        self.passages
            .iter()
            .any(|p| p.source_document_id == source_document_id)
    }

    pub fn with_chunker(mut self, chunker: GuidelineChunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Chunk and embed one document. Returns the number of passages added,
    /// zero when the document is already indexed.
    pub fn add_text(&mut self, source_document_id: &str, text: &str) -> Result<usize, RetrievalError> {
        if self.contains_document(source_document_id) {
            tracing::debug!(document = source_document_id, "Guideline document already indexed");
            return Ok(0);
        }
        let chunks = self.chunker.chunk(text);
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let embeddings = self.embedder.embed_batch(&refs)?;
        let added = chunks.len();

        for (chunk_index, (text, embedding)) in chunks.into_iter().zip(embeddings).enumerate() {
            self.passages.push(GuidelinePassage {
                id: GuidelinePassage::passage_id(source_document_id, chunk_index),
                source_document_id: source_document_id.to_string(),
                chunk_index,
                text,
                embedding,
            });
        }
        Ok(added)
    }

    /// Add a `.txt`, `.md` or `.pdf` guideline file. The document id is the
    /// file name.
    pub fn add_file(&mut self, path: &Path) -> Result<usize, RetrievalError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let text = match ext.as_str() {
            "txt" | "md" => String::from_utf8_lossy(&fs::read(path)?).into_owned(),
            "pdf" => PdfTextExtractor.extract_pages(&fs::read(path)?)?.join("\n"),
            other => return Err(RetrievalError::UnsupportedFile(other.to_string())),
        };
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "guideline".to_string());
        self.add_text(&id, &text)
    }

    /// Add every supported file in `dir`, in name order. A file that fails is
    /// skipped with a warning. Returns the number of passages added.
    pub fn add_dir(&mut self, dir: &Path) -> Result<usize, RetrievalError> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_supported(p))
            .collect();
        paths.sort();

        let mut added = 0;
        for path in &paths {
            match self.add_file(path) {
                Ok(n) => added += n,
                Err(e) => tracing::warn!(error = %e, "Skipping guideline document"),
            }
        }
        tracing::info!(documents = paths.len(), passages = added, "Guideline directory ingested");
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Publish the collected passages as the corpus's next snapshot.
    pub fn publish_to(self, corpus: &GuidelineCorpus) -> u64 {
        corpus.publish(self.embedder.model_name(), self.passages)
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| matches!(e.as_str(), "txt" | "md" | "pdf"))
}
