use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "ReferralTriage";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Retrieval fan-out used when nothing else is configured.
pub const DEFAULT_RETRIEVAL_K: usize = 3;

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,referral_triage=debug"
}

/// Get the application data directory.
/// ~/ReferralTriage/ on all platforms, falling back to the working directory.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Directory holding the daily append-only audit files.
pub fn audit_dir() -> PathBuf {
    app_data_dir().join("audit_logs")
}

/// Default location of the serialized guideline corpus snapshot.
pub fn corpus_path() -> PathBuf {
    app_data_dir().join("guidelines").join("corpus.json")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}")]
    Invalid { key: &'static str },

    #[error("Worker pool size must be at least 1")]
    EmptyWorkerPool,
}

/// Where audit events are appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditSink {
    /// Daily `audit_YYYYMMDD.log` JSON-lines files in a directory.
    Jsonl { dir: PathBuf },
    /// Append-only `audit_log` table in a SQLite file.
    Sqlite { path: PathBuf },
}

/// Which embedding backend the knowledge retriever uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Offline feature-hashing embedder, deterministic and dependency-free.
    Hashing,
    /// Ollama `/api/embeddings` endpoint.
    Ollama,
}

/// Per-stage timeouts for the calls that may block on an inference endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeouts {
    #[serde(with = "duration_secs")]
    pub retrieval: Duration,
    #[serde(with = "duration_secs")]
    pub assessment: Duration,
    #[serde(with = "duration_secs")]
    pub recommendation: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            retrieval: Duration::from_secs(30),
            assessment: Duration::from_secs(120),
            recommendation: Duration::from_secs(120),
        }
    }
}

/// Configuration consumed by the triage core.
///
/// Owned by whoever starts the process; the pipeline treats every field as an
/// opaque parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Number of guideline passages retrieved per referral.
    pub retrieval_k: usize,
    pub timeouts: StageTimeouts,
    /// Concurrent CPU-bound stage slots (extraction, classification).
    pub worker_pool_size: usize,
    pub audit_sink: AuditSink,
    /// Serialized guideline corpus. Missing file means an empty corpus.
    pub corpus_path: PathBuf,
    pub embedding_backend: EmbeddingBackend,
    /// Ollama base URL; when unset the rule-based classifier and template
    /// generator are used.
    pub ollama_url: Option<String>,
    pub ollama_model: String,
    pub embedding_model: String,
    /// Namespace mixed into every patient hash.
    pub hash_salt: String,
    /// Directory where the ingestion layer drops uploads. Swept at startup so
    /// a crash never leaves raw referrals behind.
    pub upload_dir: Option<PathBuf>,
    /// Tesseract language data. OCR of scanned pages needs the `ocr` feature
    /// and this directory.
    pub tessdata_dir: Option<PathBuf>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            retrieval_k: DEFAULT_RETRIEVAL_K,
            timeouts: StageTimeouts::default(),
            worker_pool_size: default_worker_pool_size(),
            audit_sink: AuditSink::Jsonl { dir: audit_dir() },
            corpus_path: corpus_path(),
            embedding_backend: EmbeddingBackend::Hashing,
            ollama_url: None,
            ollama_model: "medgemma".into(),
            embedding_model: "all-minilm".into(),
            hash_salt: "referral-triage/patient/v1".into(),
            upload_dir: None,
            tessdata_dir: None,
        }
    }
}

impl TriageConfig {
    /// Build a configuration from `TRIAGE_*` environment variables on top of
    /// the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`TriageConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("TRIAGE_RETRIEVAL_K") {
            config.retrieval_k = parse_number(&v, "TRIAGE_RETRIEVAL_K")?;
        }
        if let Some(v) = lookup("TRIAGE_WORKERS") {
            config.worker_pool_size = parse_number(&v, "TRIAGE_WORKERS")?;
        }
        if let Some(v) = lookup("TRIAGE_RETRIEVAL_TIMEOUT_SECS") {
            config.timeouts.retrieval =
                Duration::from_secs(parse_number(&v, "TRIAGE_RETRIEVAL_TIMEOUT_SECS")?);
        }
        if let Some(v) = lookup("TRIAGE_ASSESSMENT_TIMEOUT_SECS") {
            config.timeouts.assessment =
                Duration::from_secs(parse_number(&v, "TRIAGE_ASSESSMENT_TIMEOUT_SECS")?);
        }
        if let Some(v) = lookup("TRIAGE_RECOMMENDATION_TIMEOUT_SECS") {
            config.timeouts.recommendation =
                Duration::from_secs(parse_number(&v, "TRIAGE_RECOMMENDATION_TIMEOUT_SECS")?);
        }
        if let Some(v) = lookup("TRIAGE_AUDIT_DIR") {
            config.audit_sink = AuditSink::Jsonl { dir: PathBuf::from(v) };
        }
        if let Some(v) = lookup("TRIAGE_AUDIT_DB") {
            config.audit_sink = AuditSink::Sqlite { path: PathBuf::from(v) };
        }
        if let Some(v) = lookup("TRIAGE_CORPUS_PATH") {
            config.corpus_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TRIAGE_EMBEDDINGS") {
            config.embedding_backend = match v.trim().to_ascii_lowercase().as_str() {
                "hashing" => EmbeddingBackend::Hashing,
                "ollama" => EmbeddingBackend::Ollama,
                _ => return Err(ConfigError::Invalid { key: "TRIAGE_EMBEDDINGS" }),
            };
        }
        if let Some(v) = lookup("TRIAGE_OLLAMA_URL") {
            let trimmed = v.trim();
            config.ollama_url = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        if let Some(v) = lookup("TRIAGE_MODEL") {
            config.ollama_model = v;
        }
        if let Some(v) = lookup("TRIAGE_EMBEDDING_MODEL") {
            config.embedding_model = v;
        }
        if let Some(v) = lookup("TRIAGE_HASH_SALT") {
            config.hash_salt = v;
        }
        if let Some(v) = lookup("TRIAGE_UPLOAD_DIR") {
            config.upload_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("TRIAGE_TESSDATA_DIR") {
            config.tessdata_dir = Some(PathBuf::from(v));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::EmptyWorkerPool);
        }
        if self.embedding_backend == EmbeddingBackend::Ollama && self.ollama_url.is_none() {
            return Err(ConfigError::Invalid { key: "TRIAGE_OLLAMA_URL" });
        }
        Ok(())
    }
}

/// One slot per available core; extraction and classification are CPU-bound.
pub fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

fn parse_number<T: std::str::FromStr>(raw: &str, key: &'static str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid { key })
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn app_data_dir_ends_with_app_name() {
        assert!(app_data_dir().ends_with(APP_NAME));
    }

    #[test]
    fn audit_dir_under_app_data() {
        assert!(audit_dir().starts_with(app_data_dir()));
    }

    #[test]
    fn defaults_match_original_fan_out() {
        let config = TriageConfig::default();
        assert_eq!(config.retrieval_k, 3);
        assert!(config.worker_pool_size >= 1);
        assert_eq!(config.embedding_backend, EmbeddingBackend::Hashing);
        assert!(config.ollama_url.is_none());
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = TriageConfig::from_lookup(lookup_from(&[
            ("TRIAGE_RETRIEVAL_K", "5"),
            ("TRIAGE_WORKERS", "2"),
            ("TRIAGE_ASSESSMENT_TIMEOUT_SECS", "9"),
            ("TRIAGE_AUDIT_DB", "/tmp/audit.db"),
        ]))
        .unwrap();

        assert_eq!(config.retrieval_k, 5);
        assert_eq!(config.worker_pool_size, 2);
        assert_eq!(config.timeouts.assessment, Duration::from_secs(9));
        assert_eq!(
            config.audit_sink,
            AuditSink::Sqlite { path: PathBuf::from("/tmp/audit.db") }
        );
    }

    #[test]
    fn invalid_number_names_the_key() {
        let err = TriageConfig::from_lookup(lookup_from(&[("TRIAGE_RETRIEVAL_K", "three")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TRIAGE_RETRIEVAL_K" }));
    }

    #[test]
    fn zero_workers_rejected() {
        let err = TriageConfig::from_lookup(lookup_from(&[("TRIAGE_WORKERS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyWorkerPool));
    }

    #[test]
    fn ollama_embeddings_require_url() {
        let err = TriageConfig::from_lookup(lookup_from(&[("TRIAGE_EMBEDDINGS", "ollama")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TRIAGE_OLLAMA_URL" }));
    }

    #[test]
    fn timeouts_serialize_as_seconds() {
        let json = serde_json::to_string(&StageTimeouts::default()).unwrap();
        assert!(json.contains("\"retrieval\":30"));
        let back: StageTimeouts = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StageTimeouts::default());
    }
}
