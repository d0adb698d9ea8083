pub mod event;
pub mod jsonl;
pub mod sqlite;
pub mod memory;

pub use event::*;
pub use jsonl::*;
pub use sqlite::*;
pub use memory::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditErrorKind {
    WriteFailed,
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit file write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit database write failed: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Audit event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit sink lock poisoned")]
    LockPoisoned,

    #[error("Audit sink rejected the write: {0}")]
    Rejected(String),
}

impl AuditError {
    pub fn kind(&self) -> AuditErrorKind {
        AuditErrorKind::WriteFailed
    }
}

/// Append-only audit sink. Implementations never modify or remove a
/// recorded event.
pub trait AuditLogger {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}
