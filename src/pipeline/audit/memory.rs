use std::sync::Mutex;

use super::{AuditError, AuditEvent, AuditLogger};

/// In-memory audit sink for tests and dry runs.
#[derive(Default)]
pub struct InMemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditLogger for InMemoryAuditLog {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError::LockPoisoned)?
            .push(event.clone());
        Ok(())
    }
}

/// Audit sink that rejects every write.
pub struct FailingAuditLog;

impl AuditLogger for FailingAuditLog {
    fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Rejected("sink offline".into()))
    }
}
