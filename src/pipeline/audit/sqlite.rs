use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::{AuditError, AuditEvent, AuditLogger};

/// Append-only table. Triggers reject any update or delete.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    patient_hash TEXT NOT NULL,
    tier TEXT,
    outcome TEXT NOT NULL,
    event_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_log_patient ON audit_log(patient_hash);
CREATE TRIGGER IF NOT EXISTS audit_log_no_update
BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;
CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;
";

/// Audit events in an append-only SQLite `audit_log` table.
pub struct SqliteAuditLog {
    conn: Mutex<Connection>,
}

impl SqliteAuditLog {
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// In-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, AuditError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn count(&self) -> Result<usize, AuditError> {
        let conn = self.conn.lock().map_err(|_| AuditError::LockPoisoned)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Events recorded for one patient hash, oldest first.
    pub fn events_for(&self, patient_hash: &str) -> Result<Vec<AuditEvent>, AuditError> {
        let conn = self.conn.lock().map_err(|_| AuditError::LockPoisoned)?;
        let mut stmt =
            conn.prepare("SELECT event_json FROM audit_log WHERE patient_hash = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![patient_hash], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(AuditError::from))
            .collect()
    }

    #[cfg(test)]
    fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

impl AuditLogger for SqliteAuditLog {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(event)?;
        let conn = self.conn.lock().map_err(|_| AuditError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO audit_log (run_id, timestamp, patient_hash, tier, outcome, event_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.run_id().to_string(),
                event.timestamp().to_rfc3339(),
                event.patient_hash().as_str(),
                event.tier().map(|t| t.as_str()),
                event.outcome().label(),
                json,
            ],
        )?;
        tracing::debug!(run_id = %event.run_id(), outcome = event.outcome().label(), "Audit row inserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::anonymize::PatientHash;
    use crate::pipeline::assessment::RiskTier;
    use crate::pipeline::audit::AuditOutcome;
    use crate::pipeline::processor::{FailureKind, PipelineStage};
    use uuid::Uuid;

    fn event(tier: Option<RiskTier>, outcome: AuditOutcome) -> AuditEvent {
        AuditEvent::new(Uuid::new_v4(), PatientHash::unidentifiable(), tier, outcome)
    }

    #[test]
    fn records_and_reads_back() {
        let log = SqliteAuditLog::open_in_memory().unwrap();
        let e = event(Some(RiskTier::Emergency), AuditOutcome::Completed { warnings: vec![] });
        log.record(&e).unwrap();
        assert_eq!(log.count().unwrap(), 1);
        assert_eq!(
            log.events_for(PatientHash::unidentifiable().as_str()).unwrap(),
            vec![e]
        );
    }

    #[test]
    fn failure_row_has_null_tier() {
        let log = SqliteAuditLog::open_in_memory().unwrap();
        log.record(&event(
            None,
            AuditOutcome::Failed {
                stage: PipelineStage::Extraction,
                kind: FailureKind::Empty,
            },
        ))
        .unwrap();
        let conn = log.connection();
        let (tier, outcome): (Option<String>, String) = conn
            .query_row("SELECT tier, outcome FROM audit_log", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(tier, None);
        assert_eq!(outcome, "failed");
    }

    #[test]
    fn updates_and_deletes_are_rejected() {
        let log = SqliteAuditLog::open_in_memory().unwrap();
        log.record(&event(Some(RiskTier::Routine), AuditOutcome::Completed { warnings: vec![] }))
            .unwrap();
        let conn = log.connection();
        assert!(conn.execute("UPDATE audit_log SET tier = 'EMERGENCY'", []).is_err());
        assert!(conn.execute("DELETE FROM audit_log", []).is_err());
        drop(conn);
        assert_eq!(log.count().unwrap(), 1);
    }

    #[test]
    fn file_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("audit.db");
        {
            let log = SqliteAuditLog::open(&path).unwrap();
            log.record(&event(Some(RiskTier::Urgent), AuditOutcome::Completed { warnings: vec![] }))
                .unwrap();
        }
        let reopened = SqliteAuditLog::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
