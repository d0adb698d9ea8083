use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;

use super::{AuditError, AuditEvent, AuditLogger};

/// Daily append-only JSON-lines files, `audit_YYYYMMDD.log`, one event per
/// line. The file is picked by the event's UTC date.
pub struct JsonlAuditLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    /// Open the log directory, creating it if needed.
    pub fn open(dir: &Path) -> Result<Self, AuditError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding events for `date`.
    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("audit_{}.log", date.format("%Y%m%d")))
    }

    /// All events recorded for `date`, in write order.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<AuditEvent>, AuditError> {
        let path = self.file_for(date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        fs::read_to_string(path)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(AuditError::from))
            .collect()
    }
}

impl AuditLogger for JsonlAuditLog {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().map_err(|_| AuditError::LockPoisoned)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(event.timestamp().date_naive()))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        tracing::debug!(run_id = %event.run_id(), outcome = event.outcome().label(), "Audit event appended");
        Ok(())
    }
}
