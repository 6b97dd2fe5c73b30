//! JSONL audit writer with daily file rotation.

use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::NaiveDate;
use serde_json::Value;
use tracing::warn;

use super::{AuditEventType, AuditRecord, AuditSink};
use crate::{AppError, Result};

struct WriterState {
    current_date: NaiveDate,
    writer: BufWriter<fs::File>,
}

/// A daily-rotating JSONL audit writer.
///
/// Appends one [`AuditRecord`] per line to `<log_dir>/audit-YYYY-MM-DD.jsonl`
/// and opens a new file when the UTC date changes between writes.
pub struct JsonlAuditWriter {
    log_dir: PathBuf,
    state: Mutex<Option<WriterState>>,
}

impl JsonlAuditWriter {
    /// Construct a writer storing files in `log_dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the directory cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir).map_err(|e| {
            AppError::Config(format!(
                "failed to create audit log directory {}: {e}",
                log_dir.display()
            ))
        })?;
        Ok(Self {
            log_dir,
            state: Mutex::new(None),
        })
    }

    /// Directory the files are written to.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Path of the file for `date`.
    #[must_use]
    pub fn path_for_date(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("audit-{date}.jsonl"))
    }

    fn open_for_date(&self, date: NaiveDate) -> Result<BufWriter<fs::File>> {
        let path = self.path_for_date(date);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::Io(format!("failed to open audit log {}: {e}", path.display())))?;
        Ok(BufWriter::new(file))
    }

    fn write_record(&self, record: &AuditRecord) -> Result<()> {
        let today = record.timestamp.date_naive();

        let mut guard = self
            .state
            .lock()
            .map_err(|_| AppError::Io("audit writer mutex poisoned".into()))?;

        if guard.as_ref().is_none_or(|s| s.current_date != today) {
            let writer = self.open_for_date(today)?;
            *guard = Some(WriterState {
                current_date: today,
                writer,
            });
        }

        let Some(state) = guard.as_mut() else {
            return Ok(());
        };

        let line = serde_json::to_string(record)
            .map_err(|e| AppError::Io(format!("failed to serialise audit record: {e}")))?;
        if let Err(e) = writeln!(state.writer, "{line}") {
            warn!("failed to write audit record: {e}");
            return Err(AppError::Io(format!("audit write failed: {e}")));
        }
        if let Err(e) = state.writer.flush() {
            warn!("failed to flush audit log: {e}");
            return Err(AppError::Io(format!("audit flush failed: {e}")));
        }
        Ok(())
    }
}

impl AuditSink for JsonlAuditWriter {
    fn emit(&self, session_id: &str, event_type: AuditEventType, data: Value) -> Result<()> {
        self.write_record(&AuditRecord::new(session_id, event_type, data))
    }
}

impl std::fmt::Debug for JsonlAuditWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlAuditWriter")
            .field("log_dir", &self.log_dir)
            .finish_non_exhaustive()
    }
}
