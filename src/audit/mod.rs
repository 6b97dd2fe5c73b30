//! Structured audit records for bridge sessions.
//!
//! Provides the [`AuditSink`] trait and associated types. The primary
//! implementation, [`JsonlAuditWriter`], appends JSONL records to
//! daily-rotating files. Sessions never call a sink directly; they go
//! through an [`AuditDispatcher`], which drains records on a blocking
//! background task so a slow or panicking sink cannot stall dispatch.

pub mod dispatcher;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type classification for audit records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Session started; the child is running.
    SessionStart,
    /// Session closed.
    SessionEnd,
    /// Caller-visible event forwarded from the child.
    Event,
    /// Control request answered.
    ControlDecision,
    /// A policy panicked and was skipped.
    PolicyFault,
}

/// One audit line as persisted by [`JsonlAuditWriter`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    /// Time the record was written.
    pub timestamp: DateTime<Utc>,
    /// Session the record belongs to.
    pub session_id: String,
    /// Record classification.
    pub event_type: AuditEventType,
    /// Event-specific payload.
    pub data: Value,
}

impl AuditRecord {
    /// Stamp a new record with the current time.
    #[must_use]
    pub fn new(session_id: impl Into<String>, event_type: AuditEventType, data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            event_type,
            data,
        }
    }
}

/// Receives audit records.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// task boundaries via [`std::sync::Arc`].
pub trait AuditSink: Send + Sync {
    /// Record one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails. Errors are logged by
    /// the dispatcher and never reach the session caller.
    fn emit(&self, session_id: &str, event_type: AuditEventType, data: Value) -> crate::Result<()>;
}

pub use dispatcher::AuditDispatcher;
pub use writer::JsonlAuditWriter;
