//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

use crate::protocol::event::TurnResult;

/// Shared bridge result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Details of a turn-ceiling violation.
///
/// Carries the [`TurnResult`] that concluded the offending send, when one was
/// received, so callers see both the outcome and the failure.
#[derive(Debug, Clone)]
pub struct TurnLimitExceeded {
    /// Cumulative turns observed for the session.
    pub turns: u32,
    /// Configured turn ceiling.
    pub max_allowed: u32,
    /// Session identifier reported by the child (may be empty).
    pub session_id: String,
    /// Turn result received before the ceiling check failed, if any.
    pub result: Option<TurnResult>,
}

/// Bridge error enumeration covering all domain failure modes.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Child process could not be launched.
    Start(String),
    /// One inbound frame could not be decoded.
    Decode(String),
    /// Child closed its output before a terminal event arrived.
    StreamTerminated(String),
    /// Cumulative turn count exceeded the configured ceiling.
    TurnLimit(Box<TurnLimitExceeded>),
    /// Operation was cancelled by the caller.
    Cancelled(String),
    /// Per-call timeout elapsed.
    Timeout(String),
    /// Local capability execution failure.
    Capability(String),
    /// Policy construction or evaluation failure.
    Policy(String),
    /// Session has already been closed.
    Closed(String),
    /// File-system or pipe I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Start(msg) => write!(f, "start: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::StreamTerminated(msg) => write!(f, "stream terminated: {msg}"),
            Self::TurnLimit(limit) => write!(
                f,
                "turn limit exceeded: Turns={}, MaxAllowed={}, SessionID={}",
                limit.turns, limit.max_allowed, limit.session_id
            ),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Capability(msg) => write!(f, "capability: {msg}"),
            Self::Policy(msg) => write!(f, "policy: {msg}"),
            Self::Closed(msg) => write!(f, "closed: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Borrow the turn-limit details when this is [`AppError::TurnLimit`].
    #[must_use]
    pub fn turn_limit(&self) -> Option<&TurnLimitExceeded> {
        match self {
            Self::TurnLimit(limit) => Some(limit),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
