//! Typed events decoded from the child's output stream.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::value::InputMap;

/// Metadata attached to every decoded [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageMeta {
    /// Time the frame was decoded.
    pub timestamp: DateTime<Utc>,
    /// Session identifier reported by the child; empty until known.
    pub session_id: String,
    /// Turn the event belongs to, starting at 1.
    pub turn: u32,
    /// Per-session sequence number, starting at 1 and increasing by 1.
    pub sequence: u64,
    /// Action identifier that spawned this event, for nested work.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Sub-session identifier, for events relayed from a nested agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_session_id: Option<String>,
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Bookkeeping shared by every variant.
    pub meta: MessageMeta,
    /// Variant payload.
    #[serde(flatten)]
    pub body: EventBody,
}

impl Event {
    /// Short snake-case name of the variant, used in logs and audit records.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.body.kind_name()
    }
}

/// Closed set of event payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    /// Session handshake carrying the child's identity and capabilities.
    SessionInit(SessionInit),
    /// Textual reply, or an unrecognized frame surfaced verbatim.
    Text(TextContent),
    /// Hidden rationale plus its opaque signature.
    Reasoning(Reasoning),
    /// Proposed named action.
    ActionRequest(ToolCall),
    /// Result of a previously requested action.
    ActionOutcome(ActionOutcome),
    /// Conclusion of a turn.
    TurnResult(TurnResult),
    /// Pending permission or capability-invocation ask.
    ControlRequest(ControlRequest),
    /// Error reported by the child.
    Failure(Failure),
}

impl EventBody {
    /// Short snake-case name of the variant.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::SessionInit(_) => "session_init",
            Self::Text(_) => "text",
            Self::Reasoning(_) => "reasoning",
            Self::ActionRequest(_) => "action_request",
            Self::ActionOutcome(_) => "action_outcome",
            Self::TurnResult(_) => "turn_result",
            Self::ControlRequest(_) => "control_request",
            Self::Failure(_) => "failure",
        }
    }
}

/// Status of one external sub-service declared at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerStatus {
    /// Sub-service name.
    pub name: String,
    /// Connection status as reported by the child.
    pub status: String,
}

/// Payload of [`EventBody::SessionInit`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInit {
    /// Session identifier assigned by the child.
    pub session_id: String,
    /// Location of the child's transcript, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    /// Action names the child declares it can perform.
    pub tools: Vec<String>,
    /// External sub-service statuses.
    pub mcp_servers: Vec<McpServerStatus>,
    /// Model identifier, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Payload of [`EventBody::Text`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextContent {
    /// Text content, or the full raw line for unrecognized frames.
    pub text: String,
    /// `true` when `text` is an unrecognized frame surfaced verbatim.
    pub raw: bool,
}

/// Payload of [`EventBody::Reasoning`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reasoning {
    /// Hidden rationale text.
    pub thinking: String,
    /// Opaque signature accompanying the rationale.
    pub signature: String,
}

/// A proposed named action with structured input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    /// Action identifier assigned by the child, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Action name.
    pub name: String,
    /// Structured input.
    pub input: InputMap,
}

impl ToolCall {
    /// Build a call without an identifier.
    #[must_use]
    pub fn new(name: impl Into<String>, input: InputMap) -> Self {
        Self {
            id: None,
            name: name.into(),
            input,
        }
    }
}

/// Payload of [`EventBody::ActionOutcome`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    /// Identifier of the action this outcome answers.
    pub tool_use_id: String,
    /// Result content as reported by the child.
    pub content: serde_json::Value,
    /// `false` when the child flagged the outcome as an error.
    pub success: bool,
    /// Elapsed duration, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<Duration>,
}

/// Token usage counters reported with a [`TurnResult`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens consumed.
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens produced.
    #[serde(default)]
    pub output_tokens: u64,
    /// Input tokens served from cache.
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    /// Input tokens written to cache.
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

/// Payload of [`EventBody::TurnResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnResult {
    /// Result subtype (e.g. `success`, `error_max_turns`), when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Wall-clock duration of the turn.
    pub duration: Duration,
    /// Time spent in upstream API calls.
    pub api_duration: Duration,
    /// Turns the child counted for this send.
    pub num_turns: u32,
    /// Monetary cost in US dollars.
    pub total_cost_usd: f64,
    /// `true` when the turn ended in error.
    pub is_error: bool,
    /// Final text.
    pub result: String,
    /// Usage counters.
    pub usage: Usage,
}

impl TurnResult {
    /// `true` when the turn did not end in error.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.is_error
    }
}

/// Kind of control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// Permission check for an action the child will perform itself.
    Permission,
    /// Request the bridge owner to perform the action.
    Control,
}

/// Payload of [`EventBody::ControlRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlRequest {
    /// Correlation identifier; exactly one response is written per id.
    pub request_id: String,
    /// Request kind.
    pub kind: ControlKind,
    /// Named action, if the request carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Proposed input.
    pub tool_input: InputMap,
}

impl ControlRequest {
    /// The proposed action, when the request names one.
    #[must_use]
    pub fn tool_call(&self) -> Option<ToolCall> {
        self.tool_name.as_ref().map(|name| ToolCall {
            id: None,
            name: name.clone(),
            input: self.tool_input.clone(),
        })
    }
}

/// Payload of [`EventBody::Failure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Human-readable error message.
    pub message: String,
    /// Error code, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
