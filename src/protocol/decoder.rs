//! Incremental frame decoding with session, turn and sequence bookkeeping.
//!
//! [`LineDecoder`] turns one NDJSON line into one [`Event`] and owns the
//! per-session counters. [`FrameDecoder`] drives it from an async byte
//! source through [`FrameCodec`].
//!
//! # Recognized frames
//!
//! | `type`                  | Maps to                                   |
//! |-------------------------|-------------------------------------------|
//! | `system` / `init`       | [`EventBody::SessionInit`]                |
//! | `assistant`             | first content block: `text`, `thinking`, `tool_use` |
//! | `user` + `tool_result`  | [`EventBody::ActionOutcome`]              |
//! | `result`                | [`EventBody::TurnResult`]                 |
//! | `permission`, `control` | [`EventBody::ControlRequest`]             |
//! | `error`                 | [`EventBody::Failure`]                    |
//! | *(any other)*           | [`EventBody::Text`] with the raw line     |

use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::protocol::codec::FrameCodec;
use crate::protocol::event::{
    ActionOutcome, ControlKind, ControlRequest, Event, EventBody, Failure, McpServerStatus,
    MessageMeta, Reasoning, SessionInit, TextContent, ToolCall, TurnResult, Usage,
};
use crate::protocol::value::input_map_from_json;
use crate::{AppError, Result};

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct InitWire {
    session_id: String,
    #[serde(default)]
    transcript_path: Option<String>,
    #[serde(default)]
    tools: Vec<Value>,
    #[serde(default)]
    mcp_servers: Vec<McpServerStatus>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultWire {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    duration_api_ms: u64,
    #[serde(default)]
    num_turns: u32,
    #[serde(default)]
    total_cost_usd: f64,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ControlWire {
    request_id: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Value,
}

#[derive(Debug, Deserialize)]
struct ToolUseWire {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Deserialize)]
struct ToolResultWire {
    tool_use_id: String,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    is_error: bool,
}

// ── LineDecoder ───────────────────────────────────────────────────────────────

/// Stateful line-to-event decoder.
///
/// Sequence numbers start at 1 and are consumed only by lines that decode
/// successfully. The turn counter starts at 1 and advances after each
/// [`EventBody::TurnResult`]. The session id is captured from the first
/// non-empty `system/init` frame and never changes afterwards.
#[derive(Debug)]
pub struct LineDecoder {
    session_id: String,
    turn: u32,
    sequence: u64,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    /// Create a decoder with fresh counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: String::new(),
            turn: 1,
            sequence: 0,
        }
    }

    /// Session id captured so far; empty until a session-init frame arrives.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Turn the next event will belong to.
    #[must_use]
    pub fn turn(&self) -> u32 {
        self.turn
    }

    /// Sequence number of the last decoded event (0 before any).
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.sequence
    }

    /// Decode one line.
    ///
    /// - `Ok(None)`: blank or whitespace-only line (no sequence consumed).
    /// - `Ok(Some(event))`: decoded event.
    /// - `Err(AppError::Decode(..))`: malformed JSON or a recognized frame
    ///   with missing or mistyped required fields. Counters are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`] as described above.
    pub fn decode_line(&mut self, line: &str) -> Result<Option<Event>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| AppError::Decode(format!("malformed json: {e}")))?;

        let body = decode_body(trimmed, &value)?;

        if let EventBody::SessionInit(ref init) = body {
            self.capture_session_id(&init.session_id);
        }

        self.sequence += 1;
        let meta = MessageMeta {
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            turn: self.turn,
            sequence: self.sequence,
            parent_id: string_field(&value, "parent_tool_use_id"),
            sub_session_id: string_field(&value, "subagent_session_id"),
        };

        if matches!(body, EventBody::TurnResult(_)) {
            self.turn = self.turn.saturating_add(1);
        }

        Ok(Some(Event { meta, body }))
    }

    fn capture_session_id(&mut self, reported: &str) {
        if reported.is_empty() || reported == self.session_id {
            return;
        }
        if self.session_id.is_empty() {
            debug!(session_id = reported, "decoder: session id captured");
            self.session_id = reported.to_owned();
        } else {
            warn!(
                session_id = %self.session_id,
                reported,
                "decoder: ignoring session id change"
            );
        }
    }
}

// ── FrameDecoder ──────────────────────────────────────────────────────────────

/// Async decoder reading NDJSON frames from a byte source.
pub struct FrameDecoder<R> {
    frames: FramedRead<R, FrameCodec>,
    lines: LineDecoder,
}

impl<R> FrameDecoder<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap `reader` with the default [`FrameCodec`].
    pub fn new(reader: R) -> Self {
        Self::with_codec(reader, FrameCodec::new())
    }

    /// Wrap `reader` with a caller-supplied codec.
    pub fn with_codec(reader: R, codec: FrameCodec) -> Self {
        Self {
            frames: FramedRead::new(reader, codec),
            lines: LineDecoder::new(),
        }
    }

    /// Borrow the line-level state (session id, counters).
    #[must_use]
    pub fn state(&self) -> &LineDecoder {
        &self.lines
    }

    /// Read until the next event.
    ///
    /// Returns `Ok(None)` at end of stream. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// - [`AppError::Decode`] for an undecodable line. The decoder stays
    ///   usable; the following line decodes normally.
    /// - [`AppError::Decode`] for an oversized line. Framing ends there and
    ///   the next call reports end of stream.
    /// - [`AppError::Io`] when the underlying reader fails.
    pub async fn next(&mut self) -> Result<Option<Event>> {
        loop {
            match self.frames.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(e),
                Some(Ok(line)) => {
                    if let Some(event) = self.lines.decode_line(&line)? {
                        return Ok(Some(event));
                    }
                }
            }
        }
    }
}

impl<R> std::fmt::Debug for FrameDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("lines", &self.lines)
            .finish_non_exhaustive()
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn decode_body(raw: &str, value: &Value) -> Result<EventBody> {
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Ok(raw_text(raw));
    };

    match kind {
        "system" => decode_system(raw, value),
        "assistant" => decode_assistant(raw, value),
        "user" => decode_user(raw, value),
        "result" => decode_result(value),
        "permission" => decode_control(value, ControlKind::Permission),
        "control" => decode_control(value, ControlKind::Control),
        "error" => Ok(decode_failure(value)),
        other => {
            debug!(frame_type = other, "decoder: unrecognized frame surfaced as text");
            Ok(raw_text(raw))
        }
    }
}

fn decode_system(raw: &str, value: &Value) -> Result<EventBody> {
    if value.get("subtype").and_then(Value::as_str) != Some("init") {
        return Ok(raw_text(raw));
    }

    let wire: InitWire = serde_json::from_value(value.clone())
        .map_err(|e| AppError::Decode(format!("invalid system/init frame: {e}")))?;

    let tools = wire
        .tools
        .into_iter()
        .filter_map(|tool| match tool {
            Value::String(name) => Some(name),
            Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_owned),
            _ => None,
        })
        .collect();

    Ok(EventBody::SessionInit(SessionInit {
        session_id: wire.session_id,
        transcript_path: wire.transcript_path,
        tools,
        mcp_servers: wire.mcp_servers,
        model: wire.model,
    }))
}

fn decode_assistant(raw: &str, value: &Value) -> Result<EventBody> {
    let Some(block) = first_content_block(value) else {
        return Ok(raw_text(raw));
    };

    match block.get("type").and_then(Value::as_str) {
        Some("text") => Ok(EventBody::Text(TextContent {
            text: string_field(block, "text").unwrap_or_default(),
            raw: false,
        })),
        Some("thinking") => Ok(EventBody::Reasoning(Reasoning {
            thinking: string_field(block, "thinking").unwrap_or_default(),
            signature: string_field(block, "signature").unwrap_or_default(),
        })),
        Some("tool_use") => {
            let wire: ToolUseWire = serde_json::from_value(block.clone())
                .map_err(|e| AppError::Decode(format!("invalid tool_use block: {e}")))?;
            Ok(EventBody::ActionRequest(ToolCall {
                id: wire.id,
                name: wire.name,
                input: input_map_from_json(wire.input)?,
            }))
        }
        _ => Ok(raw_text(raw)),
    }
}

fn decode_user(raw: &str, value: &Value) -> Result<EventBody> {
    let Some(block) = first_content_block(value) else {
        return Ok(raw_text(raw));
    };
    if block.get("type").and_then(Value::as_str) != Some("tool_result") {
        return Ok(raw_text(raw));
    }

    let wire: ToolResultWire = serde_json::from_value(block.clone())
        .map_err(|e| AppError::Decode(format!("invalid tool_result block: {e}")))?;

    Ok(EventBody::ActionOutcome(ActionOutcome {
        tool_use_id: wire.tool_use_id,
        content: wire.content,
        success: !wire.is_error,
        elapsed: value
            .get("duration_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis),
    }))
}

fn decode_result(value: &Value) -> Result<EventBody> {
    let wire: ResultWire = serde_json::from_value(value.clone())
        .map_err(|e| AppError::Decode(format!("invalid result frame: {e}")))?;

    Ok(EventBody::TurnResult(TurnResult {
        subtype: wire.subtype,
        duration: Duration::from_millis(wire.duration_ms),
        api_duration: Duration::from_millis(wire.duration_api_ms),
        num_turns: wire.num_turns,
        total_cost_usd: wire.total_cost_usd,
        is_error: wire.is_error,
        result: wire.result.unwrap_or_default(),
        usage: wire.usage,
    }))
}

fn decode_control(value: &Value, kind: ControlKind) -> Result<EventBody> {
    let wire: ControlWire = serde_json::from_value(value.clone())
        .map_err(|e| AppError::Decode(format!("invalid control request: {e}")))?;

    Ok(EventBody::ControlRequest(ControlRequest {
        request_id: wire.request_id,
        kind,
        tool_name: wire.tool_name.filter(|name| !name.is_empty()),
        tool_input: input_map_from_json(wire.tool_input)?,
    }))
}

fn decode_failure(value: &Value) -> EventBody {
    let nested = value.get("error");
    let message = nested
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| nested.and_then(Value::as_str))
        .or_else(|| value.get("message").and_then(Value::as_str))
        .unwrap_or("unknown error")
        .to_owned();
    let code = nested
        .and_then(|e| e.get("code").or_else(|| e.get("type")))
        .and_then(Value::as_str)
        .map(str::to_owned);

    EventBody::Failure(Failure { message, code })
}

/// First element of `message.content`; later blocks are not surfaced.
fn first_content_block(value: &Value) -> Option<&Value> {
    value
        .get("message")?
        .get("content")?
        .as_array()?
        .first()
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn raw_text(raw: &str) -> EventBody {
    EventBody::Text(TextContent {
        text: raw.to_owned(),
        raw: true,
    })
}
