//! Outbound frames written to the child's input.

use serde::Serialize;
use serde_json::Value;

use crate::protocol::value::InputMap;

/// Decision carried by an outbound control response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseDecision {
    /// Let the action proceed.
    Allow,
    /// Refuse the action.
    Deny,
}

/// Prompt frame:
/// `{"type":"user","message":{"role":"user","content":[{"type":"text","text":…}]}}`.
#[derive(Debug, Clone, Serialize)]
pub struct PromptFrame {
    #[serde(rename = "type")]
    frame_type: &'static str,
    message: PromptMessage,
}

#[derive(Debug, Clone, Serialize)]
struct PromptMessage {
    role: &'static str,
    content: Vec<PromptContent>,
}

#[derive(Debug, Clone, Serialize)]
struct PromptContent {
    #[serde(rename = "type")]
    content_type: &'static str,
    text: String,
}

impl PromptFrame {
    /// Build a user prompt frame.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            frame_type: "user",
            message: PromptMessage {
                role: "user",
                content: vec![PromptContent {
                    content_type: "text",
                    text: text.into(),
                }],
            },
        }
    }
}

/// Control response:
/// `{"request_id":…,"decision":"allow"|"deny","reason":…,"updated_input":{…}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlResponse {
    /// Request being answered.
    pub request_id: String,
    /// Allow or deny.
    pub decision: ResponseDecision,
    /// Human-readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Replacement input for the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<InputMap>,
}

impl ControlResponse {
    /// Plain allow with no reason or rewrite.
    #[must_use]
    pub fn allow(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            decision: ResponseDecision::Allow,
            reason: None,
            updated_input: None,
        }
    }

    /// Denial with an optional reason.
    #[must_use]
    pub fn deny(request_id: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            request_id: request_id.into(),
            decision: ResponseDecision::Deny,
            reason,
            updated_input: None,
        }
    }
}

/// Capability result:
/// `{"request_id":…,"decision":"allow","result":…,"is_error":…}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityResultFrame {
    /// Request being answered.
    pub request_id: String,
    /// Always [`ResponseDecision::Allow`]; a denied capability never runs.
    pub decision: ResponseDecision,
    /// Success payload, or the failure message when `is_error` is set.
    pub result: Value,
    /// `true` when the capability failed.
    pub is_error: bool,
}

impl CapabilityResultFrame {
    /// Successful execution.
    #[must_use]
    pub fn success(request_id: impl Into<String>, result: Value) -> Self {
        Self {
            request_id: request_id.into(),
            decision: ResponseDecision::Allow,
            result,
            is_error: false,
        }
    }

    /// Failed execution.
    #[must_use]
    pub fn failure(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            decision: ResponseDecision::Allow,
            result: Value::String(message.into()),
            is_error: true,
        }
    }
}
