//! Unit tests for `LineDecoder` and `FrameDecoder`.
//!
//! Covers frame routing by `type`, sequence/turn bookkeeping, session id
//! capture, and recovery after an undecodable line.

use std::time::Duration;

use agent_bridge::protocol::decoder::{FrameDecoder, LineDecoder};
use agent_bridge::protocol::event::{ControlKind, EventBody};
use agent_bridge::protocol::value::InputValue;
use agent_bridge::AppError;

const INIT: &str = r#"{"type":"system","subtype":"init","session_id":"sess-abc123","transcript_path":"/tmp/t.jsonl","tools":["Bash","Read"],"mcp_servers":[{"name":"fs","status":"connected"}]}"#;
const TEXT: &str = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"hello"}]}}"#;
const RESULT: &str = r#"{"type":"result","subtype":"success","duration_ms":1200,"duration_api_ms":800,"num_turns":3,"total_cost_usd":0.0042,"is_error":false,"result":"Task completed successfully","usage":{"input_tokens":10,"output_tokens":20}}"#;

// ── Sequence bookkeeping ──────────────────────────────────────────────────────

#[test]
fn sequence_starts_at_one_and_increments_by_one() {
    let mut decoder = LineDecoder::new();
    let first = decoder.decode_line(TEXT).unwrap().unwrap();
    let second = decoder.decode_line(TEXT).unwrap().unwrap();
    let third = decoder.decode_line(TEXT).unwrap().unwrap();

    assert_eq!(first.meta.sequence, 1);
    assert_eq!(second.meta.sequence, 2);
    assert_eq!(third.meta.sequence, 3);
}

#[test]
fn blank_lines_are_skipped_without_consuming_sequence() {
    let mut decoder = LineDecoder::new();
    assert!(decoder.decode_line("").unwrap().is_none());
    assert!(decoder.decode_line("   \t").unwrap().is_none());
    assert_eq!(decoder.last_sequence(), 0);

    let event = decoder.decode_line(TEXT).unwrap().unwrap();
    assert_eq!(event.meta.sequence, 1);
}

#[test]
fn malformed_line_errors_and_next_line_decodes_normally() {
    let mut decoder = LineDecoder::new();
    decoder.decode_line(TEXT).unwrap();

    let err = decoder.decode_line("{not json").unwrap_err();
    assert!(matches!(err, AppError::Decode(ref msg) if msg.starts_with("malformed json")));
    assert_eq!(decoder.last_sequence(), 1);

    let next = decoder.decode_line(TEXT).unwrap().unwrap();
    assert_eq!(next.meta.sequence, 2);
}

#[test]
fn structurally_invalid_result_does_not_consume_sequence() {
    let mut decoder = LineDecoder::new();
    let err = decoder
        .decode_line(r#"{"type":"result","num_turns":"three"}"#)
        .unwrap_err();
    assert!(matches!(err, AppError::Decode(_)));
    assert_eq!(decoder.last_sequence(), 0);
    assert_eq!(decoder.turn(), 1);
}

// ── Routing ───────────────────────────────────────────────────────────────────

#[test]
fn unknown_type_becomes_raw_text() {
    let mut decoder = LineDecoder::new();
    let line = r#"{"type":"telemetry","value":1}"#;
    let event = decoder.decode_line(line).unwrap().unwrap();

    match event.body {
        EventBody::Text(text) => {
            assert!(text.raw);
            assert_eq!(text.text, line);
        }
        other => panic!("expected raw text, got {other:?}"),
    }
}

#[test]
fn system_with_unknown_subtype_becomes_raw_text() {
    let mut decoder = LineDecoder::new();
    let event = decoder
        .decode_line(r#"{"type":"system","subtype":"compact_boundary"}"#)
        .unwrap()
        .unwrap();
    assert!(matches!(event.body, EventBody::Text(ref t) if t.raw));
    assert_eq!(decoder.session_id(), "");
}

#[test]
fn session_init_is_decoded_and_id_stamped_on_later_events() {
    let mut decoder = LineDecoder::new();
    let init = decoder.decode_line(INIT).unwrap().unwrap();

    match &init.body {
        EventBody::SessionInit(info) => {
            assert_eq!(info.session_id, "sess-abc123");
            assert_eq!(info.transcript_path.as_deref(), Some("/tmp/t.jsonl"));
            assert_eq!(info.tools, vec!["Bash".to_owned(), "Read".to_owned()]);
            assert_eq!(info.mcp_servers.len(), 1);
            assert_eq!(info.mcp_servers[0].status, "connected");
        }
        other => panic!("expected session init, got {other:?}"),
    }
    assert_eq!(init.meta.session_id, "sess-abc123");

    let text = decoder.decode_line(TEXT).unwrap().unwrap();
    assert_eq!(text.meta.session_id, "sess-abc123");
}

#[test]
fn session_id_never_changes_once_captured() {
    let mut decoder = LineDecoder::new();
    decoder.decode_line(INIT).unwrap();
    decoder
        .decode_line(r#"{"type":"system","subtype":"init","session_id":"other"}"#)
        .unwrap();

    assert_eq!(decoder.session_id(), "sess-abc123");
    let text = decoder.decode_line(TEXT).unwrap().unwrap();
    assert_eq!(text.meta.session_id, "sess-abc123");
}

#[test]
fn events_before_init_carry_empty_session_id() {
    let mut decoder = LineDecoder::new();
    let text = decoder.decode_line(TEXT).unwrap().unwrap();
    assert_eq!(text.meta.session_id, "");
}

#[test]
fn assistant_text_block() {
    let mut decoder = LineDecoder::new();
    let event = decoder.decode_line(TEXT).unwrap().unwrap();
    match event.body {
        EventBody::Text(text) => {
            assert_eq!(text.text, "hello");
            assert!(!text.raw);
        }
        other => panic!("expected text, got {other:?}"),
    }
}

#[test]
fn assistant_thinking_block() {
    let mut decoder = LineDecoder::new();
    let event = decoder
        .decode_line(r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"consider","signature":"sig=="}]}}"#)
        .unwrap()
        .unwrap();
    match event.body {
        EventBody::Reasoning(reasoning) => {
            assert_eq!(reasoning.thinking, "consider");
            assert_eq!(reasoning.signature, "sig==");
        }
        other => panic!("expected reasoning, got {other:?}"),
    }
}

#[test]
fn assistant_tool_use_block() {
    let mut decoder = LineDecoder::new();
    let event = decoder
        .decode_line(r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"tu_1","name":"Bash","input":{"command":"ls","timeout":30}}]}}"#)
        .unwrap()
        .unwrap();
    match event.body {
        EventBody::ActionRequest(call) => {
            assert_eq!(call.id.as_deref(), Some("tu_1"));
            assert_eq!(call.name, "Bash");
            assert_eq!(call.input.get("command").and_then(InputValue::as_str), Some("ls"));
            assert_eq!(call.input.get("timeout").and_then(InputValue::as_i64), Some(30));
        }
        other => panic!("expected action request, got {other:?}"),
    }
}

#[test]
fn tool_use_with_non_object_input_is_a_decode_error() {
    let mut decoder = LineDecoder::new();
    let err = decoder
        .decode_line(r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash","input":[1,2]}]}}"#)
        .unwrap_err();
    assert!(matches!(err, AppError::Decode(ref msg) if msg.contains("must be an object")));
}

#[test]
fn only_first_content_block_is_surfaced() {
    let mut decoder = LineDecoder::new();
    let event = decoder
        .decode_line(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"first"},{"type":"tool_use","name":"Bash","input":{}}]}}"#)
        .unwrap()
        .unwrap();
    assert!(matches!(event.body, EventBody::Text(ref t) if t.text == "first"));
}

#[test]
fn empty_content_degrades_to_raw_text() {
    let mut decoder = LineDecoder::new();
    let event = decoder
        .decode_line(r#"{"type":"assistant","message":{"content":[]}}"#)
        .unwrap()
        .unwrap();
    assert!(matches!(event.body, EventBody::Text(ref t) if t.raw));
}

#[test]
fn unknown_block_type_degrades_to_raw_text() {
    let mut decoder = LineDecoder::new();
    let event = decoder
        .decode_line(r#"{"type":"assistant","message":{"content":[{"type":"image","source":{}}]}}"#)
        .unwrap()
        .unwrap();
    assert!(matches!(event.body, EventBody::Text(ref t) if t.raw));
}

#[test]
fn user_tool_result_becomes_action_outcome() {
    let mut decoder = LineDecoder::new();
    let event = decoder
        .decode_line(r#"{"type":"user","duration_ms":250,"message":{"content":[{"type":"tool_result","tool_use_id":"tu_1","content":"ok","is_error":true}]}}"#)
        .unwrap()
        .unwrap();
    match event.body {
        EventBody::ActionOutcome(outcome) => {
            assert_eq!(outcome.tool_use_id, "tu_1");
            assert_eq!(outcome.content, serde_json::json!("ok"));
            assert!(!outcome.success);
            assert_eq!(outcome.elapsed, Some(Duration::from_millis(250)));
        }
        other => panic!("expected action outcome, got {other:?}"),
    }
}

#[test]
fn result_frame_decodes_and_advances_turn() {
    let mut decoder = LineDecoder::new();
    decoder.decode_line(INIT).unwrap();
    assert_eq!(decoder.turn(), 1);

    let event = decoder.decode_line(RESULT).unwrap().unwrap();
    assert_eq!(event.meta.turn, 1);
    assert_eq!(decoder.turn(), 2);

    match event.body {
        EventBody::TurnResult(result) => {
            assert_eq!(result.subtype.as_deref(), Some("success"));
            assert_eq!(result.duration, Duration::from_millis(1200));
            assert_eq!(result.api_duration, Duration::from_millis(800));
            assert_eq!(result.num_turns, 3);
            assert!((result.total_cost_usd - 0.0042).abs() < f64::EPSILON);
            assert!(result.success());
            assert_eq!(result.result, "Task completed successfully");
            assert_eq!(result.usage.input_tokens, 10);
            assert_eq!(result.usage.output_tokens, 20);
            assert_eq!(result.usage.cache_read_input_tokens, 0);
        }
        other => panic!("expected turn result, got {other:?}"),
    }

    let next = decoder.decode_line(TEXT).unwrap().unwrap();
    assert_eq!(next.meta.turn, 2);
}

#[test]
fn permission_and_control_requests() {
    let mut decoder = LineDecoder::new();
    let permission = decoder
        .decode_line(r#"{"type":"permission","request_id":"req-1","tool_name":"Bash","tool_input":{"command":"ls"}}"#)
        .unwrap()
        .unwrap();
    match permission.body {
        EventBody::ControlRequest(request) => {
            assert_eq!(request.request_id, "req-1");
            assert_eq!(request.kind, ControlKind::Permission);
            assert_eq!(request.tool_name.as_deref(), Some("Bash"));
            assert_eq!(request.tool_input.len(), 1);
        }
        other => panic!("expected control request, got {other:?}"),
    }

    let control = decoder
        .decode_line(r#"{"type":"control","request_id":"req-2","tool_name":""}"#)
        .unwrap()
        .unwrap();
    match control.body {
        EventBody::ControlRequest(request) => {
            assert_eq!(request.kind, ControlKind::Control);
            assert!(request.tool_name.is_none());
            assert!(request.tool_call().is_none());
            assert!(request.tool_input.is_empty());
        }
        other => panic!("expected control request, got {other:?}"),
    }
}

#[test]
fn error_frames_become_failures() {
    let mut decoder = LineDecoder::new();
    let nested = decoder
        .decode_line(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
        .unwrap()
        .unwrap();
    match nested.body {
        EventBody::Failure(failure) => {
            assert_eq!(failure.message, "Overloaded");
            assert_eq!(failure.code.as_deref(), Some("overloaded_error"));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let flat = decoder
        .decode_line(r#"{"type":"error","message":"boom"}"#)
        .unwrap()
        .unwrap();
    assert!(matches!(flat.body, EventBody::Failure(ref f) if f.message == "boom"));
}

#[test]
fn parent_and_sub_session_ids_populate_meta() {
    let mut decoder = LineDecoder::new();
    let event = decoder
        .decode_line(r#"{"type":"assistant","parent_tool_use_id":"tu_9","subagent_session_id":"sub-1","message":{"content":[{"type":"text","text":"nested"}]}}"#)
        .unwrap()
        .unwrap();
    assert_eq!(event.meta.parent_id.as_deref(), Some("tu_9"));
    assert_eq!(event.meta.sub_session_id.as_deref(), Some("sub-1"));
}

// ── FrameDecoder ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn frame_decoder_reads_stream_until_eof() {
    let input = format!("{INIT}\n\n{TEXT}\n{RESULT}\n");
    let mut decoder = FrameDecoder::new(input.as_bytes());

    let first = decoder.next().await.unwrap().unwrap();
    assert!(matches!(first.body, EventBody::SessionInit(_)));
    let second = decoder.next().await.unwrap().unwrap();
    assert_eq!(second.meta.sequence, 2);
    let third = decoder.next().await.unwrap().unwrap();
    assert!(matches!(third.body, EventBody::TurnResult(_)));
    assert!(decoder.next().await.unwrap().is_none());

    assert_eq!(decoder.state().session_id(), "sess-abc123");
    assert_eq!(decoder.state().last_sequence(), 3);
}

#[tokio::test]
async fn frame_decoder_recovers_after_malformed_line() {
    let input = format!("{TEXT}\n{{broken\n{TEXT}\n");
    let mut decoder = FrameDecoder::new(input.as_bytes());

    assert!(decoder.next().await.unwrap().is_some());
    assert!(matches!(decoder.next().await, Err(AppError::Decode(_))));
    let after = decoder.next().await.unwrap().unwrap();
    assert_eq!(after.meta.sequence, 2);
}
