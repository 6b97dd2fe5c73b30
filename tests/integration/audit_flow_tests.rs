//! A full session recorded by the JSONL audit writer.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use agent_bridge::audit::{AuditEventType, AuditRecord, JsonlAuditWriter};
use agent_bridge::policy::{FnPolicy, PolicyDecision, ToolPatternPolicy};
use agent_bridge::protocol::event::ToolCall;

use super::test_helpers::{builder, connect, init, permission, result, text};

fn records(dir: &Path) -> Vec<AuditRecord> {
    let writer = JsonlAuditWriter::new(dir.to_owned()).expect("writer");
    let path = writer.path_for_date(Utc::now().date_naive());
    fs::read_to_string(path)
        .expect("audit file")
        .lines()
        .map(|line| serde_json::from_str(line).expect("jsonl"))
        .collect()
}

#[tokio::test]
async fn session_lifecycle_is_audited() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = Arc::new(JsonlAuditWriter::new(temp.path().to_owned()).expect("writer"));
    let deny = ToolPatternPolicy::deny("Write", "read-only session").expect("glob");

    let (session, mut child) = connect(builder().policy(Arc::new(deny)).audit_sink(writer));
    let local_id = session.local_id().to_string();

    let script = tokio::spawn(async move {
        let _prompt = child.next_frame().await;
        child
            .emit_all(&[
                init("sess-audit"),
                permission("req-w", "Write", &json!({ "path": "out.txt" })),
            ])
            .await;
        let _answer = child.next_frame().await;
        child.emit_all(&[text("cannot write"), result(1, 0.02)]).await;
        child
    });

    session
        .send("write a file", &CancellationToken::new())
        .await
        .expect("turn");
    let _child = script.await.expect("script");
    session.close().await.expect("close");

    let records = records(temp.path());
    let kinds: Vec<_> = records.iter().map(|r| r.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            AuditEventType::SessionStart,
            AuditEventType::ControlDecision,
            AuditEventType::Event,
            AuditEventType::SessionEnd,
        ]
    );

    assert_eq!(records[0].session_id, local_id);
    assert_eq!(records[0].data["command"], "fake-agent");

    let decision = &records[1];
    assert_eq!(decision.session_id, "sess-audit");
    assert_eq!(decision.data["request_id"], "req-w");
    assert_eq!(decision.data["decision"], "deny");
    assert_eq!(decision.data["reason"], "read-only session");
    assert_eq!(decision.data["tool_name"], "Write");

    assert_eq!(records[2].data["kind"], "text");
    assert_eq!(records[3].session_id, "sess-audit");
    assert_eq!(records[3].data["turns"], 1);
}

#[tokio::test]
async fn policy_fault_is_audited_and_request_still_answered() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = Arc::new(JsonlAuditWriter::new(temp.path().to_owned()).expect("writer"));
    let faulty = FnPolicy::new("faulty", |_: &ToolCall| -> PolicyDecision {
        panic!("policy bug")
    });

    let (session, mut child) = connect(builder().policy(Arc::new(faulty)).audit_sink(writer));

    let script = tokio::spawn(async move {
        let _prompt = child.next_frame().await;
        child
            .emit(&permission("req-f", "Read", &json!({ "path": "a" })))
            .await;
        let answer = child.next_frame().await;
        child.emit(&result(1, 0.0)).await;
        answer
    });

    session
        .send("read", &CancellationToken::new())
        .await
        .expect("turn");
    let answer = script.await.expect("script");
    session.close().await.expect("close");

    assert_eq!(answer["decision"], "allow");

    let records = records(temp.path());
    let fault = records
        .iter()
        .find(|r| r.event_type == AuditEventType::PolicyFault)
        .expect("policy fault record");
    assert_eq!(fault.data["policy"], "faulty");
    assert_eq!(fault.data["request_id"], "req-f");
    assert!(fault.data["message"]
        .as_str()
        .is_some_and(|m| m.contains("policy bug")));
}
