//! End-to-end runner scenarios driven by the scripted model client.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{harness, harness_configured, harness_with_model, kinds, run_turn_to_completion, SlowModel};
use loft_domain::policy::{PermissionMode, PermissionScope, ToolPolicy};
use loft_domain::scripted::ScriptTurn;
use loft_server::runtime::{dispatch, spawn_turn, TurnInput};
use loft_store::{SessionStatus, StepStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1 — streaming echo
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s1_streaming_echo() {
    let h = harness(vec![ScriptTurn::text(&["hi"])]);
    let session = h.state.store.create_session("t").unwrap();

    let events = run_turn_to_completion(&h.state, &session.id, "say hi").await;
    assert_eq!(kinds(&events), vec!["status", "message_delta", "final"]);

    assert_eq!(events[1].payload["delta"], "hi");
    assert_eq!(events[2].payload["text"], "hi");
    assert_eq!(events[2].payload["finish_reason"], "stop");

    // seq is dense from 1; ids strictly increase.
    for (i, e) in events.iter().enumerate() {
        assert_eq!(e.seq, i as i64 + 1);
        if i > 0 {
            assert!(e.id > events[i - 1].id);
        }
    }

    assert_eq!(
        h.state.store.get_session(&session.id).unwrap().status,
        SessionStatus::Idle
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2 — tool with ask → approve(once)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s2_ask_then_approve_once() {
    let h = harness(vec![
        ScriptTurn::tool_call("T1", "read_file", json!({"path": "README.md"})),
        ScriptTurn::text(&["the readme greets you"]),
    ]);
    std::fs::write(h.sandbox_dir.path().join("README.md"), "hello from readme\n").unwrap();

    let session = h.state.store.create_session("t").unwrap();
    h.state
        .store
        .set_tool_policy("read_file", ToolPolicy::Ask)
        .unwrap();

    // Human-in-the-loop: approve the request once it appears.
    let state = h.state.clone();
    let session_id = session.id.clone();
    let resolver = tokio::spawn(async move {
        loop {
            let pending = state
                .store
                .pending_permission_requests(&session_id)
                .unwrap();
            if let Some(req) = pending.first() {
                assert_eq!(req.tool_name, "read_file");
                state
                    .gate
                    .resolve(&req.id, true, PermissionScope::Once)
                    .unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let events = run_turn_to_completion(&h.state, &session.id, "read the readme").await;
    resolver.await.unwrap();

    assert_eq!(
        kinds(&events),
        vec!["status", "tool_call", "tool_call", "tool_result", "message_delta", "final"]
    );
    assert_eq!(events[1].payload["status"], "permission_required");
    assert!(events[1].payload["permission_request_id"].is_string());
    assert_eq!(events[2].payload["status"], "running");
    assert_eq!(events[3].payload["ok"], true);
    assert!(events[3].payload["output"]
        .as_str()
        .unwrap()
        .contains("hello from readme"));
    assert_eq!(events[5].payload["text"], "the readme greets you");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3 — write with diff + version, then rollback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s3_write_diff_version_rollback() {
    let h = harness(vec![
        ScriptTurn::tool_call("T1", "write_file", json!({"path": "a.txt", "content": "B\n"})),
        ScriptTurn::text(&["written"]),
    ]);
    std::fs::write(h.sandbox_dir.path().join("a.txt"), "A\n").unwrap();

    let session = h.state.store.create_session("t").unwrap();
    h.state
        .store
        .set_tool_policy("write_file", ToolPolicy::Allow)
        .unwrap();

    let events = run_turn_to_completion(&h.state, &session.id, "flip a.txt").await;

    // Pre-image version captured before the write.
    let versions = h.state.store.file_versions(&session.id, "a.txt").unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].idx, 1);
    let v1 = h.state.store.get_file_version(&versions[0].id).unwrap();
    assert_eq!(v1.content, b"A\n");

    // Diff event with the expected hunk, after tool_call(running).
    let diff_event = events.iter().find(|e| e.kind == "diff").unwrap();
    let diff = diff_event.payload["diff"].as_str().unwrap();
    assert!(diff.contains("-A"));
    assert!(diff.contains("+B"));

    // Change row persisted; file mutated; tool succeeded.
    assert_eq!(h.state.store.file_changes(&session.id).unwrap().len(), 1);
    assert_eq!(
        std::fs::read_to_string(h.sandbox_dir.path().join("a.txt")).unwrap(),
        "B\n"
    );
    let result = events.iter().find(|e| e.kind == "tool_result").unwrap();
    assert_eq!(result.payload["ok"], true);

    // ── Rollback restores "A\n" and snapshots "B\n" ───────────────
    dispatch::rollback(&h.state, &session.id, "a.txt", &versions[0].id)
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(h.sandbox_dir.path().join("a.txt")).unwrap(),
        "A\n"
    );
    let versions = h.state.store.file_versions(&session.id, "a.txt").unwrap();
    assert_eq!(versions.len(), 2);
    let v2 = h.state.store.get_file_version(&versions[1].id).unwrap();
    assert_eq!(v2.content, b"B\n");
    assert_eq!(h.state.store.file_changes(&session.id).unwrap().len(), 2);

    // The rollback's diff is administrative: no turn, no tool_call_id.
    let events = h.state.store.events_for_session(&session.id).unwrap();
    let admin_diff = events
        .iter()
        .filter(|e| e.kind == "diff")
        .last()
        .unwrap();
    assert!(admin_diff.turn_id.is_none());
    assert!(admin_diff.payload.get("tool_call_id").is_none());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5 — permission deny leaves no side effects
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s5_deny_has_no_side_effects() {
    let h = harness(vec![
        ScriptTurn::tool_call("T1", "write_file", json!({"path": "x.txt", "content": "nope"})),
        ScriptTurn::text(&["understood, not writing"]),
    ]);
    let session = h.state.store.create_session("t").unwrap();

    let state = h.state.clone();
    let session_id = session.id.clone();
    let resolver = tokio::spawn(async move {
        loop {
            let pending = state
                .store
                .pending_permission_requests(&session_id)
                .unwrap();
            if let Some(req) = pending.first() {
                state
                    .gate
                    .resolve(&req.id, false, PermissionScope::Once)
                    .unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let events = run_turn_to_completion(&h.state, &session.id, "write x.txt").await;
    resolver.await.unwrap();

    // No mutation happened anywhere.
    assert!(!h.sandbox_dir.path().join("x.txt").exists());
    assert!(h.state.store.file_versions(&session.id, "x.txt").unwrap().is_empty());
    assert!(h.state.store.file_changes(&session.id).unwrap().is_empty());
    assert!(events.iter().all(|e| e.kind != "diff"));

    // The denial is a tool_result, and the model was re-invoked to a final.
    let result = events.iter().find(|e| e.kind == "tool_result").unwrap();
    assert_eq!(result.payload["ok"], false);
    assert!(result.payload["error"].as_str().unwrap().contains("denied"));
    let final_event = events.iter().find(|e| e.kind == "final").unwrap();
    assert_eq!(final_event.payload["text"], "understood, not writing");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S6 — cancellation mid-stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s6_cancel_mid_stream() {
    let chunks: Vec<String> = (0..50).map(|n| format!("chunk {n} ")).collect();
    let chunk_refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
    let model = SlowModel::new(
        vec![ScriptTurn::text(&chunk_refs)],
        Duration::from_millis(20),
    );
    let h = harness_with_model(Arc::new(model));
    let session = h.state.store.create_session("t").unwrap();

    let turn = h.state.store.create_turn(&session.id, "talk a lot").unwrap();
    let cancel = h.state.cancel_map.try_register(&session.id).unwrap();
    let handle = spawn_turn(
        h.state.clone(),
        TurnInput {
            session_id: session.id.clone(),
            turn_id: turn.id.clone(),
            user_text: "talk a lot".into(),
        },
        cancel,
    );

    // Wait until streaming is observably under way, then cancel.
    loop {
        let events = h.state.store.events_for_session(&session.id).unwrap();
        if events.iter().any(|e| e.kind == "message_delta") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.state.cancel_map.cancel(&session.id));

    // Bounded teardown.
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("runner did not stop in time")
        .unwrap();

    let events = h.state.store.events_for_session(&session.id).unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.kind, "error");
    assert_eq!(last.payload["code"], "cancelled");
    assert!(events.iter().all(|e| e.kind != "final"));

    // Partial deltas remain valid; far fewer than the full script.
    let deltas = events.iter().filter(|e| e.kind == "message_delta").count();
    assert!(deltas >= 1 && deltas < 50);

    assert_eq!(
        h.state.store.get_session(&session.id).unwrap().status,
        SessionStatus::Idle
    );
    let steps = h.state.store.steps_for_turn(&turn.id).unwrap();
    assert_eq!(steps[0].status, StepStatus::Cancelled);
    assert!(!h.state.cancel_map.is_running(&session.id));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Unknown tool, sub-agents, step budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn unknown_tool_yields_error_result_and_continues() {
    let h = harness(vec![
        ScriptTurn::tool_call("T1", "exec", json!({"command": "rm -rf /"})),
        ScriptTurn::text(&["no shell here"]),
    ]);
    let session = h.state.store.create_session("t").unwrap();

    let events = run_turn_to_completion(&h.state, &session.id, "run something").await;

    let result = events.iter().find(|e| e.kind == "tool_result").unwrap();
    assert_eq!(result.payload["ok"], false);
    assert!(result.payload["error"]
        .as_str()
        .unwrap()
        .contains("unknown tool"));
    // No tool_call(running) was ever published for it.
    assert!(events.iter().all(|e| e.kind != "tool_call"));
    assert!(events.iter().any(|e| e.kind == "final"));
}

#[tokio::test]
async fn subagent_runs_nested_and_returns_result() {
    let h = harness(vec![
        // Parent requests the sub-agent...
        ScriptTurn::tool_call(
            "T1",
            "spawn_subagent",
            json!({"label": "Researcher", "task": "summarize the workspace"}),
        ),
        // ...the child answers...
        ScriptTurn::text(&["child answer"]),
        // ...and the parent wraps up.
        ScriptTurn::text(&["parent final"]),
    ]);
    let session = h.state.store.create_session("t").unwrap();
    h.state
        .store
        .set_permission_mode(PermissionMode::Allow)
        .unwrap();

    let events = run_turn_to_completion(&h.state, &session.id, "delegate it").await;

    let lifecycle: Vec<&str> = events
        .iter()
        .filter(|e| e.kind == "subagent")
        .map(|e| e.payload["status"].as_str().unwrap())
        .collect();
    assert_eq!(lifecycle, vec!["started", "done"]);

    let done = events
        .iter()
        .filter(|e| e.kind == "subagent")
        .last()
        .unwrap();
    assert_eq!(done.payload["result"], "child answer");
    assert_eq!(done.payload["label"], "Researcher");

    // Inner events arrive wrapped, tagged with the parent call.
    let blocks: Vec<&serde_json::Value> = events
        .iter()
        .filter(|e| e.kind == "subagent_block")
        .map(|e| &e.payload)
        .collect();
    assert!(!blocks.is_empty());
    assert!(blocks.iter().all(|b| b["parent_tool_call_id"] == "T1"));
    assert!(blocks.iter().any(|b| b["block"]["type"] == "message_delta"));
    assert!(blocks.iter().any(|b| b["block"]["type"] == "final"));

    // The child's text became the tool output; the parent still finishes.
    let result = events.iter().find(|e| e.kind == "tool_result").unwrap();
    assert_eq!(result.payload["ok"], true);
    assert_eq!(result.payload["output"], "child answer");
    let final_event = events.iter().find(|e| e.kind == "final").unwrap();
    assert_eq!(final_event.payload["text"], "parent final");
}

#[tokio::test]
async fn step_budget_stops_runaway_loops() {
    let h = harness_configured(
        Arc::new(loft_domain::scripted::ScriptedClient::new(vec![
            ScriptTurn::tool_call("T1", "list_files", json!({})),
            ScriptTurn::tool_call("T2", "list_files", json!({})),
            ScriptTurn::tool_call("T3", "list_files", json!({})),
        ])),
        |config| config.model.max_steps = 2,
    );
    let session = h.state.store.create_session("t").unwrap();

    let events = run_turn_to_completion(&h.state, &session.id, "loop forever").await;
    let last = events.last().unwrap();
    assert_eq!(last.kind, "error");
    assert_eq!(last.payload["code"], "runner");
    assert!(last.payload["message"]
        .as_str()
        .unwrap()
        .contains("loop limit"));
    assert!(events.iter().all(|e| e.kind != "final"));
}
