//! The event wire protocol: everything the server publishes to UIs and
//! persists in the event log.
//!
//! An [`EventEnvelope`] carries the stamped identifiers plus the event kind
//! and its payload as raw JSON; [`EventPayload`] is the typed view used to
//! construct events. Keeping the envelope untyped means unknown kinds
//! survive storage, replay, and SSE unchanged — decoders downgrade them to
//! opaque payloads instead of rejecting them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::Usage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One published event, exactly as it appears on SSE and in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Global monotonic id, process-wide.
    pub id: i64,
    /// Per-session monotonic sequence, dense from 1.
    pub seq: i64,
    /// Seconds since the epoch, with millisecond precision.
    pub ts: f64,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl EventEnvelope {
    /// Typed view of the payload. `None` for kinds this build doesn't know;
    /// the raw `kind`/`payload` stay available either way.
    pub fn decode(&self) -> Option<EventPayload> {
        EventPayload::from_parts(&self.kind, self.payload.clone())
    }
}

/// Current timestamp in the envelope's `ts` representation.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Typed payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingStatus {
    Start,
    Delta,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    PermissionRequired,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentStatus {
    Started,
    Done,
    Error,
}

/// Every event kind the server itself publishes.
///
/// Wire form is adjacently tagged to match the envelope:
/// `{"type": "<kind>", "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    /// Turn lifecycle marker (`state = "started"` on the first step).
    Status { state: String },

    /// Incremental assistant text.
    MessageDelta {
        role: String,
        message_id: String,
        delta: String,
    },

    /// Reasoning segment progress.
    Thinking {
        status: ThinkingStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },

    /// A tool invocation changing state.
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: Value,
        status: ToolCallStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permission_request_id: Option<String>,
    },

    /// Outcome of an executed tool call.
    ToolResult {
        tool_call_id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },

    /// Streamed output from a tool that produces terminal-style text.
    /// No built-in tool emits this; the kind is part of the protocol for
    /// forward compatibility.
    TerminalChunk {
        tool_call_id: String,
        stream: TerminalStream,
        text: String,
    },

    /// Unified diff produced by a file mutation. `tool_call_id` is absent
    /// for administrative mutations (REST rollback).
    Diff {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        path: String,
        diff: String,
    },

    /// Sub-agent lifecycle.
    Subagent {
        parent_tool_call_id: String,
        subagent_id: String,
        status: SubagentStatus,
        label: String,
        task: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// One inner event of a sub-agent, wrapped for nested rendering.
    SubagentBlock {
        parent_tool_call_id: String,
        subagent_id: String,
        block: Value,
    },

    /// The assistant's completed answer for the turn.
    Final {
        role: String,
        message_id: String,
        text: String,
        finish_reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// Turn-level failure (`code` ∈ cancelled/model/runner/...).
    Error { code: String, message: String },
}

impl EventPayload {
    /// The wire `type` string for this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Status { .. } => "status",
            EventPayload::MessageDelta { .. } => "message_delta",
            EventPayload::Thinking { .. } => "thinking",
            EventPayload::ToolCall { .. } => "tool_call",
            EventPayload::ToolResult { .. } => "tool_result",
            EventPayload::TerminalChunk { .. } => "terminal_chunk",
            EventPayload::Diff { .. } => "diff",
            EventPayload::Subagent { .. } => "subagent",
            EventPayload::SubagentBlock { .. } => "subagent_block",
            EventPayload::Final { .. } => "final",
            EventPayload::Error { .. } => "error",
        }
    }

    /// Split into the `(type, payload)` pair the envelope carries.
    pub fn into_parts(self) -> (String, Value) {
        let kind = self.kind().to_string();
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        let payload = match value {
            Value::Object(mut map) => map.remove("payload").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        (kind, payload)
    }

    /// Rebuild a typed payload from stored parts. `None` for unknown kinds
    /// or payloads that don't match the known shape.
    pub fn from_parts(kind: &str, payload: Value) -> Option<Self> {
        serde_json::from_value(serde_json::json!({
            "type": kind,
            "payload": payload,
        }))
        .ok()
    }

    /// The `{type, payload}` object used inside `subagent_block` events.
    pub fn to_block(&self) -> Value {
        let (kind, payload) = self.clone().into_parts();
        serde_json::json!({ "type": kind, "payload": payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_parts_produces_flat_payload() {
        let (kind, payload) = EventPayload::MessageDelta {
            role: "assistant".into(),
            message_id: "m1".into(),
            delta: "hi".into(),
        }
        .into_parts();
        assert_eq!(kind, "message_delta");
        assert_eq!(payload["delta"], "hi");
        assert_eq!(payload["message_id"], "m1");
    }

    #[test]
    fn parts_round_trip() {
        let original = EventPayload::ToolCall {
            tool_call_id: "tc_1".into(),
            tool_name: "read_file".into(),
            input: serde_json::json!({"path": "a.txt"}),
            status: ToolCallStatus::Running,
            permission_request_id: None,
        };
        let (kind, payload) = original.into_parts();
        let decoded = EventPayload::from_parts(&kind, payload).unwrap();
        match decoded {
            EventPayload::ToolCall {
                tool_call_id,
                status,
                ..
            } => {
                assert_eq!(tool_call_id, "tc_1");
                assert_eq!(status, ToolCallStatus::Running);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_opaque_not_an_error() {
        let payload = serde_json::json!({"anything": true});
        assert!(EventPayload::from_parts("future_kind", payload.clone()).is_none());

        // The envelope still carries it verbatim.
        let env = EventEnvelope {
            id: 7,
            seq: 3,
            ts: 1000.5,
            session_id: "s1".into(),
            turn_id: None,
            step_id: None,
            kind: "future_kind".into(),
            payload,
        };
        let json = serde_json::to_string(&env).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, "future_kind");
        assert_eq!(back.payload["anything"], true);
        assert!(back.decode().is_none());
    }

    #[test]
    fn envelope_serializes_type_field() {
        let (kind, payload) = EventPayload::Status {
            state: "started".into(),
        }
        .into_parts();
        let env = EventEnvelope {
            id: 1,
            seq: 1,
            ts: now_ts(),
            session_id: "s1".into(),
            turn_id: Some("t1".into()),
            step_id: Some("st1".into()),
            kind,
            payload,
        };
        let v: Value = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "status");
        assert_eq!(v["payload"]["state"], "started");
        assert_eq!(v["turn_id"], "t1");
    }

    #[test]
    fn optional_fields_are_omitted() {
        let (_, payload) = EventPayload::Thinking {
            status: ThinkingStatus::Delta,
            text: Some("hmm".into()),
            duration_ms: None,
        }
        .into_parts();
        assert!(payload.get("duration_ms").is_none());
        assert_eq!(payload["status"], "delta");
    }

    #[test]
    fn block_shape_matches_envelope_tail() {
        let block = EventPayload::Error {
            code: "model".into(),
            message: "boom".into(),
        }
        .to_block();
        assert_eq!(block["type"], "error");
        assert_eq!(block["payload"]["code"], "model");
    }
}
