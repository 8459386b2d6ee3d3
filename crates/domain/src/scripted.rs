//! A deterministic [`ModelClient`] that replays pre-programmed turns.
//!
//! Used by the integration test suite and by `loftd --offline`, where the
//! server must come up without any provider credentials. Each call to
//! [`ModelClient::open`] pops the next scripted turn; once the script is
//! exhausted, every further call answers with a fixed fallback line.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::Result;
use crate::stream::{BoxStream, ModelClient, ModelEvent, ModelRequest, StopReason, Usage};

/// One scripted model response: the events the stream will yield, in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptTurn {
    pub events: Vec<ModelEvent>,
}

impl ScriptTurn {
    /// A plain text answer: one delta per chunk, then a `stop`.
    pub fn text(chunks: &[&str]) -> Self {
        let message_id = uuid::Uuid::new_v4().to_string();
        let mut events: Vec<ModelEvent> = chunks
            .iter()
            .map(|c| ModelEvent::TextDelta {
                message_id: message_id.clone(),
                text: (*c).to_string(),
            })
            .collect();
        events.push(ModelEvent::Stop {
            finish_reason: StopReason::Stop,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: chunks.len() as u32,
                total_tokens: 10 + chunks.len() as u32,
            }),
        });
        Self { events }
    }

    /// A turn that requests a single tool call, then stops with `tool_use`.
    pub fn tool_call(id: &str, name: &str, input: serde_json::Value) -> Self {
        Self {
            events: vec![
                ModelEvent::ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    input,
                },
                ModelEvent::Stop {
                    finish_reason: StopReason::ToolUse,
                    usage: None,
                },
            ],
        }
    }

    /// A turn that fails with a provider error.
    pub fn error(message: &str) -> Self {
        Self {
            events: vec![ModelEvent::Error {
                message: message.to_string(),
            }],
        }
    }
}

/// Replays scripted turns in order; thread-safe, clone-free interior state.
pub struct ScriptedClient {
    turns: Mutex<VecDeque<ScriptTurn>>,
}

impl ScriptedClient {
    pub fn new(turns: Vec<ScriptTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }

    /// A client with no script: every call answers with the fallback line.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    fn next_turn(&self) -> ScriptTurn {
        self.turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptTurn::text(&["(scripted model: no further turns)"]))
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedClient {
    async fn open(&self, _req: ModelRequest) -> Result<BoxStream<'static, ModelEvent>> {
        let turn = self.next_turn();
        Ok(Box::pin(futures_util::stream::iter(turn.events)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn replays_turns_in_order() {
        let client = ScriptedClient::new(vec![
            ScriptTurn::text(&["first"]),
            ScriptTurn::text(&["second"]),
        ]);

        let mut stream = client.open(ModelRequest::default()).await.unwrap();
        match stream.next().await.unwrap() {
            ModelEvent::TextDelta { text, .. } => assert_eq!(text, "first"),
            other => panic!("unexpected event: {other:?}"),
        }
        // Drain the rest of turn one.
        while stream.next().await.is_some() {}

        let mut stream = client.open(ModelRequest::default()).await.unwrap();
        match stream.next().await.unwrap() {
            ModelEvent::TextDelta { text, .. } => assert_eq!(text, "second"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_script_yields_fallback() {
        let client = ScriptedClient::empty();
        let mut stream = client.open(ModelRequest::default()).await.unwrap();
        match stream.next().await.unwrap() {
            ModelEvent::TextDelta { text, .. } => {
                assert!(text.contains("no further turns"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_call_turn_stops_with_tool_use() {
        let client = ScriptedClient::new(vec![ScriptTurn::tool_call(
            "tc_1",
            "read_file",
            serde_json::json!({"path": "README.md"}),
        )]);
        let mut stream = client.open(ModelRequest::default()).await.unwrap();
        assert!(matches!(
            stream.next().await.unwrap(),
            ModelEvent::ToolCall { .. }
        ));
        match stream.next().await.unwrap() {
            ModelEvent::Stop { finish_reason, .. } => {
                assert_eq!(finish_reason, StopReason::ToolUse);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
