//! The sub-agent facility — a nested runner loop with an isolated message
//! history and a restricted tools view.
//!
//! Lifecycle events (`subagent`) publish at the parent level; every inner
//! event of the child is wrapped as a `subagent_block` so the UI can render
//! a nested timeline. Events carry the parent's turn/step ids — the child
//! keeps its own loop count but no Step rows of its own. Depth is capped at
//! one: a child never sees `spawn_subagent` and the handler refuses nested
//! spawns outright.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;

use loft_domain::error::{Error, Result};
use loft_domain::event::{EventPayload, SubagentStatus, ThinkingStatus};
use loft_domain::message::{Message, ToolCall, ToolDefinition};
use loft_domain::stream::{ModelEvent, ModelRequest};

use super::dispatch::ToolCtx;
use super::registry::DEFAULT_SUBAGENT_TOOLS;
use super::runner::execute_tool_call;
use super::writer::{EventSink, SubagentSink};

/// Handler for the `spawn_subagent` tool. Returns `(output, is_error)`.
pub async fn spawn_subagent(ctx: &ToolCtx, tool_call_id: &str, args: &Value) -> (String, bool) {
    if ctx.is_subagent {
        return (
            "sub-agents may not spawn further sub-agents".into(),
            true,
        );
    }

    let label = match args.get("label").and_then(|v| v.as_str()) {
        Some(l) if !l.trim().is_empty() => l.to_string(),
        _ => return ("missing required argument 'label'".into(), true),
    };
    let task = match args.get("task").and_then(|v| v.as_str()) {
        Some(t) if !t.trim().is_empty() => t.to_string(),
        _ => return ("missing required argument 'task'".into(), true),
    };
    let allowlist: Vec<String> = match args.get("tools").and_then(|v| v.as_array()) {
        Some(list) => list
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        None => DEFAULT_SUBAGENT_TOOLS.iter().map(|s| s.to_string()).collect(),
    };

    let subagent_id = uuid::Uuid::new_v4().to_string();
    let lifecycle = |status: SubagentStatus, result: Option<String>, error: Option<String>| {
        EventPayload::Subagent {
            parent_tool_call_id: tool_call_id.to_owned(),
            subagent_id: subagent_id.clone(),
            status,
            label: label.clone(),
            task: task.clone(),
            result,
            error,
        }
    };

    if let Err(e) = ctx.sink.emit(lifecycle(SubagentStatus::Started, None, None)) {
        return (e.to_string(), true);
    }

    let tools = ctx.state.registry.definitions_for(&allowlist);
    tracing::info!(
        subagent_id = %subagent_id,
        label = %label,
        tools = tools.len(),
        "sub-agent started"
    );

    let block_sink: Arc<dyn EventSink> = Arc::new(SubagentSink {
        writer: ctx.state.writer.clone(),
        session_id: ctx.session_id.clone(),
        turn_id: ctx.turn_id.clone(),
        step_id: ctx.step_id.clone(),
        parent_tool_call_id: tool_call_id.to_owned(),
        subagent_id: subagent_id.clone(),
    });

    match run_child_loop(ctx, block_sink, &label, &task, tools).await {
        Ok(text) => {
            let _ = ctx
                .sink
                .emit(lifecycle(SubagentStatus::Done, Some(text.clone()), None));
            (text, false)
        }
        Err(e) => {
            let message = e.to_string();
            let _ = ctx
                .sink
                .emit(lifecycle(SubagentStatus::Error, None, Some(message.clone())));
            (message, true)
        }
    }
}

/// The child loop: same stream-then-dispatch shape as the parent runner,
/// but emitting through the wrapping sink and without Step bookkeeping.
async fn run_child_loop(
    parent: &ToolCtx,
    sink: Arc<dyn EventSink>,
    label: &str,
    task: &str,
    tools: Vec<ToolDefinition>,
) -> Result<String> {
    let state = &parent.state;
    let model = state
        .store
        .get_settings(&parent.session_id)?
        .and_then(|s| s.override_model)
        .or_else(|| state.config.model.default_model.clone());

    let mut history = vec![Message::system(label), Message::user(task)];

    let child_ctx = ToolCtx {
        state: state.clone(),
        session_id: parent.session_id.clone(),
        turn_id: parent.turn_id.clone(),
        step_id: parent.step_id.clone(),
        cancel: parent.cancel.clone(),
        sink: sink.clone(),
        is_subagent: true,
    };

    for _round in 0..state.config.model.max_steps {
        if parent.cancel.is_cancelled() {
            return Err(Error::Other("cancelled".into()));
        }

        let request = ModelRequest {
            messages: history.clone(),
            tools: tools.clone(),
            model: model.clone(),
        };
        let mut stream = state.model.open(request).await?;

        let mut text_buf = String::new();
        let mut message_id: Option<String> = None;
        let mut pending: Vec<ToolCall> = Vec::new();

        loop {
            let next = tokio::select! {
                _ = parent.cancel.cancelled() => {
                    return Err(Error::Other("cancelled".into()));
                }
                ev = stream.next() => ev,
            };
            let Some(event) = next else { break };

            match event {
                ModelEvent::TextDelta {
                    message_id: mid,
                    text,
                } => {
                    if message_id.is_none() {
                        message_id = Some(mid.clone());
                    }
                    text_buf.push_str(&text);
                    sink.emit(EventPayload::MessageDelta {
                        role: "assistant".into(),
                        message_id: mid,
                        delta: text,
                    })?;
                }
                ModelEvent::ThinkingDelta { text } => {
                    sink.emit(EventPayload::Thinking {
                        status: ThinkingStatus::Delta,
                        text: Some(text),
                        duration_ms: None,
                    })?;
                }
                ModelEvent::ThinkingEnd { duration_ms } => {
                    sink.emit(EventPayload::Thinking {
                        status: ThinkingStatus::End,
                        text: None,
                        duration_ms: Some(duration_ms),
                    })?;
                }
                ModelEvent::ToolCall { id, name, input } => {
                    pending.push(ToolCall {
                        call_id: id,
                        tool_name: name,
                        arguments: input,
                    });
                }
                ModelEvent::Stop { .. } => {}
                ModelEvent::Error { message } => {
                    sink.emit(EventPayload::Error {
                        code: "model".into(),
                        message: message.clone(),
                    })?;
                    return Err(Error::Model(message));
                }
            }
        }

        if pending.is_empty() {
            let mid = message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            sink.emit(EventPayload::Final {
                role: "assistant".into(),
                message_id: mid,
                text: text_buf.clone(),
                finish_reason: "stop".into(),
                usage: None,
            })?;
            return Ok(text_buf);
        }

        history.push(Message::assistant_with_tool_calls(&text_buf, &pending));
        for tc in &pending {
            let cancelled =
                execute_tool_call(state, &child_ctx, sink.as_ref(), tc, &mut history).await?;
            if cancelled {
                return Err(Error::Other("cancelled".into()));
            }
        }
    }

    Err(Error::Other(format!(
        "sub-agent loop limit reached ({} rounds)",
        state.config.model.max_steps
    )))
}
