//! The agent runner — owns exactly one turn.
//!
//! Per step: open a model stream, forward deltas as events, buffer tool
//! calls; on a `tool_use` stop, gate and execute each call in model order,
//! then loop. Every emission goes through the event writer, so the order a
//! UI sees (live or replayed) is the runner's emission order. Cancellation
//! is observed at a single `select!` point while streaming and between
//! tool calls.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tracing::Instrument;

use loft_domain::error::Result;
use loft_domain::event::{EventPayload, ThinkingStatus, ToolCallStatus};
use loft_domain::message::{Message, ToolCall};
use loft_domain::stream::{ModelEvent, ModelRequest, StopReason, Usage};
use loft_store::{SessionStatus, StepStatus};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

use super::context;
use super::dispatch::{dispatch_tool, ToolCtx};
use super::gate::GateOutcome;
use super::writer::{EventSink, TurnSink};

/// Input to a single turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub session_id: String,
    pub turn_id: String,
    pub user_text: String,
}

/// Spawn the runner task for one turn. The watcher task reports panics as
/// `error(code="runner")` and always releases the session's busy marker.
pub fn spawn_turn(
    state: AppState,
    input: TurnInput,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let session_id = input.session_id.clone();
    let turn_id = input.turn_id.clone();
    let span = tracing::info_span!("turn", session_id = %session_id, turn_id = %turn_id);

    tokio::spawn(async move {
        let inner_state = state.clone();
        let inner = tokio::spawn(
            async move { run_turn(inner_state, input, cancel).await }.instrument(span),
        );
        if let Err(join_err) = inner.await {
            if join_err.is_panic() {
                tracing::error!(session_id = %session_id, turn_id = %turn_id, "runner task panicked");
                let _ = state.writer.publish(
                    &session_id,
                    Some(&turn_id),
                    None,
                    EventPayload::Error {
                        code: "runner".into(),
                        message: "internal runner failure".into(),
                    },
                );
                let _ = state
                    .store
                    .set_session_status(&session_id, SessionStatus::Error);
            }
        }
        state.cancel_map.remove(&session_id);
    })
}

/// Run one turn to completion. Errors that escape the step loop are
/// runner-level faults, converted to events here.
pub async fn run_turn(state: AppState, input: TurnInput, cancel: CancellationToken) {
    let session_id = input.session_id.clone();
    let turn_id = input.turn_id.clone();

    if let Err(e) = run_turn_inner(&state, &input, &cancel).await {
        tracing::error!(error = %e, session_id = %session_id, turn_id = %turn_id, "turn failed");
        let _ = state.writer.publish(
            &session_id,
            Some(&turn_id),
            None,
            EventPayload::Error {
                code: "runner".into(),
                message: e.to_string(),
            },
        );
        let _ = state
            .store
            .set_session_status(&session_id, SessionStatus::Error);
    }
}

async fn run_turn_inner(
    state: &AppState,
    input: &TurnInput,
    cancel: &CancellationToken,
) -> Result<()> {
    let session_id = input.session_id.as_str();
    let turn_id = input.turn_id.as_str();

    // Model override: session settings win over the configured default.
    let model = state
        .store
        .get_settings(session_id)?
        .and_then(|s| s.override_model)
        .or_else(|| state.config.model.default_model.clone());

    let mut history = context::build_messages(state, session_id, turn_id, &input.user_text).await?;
    let tools = state.registry.definitions();

    state
        .store
        .set_session_status(session_id, SessionStatus::Running)?;

    let mut total_usage = Usage {
        prompt_tokens: 0,
        completion_tokens: 0,
        total_tokens: 0,
    };
    let mut saw_usage = false;

    for step_idx in 0..state.config.model.max_steps {
        let step = state.store.create_step(turn_id, step_idx)?;
        let step_id = step.id.clone();

        if step_idx == 0 {
            state.writer.publish(
                session_id,
                Some(turn_id),
                Some(&step_id),
                EventPayload::Status {
                    state: "started".into(),
                },
            )?;
        }

        // ── Stream one model response ─────────────────────────────
        let request = ModelRequest {
            messages: history.clone(),
            tools: tools.clone(),
            model: model.clone(),
        };
        let mut stream = match state.model.open(request).await {
            Ok(s) => s,
            Err(e) => {
                state.writer.publish(
                    session_id,
                    Some(turn_id),
                    Some(&step_id),
                    EventPayload::Error {
                        code: "model".into(),
                        message: e.to_string(),
                    },
                )?;
                state.store.finish_step(&step_id, StepStatus::Error)?;
                state
                    .store
                    .set_session_status(session_id, SessionStatus::Error)?;
                return Ok(());
            }
        };

        let mut text_buf = String::new();
        let mut message_id: Option<String> = None;
        let mut pending: Vec<ToolCall> = Vec::new();
        let mut stop: Option<(StopReason, Option<Usage>)> = None;
        let mut thinking_open = false;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    drop(stream);
                    return finish_cancelled(state, session_id, turn_id, &step_id);
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
                    state.writer.publish(
                        session_id,
                        Some(turn_id),
                        Some(&step_id),
                        EventPayload::MessageDelta {
                            role: "assistant".into(),
                            message_id: mid,
                            delta: text,
                        },
                    )?;
                }
                ModelEvent::ThinkingDelta { text } => {
                    if !thinking_open {
                        thinking_open = true;
                        state.writer.publish(
                            session_id,
                            Some(turn_id),
                            Some(&step_id),
                            EventPayload::Thinking {
                                status: ThinkingStatus::Start,
                                text: None,
                                duration_ms: None,
                            },
                        )?;
                    }
                    state.writer.publish(
                        session_id,
                        Some(turn_id),
                        Some(&step_id),
                        EventPayload::Thinking {
                            status: ThinkingStatus::Delta,
                            text: Some(text),
                            duration_ms: None,
                        },
                    )?;
                }
                ModelEvent::ThinkingEnd { duration_ms } => {
                    thinking_open = false;
                    state.writer.publish(
                        session_id,
                        Some(turn_id),
                        Some(&step_id),
                        EventPayload::Thinking {
                            status: ThinkingStatus::End,
                            text: None,
                            duration_ms: Some(duration_ms),
                        },
                    )?;
                }
                ModelEvent::ToolCall { id, name, input } => {
                    pending.push(ToolCall {
                        call_id: id,
                        tool_name: name,
                        arguments: input,
                    });
                }
                ModelEvent::Stop {
                    finish_reason,
                    usage,
                } => {
                    stop = Some((finish_reason, usage));
                }
                ModelEvent::Error { message } => {
                    state.writer.publish(
                        session_id,
                        Some(turn_id),
                        Some(&step_id),
                        EventPayload::Error {
                            code: "model".into(),
                            message,
                        },
                    )?;
                    state.store.finish_step(&step_id, StepStatus::Error)?;
                    state
                        .store
                        .set_session_status(session_id, SessionStatus::Error)?;
                    return Ok(());
                }
            }
        }

        let finish_reason = match &stop {
            Some((reason, usage)) => {
                if let Some(u) = usage {
                    total_usage.add(u);
                    saw_usage = true;
                }
                *reason
            }
            None => StopReason::Stop,
        };

        // ── No tool calls: this is the final answer ───────────────
        if pending.is_empty() {
            let mid = message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            state.writer.publish(
                session_id,
                Some(turn_id),
                Some(&step_id),
                EventPayload::Final {
                    role: "assistant".into(),
                    message_id: mid,
                    text: text_buf,
                    finish_reason: finish_reason.as_str().into(),
                    usage: saw_usage.then_some(total_usage),
                },
            )?;
            state.store.finish_step(&step_id, StepStatus::Done)?;
            state
                .store
                .set_session_status(session_id, SessionStatus::Idle)?;
            return Ok(());
        }

        // ── Tool dispatch, in model emission order ────────────────
        history.push(Message::assistant_with_tool_calls(&text_buf, &pending));

        let sink: Arc<dyn EventSink> = Arc::new(TurnSink {
            writer: state.writer.clone(),
            session_id: session_id.to_owned(),
            turn_id: Some(turn_id.to_owned()),
            step_id: Some(step_id.clone()),
        });
        let ctx = ToolCtx {
            state: state.clone(),
            session_id: session_id.to_owned(),
            turn_id: Some(turn_id.to_owned()),
            step_id: Some(step_id.clone()),
            cancel: cancel.clone(),
            sink: sink.clone(),
            is_subagent: false,
        };

        for tc in &pending {
            if cancel.is_cancelled() {
                return finish_cancelled(state, session_id, turn_id, &step_id);
            }
            let cancelled = execute_tool_call(state, &ctx, sink.as_ref(), tc, &mut history).await?;
            if cancelled {
                return finish_cancelled(state, session_id, turn_id, &step_id);
            }
        }

        state.store.finish_step(&step_id, StepStatus::Done)?;
    }

    // Step budget exhausted.
    state.writer.publish(
        session_id,
        Some(turn_id),
        None,
        EventPayload::Error {
            code: "runner".into(),
            message: format!(
                "tool loop limit reached ({} steps)",
                state.config.model.max_steps
            ),
        },
    )?;
    state
        .store
        .set_session_status(session_id, SessionStatus::Idle)?;
    Ok(())
}

/// Gate and execute one tool call, appending its outcome to the message
/// history. Returns `true` when the turn was cancelled mid-call. Shared
/// with the sub-agent loop, which passes its wrapping sink.
pub(super) async fn execute_tool_call(
    state: &AppState,
    ctx: &ToolCtx,
    sink: &dyn EventSink,
    tc: &ToolCall,
    history: &mut Vec<Message>,
) -> Result<bool> {
    let session_id = ctx.session_id.as_str();
    let turn_id = ctx.turn_id.as_deref();
    let step_id = ctx.step_id.as_deref();

    let Some(spec) = state.registry.get(&tc.tool_name) else {
        let message = format!("unknown tool: {}", tc.tool_name);
        sink.emit(EventPayload::ToolResult {
            tool_call_id: tc.call_id.clone(),
            ok: false,
            output: None,
            error: Some(message.clone()),
            duration_ms: 0,
        })?;
        history.push(Message::tool_error(&tc.call_id, message));
        return Ok(false);
    };

    let outcome = state
        .gate
        .check(
            sink,
            session_id,
            turn_id,
            step_id,
            &tc.call_id,
            &tc.tool_name,
            &tc.arguments,
            spec.default_policy,
            &ctx.cancel,
        )
        .await?;

    match outcome {
        GateOutcome::Denied | GateOutcome::Expired => {
            let reason = if outcome == GateOutcome::Denied {
                "denied"
            } else {
                "expired"
            };
            sink.emit(EventPayload::ToolResult {
                tool_call_id: tc.call_id.clone(),
                ok: false,
                output: None,
                error: Some(reason.into()),
                duration_ms: 0,
            })?;
            history.push(Message::tool_error(
                &tc.call_id,
                format!("permission {reason} for tool '{}'", tc.tool_name),
            ));
            return Ok(ctx.cancel.is_cancelled());
        }
        GateOutcome::Approved => {}
    }

    sink.emit(EventPayload::ToolCall {
        tool_call_id: tc.call_id.clone(),
        tool_name: tc.tool_name.clone(),
        input: tc.arguments.clone(),
        status: ToolCallStatus::Running,
        permission_request_id: None,
    })?;

    let started = Instant::now();
    let timeout = state.config.model.timeout_for(&tc.tool_name);
    let result = tokio::select! {
        _ = ctx.cancel.cancelled() => None,
        r = tokio::time::timeout(
            timeout,
            dispatch_tool(ctx, &tc.call_id, &tc.tool_name, &tc.arguments),
        ) => Some(r),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        // Torn down by cancellation mid-execution.
        None => {
            sink.emit(EventPayload::ToolResult {
                tool_call_id: tc.call_id.clone(),
                ok: false,
                output: None,
                error: Some("cancelled".into()),
                duration_ms,
            })?;
            Ok(true)
        }
        Some(Err(_elapsed)) => {
            sink.emit(EventPayload::ToolResult {
                tool_call_id: tc.call_id.clone(),
                ok: false,
                output: None,
                error: Some("timeout".into()),
                duration_ms,
            })?;
            history.push(Message::tool_error(
                &tc.call_id,
                format!("tool '{}' timed out", tc.tool_name),
            ));
            Ok(false)
        }
        Some(Ok((output, true))) => {
            sink.emit(EventPayload::ToolResult {
                tool_call_id: tc.call_id.clone(),
                ok: false,
                output: None,
                error: Some(output.clone()),
                duration_ms,
            })?;
            history.push(Message::tool_error(&tc.call_id, output));
            Ok(false)
        }
        Some(Ok((output, false))) => {
            sink.emit(EventPayload::ToolResult {
                tool_call_id: tc.call_id.clone(),
                ok: true,
                output: Some(output.clone()),
                error: None,
                duration_ms,
            })?;
            history.push(Message::tool_result(&tc.call_id, output));
            Ok(false)
        }
    }
}

/// Cancellation epilogue: expire pending permissions, emit the terminal
/// `error(code="cancelled")`, close the step, return the session to idle.
/// No `final` is emitted for a cancelled turn.
fn finish_cancelled(
    state: &AppState,
    session_id: &str,
    turn_id: &str,
    step_id: &str,
) -> Result<()> {
    state.gate.expire_for_turn(turn_id);
    state.writer.publish(
        session_id,
        Some(turn_id),
        Some(step_id),
        EventPayload::Error {
            code: "cancelled".into(),
            message: "turn cancelled by user".into(),
        },
    )?;
    state.store.finish_step(step_id, StepStatus::Cancelled)?;
    state
        .store
        .set_session_status(session_id, SessionStatus::Idle)?;
    tracing::info!(session_id, turn_id, "turn cancelled");
    Ok(())
}
