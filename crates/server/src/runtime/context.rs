//! The context builder — assembles the message array for one model call.
//!
//! Shape: one system message (base prompt + operator instructions + pinned
//! item blocks), then the last N prior exchanges, then the new user text.
//! Oversized pinned items are replaced by a cached summary keyed by a hash
//! of their reference and content; the summary itself is deterministic
//! truncation, never a hidden model call.

use sha2::{Digest, Sha256};

use loft_domain::error::Result;
use loft_domain::message::Message;
use loft_store::ContextItemRow;

use crate::state::AppState;

/// Product identity and tool ground rules, present in every prompt.
const BASE_SYSTEM_PROMPT: &str = "\
You are Loft, a coding and research agent operating inside a sandboxed \
workspace. Use the provided tools to read, search, and modify workspace \
files, fetch web resources, and delegate focused sub-tasks. Tool use may \
require human approval; a denied call is not an error to retry. Keep \
answers grounded in what the tools returned.";

/// Build the full message array for the next model call of a turn.
///
/// `current_turn_id` is excluded from history (its user text arrives as
/// the trailing user message instead).
pub async fn build_messages(
    state: &AppState,
    session_id: &str,
    current_turn_id: &str,
    user_text: &str,
) -> Result<Vec<Message>> {
    let mut system = String::from(BASE_SYSTEM_PROMPT);
    if let Some(instructions) = &state.config.context.instructions {
        system.push_str("\n\n");
        system.push_str(instructions);
    }

    // ── Pinned context items ──────────────────────────────────────
    let pinned = state.store.list_context_items(session_id, true)?;
    for item in &pinned {
        match render_pinned(state, item).await {
            Ok(block) => {
                system.push_str("\n\n");
                system.push_str(&block);
            }
            Err(e) => {
                tracing::warn!(
                    item_id = %item.id,
                    error = %e,
                    "skipping unreadable pinned context item"
                );
            }
        }
    }

    let mut messages = vec![Message::system(system)];

    // ── Prior turns, deterministically elided ─────────────────────
    let history = state.store.turn_history(session_id)?;
    let max_turns = state.config.context.history_max_turns;
    let prior: Vec<_> = history
        .iter()
        .filter(|t| t.turn_id != current_turn_id)
        .collect();
    let skip = prior.len().saturating_sub(max_turns);
    for turn in prior.into_iter().skip(skip) {
        messages.push(Message::user(&turn.user_text));
        if let Some(answer) = &turn.assistant_text {
            messages.push(Message::assistant(answer));
        }
    }

    messages.push(Message::user(user_text));
    Ok(messages)
}

/// Render one pinned item as a titled block, inlining small content and
/// substituting the cached (or freshly synthesized) summary for large
/// content.
async fn render_pinned(state: &AppState, item: &ContextItemRow) -> Result<String> {
    let content = load_item_content(state, item).await?;
    let threshold = state.config.context.pin_inline_max_chars;

    if content.chars().count() <= threshold {
        return Ok(format!("## Pinned: {}\n{content}", item.title));
    }

    let hash = content_hash(&item.content_ref, &content);
    let summary = match (&item.summary, &item.summary_sha256) {
        (Some(cached), Some(cached_hash)) if *cached_hash == hash => cached.clone(),
        _ => {
            let fresh = summarize(&content, threshold);
            state.store.set_context_summary(&item.id, &fresh, &hash)?;
            fresh
        }
    };
    Ok(format!(
        "## Pinned (summary): {}\n{summary}",
        item.title
    ))
}

/// Load an item's content through its kind's reader. Files go through the
/// sandbox; every other kind renders its `content_ref` verbatim — the ref
/// is an opaque id, never a secret.
async fn load_item_content(state: &AppState, item: &ContextItemRow) -> Result<String> {
    match item.kind.as_str() {
        "file" => {
            let read = state
                .sandbox
                .read(&item.content_ref, state.config.sandbox.max_read_bytes)
                .await?;
            Ok(read.content)
        }
        _ => Ok(item.content_ref.clone()),
    }
}

fn content_hash(content_ref: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_ref.as_bytes());
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic head+tail truncation: the first two thirds and the final
/// third of the budget, joined by an ellipsis marker.
fn summarize(content: &str, budget_chars: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    let head_len = budget_chars * 2 / 3;
    let tail_len = budget_chars.saturating_sub(head_len);

    let head: String = chars.iter().take(head_len).collect();
    let tail: String = chars[chars.len().saturating_sub(tail_len)..]
        .iter()
        .collect();
    format!("{head}\n[... content elided ...]\n{tail}")
}
