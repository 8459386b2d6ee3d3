//! Session export: the full event log as JSON, or a readable transcript
//! as Markdown. Diff and markdown *rendering* stay with the UI; the
//! export carries diffs verbatim.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use crate::state::AppState;

use super::map_err;

/// GET /v1/sessions/:id/export.json
pub async fn export_json(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session = match state.store.get_session(&id) {
        Ok(s) => s,
        Err(e) => return map_err(e),
    };
    let turns = match state.store.turn_history(&id) {
        Ok(t) => t,
        Err(e) => return map_err(e),
    };
    let events = match state.store.events_for_session(&id) {
        Ok(e) => e,
        Err(e) => return map_err(e),
    };
    let changes = match state.store.file_changes(&id) {
        Ok(c) => c,
        Err(e) => return map_err(e),
    };

    Json(serde_json::json!({
        "session": session,
        "turns": turns,
        "events": events,
        "file_changes": changes,
    }))
    .into_response()
}

/// GET /v1/sessions/:id/export.md
pub async fn export_markdown(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session = match state.store.get_session(&id) {
        Ok(s) => s,
        Err(e) => return map_err(e),
    };
    let turns = match state.store.turn_history(&id) {
        Ok(t) => t,
        Err(e) => return map_err(e),
    };
    let changes = match state.store.file_changes(&id) {
        Ok(c) => c,
        Err(e) => return map_err(e),
    };

    let mut md = String::new();
    md.push_str(&format!("# {}\n\n", session.title));
    md.push_str(&format!("Created: {}\n\n", session.created_at));

    for (n, turn) in turns.iter().enumerate() {
        md.push_str(&format!("## Turn {}\n\n", n + 1));
        md.push_str("**User**\n\n");
        md.push_str(&turn.user_text);
        md.push_str("\n\n");
        if let Some(answer) = &turn.assistant_text {
            md.push_str("**Assistant**\n\n");
            md.push_str(answer);
            md.push_str("\n\n");
        }
    }

    if !changes.is_empty() {
        md.push_str("## File changes\n\n");
        for change in &changes {
            md.push_str(&format!("### {} ({})\n\n", change.path, change.created_at));
            md.push_str("```diff\n");
            md.push_str(&change.diff);
            if !change.diff.ends_with('\n') {
                md.push('\n');
            }
            md.push_str("```\n\n");
        }
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        md,
    )
        .into_response()
}
