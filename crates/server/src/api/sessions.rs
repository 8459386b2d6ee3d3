//! Session management and turn scheduling endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::runtime::{spawn_turn, TurnInput};
use crate::state::AppState;

use super::{api_error, map_err};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session CRUD
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub title: Option<String>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Response {
    let title = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled session");
    match state.store.create_session(title) {
        Ok(session) => Json(session).into_response(),
        Err(e) => map_err(e),
    }
}

pub async fn list_sessions(State(state): State<AppState>) -> Response {
    match state.store.list_sessions() {
        Ok(sessions) => Json(serde_json::json!({
            "sessions": sessions,
            "count": sessions.len(),
        }))
        .into_response(),
        Err(e) => map_err(e),
    }
}

/// Session detail plus turn history, enough for a UI to bootstrap its
/// timeline before subscribing to live events.
pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session = match state.store.get_session(&id) {
        Ok(s) => s,
        Err(e) => return map_err(e),
    };
    let turns = match state.store.turn_history(&id) {
        Ok(t) => t,
        Err(e) => return map_err(e),
    };
    let settings = state.store.get_settings(&id).ok().flatten();
    Json(serde_json::json!({
        "session": session,
        "settings": settings,
        "turns": turns,
        "running": state.cancel_map.is_running(&id),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct RenameBody {
    pub title: String,
}

pub async fn rename_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Response {
    if body.title.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "title must not be empty");
    }
    match state.store.rename_session(&id, body.title.trim()) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => map_err(e),
    }
}

/// Cascade delete. An active turn is cancelled first; in-memory grants
/// are dropped with the rows.
pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    state.cancel_map.cancel(&id);
    match state.store.delete_session(&id) {
        Ok(()) => {
            state.gate.forget_session(&id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => map_err(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_settings(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(e) = state.store.get_session(&id) {
        return map_err(e);
    }
    match state.store.get_settings(&id) {
        Ok(settings) => Json(serde_json::json!({ "settings": settings })).into_response(),
        Err(e) => map_err(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SettingsBody {
    #[serde(default)]
    pub override_model: Option<String>,
}

pub async fn put_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SettingsBody>,
) -> Response {
    if let Err(e) = state.store.get_session(&id) {
        return map_err(e);
    }
    match state
        .store
        .put_settings(&id, body.override_model.as_deref())
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => map_err(e),
    }
}

pub async fn delete_settings(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.delete_settings(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => map_err(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateTurnBody {
    pub content: String,
}

/// Create a turn and schedule its runner. Returns immediately with the
/// turn id; progress flows over SSE. 409 while a turn is active.
pub async fn create_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CreateTurnBody>,
) -> Response {
    if body.content.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "content must not be empty");
    }
    if let Err(e) = state.store.get_session(&id) {
        return map_err(e);
    }

    // The token registration is the atomic busy check.
    let Some(cancel) = state.cancel_map.try_register(&id) else {
        return api_error(
            StatusCode::CONFLICT,
            "busy: a turn is already running in this session",
        );
    };

    let turn = match state.store.create_turn(&id, body.content.trim_end()) {
        Ok(t) => t,
        Err(e) => {
            state.cancel_map.remove(&id);
            return map_err(e);
        }
    };

    spawn_turn(
        state.clone(),
        TurnInput {
            session_id: id,
            turn_id: turn.id.clone(),
            user_text: turn.user_text.clone(),
        },
        cancel,
    );

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "turn_id": turn.id })),
    )
        .into_response()
}

/// Cancel the active turn. 204 when none is running.
pub async fn cancel_turn(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.cancel_map.cancel(&id) {
        Json(serde_json::json!({ "cancelled": true })).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}
