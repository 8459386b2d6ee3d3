//! Pinned context management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::state::AppState;

use super::{api_error, map_err};

const KINDS: &[&str] = &["file", "web", "summary", "memory"];

pub async fn list(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(e) = state.store.get_session(&id) {
        return map_err(e);
    }
    match state.store.list_context_items(&id, false) {
        Ok(items) => Json(serde_json::json!({
            "items": items,
            "count": items.len(),
        }))
        .into_response(),
        Err(e) => map_err(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct PinBody {
    pub context_id: String,
}

pub async fn pin(
    State(state): State<AppState>,
    Path(_id): Path<String>,
    Json(body): Json<PinBody>,
) -> Response {
    match state.store.set_context_pinned(&body.context_id, true) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => map_err(e),
    }
}

pub async fn unpin(
    State(state): State<AppState>,
    Path(_id): Path<String>,
    Json(body): Json<PinBody>,
) -> Response {
    match state.store.set_context_pinned(&body.context_id, false) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => map_err(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetPinnedRefBody {
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    pub content_ref: String,
    #[serde(default = "default_pinned")]
    pub pinned: bool,
}

fn default_pinned() -> bool {
    true
}

/// Register a new context item by reference (a workspace path, a URL, a
/// memory id — opaque to the server except for `file`).
pub async fn set_pinned_ref(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetPinnedRefBody>,
) -> Response {
    if let Err(e) = state.store.get_session(&id) {
        return map_err(e);
    }
    if !KINDS.contains(&body.kind.as_str()) {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("kind must be one of {KINDS:?} (got '{}')", body.kind),
        );
    }
    let title = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(&body.content_ref);

    match state
        .store
        .add_context_item(&id, &body.kind, title, &body.content_ref, body.pinned)
    {
        Ok(item) => (StatusCode::CREATED, Json(item)).into_response(),
        Err(e) => map_err(e),
    }
}
