//! Permission request resolution and the global mode switch.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use loft_domain::policy::{PermissionMode, PermissionScope};

use crate::runtime::gate::ResolveOutcome;
use crate::state::AppState;

use super::{api_error, map_err};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/permissions/pending
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn pending(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(e) = state.store.get_session(&id) {
        return map_err(e);
    }
    match state.store.pending_permission_requests(&id) {
        Ok(requests) => Json(serde_json::json!({
            "pending": requests,
            "count": requests.len(),
        }))
        .into_response(),
        Err(e) => map_err(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/permissions/:id/resolve
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    /// "approved" or "denied".
    pub status: String,
    #[serde(default)]
    pub scope: Option<PermissionScope>,
}

pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> Response {
    let approve = match body.status.as_str() {
        "approved" => true,
        "denied" => false,
        other => {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("status must be 'approved' or 'denied' (got '{other}')"),
            )
        }
    };
    let scope = body.scope.unwrap_or_default();

    match state.gate.resolve(&id, approve, scope) {
        Ok(ResolveOutcome::Resolved(request)) => Json(request).into_response(),
        Ok(ResolveOutcome::AlreadyResolved) => api_error(
            StatusCode::CONFLICT,
            "permission request was already resolved",
        ),
        Ok(ResolveOutcome::NotFound) => {
            api_error(StatusCode::NOT_FOUND, format!("permission request {id}"))
        }
        Err(e) => map_err(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET|PUT /v1/permissions/mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_mode(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({ "mode": state.gate.mode() })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ModeBody {
    pub mode: PermissionMode,
}

pub async fn put_mode(State(state): State<AppState>, Json(body): Json<ModeBody>) -> Response {
    match state.gate.set_mode(body.mode) {
        Ok(()) => Json(serde_json::json!({ "mode": body.mode })).into_response(),
        Err(e) => map_err(e),
    }
}
