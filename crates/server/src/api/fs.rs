//! Sandbox inspection and rollback endpoints.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::runtime::dispatch;
use crate::state::AppState;

use super::map_err;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/fs/tree
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn tree(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(e) = state.store.get_session(&id) {
        return map_err(e);
    }
    match state
        .sandbox
        .tree(state.config.sandbox.tree_max_entries)
        .await
    {
        Ok(listing) => Json(listing).into_response(),
        Err(e) => map_err(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/fs/read?path=
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub path: String,
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

pub async fn read(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Response {
    if let Err(e) = state.store.get_session(&id) {
        return map_err(e);
    }
    let cap = state.config.sandbox.max_read_bytes;
    let max_bytes = query.max_bytes.map(|n| n.min(cap)).unwrap_or(cap);
    match state.sandbox.read(&query.path, max_bytes).await {
        Ok(result) => Json(serde_json::json!({
            "path": query.path,
            "content": result.content,
            "size": result.size,
            "mtime": result.mtime,
            "truncated": result.truncated,
        }))
        .into_response(),
        Err(e) => map_err(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/fs/versions?path=
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct VersionsQuery {
    pub path: String,
}

pub async fn versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionsQuery>,
) -> Response {
    match state.store.file_versions(&id, &query.path) {
        Ok(versions) => Json(serde_json::json!({
            "path": query.path,
            "versions": versions,
        }))
        .into_response(),
        Err(e) => map_err(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/fs/version/:vid
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_version(
    State(state): State<AppState>,
    Path((id, vid)): Path<(String, String)>,
) -> Response {
    let version = match state.store.get_file_version(&vid) {
        Ok(v) => v,
        Err(e) => return map_err(e),
    };
    if version.meta.session_id != id {
        return map_err(loft_domain::Error::NotFound(format!("file version {vid}")));
    }

    let cap = state.config.sandbox.version_max_bytes;
    let truncated = version.content.len() > cap;
    let slice = if truncated {
        &version.content[..cap]
    } else {
        &version.content[..]
    };
    Json(serde_json::json!({
        "version": version.meta,
        "content": String::from_utf8_lossy(slice),
        "truncated": truncated,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/fs/rollback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct RollbackBody {
    pub path: String,
    pub version_id: String,
}

pub async fn rollback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RollbackBody>,
) -> Response {
    if let Err(e) = state.store.get_session(&id) {
        return map_err(e);
    }
    match dispatch::rollback(&state, &id, &body.path, &body.version_id).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => map_err(e),
    }
}
