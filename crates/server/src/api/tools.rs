//! Tool registry listing and policy administration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use loft_domain::policy::ToolPolicy;

use crate::state::AppState;

use super::{api_error, map_err};

/// GET /v1/tools — every enabled tool with its effective policy.
pub async fn list_tools(State(state): State<AppState>) -> Response {
    let tools: Vec<serde_json::Value> = state
        .registry
        .specs()
        .map(|spec| {
            serde_json::json!({
                "name": spec.name,
                "description": spec.description,
                "parameters": spec.parameters,
                "default_policy": spec.default_policy,
                "policy": state.gate.effective_policy(&spec.name, spec.default_policy),
            })
        })
        .collect();
    Json(serde_json::json!({ "tools": tools })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct PolicyBody {
    pub policy: String,
}

/// PUT /v1/tools/:name/policy — admin override, persisted in the store.
pub async fn put_policy(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<PolicyBody>,
) -> Response {
    if state.registry.get(&name).is_none() {
        return api_error(StatusCode::NOT_FOUND, format!("unknown tool '{name}'"));
    }
    let Some(policy) = ToolPolicy::parse(&body.policy) else {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("policy must be deny, ask, or allow (got '{}')", body.policy),
        );
    };
    match state.store.set_tool_policy(&name, policy) {
        Ok(()) => Json(serde_json::json!({ "tool": name, "policy": policy })).into_response(),
        Err(e) => map_err(e),
    }
}
