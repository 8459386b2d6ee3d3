//! Event replay (JSON) and the live SSE stream.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_core::Stream;
use serde::Deserialize;

use loft_domain::event::{now_ts, EventEnvelope};

use crate::runtime::hub::HubMessage;
use crate::state::AppState;

use super::map_err;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/events — JSON replay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ReplayQuery {
    /// Global id lower bound (exclusive).
    #[serde(default)]
    pub since: Option<i64>,
    /// Per-session seq lower bound (exclusive); wins over `since`.
    #[serde(default)]
    pub since_seq: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn replay(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReplayQuery>,
) -> Response {
    if let Err(e) = state.store.get_session(&id) {
        return map_err(e);
    }
    let result = match query.since_seq {
        Some(seq) => state.store.events_since_seq(&id, seq, query.limit),
        None => state
            .store
            .events_since(&id, query.since.unwrap_or(0), query.limit),
    };
    match result {
        Ok(events) => Json(events).into_response(),
        Err(e) => map_err(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/event — SSE subscription
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub since: Option<i64>,
}

/// Subscribe to the live event stream.
///
/// `Last-Event-ID` (sent by browsers on automatic reconnect) wins over the
/// `since` query parameter. Registration happens before the replay read;
/// the overlap window is deduplicated against the last replayed id, so the
/// client sees the exact suffix with no gaps and no duplicates.
pub async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
    headers: HeaderMap,
) -> Response {
    let since = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .or(query.since);

    if let Some(session_id) = &query.session_id {
        if let Err(e) = state.store.get_session(session_id) {
            return map_err(e);
        }
    }

    // Register first: anything published from now on is queued.
    let rx = state.hub.register(query.session_id.clone());

    let backlog = match since {
        Some(n) => {
            let replayed = match &query.session_id {
                Some(sid) => state.store.events_since(sid, n, None),
                None => state.store.events_since_all(n, None),
            };
            match replayed {
                Ok(events) => events,
                Err(e) => return map_err(e),
            }
        }
        None => Vec::new(),
    };

    let latest_id = state.store.latest_event_id().unwrap_or(0);
    Sse::new(event_stream(rx, backlog, since.unwrap_or(0), latest_id)).into_response()
}

fn sse_event(env: &EventEnvelope) -> Event {
    Event::default()
        .id(env.id.to_string())
        .event("event")
        .data(serde_json::to_string(env).unwrap_or_default())
}

fn event_stream(
    mut rx: tokio::sync::mpsc::Receiver<HubMessage>,
    backlog: Vec<EventEnvelope>,
    since: i64,
    latest_id: i64,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        yield Ok(Event::default().event("connected").data(
            serde_json::json!({
                "server_time": now_ts(),
                "latest_id": latest_id,
            })
            .to_string(),
        ));

        let mut last_id = since;
        for env in &backlog {
            last_id = env.id;
            yield Ok(sse_event(env));
        }

        // Live phase. The channel closes when the hub drops us (queue
        // overflow) or the process shuts down; the client reconnects with
        // its Last-Event-ID and is caught up by replay.
        while let Some(msg) = rx.recv().await {
            match msg {
                HubMessage::Event(env) => {
                    if env.id <= last_id {
                        continue; // overlap with the replay window
                    }
                    last_id = env.id;
                    yield Ok(sse_event(&env));
                }
                HubMessage::Heartbeat => {
                    yield Ok(Event::default().event("heartbeat").data("{}"));
                }
            }
        }
    }
}
