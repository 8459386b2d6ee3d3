//! The event writer — the only component that appends events.
//!
//! One publish = one store transaction allocating `(id, seq)` + one hub
//! fan-out, under the writer's publish lock so the assigned order, the
//! persisted order, and the live delivery order are the same thing — for
//! per-session `seq` and for the process-wide `id` alike. Persisting
//! before publishing means anything a client sees live is already
//! replayable.

use std::sync::Arc;

use parking_lot::Mutex;

use loft_domain::error::Result;
use loft_domain::event::{EventEnvelope, EventPayload};
use loft_store::Store;

use super::hub::EventHub;

pub struct EventWriter {
    store: Arc<Store>,
    hub: Arc<EventHub>,
    /// Spans append + fan-out. The store connection already serializes
    /// appends; extending the critical section over the hub handoff is
    /// what makes delivery order equal id order across sessions.
    publish_lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(store: Arc<Store>, hub: Arc<EventHub>) -> Self {
        Self {
            store,
            hub,
            publish_lock: Mutex::new(()),
        }
    }

    /// Stamp, persist, and fan out one event.
    pub fn publish(
        &self,
        session_id: &str,
        turn_id: Option<&str>,
        step_id: Option<&str>,
        payload: EventPayload,
    ) -> Result<EventEnvelope> {
        let _guard = self.publish_lock.lock();

        let (kind, value) = payload.into_parts();
        let env = self
            .store
            .append_event(session_id, turn_id, step_id, &kind, &value)?;
        let shared = Arc::new(env.clone());
        self.hub.publish(shared);
        Ok(env)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event sinks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a component's events go. Tool handlers and the permission gate
/// publish through a sink so the same code serves both the parent turn
/// (direct publishes) and sub-agents (wrapped as `subagent_block`).
pub trait EventSink: Send + Sync {
    fn emit(&self, payload: EventPayload) -> Result<EventEnvelope>;
}

/// Publishes directly under the given turn/step.
pub struct TurnSink {
    pub writer: Arc<EventWriter>,
    pub session_id: String,
    pub turn_id: Option<String>,
    pub step_id: Option<String>,
}

impl EventSink for TurnSink {
    fn emit(&self, payload: EventPayload) -> Result<EventEnvelope> {
        self.writer.publish(
            &self.session_id,
            self.turn_id.as_deref(),
            self.step_id.as_deref(),
            payload,
        )
    }
}

/// Wraps every payload as a `subagent_block` tagged with the parent tool
/// call, still under the parent's turn/step ids.
pub struct SubagentSink {
    pub writer: Arc<EventWriter>,
    pub session_id: String,
    pub turn_id: Option<String>,
    pub step_id: Option<String>,
    pub parent_tool_call_id: String,
    pub subagent_id: String,
}

impl EventSink for SubagentSink {
    fn emit(&self, payload: EventPayload) -> Result<EventEnvelope> {
        let block = payload.to_block();
        self.writer.publish(
            &self.session_id,
            self.turn_id.as_deref(),
            self.step_id.as_deref(),
            EventPayload::SubagentBlock {
                parent_tool_call_id: self.parent_tool_call_id.clone(),
                subagent_id: self.subagent_id.clone(),
                block,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::hub::HubMessage;

    fn setup() -> (Arc<Store>, Arc<EventHub>, Arc<EventWriter>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let hub = Arc::new(EventHub::new(256));
        let writer = Arc::new(EventWriter::new(store.clone(), hub.clone()));
        (store, hub, writer)
    }

    fn status(state: &str) -> EventPayload {
        EventPayload::Status {
            state: state.into(),
        }
    }

    #[tokio::test]
    async fn publish_persists_then_fans_out() {
        let (store, hub, writer) = setup();
        let session = store.create_session("s").unwrap();
        let mut rx = hub.register(None);

        let env = writer
            .publish(&session.id, None, None, status("started"))
            .unwrap();
        assert_eq!(env.seq, 1);
        assert_eq!(env.kind, "status");

        // Already replayable from the store.
        let stored = store.events_for_session(&session.id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, env.id);

        // And delivered live with the same stamp.
        match rx.recv().await.unwrap() {
            HubMessage::Event(e) => assert_eq!(e.id, env.id),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_session_publish_fails_cleanly() {
        let (_store, hub, writer) = setup();
        let mut rx = hub.register(None);
        assert!(writer.publish("ghost", None, None, status("x")).is_err());

        // Nothing reached the hub.
        hub.publish(Arc::new(EventEnvelope {
            id: 99,
            seq: 1,
            ts: 0.0,
            session_id: "marker".into(),
            turn_id: None,
            step_id: None,
            kind: "status".into(),
            payload: serde_json::Value::Null,
        }));
        match rx.recv().await.unwrap() {
            HubMessage::Event(e) => assert_eq!(e.id, 99),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn subagent_sink_wraps_payloads() {
        let (store, _hub, writer) = setup();
        let session = store.create_session("s").unwrap();

        let sink = SubagentSink {
            writer: writer.clone(),
            session_id: session.id.clone(),
            turn_id: None,
            step_id: None,
            parent_tool_call_id: "tc_parent".into(),
            subagent_id: "sub_1".into(),
        };
        sink.emit(status("started")).unwrap();

        let events = store.events_for_session(&session.id).unwrap();
        assert_eq!(events[0].kind, "subagent_block");
        assert_eq!(events[0].payload["parent_tool_call_id"], "tc_parent");
        assert_eq!(events[0].payload["block"]["type"], "status");
    }

    #[tokio::test]
    async fn concurrent_publishes_keep_seq_dense() {
        let (store, _hub, writer) = setup();
        let session = store.create_session("s").unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let writer = writer.clone();
            let sid = session.id.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    writer.publish(&sid, None, None, status("tick")).unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let events = store.events_for_session(&session.id).unwrap();
        assert_eq!(events.len(), 100);
        for (i, e) in events.iter().enumerate() {
            assert_eq!(e.seq, i as i64 + 1);
        }
    }

    #[tokio::test]
    async fn cross_session_delivery_matches_id_order() {
        let (store, hub, writer) = setup();
        let a = store.create_session("a").unwrap();
        let b = store.create_session("b").unwrap();
        let mut rx = hub.register(None);

        let mut handles = Vec::new();
        for sid in [a.id.clone(), b.id.clone()] {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    writer.publish(&sid, None, None, status("tick")).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut last_id = 0;
        for _ in 0..40 {
            if let HubMessage::Event(e) = rx.recv().await.unwrap() {
                assert!(e.id > last_id, "delivery order diverged from id order");
                last_id = e.id;
            }
        }
    }
}
