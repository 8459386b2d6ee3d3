//! The permission gate — decides whether a requested tool call may run.
//!
//! Resolution order: global mode, then session-scoped grants from earlier
//! `scope=session` decisions, then the effective per-tool policy, and
//! finally `ask`: a pending `PermissionRequest` row plus a
//! `tool_call(status=permission_required)` event, with the runner parked on
//! a oneshot until a human resolves the request or the timeout expires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use loft_domain::error::Result;
use loft_domain::event::{EventPayload, ToolCallStatus};
use loft_domain::policy::{PermissionMode, PermissionScope, PermissionStatus, ToolPolicy};
use loft_store::{PermissionRequestRow, Store};

use super::writer::EventSink;

/// What the gate tells the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Approved,
    Denied,
    /// Timed out, cancelled, or administratively expired — treated as a
    /// denial without side effects.
    Expired,
}

/// Result of an API resolution attempt.
#[derive(Debug)]
pub enum ResolveOutcome {
    Resolved(PermissionRequestRow),
    AlreadyResolved,
    NotFound,
}

#[derive(Debug, Clone, Copy)]
enum Decision {
    Approved,
    Denied,
}

pub struct PermissionGate {
    store: Arc<Store>,
    default_mode: PermissionMode,
    timeout: Duration,
    /// (session_id → tool_name → approved) from `scope=session` decisions.
    /// In-memory only; lives for the process lifetime.
    session_grants: RwLock<HashMap<String, HashMap<String, bool>>>,
    /// request_id → waiting runner.
    pending: Mutex<HashMap<String, oneshot::Sender<Decision>>>,
}

impl PermissionGate {
    pub fn new(store: Arc<Store>, default_mode: PermissionMode, timeout: Duration) -> Self {
        Self {
            store,
            default_mode,
            timeout,
            session_grants: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The effective global mode: the store singleton when set, else the
    /// configured default.
    pub fn mode(&self) -> PermissionMode {
        self.store
            .permission_mode()
            .ok()
            .flatten()
            .unwrap_or(self.default_mode)
    }

    pub fn set_mode(&self, mode: PermissionMode) -> Result<()> {
        self.store.set_permission_mode(mode)
    }

    /// Effective policy for one tool: store upsert over registry default.
    pub fn effective_policy(&self, tool_name: &str, registry_default: ToolPolicy) -> ToolPolicy {
        self.store
            .get_tool_policy(tool_name)
            .ok()
            .flatten()
            .unwrap_or(registry_default)
    }

    /// Gate one tool call. Blocks (cancellably) while a human decides.
    #[allow(clippy::too_many_arguments)]
    pub async fn check(
        &self,
        sink: &dyn EventSink,
        session_id: &str,
        turn_id: Option<&str>,
        step_id: Option<&str>,
        tool_call_id: &str,
        tool_name: &str,
        input: &serde_json::Value,
        registry_default: ToolPolicy,
        cancel: &CancellationToken,
    ) -> Result<GateOutcome> {
        // 1. Global override.
        if self.mode() == PermissionMode::Allow {
            return Ok(GateOutcome::Approved);
        }

        // 2. Session-scoped grants from earlier decisions.
        if let Some(approved) = self
            .session_grants
            .read()
            .get(session_id)
            .and_then(|tools| tools.get(tool_name))
        {
            return Ok(if *approved {
                GateOutcome::Approved
            } else {
                GateOutcome::Denied
            });
        }

        // 3. Effective per-tool policy.
        match self.effective_policy(tool_name, registry_default) {
            ToolPolicy::Allow => return Ok(GateOutcome::Approved),
            ToolPolicy::Deny => return Ok(GateOutcome::Denied),
            ToolPolicy::Ask => {}
        }

        // 4. Ask: open a pending request and park the runner.
        let request = self.store.create_permission_request(
            session_id, turn_id, step_id, tool_name, input,
        )?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request.id.clone(), tx);

        sink.emit(EventPayload::ToolCall {
            tool_call_id: tool_call_id.to_owned(),
            tool_name: tool_name.to_owned(),
            input: input.clone(),
            status: ToolCallStatus::PermissionRequired,
            permission_request_id: Some(request.id.clone()),
        })?;

        tracing::info!(
            session_id,
            tool = tool_name,
            request_id = %request.id,
            "tool call awaiting permission"
        );

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                self.expire(&request.id);
                GateOutcome::Expired
            }
            res = tokio::time::timeout(self.timeout, rx) => match res {
                Ok(Ok(Decision::Approved)) => GateOutcome::Approved,
                Ok(Ok(Decision::Denied)) => GateOutcome::Denied,
                // Sender dropped without a decision (turn expiry path).
                Ok(Err(_)) => GateOutcome::Expired,
                Err(_) => {
                    self.expire(&request.id);
                    GateOutcome::Expired
                }
            },
        };
        Ok(outcome)
    }

    /// Resolve a pending request from the API. Applies the decision scope
    /// and unblocks the waiting runner.
    pub fn resolve(
        &self,
        request_id: &str,
        approve: bool,
        scope: PermissionScope,
    ) -> Result<ResolveOutcome> {
        let request = match self.store.get_permission_request(request_id) {
            Ok(r) => r,
            Err(loft_domain::Error::NotFound(_)) => return Ok(ResolveOutcome::NotFound),
            Err(e) => return Err(e),
        };

        let status = if approve {
            PermissionStatus::Approved
        } else {
            PermissionStatus::Denied
        };
        let transitioned = self
            .store
            .resolve_permission_request(request_id, status, Some(scope))?;
        if !transitioned {
            return Ok(ResolveOutcome::AlreadyResolved);
        }

        match scope {
            PermissionScope::Once => {}
            PermissionScope::Session => {
                self.session_grants
                    .write()
                    .entry(request.session_id.clone())
                    .or_default()
                    .insert(request.tool_name.clone(), approve);
            }
            PermissionScope::Always => {
                let policy = if approve {
                    ToolPolicy::Allow
                } else {
                    ToolPolicy::Deny
                };
                self.store.set_tool_policy(&request.tool_name, policy)?;
            }
        }

        if let Some(tx) = self.pending.lock().remove(request_id) {
            let _ = tx.send(if approve {
                Decision::Approved
            } else {
                Decision::Denied
            });
        }

        let updated = self.store.get_permission_request(request_id)?;
        Ok(ResolveOutcome::Resolved(updated))
    }

    /// Expire every pending request of a turn (cancellation path) and wake
    /// their waiters.
    pub fn expire_for_turn(&self, turn_id: &str) {
        match self.store.expire_pending_for_turn(turn_id) {
            Ok(ids) => {
                let mut pending = self.pending.lock();
                for id in ids {
                    // Dropping the sender wakes the waiter with Expired.
                    pending.remove(&id);
                }
            }
            Err(e) => tracing::warn!(turn_id, error = %e, "failed to expire pending requests"),
        }
    }

    /// Forget session-scoped grants (session deletion).
    pub fn forget_session(&self, session_id: &str) {
        self.session_grants.write().remove(session_id);
    }

    fn expire(&self, request_id: &str) {
        if let Err(e) =
            self.store
                .resolve_permission_request(request_id, PermissionStatus::Expired, None)
        {
            tracing::warn!(request_id, error = %e, "failed to mark request expired");
        }
        self.pending.lock().remove(request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::hub::EventHub;
    use crate::runtime::writer::{EventWriter, TurnSink};

    fn setup(timeout: Duration) -> (Arc<Store>, Arc<PermissionGate>, TurnSink, String) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let hub = Arc::new(EventHub::new(64));
        let writer = Arc::new(EventWriter::new(store.clone(), hub));
        let session = store.create_session("s").unwrap();
        let gate = Arc::new(PermissionGate::new(
            store.clone(),
            PermissionMode::Ask,
            timeout,
        ));
        let sink = TurnSink {
            writer,
            session_id: session.id.clone(),
            turn_id: None,
            step_id: None,
        };
        (store, gate, sink, session.id)
    }

    #[tokio::test]
    async fn allow_mode_bypasses_everything() {
        let (store, gate, sink, session) = setup(Duration::from_secs(5));
        store.set_permission_mode(PermissionMode::Allow).unwrap();

        let cancel = CancellationToken::new();
        let outcome = gate
            .check(
                &sink,
                &session,
                None,
                None,
                "tc1",
                "write_file",
                &serde_json::json!({}),
                ToolPolicy::Deny,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(outcome, GateOutcome::Approved);
        // No request row was opened.
        assert!(store.pending_permission_requests(&session).unwrap().is_empty());
    }

    #[tokio::test]
    async fn deny_policy_short_circuits() {
        let (_store, gate, sink, session) = setup(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let outcome = gate
            .check(
                &sink,
                &session,
                None,
                None,
                "tc1",
                "write_file",
                &serde_json::json!({}),
                ToolPolicy::Deny,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(outcome, GateOutcome::Denied);
    }

    #[tokio::test]
    async fn ask_then_approve_once() {
        let (store, gate, sink, session) = setup(Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let gate2 = gate.clone();
        let store2 = store.clone();
        let session2 = session.clone();
        let resolver = tokio::spawn(async move {
            // Wait until the pending request shows up, then approve it.
            loop {
                let pending = store2.pending_permission_requests(&session2).unwrap();
                if let Some(req) = pending.first() {
                    let outcome = gate2
                        .resolve(&req.id, true, PermissionScope::Once)
                        .unwrap();
                    assert!(matches!(outcome, ResolveOutcome::Resolved(_)));
                    return req.id.clone();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let outcome = gate
            .check(
                &sink,
                &session,
                None,
                None,
                "tc1",
                "read_file",
                &serde_json::json!({"path": "README.md"}),
                ToolPolicy::Ask,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(outcome, GateOutcome::Approved);

        let request_id = resolver.await.unwrap();
        let row = store.get_permission_request(&request_id).unwrap();
        assert_eq!(row.status, PermissionStatus::Approved);
        assert_eq!(row.scope, Some(PermissionScope::Once));

        // `once` leaves no grant behind: next check must ask again.
        let pending_before = store.pending_permission_requests(&session).unwrap().len();
        assert_eq!(pending_before, 0);
    }

    #[tokio::test]
    async fn session_scope_is_remembered() {
        let (store, gate, sink, session) = setup(Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let gate2 = gate.clone();
        let store2 = store.clone();
        let session2 = session.clone();
        tokio::spawn(async move {
            loop {
                let pending = store2.pending_permission_requests(&session2).unwrap();
                if let Some(req) = pending.first() {
                    gate2
                        .resolve(&req.id, true, PermissionScope::Session)
                        .unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let first = gate
            .check(
                &sink,
                &session,
                None,
                None,
                "tc1",
                "fetch",
                &serde_json::json!({}),
                ToolPolicy::Ask,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(first, GateOutcome::Approved);

        // Second call resolves instantly from the session grant.
        let second = gate
            .check(
                &sink,
                &session,
                None,
                None,
                "tc2",
                "fetch",
                &serde_json::json!({}),
                ToolPolicy::Ask,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(second, GateOutcome::Approved);
        assert!(store.pending_permission_requests(&session).unwrap().is_empty());
    }

    #[tokio::test]
    async fn always_scope_upserts_policy() {
        let (store, gate, sink, session) = setup(Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let gate2 = gate.clone();
        let store2 = store.clone();
        let session2 = session.clone();
        tokio::spawn(async move {
            loop {
                let pending = store2.pending_permission_requests(&session2).unwrap();
                if let Some(req) = pending.first() {
                    gate2
                        .resolve(&req.id, false, PermissionScope::Always)
                        .unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let outcome = gate
            .check(
                &sink,
                &session,
                None,
                None,
                "tc1",
                "fetch",
                &serde_json::json!({}),
                ToolPolicy::Ask,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(outcome, GateOutcome::Denied);
        assert_eq!(
            store.get_tool_policy("fetch").unwrap(),
            Some(ToolPolicy::Deny)
        );
    }

    #[tokio::test]
    async fn timeout_expires_the_request() {
        let (store, gate, sink, session) = setup(Duration::from_millis(30));
        let cancel = CancellationToken::new();

        let outcome = gate
            .check(
                &sink,
                &session,
                None,
                None,
                "tc1",
                "write_file",
                &serde_json::json!({}),
                ToolPolicy::Ask,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(outcome, GateOutcome::Expired);

        // The row left pending exactly once, into `expired`.
        let all = store.pending_permission_requests(&session).unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn late_resolution_after_expiry_conflicts() {
        let (store, gate, sink, session) = setup(Duration::from_millis(20));
        let cancel = CancellationToken::new();
        gate.check(
            &sink,
            &session,
            None,
            None,
            "tc1",
            "write_file",
            &serde_json::json!({}),
            ToolPolicy::Ask,
            &cancel,
        )
        .await
        .unwrap();

        // Find the (now expired) request and try to approve it.
        let events = store.events_for_session(&session).unwrap();
        let request_id = events
            .iter()
            .find_map(|e| {
                e.payload
                    .get("permission_request_id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .expect("permission_required event carries the request id");

        let outcome = gate
            .resolve(&request_id, true, PermissionScope::Once)
            .unwrap();
        assert!(matches!(outcome, ResolveOutcome::AlreadyResolved));
    }

    #[tokio::test]
    async fn unknown_request_resolution() {
        let (_store, gate, _sink, _session) = setup(Duration::from_secs(5));
        let outcome = gate.resolve("ghost", true, PermissionScope::Once).unwrap();
        assert!(matches!(outcome, ResolveOutcome::NotFound));
    }
}
