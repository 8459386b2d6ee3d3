//! Shared harness for the integration suites: an `AppState` over a temp
//! sandbox, an in-memory store, and an injectable model client.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use loft_domain::config::Config;
use loft_domain::error::Result;
use loft_domain::event::EventEnvelope;
use loft_domain::scripted::{ScriptTurn, ScriptedClient};
use loft_domain::stream::{BoxStream, ModelClient, ModelEvent, ModelRequest};
use loft_sandbox::Sandbox;
use loft_server::runtime::cancel::CancelMap;
use loft_server::runtime::dispatch::PathLockMap;
use loft_server::runtime::gate::PermissionGate;
use loft_server::runtime::hub::EventHub;
use loft_server::runtime::registry::ToolRegistry;
use loft_server::runtime::writer::EventWriter;
use loft_server::runtime::{spawn_turn, TurnInput};
use loft_server::state::AppState;
use loft_store::Store;

pub struct TestHarness {
    pub state: AppState,
    /// Keeps the sandbox directory alive for the test's duration.
    pub sandbox_dir: TempDir,
}

pub fn harness_with_model(model: Arc<dyn ModelClient>) -> TestHarness {
    harness_configured(model, |_| {})
}

pub fn harness_configured(
    model: Arc<dyn ModelClient>,
    configure: impl FnOnce(&mut Config),
) -> TestHarness {
    let sandbox_dir = TempDir::new().unwrap();

    let mut config = Config::default();
    config.sandbox.root = sandbox_dir.path().to_path_buf();
    config.permissions.timeout_secs = 5;
    configure(&mut config);
    let config = Arc::new(config);

    let store = Arc::new(Store::open_in_memory().unwrap());
    let sandbox = Arc::new(Sandbox::new(sandbox_dir.path()).unwrap());
    let hub = Arc::new(EventHub::new(config.events.subscriber_queue));
    let writer = Arc::new(EventWriter::new(store.clone(), hub.clone()));
    let gate = Arc::new(PermissionGate::new(
        store.clone(),
        config.permissions.default_mode,
        Duration::from_secs(config.permissions.timeout_secs),
    ));

    let state = AppState {
        config,
        store,
        sandbox,
        model,
        hub,
        writer,
        registry: Arc::new(ToolRegistry::new()),
        gate,
        path_locks: Arc::new(PathLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        http: reqwest::Client::new(),
        api_token_hash: None,
    };

    TestHarness { state, sandbox_dir }
}

pub fn harness(turns: Vec<ScriptTurn>) -> TestHarness {
    harness_with_model(Arc::new(ScriptedClient::new(turns)))
}

/// Create a turn, run it to completion, and return the session's full
/// event log.
pub async fn run_turn_to_completion(
    state: &AppState,
    session_id: &str,
    user_text: &str,
) -> Vec<EventEnvelope> {
    let turn = state.store.create_turn(session_id, user_text).unwrap();
    let cancel = state.cancel_map.try_register(session_id).unwrap();
    let handle = spawn_turn(
        state.clone(),
        TurnInput {
            session_id: session_id.to_owned(),
            turn_id: turn.id,
            user_text: user_text.to_owned(),
        },
        cancel,
    );
    handle.await.unwrap();
    state.store.events_for_session(session_id).unwrap()
}

/// Kinds of the given events, in order.
pub fn kinds(events: &[EventEnvelope]) -> Vec<&str> {
    events.iter().map(|e| e.kind.as_str()).collect()
}

/// A model client that yields each scripted event after a fixed delay,
/// for cancellation tests that need a genuinely in-flight stream.
pub struct SlowModel {
    inner: ScriptedClient,
    delay: Duration,
}

impl SlowModel {
    pub fn new(turns: Vec<ScriptTurn>, delay: Duration) -> Self {
        Self {
            inner: ScriptedClient::new(turns),
            delay,
        }
    }
}

#[async_trait::async_trait]
impl ModelClient for SlowModel {
    async fn open(&self, req: ModelRequest) -> Result<BoxStream<'static, ModelEvent>> {
        use futures_util::StreamExt;
        let stream = self.inner.open(req).await?;
        let delay = self.delay;
        Ok(Box::pin(stream.then(move |ev| async move {
            tokio::time::sleep(delay).await;
            ev
        })))
    }

    fn name(&self) -> &str {
        "slow-scripted"
    }
}
