use std::sync::Arc;

use loft_domain::config::Config;
use loft_domain::stream::ModelClient;
use loft_sandbox::Sandbox;
use loft_store::Store;

use crate::runtime::cancel::CancelMap;
use crate::runtime::dispatch::PathLockMap;
use crate::runtime::gate::PermissionGate;
use crate::runtime::hub::EventHub;
use crate::runtime::registry::ToolRegistry;
use crate::runtime::writer::EventWriter;

/// Shared application state passed to all API handlers and runner tasks.
///
/// Fields are grouped by concern:
/// - **Core services** — config, store, sandbox, model client
/// - **Event plumbing** — hub (fan-out) and writer (the only appender)
/// - **Tooling** — registry, permission gate, per-path mutation locks
/// - **Runtime** — per-session cancellation tokens
/// - **Security** — startup-computed token hash
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub sandbox: Arc<Sandbox>,
    pub model: Arc<dyn ModelClient>,

    // ── Event plumbing ────────────────────────────────────────────────
    pub hub: Arc<EventHub>,
    pub writer: Arc<EventWriter>,

    // ── Tooling ───────────────────────────────────────────────────────
    pub registry: Arc<ToolRegistry>,
    pub gate: Arc<PermissionGate>,
    pub path_locks: Arc<PathLockMap>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub cancel_map: Arc<CancelMap>,
    /// Shared HTTP client for the `fetch` tool.
    pub http: reqwest::Client,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
