//! Startup wiring: config → components → `AppState`.
//!
//! Fatal conditions here (unopenable database, missing sandbox root) abort
//! the process with a non-zero exit; there is no degraded half-started
//! mode.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use loft_domain::config::Config;
use loft_domain::policy::ToolPolicy;
use loft_domain::stream::ModelClient;
use loft_sandbox::Sandbox;
use loft_store::Store;

use crate::runtime::cancel::CancelMap;
use crate::runtime::dispatch::PathLockMap;
use crate::runtime::gate::PermissionGate;
use crate::runtime::hub::EventHub;
use crate::runtime::registry::ToolRegistry;
use crate::runtime::writer::EventWriter;
use crate::state::AppState;

/// Build the full application state. The model client is injected so the
/// binary and the test suites choose their own (the binary wires the
/// scripted offline client until a provider adapter is attached).
pub fn build_state(config: Arc<Config>, model: Arc<dyn ModelClient>) -> anyhow::Result<AppState> {
    let store = Arc::new(
        Store::open(&config.store.db_path)
            .with_context(|| format!("opening store at {}", config.store.db_path.display()))?,
    );

    let sandbox = Arc::new(
        Sandbox::new(&config.sandbox.root)
            .with_context(|| format!("sandbox root {}", config.sandbox.root.display()))?,
    );

    let hub = Arc::new(EventHub::new(config.events.subscriber_queue));
    let writer = Arc::new(EventWriter::new(store.clone(), hub.clone()));

    let registry = Arc::new(ToolRegistry::new());
    apply_policy_overrides(&config, &registry, &store);

    let gate = Arc::new(PermissionGate::new(
        store.clone(),
        config.permissions.default_mode,
        Duration::from_secs(config.permissions.timeout_secs),
    ));

    let http = reqwest::Client::builder()
        .user_agent(concat!("loftd/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(60))
        .build()
        .context("building HTTP client")?;

    let api_token_hash = read_token_hash(&config.server.api_token_env);

    Ok(AppState {
        config,
        store,
        sandbox,
        model,
        hub,
        writer,
        registry,
        gate,
        path_locks: Arc::new(PathLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        http,
        api_token_hash,
    })
}

/// Persist config-declared per-tool policies as store upserts so they
/// behave exactly like `scope=always` decisions.
fn apply_policy_overrides(config: &Config, registry: &ToolRegistry, store: &Store) {
    for (tool, policy) in &config.permissions.tools {
        let Some(policy) = ToolPolicy::parse(policy) else {
            // validate() rejects bad values before startup reaches here.
            continue;
        };
        if registry.get(tool).is_none() {
            tracing::warn!(tool = %tool, "policy override for unknown tool ignored");
            continue;
        }
        if let Err(e) = store.set_tool_policy(tool, policy) {
            tracing::warn!(tool = %tool, error = %e, "failed to apply policy override");
        }
    }
}

fn read_token_hash(env_name: &str) -> Option<Vec<u8>> {
    match std::env::var(env_name) {
        Ok(token) if !token.trim().is_empty() => {
            Some(Sha256::digest(token.trim().as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env = env_name,
                "no API token configured; write endpoints are unauthenticated"
            );
            None
        }
    }
}
