//! Per-session cancellation tokens.
//!
//! Each running turn registers a `CancellationToken` under its session id.
//! The token doubles as the busy marker: `try_register` only succeeds when
//! no turn is active, which is what gives the API its atomic 409 check.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Tracks the active turn token per session.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh token for a session. Returns `None` when a turn is
    /// already active — the caller rejects with "busy".
    pub fn try_register(&self, session_id: &str) -> Option<CancellationToken> {
        let mut tokens = self.tokens.lock();
        if tokens.contains_key(session_id) {
            return None;
        }
        let token = CancellationToken::new();
        tokens.insert(session_id.to_owned(), token.clone());
        Some(token)
    }

    /// Trip the active turn's token. Returns true if one was registered.
    pub fn cancel(&self, session_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(session_id) {
            token.cancel();
            return true;
        }
        false
    }

    /// Remove the token (called when a turn completes).
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }

    /// Whether a turn is currently active for the session.
    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }
}
