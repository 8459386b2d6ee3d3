use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event hub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Bounded queue depth per SSE subscriber. Overflow disconnects the
    /// subscriber; it catches up by replaying with `Last-Event-ID`.
    #[serde(default = "d_512")]
    pub subscriber_queue: usize,
    /// Heartbeat interval for idle SSE connections.
    #[serde(default = "d_15")]
    pub heartbeat_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            subscriber_queue: d_512(),
            heartbeat_secs: d_15(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_512() -> usize {
    512
}
fn d_15() -> u64 {
    15
}
