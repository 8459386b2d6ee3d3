use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Pinned items at or under this size are embedded verbatim; larger
    /// ones are replaced by their cached summary.
    #[serde(default = "d_8000")]
    pub pin_inline_max_chars: usize,
    /// Deterministic history elision: keep this many most-recent complete
    /// turns, drop older ones entirely.
    #[serde(default = "d_20")]
    pub history_max_turns: usize,
    /// Extra operator instructions appended to the base system prompt.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            pin_inline_max_chars: d_8000(),
            history_max_turns: d_20(),
            instructions: None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_8000() -> usize {
    8000
}
fn d_20() -> usize {
    20
}
