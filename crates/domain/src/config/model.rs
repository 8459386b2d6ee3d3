use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model / runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model identifier passed to the model client. Sessions may
    /// override it via their settings.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Maximum agent iterations (LLM call + tools) per turn before the
    /// runner force-stops.
    #[serde(default = "d_25")]
    pub max_steps: u32,
    /// Default hard timeout for one tool invocation.
    #[serde(default = "d_120")]
    pub tool_timeout_secs: u64,
    /// Per-tool timeout overrides in seconds, e.g. `fetch = 30`.
    #[serde(default)]
    pub tool_timeouts: HashMap<String, u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            max_steps: d_25(),
            tool_timeout_secs: d_120(),
            tool_timeouts: HashMap::new(),
        }
    }
}

impl ModelConfig {
    /// Effective timeout for a named tool.
    pub fn timeout_for(&self, tool_name: &str) -> std::time::Duration {
        let secs = self
            .tool_timeouts
            .get(tool_name)
            .copied()
            .unwrap_or(self.tool_timeout_secs);
        std::time::Duration::from_secs(secs)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_25() -> u32 {
    25
}
fn d_120() -> u64 {
    120
}
