use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::policy::PermissionMode;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permissions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Global mode on first boot. Later changes via the API persist in the
    /// store and win over this value.
    #[serde(default)]
    pub default_mode: PermissionMode,
    /// How long an `ask` waits for a human before expiring (= denied).
    #[serde(default = "d_300")]
    pub timeout_secs: u64,
    /// Per-tool policy overrides applied over the registry defaults at
    /// startup, e.g. `write_file = "allow"`. Values are validated against
    /// the deny/ask/allow vocabulary.
    #[serde(default)]
    pub tools: HashMap<String, String>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            default_mode: PermissionMode::default(),
            timeout_secs: d_300(),
            tools: HashMap::new(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_300() -> u64 {
    300
}
