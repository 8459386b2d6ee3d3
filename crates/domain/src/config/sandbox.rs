use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox FS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Root directory all tool file access is confined to. Must exist at
    /// startup.
    #[serde(default = "d_root")]
    pub root: PathBuf,
    /// Default byte cap for `read_file` (callers may request less).
    #[serde(default = "d_256k")]
    pub max_read_bytes: usize,
    /// Entry cap for the bounded tree walk.
    #[serde(default = "d_2000")]
    pub tree_max_entries: usize,
    /// Byte cap when returning stored file-version content over REST.
    #[serde(default = "d_256k")]
    pub version_max_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: d_root(),
            max_read_bytes: d_256k(),
            tree_max_entries: d_2000(),
            version_max_bytes: d_256k(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_root() -> PathBuf {
    PathBuf::from("./workspace")
}
fn d_256k() -> usize {
    256 * 1024
}
fn d_2000() -> usize {
    2000
}
