//! Row types returned by store queries. Timestamps are RFC3339 strings,
//! exactly as stored.

use serde::{Deserialize, Serialize};

use loft_domain::policy::{PermissionScope, PermissionStatus, ToolPolicy};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Statuses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Running,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SessionStatus::Idle),
            "running" => Some(SessionStatus::Running),
            "error" => Some(SessionStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Done,
    Cancelled,
    Error,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Running => "running",
            StepStatus::Done => "done",
            StepStatus::Cancelled => "cancelled",
            StepStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(StepStatus::Running),
            "done" => Some(StepStatus::Done),
            "cancelled" => Some(StepStatus::Cancelled),
            "error" => Some(StepStatus::Error),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub title: String,
    pub status: SessionStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettingsRow {
    pub session_id: String,
    pub override_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRow {
    pub id: String,
    pub session_id: String,
    pub user_text: String,
    pub created_at: String,
}

/// One prior exchange, used for UI bootstrap and prompt history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSummary {
    pub turn_id: String,
    pub user_text: String,
    /// Text of the turn's `final` event; `None` while running or after an
    /// error/cancel.
    pub assistant_text: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRow {
    pub id: String,
    pub turn_id: String,
    pub idx: u32,
    pub status: StepStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequestRow {
    pub id: String,
    pub session_id: String,
    pub turn_id: Option<String>,
    pub step_id: Option<String>,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub status: PermissionStatus,
    pub scope: Option<PermissionScope>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPolicyRow {
    pub tool_name: String,
    pub policy: ToolPolicy,
}

/// Version metadata without the content blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVersionMeta {
    pub id: String,
    pub session_id: String,
    pub path: String,
    pub idx: u32,
    pub size: u64,
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct FileVersionRow {
    pub meta: FileVersionMeta,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeRow {
    pub id: String,
    pub session_id: String,
    pub turn_id: Option<String>,
    pub step_id: Option<String>,
    pub path: String,
    pub diff: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItemRow {
    pub id: String,
    pub session_id: String,
    pub kind: String,
    pub title: String,
    pub content_ref: String,
    pub pinned: bool,
    pub summary: Option<String>,
    pub summary_sha256: Option<String>,
    pub created_at: String,
}
