//! Permission vocabulary shared by the gate, the store, and the API.

use serde::{Deserialize, Serialize};

/// Per-tool policy: what happens when the model requests the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPolicy {
    Deny,
    Ask,
    Allow,
}

impl ToolPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolPolicy::Deny => "deny",
            ToolPolicy::Ask => "ask",
            ToolPolicy::Allow => "allow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deny" => Some(ToolPolicy::Deny),
            "ask" => Some(ToolPolicy::Ask),
            "allow" => Some(ToolPolicy::Allow),
            _ => None,
        }
    }
}

/// The global permission switch. `Allow` bypasses the gate for every tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    #[default]
    Ask,
    Allow,
}

impl PermissionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionMode::Ask => "ask",
            PermissionMode::Allow => "allow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ask" => Some(PermissionMode::Ask),
            "allow" => Some(PermissionMode::Allow),
            _ => None,
        }
    }
}

/// How far a permission decision reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionScope {
    #[default]
    Once,
    Session,
    Always,
}

impl PermissionScope {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionScope::Once => "once",
            PermissionScope::Session => "session",
            PermissionScope::Always => "always",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "once" => Some(PermissionScope::Once),
            "session" => Some(PermissionScope::Session),
            "always" => Some(PermissionScope::Always),
            _ => None,
        }
    }
}

/// Lifecycle of a permission request. Leaves `Pending` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl PermissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionStatus::Pending => "pending",
            PermissionStatus::Approved => "approved",
            PermissionStatus::Denied => "denied",
            PermissionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PermissionStatus::Pending),
            "approved" => Some(PermissionStatus::Approved),
            "denied" => Some(PermissionStatus::Denied),
            "expired" => Some(PermissionStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PermissionStatus::Pending)
    }
}
