mod context;
mod events;
mod model;
mod permissions;
mod sandbox;
mod server;
mod store;

pub use context::*;
pub use events::*;
pub use model::*;
pub use permissions::*;
pub use sandbox::*;
pub use server::*;
pub use store::*;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

impl Config {
    /// Parse a TOML document. Unknown keys are tolerated.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("parsing config: {e}")))
    }

    /// Load from a file path; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    /// Startup must abort.
    Error,
    /// Startup continues, but the operator should look.
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "error",
            ConfigSeverity::Warning => "warning",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Check the loaded config for problems. Errors are fatal at startup.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        fn err(issues: &mut Vec<ConfigIssue>, field: &str, message: String) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        }

        if self.server.port == 0 {
            err(&mut issues, "server.port", "port must be non-zero".into());
        }
        if self.sandbox.root.as_os_str().is_empty() {
            err(&mut issues, "sandbox.root", "sandbox root must be set".into());
        }
        if self.model.max_steps == 0 {
            err(&mut issues, "model.max_steps", "must allow at least one step".into());
        }
        if self.events.subscriber_queue == 0 {
            err(
                &mut issues,
                "events.subscriber_queue",
                "subscriber queue bound must be non-zero".into(),
            );
        }

        if self.events.heartbeat_secs < 5 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "events.heartbeat_secs".into(),
                message: "heartbeats below 5s add noticeable SSE traffic".into(),
            });
        }
        if self.permissions.timeout_secs < 10 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "permissions.timeout_secs".into(),
                message: "very short permission timeouts will expire human reviews".into(),
            });
        }
        for (tool, policy) in &self.permissions.tools {
            if crate::policy::ToolPolicy::parse(policy).is_none() {
                err(
                    &mut issues,
                    "permissions.tools",
                    format!("unknown policy '{policy}' for tool '{tool}'"),
                );
            }
        }

        issues
    }

    pub fn has_errors(issues: &[ConfigIssue]) -> bool {
        issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_toml() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 4180);
        assert_eq!(config.events.heartbeat_secs, 15);
        assert!(config.validate().iter().all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn partial_toml_overrides_only_named_keys() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9000

            [permissions]
            default_mode = "allow"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(
            config.permissions.default_mode,
            crate::policy::PermissionMode::Allow
        );
    }

    #[test]
    fn zero_port_is_an_error() {
        let config = Config::from_toml("[server]\nport = 0").unwrap();
        let issues = config.validate();
        assert!(Config::has_errors(&issues));
    }

    #[test]
    fn bad_tool_policy_is_an_error() {
        let config = Config::from_toml(
            r#"
            [permissions.tools]
            write_file = "sometimes"
            "#,
        )
        .unwrap();
        assert!(Config::has_errors(&config.validate()));
    }

    #[test]
    fn issue_display_includes_severity_and_field() {
        let issue = ConfigIssue {
            severity: ConfigSeverity::Warning,
            field: "events.heartbeat_secs".into(),
            message: "too chatty".into(),
        };
        let rendered = issue.to_string();
        assert!(rendered.contains("[warning]"));
        assert!(rendered.contains("events.heartbeat_secs"));
    }
}
