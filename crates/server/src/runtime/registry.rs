//! The tool registry — names, JSON schemas, default policies, enable flags.
//!
//! The registry itself is fixed at startup; what changes at runtime is the
//! per-tool *policy*, which lives in the store (upserted by `scope=always`
//! decisions or the admin API) and is consulted by the permission gate.
//! There is deliberately no shell/exec tool here.

use serde::Serialize;

use loft_domain::message::ToolDefinition;
use loft_domain::policy::ToolPolicy;

/// Tools a sub-agent sees when the spawner passes no allowlist.
pub const DEFAULT_SUBAGENT_TOOLS: &[&str] = &["read_file", "search", "fetch"];

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
    pub default_policy: ToolPolicy,
    pub enabled: bool,
}

pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: builtin_tools(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name && t.enabled)
    }

    /// All enabled tool specs (admin API listing).
    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter().filter(|t| t.enabled)
    }

    /// Definitions exposed to the model for a parent turn.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.specs().map(spec_to_definition).collect()
    }

    /// Definitions for a sub-agent: the allowlist intersected with enabled
    /// tools. `spawn_subagent` is always stripped — nesting depth is 1.
    pub fn definitions_for(&self, allowlist: &[String]) -> Vec<ToolDefinition> {
        self.specs()
            .filter(|t| t.name != "spawn_subagent")
            .filter(|t| allowlist.iter().any(|a| a == &t.name))
            .map(spec_to_definition)
            .collect()
    }
}

fn spec_to_definition(spec: &ToolSpec) -> ToolDefinition {
    ToolDefinition {
        name: spec.name.clone(),
        description: spec.description.clone(),
        parameters: spec.parameters.clone(),
    }
}

fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "read_file".into(),
            description: "Read a file from the workspace. Returns content, size, and mtime; \
                          large files are truncated."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the workspace root" },
                    "max_bytes": { "type": "integer", "description": "Optional byte cap for the returned content" }
                },
                "required": ["path"]
            }),
            default_policy: ToolPolicy::Allow,
            enabled: true,
        },
        ToolSpec {
            name: "write_file".into(),
            description: "Create or overwrite a file in the workspace. The previous content is \
                          versioned and a diff is recorded."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the workspace root" },
                    "content": { "type": "string", "description": "Full new file content" }
                },
                "required": ["path", "content"]
            }),
            default_policy: ToolPolicy::Ask,
            enabled: true,
        },
        ToolSpec {
            name: "apply_patch".into(),
            description: "Apply a unified diff to one workspace file. Context lines must match \
                          exactly; the previous content is versioned."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the workspace root" },
                    "patch": { "type": "string", "description": "Unified diff with @@ hunk headers" }
                },
                "required": ["path", "patch"]
            }),
            default_policy: ToolPolicy::Ask,
            enabled: true,
        },
        ToolSpec {
            name: "list_files".into(),
            description: "List workspace files and directories (bounded breadth-first walk)."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
            default_policy: ToolPolicy::Allow,
            enabled: true,
        },
        ToolSpec {
            name: "search".into(),
            description: "Search workspace files with a regular expression. Returns matching \
                          lines with their paths and line numbers."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regular expression" },
                    "max_results": { "type": "integer", "description": "Cap on returned matches (default 100)" }
                },
                "required": ["pattern"]
            }),
            default_policy: ToolPolicy::Allow,
            enabled: true,
        },
        ToolSpec {
            name: "fetch".into(),
            description: "HTTP GET a http(s) URL. The response body is size-capped.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Absolute http or https URL" }
                },
                "required": ["url"]
            }),
            default_policy: ToolPolicy::Ask,
            enabled: true,
        },
        ToolSpec {
            name: "spawn_subagent".into(),
            description: "Delegate a focused task to a nested agent with a restricted tool set. \
                          Returns the sub-agent's final answer."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "label": { "type": "string", "description": "Short role description, used as the child's system prompt" },
                    "task": { "type": "string", "description": "The task for the sub-agent" },
                    "tools": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Optional tool allowlist (default: read_file, search, fetch)"
                    }
                },
                "required": ["label", "task"]
            }),
            default_policy: ToolPolicy::Ask,
            enabled: true,
        },
    ]
}
