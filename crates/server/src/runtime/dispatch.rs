//! Tool dispatch — executes gated tool calls against the sandbox, the
//! store, and the network, and emits their side-channel events (diffs)
//! through the caller's sink.

use std::collections::HashMap;
use std::sync::Arc;

use async_recursion::async_recursion;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use loft_domain::error::{Error, Result};
use loft_domain::event::EventPayload;
use loft_sandbox::{apply_unified_patch, unified_diff};
use loft_store::FileVersionMeta;

use crate::state::AppState;

use super::subagent;
use super::writer::EventSink;

/// Cap on the body bytes kept from a `fetch` response.
const FETCH_MAX_BYTES: usize = 256 * 1024;
/// Default and hard cap for `search` results.
const SEARCH_DEFAULT_RESULTS: usize = 100;
const SEARCH_MAX_RESULTS: usize = 500;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-path mutation locks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serializes mutations per `(session, path)` so pre-image snapshots and
/// version indices stay consistent under concurrent tools.
pub struct PathLockMap {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Default for PathLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PathLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(
        &self,
        session_id: &str,
        path: &str,
    ) -> tokio::sync::OwnedMutexGuard<()> {
        let key = format!("{session_id}\u{0}{path}");
        let lock = self.locks.lock().entry(key).or_default().clone();
        lock.lock_owned().await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a tool handler needs for one call.
pub struct ToolCtx {
    pub state: AppState,
    pub session_id: String,
    pub turn_id: Option<String>,
    pub step_id: Option<String>,
    pub cancel: CancellationToken,
    pub sink: Arc<dyn EventSink>,
    /// True inside a sub-agent; blocks nested spawning.
    pub is_subagent: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute one approved tool call. Returns `(output, is_error)`.
///
/// Boxed for recursion: `spawn_subagent` re-enters the dispatcher through
/// the child loop.
#[async_recursion]
pub async fn dispatch_tool(
    ctx: &ToolCtx,
    tool_call_id: &str,
    tool_name: &str,
    args: &Value,
) -> (String, bool) {
    let result = match tool_name {
        "read_file" => read_file(ctx, args).await,
        "write_file" => write_file(ctx, tool_call_id, args).await,
        "apply_patch" => apply_patch(ctx, tool_call_id, args).await,
        "list_files" => list_files(ctx).await,
        "search" => search(ctx, args).await,
        "fetch" => fetch(ctx, args).await,
        "spawn_subagent" => return subagent::spawn_subagent(ctx, tool_call_id, args).await,
        other => Err(Error::Other(format!("unknown tool: {other}"))),
    };

    match result {
        Ok(value) => (value.to_string(), false),
        Err(e) => (e.to_string(), true),
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Other(format!("missing required argument '{key}'")))
}

// ── read_file ───────────────────────────────────────────────────────

async fn read_file(ctx: &ToolCtx, args: &Value) -> Result<Value> {
    let path = arg_str(args, "path")?;
    let cap = ctx.state.config.sandbox.max_read_bytes;
    let max_bytes = args
        .get("max_bytes")
        .and_then(|v| v.as_u64())
        .map(|n| (n as usize).min(cap))
        .unwrap_or(cap);

    let result = ctx.state.sandbox.read(path, max_bytes).await?;
    Ok(json!({
        "path": path,
        "content": result.content,
        "size": result.size,
        "mtime": result.mtime,
        "truncated": result.truncated,
    }))
}

// ── write_file / apply_patch ────────────────────────────────────────

async fn write_file(ctx: &ToolCtx, tool_call_id: &str, args: &Value) -> Result<Value> {
    let path = arg_str(args, "path")?;
    let content = arg_str(args, "content")?;
    let record = mutate_file(ctx, Some(tool_call_id), path, content, "write").await?;
    Ok(json!({
        "path": path,
        "bytes_written": content.len(),
        "previous_version": record.version.as_ref().map(|v| v.idx),
    }))
}

async fn apply_patch(ctx: &ToolCtx, tool_call_id: &str, args: &Value) -> Result<Value> {
    let path = arg_str(args, "path")?;
    let patch = arg_str(args, "patch")?;

    // Parse/apply against the current content before taking any snapshot,
    // so a rejected hunk leaves no bookkeeping behind.
    let pre = ctx
        .state
        .sandbox
        .try_read_bytes(path)
        .await?
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default();
    let new_content = apply_unified_patch(&pre, patch)?;

    let record = mutate_file(ctx, Some(tool_call_id), path, &new_content, "patch").await?;
    Ok(json!({
        "path": path,
        "bytes_written": new_content.len(),
        "previous_version": record.version.as_ref().map(|v| v.idx),
    }))
}

/// Outcome of one file mutation.
pub struct MutationRecord {
    /// Pre-image snapshot; `None` when the file did not exist before.
    pub version: Option<FileVersionMeta>,
    pub diff: String,
}

/// Shared mutation path for `write_file`, `apply_patch`, and rollback:
/// snapshot the pre-image, write atomically, persist the change row, then
/// emit the `diff` event. The version and change rows are durable before
/// anything is published.
pub async fn mutate_file(
    ctx: &ToolCtx,
    tool_call_id: Option<&str>,
    path: &str,
    new_content: &str,
    note: &str,
) -> Result<MutationRecord> {
    // Path validation up front; the guard then serializes this path.
    ctx.state.sandbox.resolve(path)?;
    let _guard = ctx.state.path_locks.acquire(&ctx.session_id, path).await;

    let pre_bytes = ctx.state.sandbox.try_read_bytes(path).await?;
    let version = match &pre_bytes {
        Some(bytes) => Some(ctx.state.store.add_file_version(
            &ctx.session_id,
            path,
            bytes,
            Some(note),
        )?),
        None => None,
    };

    ctx.state
        .sandbox
        .write_atomic(path, new_content.as_bytes())
        .await?;

    let pre_text = pre_bytes
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default();
    let diff = unified_diff(path, &pre_text, new_content);

    ctx.state.store.add_file_change(
        &ctx.session_id,
        ctx.turn_id.as_deref(),
        ctx.step_id.as_deref(),
        path,
        &diff,
    )?;

    ctx.sink.emit(EventPayload::Diff {
        tool_call_id: tool_call_id.map(str::to_owned),
        path: path.to_owned(),
        diff: diff.clone(),
    })?;

    Ok(MutationRecord { version, diff })
}

// ── list_files ──────────────────────────────────────────────────────

async fn list_files(ctx: &ToolCtx) -> Result<Value> {
    let listing = ctx
        .state
        .sandbox
        .tree(ctx.state.config.sandbox.tree_max_entries)
        .await?;
    Ok(json!({
        "entries": listing.entries,
        "count": listing.entries.len(),
        "truncated": listing.truncated,
    }))
}

// ── search ──────────────────────────────────────────────────────────

async fn search(ctx: &ToolCtx, args: &Value) -> Result<Value> {
    let pattern = arg_str(args, "pattern")?;
    let max_results = args
        .get("max_results")
        .and_then(|v| v.as_u64())
        .map(|n| (n as usize).min(SEARCH_MAX_RESULTS))
        .unwrap_or(SEARCH_DEFAULT_RESULTS);

    let re = regex::Regex::new(pattern)
        .map_err(|e| Error::Other(format!("invalid pattern: {e}")))?;

    let listing = ctx
        .state
        .sandbox
        .tree(ctx.state.config.sandbox.tree_max_entries)
        .await?;

    let mut matches = Vec::new();
    let mut scanned = 0usize;
    'files: for entry in listing.entries.iter().filter(|e| !e.is_dir) {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let read = match ctx
            .state
            .sandbox
            .read(&entry.path, ctx.state.config.sandbox.max_read_bytes)
            .await
        {
            Ok(r) => r,
            Err(_) => continue,
        };
        scanned += 1;
        for (line_no, line) in read.content.lines().enumerate() {
            if re.is_match(line) {
                let mut text = line.trim_end().to_string();
                if text.len() > 200 {
                    text.truncate(200);
                }
                matches.push(json!({
                    "path": entry.path,
                    "line": line_no + 1,
                    "text": text,
                }));
                if matches.len() >= max_results {
                    break 'files;
                }
            }
        }
    }

    Ok(json!({
        "pattern": pattern,
        "matches": matches,
        "count": matches.len(),
        "files_scanned": scanned,
        "truncated": matches.len() >= max_results || listing.truncated,
    }))
}

// ── fetch ───────────────────────────────────────────────────────────

async fn fetch(ctx: &ToolCtx, args: &Value) -> Result<Value> {
    let url = arg_str(args, "url")?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::Http(format!(
            "only http(s) URLs are allowed (got '{url}')"
        )));
    }

    let response = ctx
        .state
        .http
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Http(format!("request failed: {e}")))?;

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let mut body: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut response = response;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::Http(format!("reading body: {e}")))?
    {
        if body.len() + chunk.len() > FETCH_MAX_BYTES {
            body.extend_from_slice(&chunk[..FETCH_MAX_BYTES - body.len()]);
            truncated = true;
            break;
        }
        body.extend_from_slice(&chunk);
    }

    Ok(json!({
        "url": url,
        "status": status,
        "content_type": content_type,
        "body": String::from_utf8_lossy(&body),
        "truncated": truncated,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rollback (REST surface, not a registered tool)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Restore `path` to a stored version. The current content is snapshotted
/// first, so a rollback can itself be rolled back. The emitted `diff`
/// carries no tool_call_id (administrative mutation).
pub async fn rollback(
    state: &AppState,
    session_id: &str,
    path: &str,
    version_id: &str,
) -> Result<Value> {
    let version = state.store.get_file_version(version_id)?;
    if version.meta.session_id != session_id {
        return Err(Error::NotFound(format!("file version {version_id}")));
    }
    if version.meta.path != path {
        return Err(Error::Other(format!(
            "version {version_id} belongs to '{}', not '{path}'",
            version.meta.path
        )));
    }

    let restored = String::from_utf8_lossy(&version.content).into_owned();
    let ctx = ToolCtx {
        state: state.clone(),
        session_id: session_id.to_owned(),
        turn_id: None,
        step_id: None,
        cancel: CancellationToken::new(),
        sink: Arc::new(super::writer::TurnSink {
            writer: state.writer.clone(),
            session_id: session_id.to_owned(),
            turn_id: None,
            step_id: None,
        }),
        is_subagent: false,
    };
    let record = mutate_file(&ctx, None, path, &restored, "rollback").await?;

    Ok(json!({
        "path": path,
        "restored_from": version.meta.id,
        "restored_idx": version.meta.idx,
        "snapshot_version": record.version.as_ref().map(|v| v.idx),
    }))
}
