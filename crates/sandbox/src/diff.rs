//! Unified-diff generation and application.
//!
//! Generation goes through `similar`; application is a strict hunk applier:
//! context and deletion lines must match the file exactly, with the
//! `@@ -N` header used as the first candidate position and an in-order
//! forward scan as fallback. No fuzzy matching: a hunk that does not
//! match verbatim is a conflict and the patch is rejected.

use similar::TextDiff;

use loft_domain::error::{Error, Result};

/// Render a unified diff between two contents with `a/<path>`/`b/<path>`
/// headers and three lines of context.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
enum HunkLine {
    /// Must exist in the file, kept verbatim.
    Context(String),
    /// Removed from the file.
    Del(String),
    /// Inserted into the file.
    Add(String),
}

#[derive(Debug, Clone)]
struct Hunk {
    /// 1-based old-file start from `@@ -N[,M]`; a position hint only.
    old_start: Option<usize>,
    lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines that must already be present (Context + Del), in order.
    fn search_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Del(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }
}

fn parse_hunks(patch: &str) -> Result<Vec<Hunk>> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in patch.lines() {
        // File headers and missing-newline markers carry no content.
        if line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with("\\ ") {
            continue;
        }
        if line.starts_with("@@") {
            if let Some(h) = current.take() {
                if !h.lines.is_empty() {
                    hunks.push(h);
                }
            }
            current = Some(Hunk {
                old_start: parse_old_start(line),
                lines: Vec::new(),
            });
            continue;
        }
        if let Some(ref mut h) = current {
            if let Some(rest) = line.strip_prefix(' ') {
                h.lines.push(HunkLine::Context(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('-') {
                h.lines.push(HunkLine::Del(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('+') {
                h.lines.push(HunkLine::Add(rest.to_string()));
            } else if line.is_empty() {
                // Blank diff line with no prefix = empty context line.
                h.lines.push(HunkLine::Context(String::new()));
            } else {
                return Err(Error::Sandbox(format!(
                    "unrecognized patch line: '{line}'"
                )));
            }
        }
    }

    if let Some(h) = current {
        if !h.lines.is_empty() {
            hunks.push(h);
        }
    }

    if hunks.is_empty() {
        return Err(Error::Sandbox(
            "no hunks found in patch; expected unified diff with @@ headers".into(),
        ));
    }
    Ok(hunks)
}

/// Extract the 1-based old-file start from `@@ -N[,M] +N[,M] @@`.
fn parse_old_start(header: &str) -> Option<usize> {
    let inner = header
        .trim_start_matches('@')
        .trim()
        .split("@@")
        .next()
        .unwrap_or("")
        .trim();
    for part in inner.split_whitespace() {
        if let Some(rest) = part.strip_prefix('-') {
            if let Ok(n) = rest.split(',').next().unwrap_or(rest).parse::<usize>() {
                return Some(n);
            }
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Application
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Apply a unified diff to `original`.
///
/// Hunks must apply in order without overlap. A non-empty result is
/// normalized to end with a trailing newline.
pub fn apply_unified_patch(original: &str, patch: &str) -> Result<String> {
    let hunks = parse_hunks(patch)?;
    let lines: Vec<&str> = original.lines().collect();

    let mut out: Vec<String> = Vec::new();
    let mut cursor = 0usize;

    for (hunk_no, hunk) in hunks.iter().enumerate() {
        let search = hunk.search_lines();

        let pos = if search.is_empty() {
            // Pure insertion: at the hinted line, or at the end.
            hunk.old_start
                .map(|h| h.saturating_sub(1).min(lines.len()))
                .unwrap_or(lines.len())
                .max(cursor)
        } else {
            find_hunk_position(&lines, &search, cursor, hunk.old_start).ok_or_else(|| {
                Error::Sandbox(format!(
                    "hunk {} does not apply: context not found at or after line {}",
                    hunk_no + 1,
                    cursor + 1
                ))
            })?
        };

        out.extend(lines[cursor..pos].iter().map(|s| s.to_string()));
        for line in &hunk.lines {
            match line {
                HunkLine::Context(s) => out.push(s.clone()),
                HunkLine::Add(s) => out.push(s.clone()),
                HunkLine::Del(_) => {}
            }
        }
        cursor = pos + search.len();
    }

    out.extend(lines[cursor..].iter().map(|s| s.to_string()));

    let mut result = out.join("\n");
    if !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

/// First position at or after `cursor` where `search` matches exactly,
/// trying the `@@ -N` hint before scanning.
fn find_hunk_position(
    lines: &[&str],
    search: &[&str],
    cursor: usize,
    hint: Option<usize>,
) -> Option<usize> {
    let n = search.len();
    if lines.len() < n {
        return None;
    }

    let matches_at = |pos: usize| pos + n <= lines.len() && &lines[pos..pos + n] == search;

    if let Some(h) = hint {
        let pos = h.saturating_sub(1);
        if pos >= cursor && matches_at(pos) {
            return Some(pos);
        }
    }

    (cursor..=(lines.len() - n)).find(|&pos| matches_at(pos))
}
