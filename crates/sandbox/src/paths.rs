//! Path validation for the sandbox root.

use std::path::{Component, Path, PathBuf};

use loft_domain::error::{Error, Result};

/// Validate and resolve a requested path within the sandbox root.
///
/// 1. Rejects absolute paths and raw `..` components before any resolution.
/// 2. Joins the requested path onto the canonicalized root.
/// 3. Canonicalizes the result (or, for not-yet-existing targets, the
///    longest existing ancestor plus the remaining components) and checks
///    containment — this is what catches symlinks pointing outside.
///
/// Returns the validated absolute path.
pub fn validate_path(root: &Path, requested: &str) -> Result<PathBuf> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(Error::Sandbox(format!(
            "absolute paths are not allowed; use a path relative to the sandbox root (got '{requested}')"
        )));
    }

    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(Error::Sandbox(
                "path must not contain '..' components".into(),
            ));
        }
    }

    let canonical_root = root.canonicalize().map_err(|e| {
        Error::Sandbox(format!("cannot resolve sandbox root '{}': {e}", root.display()))
    })?;

    let candidate = canonical_root.join(requested_path);

    // Canonicalize the target if it exists; otherwise canonicalize the
    // nearest existing ancestor and re-append the tail.
    let resolved = if candidate.exists() {
        candidate.canonicalize().map_err(|e| {
            Error::Sandbox(format!("cannot resolve path '{}': {e}", candidate.display()))
        })?
    } else {
        let mut existing = candidate.as_path();
        let mut tail_parts: Vec<&std::ffi::OsStr> = Vec::new();
        loop {
            if existing.exists() {
                break;
            }
            match existing.parent() {
                Some(parent) => {
                    if let Some(file_name) = existing.file_name() {
                        tail_parts.push(file_name);
                    }
                    existing = parent;
                }
                None => break,
            }
        }
        let mut resolved = existing.canonicalize().map_err(|e| {
            Error::Sandbox(format!(
                "cannot resolve ancestor of '{}': {e}",
                candidate.display()
            ))
        })?;
        for part in tail_parts.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(Error::Sandbox(format!(
            "path '{}' resolves outside the sandbox root '{}'",
            requested,
            canonical_root.display()
        )));
    }

    Ok(resolved)
}
