//! Filesystem operations rooted in the sandbox.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use loft_domain::error::{Error, Result};

use crate::paths::validate_path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct ReadResult {
    pub content: String,
    /// Size of the file on disk (not of the returned slice).
    pub size: u64,
    pub mtime: Option<String>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeEntry {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeListing {
    pub entries: Vec<TreeEntry>,
    pub truncated: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle to the configured root. Cheap to share via `Arc`.
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// The root must exist — fatal at startup otherwise.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let canonical = root.canonicalize().map_err(|e| {
            Error::Sandbox(format!(
                "sandbox root '{}' is not usable: {e}",
                root.display()
            ))
        })?;
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate a requested relative path against the root.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf> {
        validate_path(&self.root, requested)
    }

    /// Read a file, capping the returned content at `max_bytes` (cut back
    /// to a UTF-8 boundary). Binary content is replaced lossily.
    pub async fn read(&self, requested: &str, max_bytes: usize) -> Result<ReadResult> {
        let path = self.resolve(requested)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| Error::Sandbox(format!("cannot stat '{requested}': {e}")))?;
        if meta.is_dir() {
            return Err(Error::Sandbox(format!("'{requested}' is a directory")));
        }
        let bytes = fs::read(&path)
            .await
            .map_err(|e| Error::Sandbox(format!("failed to read '{requested}': {e}")))?;

        let truncated = bytes.len() > max_bytes;
        let slice = if truncated { &bytes[..max_bytes] } else { &bytes[..] };
        let mut content = String::from_utf8_lossy(slice).into_owned();
        if truncated {
            // from_utf8_lossy may have produced a replacement char for a
            // split trailing sequence; that is acceptable for display.
            content.push_str("\n[truncated]");
        }

        let mtime = meta.modified().ok().map(|t| {
            let dt: DateTime<Utc> = t.into();
            dt.to_rfc3339()
        });

        Ok(ReadResult {
            content,
            size: meta.len(),
            mtime,
            truncated,
        })
    }

    /// Full bytes of a file, or `None` when it does not exist. Used to
    /// capture pre-images before a mutation.
    pub async fn try_read_bytes(&self, requested: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(requested)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Sandbox(format!(
                "failed to read '{requested}': {e}"
            ))),
        }
    }

    /// Write/create a file atomically: unique temp sibling, flush, sync,
    /// rename into place. Parent directories are created.
    pub async fn write_atomic(&self, requested: &str, content: &[u8]) -> Result<()> {
        let path = self.resolve(requested)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Sandbox(format!("failed to create parent directory: {e}")))?;
        }

        let tmp_name = format!(
            ".{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            uuid::Uuid::new_v4().as_simple()
        );
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| Error::Sandbox(format!("failed to create temp file: {e}")))?;
        file.write_all(content)
            .await
            .map_err(|e| Error::Sandbox(format!("failed to write temp file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| Error::Sandbox(format!("failed to flush temp file: {e}")))?;
        file.sync_data()
            .await
            .map_err(|e| Error::Sandbox(format!("failed to sync temp file: {e}")))?;
        drop(file);

        fs::rename(&tmp_path, &path).await.map_err(|e| {
            let tmp = tmp_path.clone();
            tokio::spawn(async move {
                let _ = fs::remove_file(&tmp).await;
            });
            Error::Sandbox(format!("failed to rename temp file into place: {e}"))
        })?;

        Ok(())
    }

    /// Bounded BFS over the root. Entries come back in breadth-first order
    /// with per-directory name sorting for determinism; `truncated` is set
    /// when the cap cut the walk short.
    pub async fn tree(&self, max_entries: usize) -> Result<TreeListing> {
        let mut entries = Vec::new();
        let mut truncated = false;
        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        queue.push_back(self.root.clone());

        'outer: while let Some(dir) = queue.pop_front() {
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                    continue;
                }
            };

            let mut children = Vec::new();
            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|e| Error::Sandbox(format!("failed to read directory entry: {e}")))?
            {
                children.push(entry.path());
            }
            children.sort();

            for child in children {
                let meta = match fs::symlink_metadata(&child).await {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                // Symlinks are listed but never followed.
                let is_dir = meta.is_dir();
                let rel = child
                    .strip_prefix(&self.root)
                    .unwrap_or(&child)
                    .to_string_lossy()
                    .to_string();

                if entries.len() >= max_entries {
                    truncated = true;
                    break 'outer;
                }
                entries.push(TreeEntry {
                    path: rel,
                    size: if is_dir { 0 } else { meta.len() },
                    is_dir,
                });
                if is_dir && !meta.file_type().is_symlink() {
                    queue.push_back(child);
                }
            }
        }

        Ok(TreeListing { entries, truncated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, Sandbox) {
        let dir = TempDir::new().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        (dir, sandbox)
    }

    #[test]
    fn missing_root_is_fatal() {
        assert!(Sandbox::new("/definitely/not/here").is_err());
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let (_dir, sandbox) = sandbox();
        sandbox
            .write_atomic("notes/today.md", b"# Today\n")
            .await
            .unwrap();

        let result = sandbox.read("notes/today.md", 1024).await.unwrap();
        assert_eq!(result.content, "# Today\n");
        assert_eq!(result.size, 8);
        assert!(!result.truncated);
        assert!(result.mtime.is_some());
    }

    #[tokio::test]
    async fn read_caps_at_max_bytes() {
        let (_dir, sandbox) = sandbox();
        sandbox
            .write_atomic("big.txt", "x".repeat(100).as_bytes())
            .await
            .unwrap();

        let result = sandbox.read("big.txt", 10).await.unwrap();
        assert!(result.truncated);
        assert_eq!(result.size, 100);
        assert!(result.content.starts_with("xxxxxxxxxx"));
    }

    #[tokio::test]
    async fn read_directory_is_rejected() {
        let (dir, sandbox) = sandbox();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        assert!(sandbox.read("sub", 100).await.is_err());
    }

    #[tokio::test]
    async fn try_read_bytes_distinguishes_missing() {
        let (_dir, sandbox) = sandbox();
        assert!(sandbox.try_read_bytes("nope.txt").await.unwrap().is_none());

        sandbox.write_atomic("yes.txt", b"data").await.unwrap();
        assert_eq!(
            sandbox.try_read_bytes("yes.txt").await.unwrap().unwrap(),
            b"data"
        );
    }

    #[tokio::test]
    async fn atomic_write_replaces_content() {
        let (dir, sandbox) = sandbox();
        sandbox.write_atomic("a.txt", b"first").await.unwrap();
        sandbox.write_atomic("a.txt", b"second").await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(content, "second");

        // No temp litter left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn tree_is_bounded_and_relative() {
        let (dir, sandbox) = sandbox();
        std::fs::create_dir_all(dir.path().join("src/inner")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("src/inner/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "# hi").unwrap();

        let listing = sandbox.tree(100).await.unwrap();
        assert!(!listing.truncated);
        let paths: Vec<&str> = listing.entries.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"README.md"));
        assert!(paths.contains(&"src"));
        assert!(paths.contains(&"src/main.rs"));
        assert!(paths.contains(&"src/inner/lib.rs"));

        let capped = sandbox.tree(2).await.unwrap();
        assert!(capped.truncated);
        assert_eq!(capped.entries.len(), 2);
    }
}
