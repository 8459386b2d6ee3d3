//! Sandboxed filesystem primitives — all tool file access is confined to a
//! configured root, every path is validated before use, and mutations are
//! atomic (temp sibling + rename).

mod diff;
mod fs_ops;
mod paths;

pub use diff::{apply_unified_patch, unified_diff};
pub use fs_ops::{ReadResult, Sandbox, TreeEntry, TreeListing};
pub use paths::validate_path;
