//! Workspace scoping for file operations.
//!
//! Requested paths are resolved against the workspace root and must stay
//! inside it after symlinks are resolved. Paths that do not exist yet (for
//! writes) are checked through their nearest existing ancestor.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("File path is empty")]
    Empty,

    #[error("Path traversal detected in '{path}'")]
    Traversal { path: String },

    #[error("File path outside workspace: '{path}'")]
    OutsideWorkspace { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// Resolve `requested` (relative to `workspace`, or absolute) to a path
/// guaranteed to live under the canonical workspace root.
pub fn resolve_in_workspace(workspace: &Path, requested: &str) -> Result<PathBuf, PathError> {
    let requested = requested.trim();
    if requested.is_empty() {
        return Err(PathError::Empty);
    }

    let input = Path::new(requested);
    if input.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(PathError::Traversal {
            path: requested.into(),
        });
    }

    let root = workspace
        .canonicalize()
        .map_err(|e| PathError::CanonicalizeFailed {
            path: workspace.display().to_string(),
            reason: format!("Workspace: {e}"),
        })?;

    let candidate = if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    };

    // Canonicalize the deepest part that exists and re-attach the rest.
    let mut existing = candidate.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing
        .canonicalize()
        .map_err(|e| PathError::CanonicalizeFailed {
            path: requested.into(),
            reason: e.to_string(),
        })?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }

    if !resolved.starts_with(&root) {
        return Err(PathError::OutsideWorkspace {
            path: requested.into(),
        });
    }
    Ok(resolved)
}
