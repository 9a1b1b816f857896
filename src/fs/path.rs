//! Path jail for transaction roots.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Resolves `path` against `root`, refusing anything that is not a strict
/// descendant of `root`.
///
/// Both the descendant check and a scan for `..` components are applied, so
/// `a/../../etc` is rejected even though it textually starts inside root.
/// The parent directory is then resolved on disk, so a symlink inside the
/// root that points elsewhere cannot be used to reach outside it. The leaf
/// itself is not followed; see [`resolve_within_followed`].
pub fn resolve_within(root: &Path, path: &Path) -> Result<PathBuf> {
    let joined = root.join(path);

    let traverses = joined
        .components()
        .any(|component| matches!(component, Component::ParentDir));

    if traverses || joined == root || !joined.starts_with(root) {
        return Err(outside(root, path));
    }

    let parent = joined.parent().unwrap_or(root);
    ensure_resolves_within(root, path, parent)?;

    Ok(joined)
}

/// Like [`resolve_within`], but also follows the leaf if it is a symlink.
///
/// Used for paths whose target is read or modified through the link, such
/// as link sources and ownership changes.
pub fn resolve_within_followed(root: &Path, path: &Path) -> Result<PathBuf> {
    let joined = resolve_within(root, path)?;
    ensure_resolves_within(root, path, &joined)?;
    Ok(joined)
}

fn outside(root: &Path, path: &Path) -> Error {
    Error::PathOutsideRoot {
        path: path.to_path_buf(),
        root: root.to_path_buf(),
    }
}

fn ensure_resolves_within(root: &Path, path: &Path, candidate: &Path) -> Result<()> {
    let real_root = resolve_existing_prefix(root)?;
    let real = resolve_existing_prefix(candidate).map_err(|_| outside(root, path))?;

    if real.starts_with(&real_root) {
        Ok(())
    } else {
        Err(outside(root, path))
    }
}

/// Canonicalizes the deepest ancestor of `path` that exists and appends the
/// missing components unchanged. Dangling symlinks are an error.
fn resolve_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();

    while std::fs::symlink_metadata(existing).is_err() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return Ok(absolute.clone()),
        }
    }

    let mut resolved = std::fs::canonicalize(existing)?;
    resolved.extend(missing.iter().rev());
    Ok(resolved)
}
