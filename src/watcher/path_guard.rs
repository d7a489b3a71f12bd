//! Path validation and root confinement.
//!
//! Every path a client asks for goes through [`validate`] before it is used as
//! a registry key or read from disk. The returned path is absolute, normalized
//! and, where the file exists, symlink-resolved by the platform.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use super::error::PathError;

/// Resolve `raw` and check it against an optional confinement root.
///
/// The containment check runs on the resolved path, so `..` segments and
/// symlinks cannot be used to step outside `root`. Existence and file type are
/// not checked here; see [`ensure_regular_file`].
pub fn validate(raw: impl AsRef<Path>, root: Option<&Path>) -> Result<PathBuf, PathError> {
    let raw = raw.as_ref();
    if raw.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }

    let canonical = resolve(raw)?;

    if let Some(root) = root {
        let root = resolve(root)?;
        if !is_contained(&canonical, &root) {
            return Err(PathError::OutsideRoot {
                path: canonical,
                root,
            });
        }
    }

    Ok(canonical)
}

/// Check that `path` names an existing regular file.
pub fn ensure_regular_file(path: &Path) -> Result<(), PathError> {
    let meta = std::fs::metadata(path).map_err(|e| PathError::Unresolvable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if meta.is_file() {
        Ok(())
    } else {
        Err(PathError::NotAFile {
            path: path.to_path_buf(),
        })
    }
}

/// Turn `path` into an absolute, normalized path.
///
/// Existing paths are canonicalized directly. For paths that do not exist yet
/// the `.`/`..` components are folded lexically and the longest existing
/// ancestor is canonicalized, so the result still lines up with a resolved
/// root.
pub fn resolve(path: &Path) -> Result<PathBuf, PathError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| PathError::Unresolvable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .join(path)
    };

    if let Ok(canonical) = absolute.canonicalize() {
        return Ok(canonical);
    }

    let normalized = normalize_lexically(&absolute);
    let mut existing = normalized.as_path();
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        if let Ok(mut base) = existing.canonicalize() {
            for name in missing.iter().rev() {
                base.push(name);
            }
            return Ok(base);
        }

        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(normalized),
        }
    }
}

/// Component-wise prefix check: `/a/bc` is not inside `/a/b`.
pub fn is_contained(path: &Path, root: &Path) -> bool {
    path == root || path.starts_with(root)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // Never climbs above the root
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}
