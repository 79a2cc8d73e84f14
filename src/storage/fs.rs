//! Filesystem helpers for fan-out directories and relative paths.

use crate::error::Result;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Component, Path};
use walkdir::WalkDir;

/// Remove empty directories from `start` upward, stopping at `root`.
///
/// `root` itself is never removed. Stops at the first non-empty directory.
pub fn remove_empty_parents(start: &Path, root: &Path) {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

/// Remove a file, then any fan-out parents it leaves empty below `root`.
///
/// Returns `false` if the file did not exist.
pub fn remove_file_and_empty_parents(path: &Path, root: &Path) -> Result<bool> {
    let existed = match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };
    if let Some(parent) = path.parent() {
        remove_empty_parents(parent, root);
    }
    Ok(existed)
}

/// Names of every object stored in a fan-out directory.
///
/// Reassembles `<prefix>/<rest>` into one name. In-flight writes and stray
/// files are ignored. A missing directory yields an empty set.
pub fn list_fanout_names(directory: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    if !directory.is_dir() {
        return Ok(names);
    }

    for entry in WalkDir::new(directory).min_depth(1).max_depth(2) {
        let entry = entry.map_err(|e| {
            std::io::Error::new(ErrorKind::Other, format!("listing {}: {e}", directory.display()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(directory) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let name: String = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_hexdigit()) {
            names.insert(name);
        }
    }
    Ok(names)
}

/// Whether a fan-out directory holds at least one object.
pub fn has_fanout_objects(directory: &Path) -> Result<bool> {
    Ok(!list_fanout_names(directory)?.is_empty())
}

/// Express `path` relative to `base` with `/` separators.
///
/// Returns `None` for paths outside `base`, for `base` itself, and for
/// components that are not valid UTF-8.
pub fn relative_path_string(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Validate a stored relative path: non-empty, `/`-separated, no `.`/`..`
/// segments and not absolute.
pub fn is_safe_relative_path(relative: &str) -> bool {
    !relative.is_empty()
        && !relative.starts_with('/')
        && !relative.contains('\\')
        && relative
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
        && !Path::new(relative).has_root()
}
