//! Path containment checks for archive members.
//!
//! Member names are resolved lexically against the extraction root before
//! anything touches the filesystem. Link targets are resolved through the
//! links earlier members already placed, and a second check canonicalises
//! the deepest existing ancestor of a destination so that such a link
//! cannot redirect a later write.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Join `relative` onto `base`, folding `.` and `..` without consulting the
/// filesystem. An absolute `relative` replaces `base` entirely.
pub(super) fn lexical_join(base: &Path, relative: &Path) -> PathBuf {
    let mut resolved = PathBuf::new();
    for component in base.join(relative).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    resolved
}

/// Where a member named `name` lands under `root`, or `None` when it would
/// land outside. Absolute names are always rejected.
pub(super) fn member_destination(root: &Path, name: &Path) -> Option<PathBuf> {
    if name.has_root() || name.is_absolute() {
        return None;
    }
    let destination = lexical_join(root, name);
    destination.starts_with(root).then_some(destination)
}

/// Hops followed before a chain of links is treated as a loop.
const MAX_LINK_HOPS: usize = 40;

/// Resolve a symlink target relative to the directory holding the link,
/// following any links already on disk. `None` when it lands outside `root`.
pub(super) fn symlink_target(
    root: &Path,
    link: &Path,
    target: &Path,
) -> io::Result<Option<PathBuf>> {
    let base = link.parent().unwrap_or(root);
    let resolved = resolve_on_disk(&base.join(target))?;
    Ok(resolved.starts_with(root).then_some(resolved))
}

/// Resolve a hardlink target relative to the extraction root, following any
/// links already on disk. `None` when it lands outside `root`.
pub(super) fn hardlink_target(root: &Path, target: &Path) -> io::Result<Option<PathBuf>> {
    if target.has_root() || target.is_absolute() {
        return Ok(None);
    }
    let resolved = resolve_on_disk(&root.join(target))?;
    Ok(resolved.starts_with(root).then_some(resolved))
}

/// Walk `path` one component at a time the way the kernel would: existing
/// symlinks are replaced by their targets before the next component is
/// applied, and `..` pops whatever the walk has reached so far. Components
/// that do not exist yet are folded lexically.
pub(super) fn resolve_on_disk(path: &Path) -> io::Result<PathBuf> {
    let mut hops = 0;
    resolve_with_hops(path, &mut hops)
}

fn resolve_with_hops(path: &Path, hops: &mut usize) -> io::Result<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(part) => {
                resolved.push(part);
                let is_link = match fs::symlink_metadata(&resolved) {
                    Ok(meta) => meta.file_type().is_symlink(),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => false,
                    Err(err) => return Err(err),
                };
                if is_link {
                    *hops += 1;
                    if *hops > MAX_LINK_HOPS {
                        return Err(io::Error::other(format!(
                            "too many levels of symbolic links at {}",
                            resolved.display()
                        )));
                    }
                    let target = fs::read_link(&resolved)?;
                    resolved.pop();
                    resolved = resolve_with_hops(&resolved.join(target), hops)?;
                }
            }
            other => resolved.push(other),
        }
    }
    Ok(resolved)
}

/// Returns true when the deepest existing ancestor of `path` (including
/// `path` itself) really lives under `root` once symlinks are followed.
///
/// `root` must already be canonical.
pub(super) fn resolves_inside(root: &Path, path: &Path) -> io::Result<bool> {
    let mut candidate = Some(path);
    while let Some(current) = candidate {
        match current.canonicalize() {
            Ok(real) => return Ok(real.starts_with(root)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => candidate = current.parent(),
            Err(err) => return Err(err),
        }
    }
    Ok(false)
}
