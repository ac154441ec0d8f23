//! Streaming tar extraction.

use log::debug;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Entry, EntryType};

use super::containment::{hardlink_target, member_destination, symlink_target};
use super::{
    ArchiveMember, DeferredDirectory, ExtractError, MemberKind, already_present, ensure_inside,
    finish_directories,
};

/// Unpack a (decompressed) tar stream under the canonical `root`.
pub(super) fn unpack<R: Read>(
    reader: R,
    archive_path: &Path,
    root: &Path,
) -> Result<PathBuf, ExtractError> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(false);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);

    let malformed = |e: std::io::Error| ExtractError::malformed(archive_path)(e.to_string());
    let mut top: Option<OsString> = None;
    let mut directories = Vec::new();

    for next in archive.entries().map_err(malformed)? {
        let mut entry = next.map_err(malformed)?;
        if entry.header().entry_type() == EntryType::XGlobalHeader {
            continue;
        }
        let member = describe(&entry, archive_path)?;
        let destination = member_destination(root, &member.name)
            .ok_or_else(|| ExtractError::escape(archive_path, &member.name))?;
        let Some(first) = top_component(root, &destination) else {
            debug!("Skipping {}: no top-level directory", member.name.display());
            continue;
        };
        let at_top_level = destination.parent() == Some(root);
        if at_top_level && member.kind != MemberKind::Directory {
            return Err(ExtractError::InconsistentTopLevelDirectory {
                archive: archive_path.to_path_buf(),
            });
        }
        match &top {
            None => top = Some(first.to_os_string()),
            Some(existing) if existing.as_os_str() == first => {}
            Some(_) => {
                return Err(ExtractError::InconsistentTopLevelDirectory {
                    archive: archive_path.to_path_buf(),
                });
            }
        }

        match member.kind {
            MemberKind::Directory => {
                directories.push(DeferredDirectory {
                    member: member.name,
                    path: destination,
                    mode: entry.header().mode().ok(),
                    mtime: entry.header().mtime().ok(),
                });
                continue;
            }
            MemberKind::File => {
                if already_present(&destination, member.size) {
                    debug!("Skipping {}: already extracted", member.name.display());
                    continue;
                }
            }
            MemberKind::Symlink => {
                let target = link_target(&member, archive_path)?;
                symlink_target(root, &destination, target)
                    .map_err(ExtractError::io(&destination))?
                    .ok_or_else(|| ExtractError::escape(archive_path, &member.name))?;
                if fs::read_link(&destination).is_ok_and(|existing| existing.as_path() == target) {
                    continue;
                }
            }
            MemberKind::Hardlink => {
                let target = link_target(&member, archive_path)?;
                hardlink_target(root, target)
                    .map_err(ExtractError::io(&destination))?
                    .ok_or_else(|| ExtractError::escape(archive_path, &member.name))?;
                if fs::symlink_metadata(&destination).is_ok() {
                    continue;
                }
            }
            MemberKind::Other(kind) => {
                return Err(ExtractError::UnsupportedMemberType {
                    archive: archive_path.to_path_buf(),
                    member: member.name.display().to_string(),
                    kind,
                });
            }
        }

        let parent = destination.parent().unwrap_or(root);
        ensure_inside(root, archive_path, &member.name, parent)?;
        let unpacked = entry
            .unpack_in(root)
            .map_err(ExtractError::io(&destination))?;
        if !unpacked {
            return Err(ExtractError::escape(archive_path, &member.name));
        }
    }

    finish_directories(root, archive_path, &directories)?;
    top.map(|first| root.join(first))
        .ok_or_else(|| ExtractError::InconsistentTopLevelDirectory {
            archive: archive_path.to_path_buf(),
        })
}

fn describe<R: Read>(
    entry: &Entry<'_, R>,
    archive_path: &Path,
) -> Result<ArchiveMember, ExtractError> {
    let malformed = |e: std::io::Error| ExtractError::malformed(archive_path)(e.to_string());
    let header = entry.header();
    let entry_type = header.entry_type();
    let kind = match entry_type {
        EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => MemberKind::File,
        EntryType::Directory => MemberKind::Directory,
        EntryType::Symlink => MemberKind::Symlink,
        EntryType::Link => MemberKind::Hardlink,
        other => MemberKind::Other(format!("{other:?}")),
    };
    Ok(ArchiveMember {
        name: entry.path().map_err(malformed)?.into_owned(),
        kind,
        size: entry.size(),
        link_target: entry
            .link_name()
            .map_err(malformed)?
            .map(std::borrow::Cow::into_owned),
    })
}

fn link_target<'a>(
    member: &'a ArchiveMember,
    archive_path: &Path,
) -> Result<&'a Path, ExtractError> {
    member
        .link_target
        .as_deref()
        .ok_or_else(|| ExtractError::Malformed {
            path: archive_path.to_path_buf(),
            reason: format!("link {} has no target", member.name.display()),
        })
}

/// The first component of `destination` below `root`, or `None` for the
/// root itself (a `./` member).
fn top_component<'a>(root: &Path, destination: &'a Path) -> Option<&'a OsStr> {
    match destination.strip_prefix(root).ok()?.components().next()? {
        Component::Normal(part) => Some(part),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/build/libxml2-2.10.0/configure", Some("libxml2-2.10.0"))]
    #[case("/build/zlib-1.3", Some("zlib-1.3"))]
    #[case("/build", None)]
    fn finds_top_component(#[case] destination: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            top_component(Path::new("/build"), Path::new(destination)),
            expected.map(OsStr::new)
        );
    }
}
