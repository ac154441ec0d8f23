//! Zip extraction.
//!
//! Zip symlink entries are written as regular files holding the link text.

use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use super::containment::member_destination;
use super::{
    ArchiveMember, DeferredDirectory, ExtractError, MemberKind, already_present, ensure_inside,
    finish_directories,
};

/// Unpack the zip archive in `file` under the canonical `root`.
pub(super) fn unpack(
    file: File,
    archive_path: &Path,
    root: &Path,
) -> Result<PathBuf, ExtractError> {
    let malformed = |e: zip::result::ZipError| ExtractError::malformed(archive_path)(e.to_string());
    let mut archive = ZipArchive::new(file).map_err(malformed)?;
    let names: Vec<String> = archive.file_names().map(str::to_owned).collect();
    let top = find_top_dir(&names)
        .ok_or_else(|| ExtractError::InconsistentTopLevelDirectory {
            archive: archive_path.to_path_buf(),
        })?
        .to_owned();

    let mut directories = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(malformed)?;
        let member = ArchiveMember {
            name: PathBuf::from(entry.name()),
            kind: if entry.is_dir() {
                MemberKind::Directory
            } else {
                MemberKind::File
            },
            size: entry.size(),
            link_target: None,
        };
        let destination = member_destination(root, &member.name)
            .ok_or_else(|| ExtractError::escape(archive_path, &member.name))?;

        if member.kind == MemberKind::Directory {
            directories.push(DeferredDirectory {
                member: member.name,
                path: destination,
                mode: entry.unix_mode(),
                mtime: None,
            });
            continue;
        }
        if already_present(&destination, member.size) {
            debug!("Skipping {}: already extracted", member.name.display());
            continue;
        }

        let parent = destination.parent().unwrap_or(root);
        ensure_inside(root, archive_path, &member.name, parent)?;
        fs::create_dir_all(parent).map_err(ExtractError::io(parent))?;
        write_member(&mut entry, &destination).map_err(ExtractError::io(&destination))?;
    }

    finish_directories(root, archive_path, &directories)?;
    Ok(root.join(top))
}

/// Replace whatever sits at `destination` with the entry's content.
fn write_member(entry: &mut impl io::Read, destination: &Path) -> io::Result<()> {
    match fs::symlink_metadata(destination) {
        Ok(meta) if !meta.is_dir() => fs::remove_file(destination)?,
        _ => {}
    }
    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)?;
    io::copy(entry, &mut output)?;
    Ok(())
}

/// The directory every entry lives under, or `None` when an entry sits at
/// the top level or entries disagree.
pub(super) fn find_top_dir<S: AsRef<str>>(names: &[S]) -> Option<&str> {
    let mut top: Option<&str> = None;
    for name in names {
        let (first, _) = name.as_ref().split_once('/')?;
        if first.is_empty() || first == "." || first == ".." {
            return None;
        }
        match top {
            None => top = Some(first),
            Some(existing) if existing == first => {}
            Some(_) => return None,
        }
    }
    top
}
