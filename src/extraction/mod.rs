//! Path-traversal-safe extraction of source and binary archives.
//!
//! Unpacks `.tar.gz`, `.tar.xz`, `.tar` and `.zip` archives into a
//! destination root. Every member name and link target is resolved against
//! the canonical root before anything is written; a member that would land
//! outside aborts the whole extraction (tar-slip / zip-slip protection).
//!
//! Extraction is incremental: a regular file already present with exactly
//! the member's size is skipped. The check is size-only and never repairs a
//! same-sized file whose content differs.
//!
//! Every archive must unpack into a single top-level directory, whose path
//! under the root is returned.

mod containment;
mod tarball;
mod zipfile;

use log::debug;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Container formats recognised by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Gzip-compressed tar (`.tar.gz`, `.tgz`).
    TarGz,
    /// XZ-compressed tar (`.tar.xz`, `.txz`).
    TarXz,
    /// Uncompressed tar.
    Tar,
    /// Zip.
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from the archive's file name.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    /// use xmldeps::extraction::ArchiveFormat;
    ///
    /// assert_eq!(
    ///     ArchiveFormat::from_path(Path::new("libxml2-2.10.0.tar.xz")),
    ///     Some(ArchiveFormat::TarXz)
    /// );
    /// assert_eq!(ArchiveFormat::from_path(Path::new("notes.txt")), None);
    /// ```
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        [
            (".tar.gz", Self::TarGz),
            (".tgz", Self::TarGz),
            (".tar.xz", Self::TarXz),
            (".txz", Self::TarXz),
            (".tar", Self::Tar),
            (".zip", Self::Zip),
        ]
        .into_iter()
        .find_map(|(suffix, format)| name.ends_with(suffix).then_some(format))
    }
}

/// What an archive member materialises as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
    /// A hard link to an earlier member.
    Hardlink,
    /// Anything else (device node, FIFO, ...), named for diagnostics.
    Other(String),
}

/// One entry read from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// The member's path as recorded in the archive.
    pub name: PathBuf,
    /// What the member materialises as.
    pub kind: MemberKind,
    /// Size in bytes of the member's data.
    pub size: u64,
    /// Link target for symlinks and hardlinks.
    pub link_target: Option<PathBuf>,
}

/// Errors arising from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The archive file could not be opened.
    #[error("failed to open archive {path}: {source}")]
    Open {
        /// The archive path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The archive container could not be read.
    #[error("malformed archive {path}: {reason}")]
    Malformed {
        /// The archive path.
        path: PathBuf,
        /// A description of the structural problem.
        reason: String,
    },

    /// A member name or link target resolves outside the destination.
    #[error("archive {archive} member {member} escapes the destination directory")]
    PathEscape {
        /// The archive path.
        archive: PathBuf,
        /// The offending member name.
        member: String,
    },

    /// A member is neither a file, directory nor link.
    #[error("archive {archive} member {member} has unsupported type {kind}")]
    UnsupportedMemberType {
        /// The archive path.
        archive: PathBuf,
        /// The offending member name.
        member: String,
        /// The member type as recorded in the archive.
        kind: String,
    },

    /// The archive does not unpack into exactly one top-level directory.
    #[error("archive {archive} does not contain a single top-level directory")]
    InconsistentTopLevelDirectory {
        /// The archive path.
        archive: PathBuf,
    },

    /// The file name does not identify a supported container format.
    #[error("unsupported archive format: {path}")]
    UnsupportedFormat {
        /// The archive path.
        path: PathBuf,
    },

    /// A filesystem operation under the destination failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path being written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn malformed(archive: &Path) -> impl FnOnce(String) -> Self + '_ {
        move |reason| Self::Malformed {
            path: archive.to_path_buf(),
            reason,
        }
    }

    fn escape(archive: &Path, member: &Path) -> Self {
        Self::PathEscape {
            archive: archive.to_path_buf(),
            member: member.display().to_string(),
        }
    }
}

/// Trait for unpacking archives, enabling test mocking.
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveExtractor {
    /// Extract `archive` under `destination` and return the archive's
    /// top-level directory.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] describing why extraction stopped.
    fn extract(&self, archive: &Path, destination: &Path) -> Result<PathBuf, ExtractError>;
}

/// Production extractor backed by [`extract`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeExtractor;

impl ArchiveExtractor for SafeExtractor {
    fn extract(&self, archive: &Path, destination: &Path) -> Result<PathBuf, ExtractError> {
        extract(archive, destination)
    }
}

/// Extract `archive` under `destination`, returning the single top-level
/// directory the archive unpacks into.
///
/// The destination is created if absent. Extraction stops at the first
/// member that escapes the destination or has an unsupported type.
///
/// # Errors
///
/// Returns [`ExtractError::UnsupportedFormat`] for unknown file names,
/// [`ExtractError::Open`] when the archive cannot be opened,
/// [`ExtractError::Malformed`] for corrupt containers,
/// [`ExtractError::PathEscape`] and [`ExtractError::UnsupportedMemberType`]
/// for rejected members, and
/// [`ExtractError::InconsistentTopLevelDirectory`] when members disagree on
/// their top-level directory.
pub fn extract(archive: &Path, destination: &Path) -> Result<PathBuf, ExtractError> {
    let format = ArchiveFormat::from_path(archive).ok_or_else(|| ExtractError::UnsupportedFormat {
        path: archive.to_path_buf(),
    })?;
    let file = File::open(archive).map_err(|source| ExtractError::Open {
        path: archive.to_path_buf(),
        source,
    })?;
    fs::create_dir_all(destination).map_err(ExtractError::io(destination))?;
    let root = destination
        .canonicalize()
        .map_err(ExtractError::io(destination))?;

    debug!("Extracting {} into {}", archive.display(), root.display());
    match format {
        ArchiveFormat::TarGz => {
            tarball::unpack(flate2::read::GzDecoder::new(file), archive, &root)
        }
        ArchiveFormat::TarXz => {
            tarball::unpack(xz2::read::XzDecoder::new(file), archive, &root)
        }
        ArchiveFormat::Tar => tarball::unpack(file, archive, &root),
        ArchiveFormat::Zip => zipfile::unpack(file, archive, &root),
    }
}

/// Returns true when `path` is already a regular file of exactly `size`
/// bytes. Symlinks never count as present.
fn already_present(path: &Path, size: u64) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() == size)
}

/// Refuse to write below an ancestor that a symlink has redirected outside
/// the root.
fn ensure_inside(
    root: &Path,
    archive: &Path,
    member: &Path,
    path: &Path,
) -> Result<(), ExtractError> {
    if containment::resolves_inside(root, path).map_err(ExtractError::io(path))? {
        Ok(())
    } else {
        Err(ExtractError::escape(archive, member))
    }
}

/// A directory member whose creation and metadata are applied after every
/// other member.
#[derive(Debug)]
struct DeferredDirectory {
    member: PathBuf,
    path: PathBuf,
    mode: Option<u32>,
    mtime: Option<u64>,
}

fn finish_directories(
    root: &Path,
    archive: &Path,
    directories: &[DeferredDirectory],
) -> Result<(), ExtractError> {
    for directory in directories {
        ensure_inside(root, archive, &directory.member, &directory.path)?;
        fs::create_dir_all(&directory.path).map_err(ExtractError::io(&directory.path))?;
    }
    // Innermost first, so creating a child never disturbs a parent's times.
    for directory in directories.iter().rev() {
        if let Some(mode) = directory.mode {
            set_mode(&directory.path, mode)?;
        }
        if let Some(mtime) = directory.mtime {
            let time = filetime::FileTime::from_unix_time(i64::try_from(mtime).unwrap_or(0), 0);
            filetime::set_file_mtime(&directory.path, time)
                .map_err(ExtractError::io(&directory.path))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), ExtractError> {
    use std::os::unix::fs::PermissionsExt;

    // Owner rwx is always kept.
    let permissions = fs::Permissions::from_mode((mode & 0o777) | 0o700);
    fs::set_permissions(path, permissions).map_err(ExtractError::io(path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), ExtractError> {
    Ok(())
}
