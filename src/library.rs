//! The native libraries this crate knows how to fetch, and the download
//! driver that ties resolution, local reuse and retrying downloads together.

use log::{info, warn};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{BuildError, Result};
use crate::fetch::{RETRY_DELAY, UrlReader, download_with_retry};
use crate::resolver::{
    NamePattern, ResolveError, ResolvedVersion, find_latest_version_directory,
    resolve_latest_version,
};
use crate::version::VersionTuple;

/// A library distributed as upstream source tarballs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Library {
    /// The GNOME XML parser.
    Libxml2,
    /// The GNOME XSLT processor (also provides libexslt).
    Libxslt,
    /// GNU character set conversion.
    Libiconv,
    /// zlib compression.
    Zlib,
}

impl Library {
    /// The upstream project name, which also prefixes archive names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Libxml2 => "libxml2",
            Self::Libxslt => "libxslt",
            Self::Libiconv => "libiconv",
            Self::Zlib => "zlib",
        }
    }

    /// Directory listing the release archives.
    #[must_use]
    pub const fn location(self) -> &'static str {
        match self {
            Self::Libxml2 => "https://download.gnome.org/sources/libxml2/",
            Self::Libxslt => "https://download.gnome.org/sources/libxslt/",
            Self::Libiconv => "https://ftp.gnu.org/pub/gnu/libiconv/",
            Self::Zlib => "https://zlib.net/",
        }
    }

    /// Archive filename template.
    #[must_use]
    pub const fn template(self) -> &'static str {
        match self {
            Self::Libxml2 | Self::Libxslt => "{name}-{version}.tar.xz",
            Self::Libiconv | Self::Zlib => "{name}-{version}.tar.gz",
        }
    }

    /// Whether releases live in `major.minor/` sub-directories.
    #[must_use]
    pub const fn has_versioned_directories(self) -> bool {
        matches!(self, Self::Libxml2 | Self::Libxslt)
    }

    /// The compiled filename pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidPattern`] if the template is unusable.
    pub fn name_pattern(self) -> std::result::Result<NamePattern, ResolveError> {
        NamePattern::new(self.name(), self.template())
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown library name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown library \"{0}\" (expected libxml2, libxslt, libiconv or zlib)")]
pub struct UnknownLibrary(pub String);

impl FromStr for Library {
    type Err = UnknownLibrary;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "libxml2" | "xml2" => Ok(Self::Libxml2),
            "libxslt" | "xslt" => Ok(Self::Libxslt),
            "libiconv" | "iconv" => Ok(Self::Libiconv),
            "zlib" | "libz" => Ok(Self::Zlib),
            _ => Err(UnknownLibrary(s.to_owned())),
        }
    }
}

/// Resolve the release of `library` to fetch, without downloading it.
///
/// Versioned directory trees are walked first so the listing comes from the
/// right `major.minor/` directory.
///
/// # Errors
///
/// Returns a [`ResolveError`] when a listing cannot be fetched or matched.
pub fn resolve_library(
    reader: &dyn UrlReader,
    library: Library,
    version: Option<&str>,
) -> std::result::Result<ResolvedVersion, ResolveError> {
    let pattern = library.name_pattern()?;
    let location = if library.has_versioned_directories() {
        find_latest_version_directory(reader, library.location(), version)?
    } else {
        library.location().to_owned()
    };
    resolve_latest_version(reader, &location, &pattern, version)
}

/// Make the source archive for `library` available in `download_dir` and
/// return its path.
///
/// An archive already present in `download_dir` is reused; delete it to
/// force a fresh download. When the listing cannot be fetched and no version
/// was pinned, the newest matching archive already in `download_dir` is
/// used instead.
///
/// # Errors
///
/// Returns a [`BuildError`] when resolution fails with nothing usable on
/// disk, or when the download fails twice.
pub fn download_library(
    reader: &dyn UrlReader,
    download_dir: &Path,
    library: Library,
    version: Option<&str>,
) -> Result<PathBuf> {
    fs::create_dir_all(download_dir).map_err(BuildError::io(download_dir))?;
    let pattern = library.name_pattern()?;

    if let Some(pinned) = version {
        let local = download_dir.join(pattern.filename(pinned));
        if local.is_file() {
            report_existing(library, &local);
            return Ok(local);
        }
    }

    let resolved = match resolve_library(reader, library, version) {
        Ok(resolved) => resolved,
        Err(ResolveError::Network(err)) if version.is_none() => {
            warn!("Could not list {library} releases: {err}");
            return newest_local_archive(download_dir, &pattern)
                .inspect(|path| info!("Using local {} while offline", path.display()))
                .ok_or(BuildError::Resolve(ResolveError::Network(err)));
        }
        Err(err) => return Err(err.into()),
    };

    let dest = download_dir.join(&resolved.filename);
    if dest.is_file() {
        report_existing(library, &dest);
        return Ok(dest);
    }
    download_with_retry(reader, &resolved.url, &dest, RETRY_DELAY)?;
    Ok(dest)
}

fn report_existing(library: Library, path: &Path) {
    info!(
        "Using existing {library} downloaded into {} (delete this file if you want to re-download the package)",
        path.display()
    );
}

/// The highest-versioned archive in `dir` matching `pattern`.
#[must_use]
pub fn newest_local_archive(dir: &Path, pattern: &NamePattern) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let version = VersionTuple::parse(pattern.capture_version(&name)?);
            Some((version, entry.path()))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, path)| path)
}
