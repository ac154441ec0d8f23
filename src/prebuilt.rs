//! Prebuilt Windows binaries of the library stack.
//!
//! Windows hosts skip the source build. The newest GitHub release of the
//! `libxml2-win-binaries` project is selected, and for each library the
//! highest-versioned zip for the host architecture is downloaded and
//! unpacked next to the download directory.

use log::info;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, Result};
use crate::extraction::ArchiveExtractor;
use crate::fetch::{Accept, RETRY_DELAY, UrlReader, download_with_retry};
use crate::resolver::{NamePattern, find_max_version, join_url};

/// GitHub API endpoint listing the most recent binary releases.
pub const RELEASES_URL: &str =
    "https://api.github.com/repos/lxml/libxml2-win-binaries/releases?per_page=5";

/// Base URL for release asset downloads; the tag name follows.
pub const DOWNLOAD_BASE: &str = "https://github.com/lxml/libxml2-win-binaries/releases/download/";

/// Libraries shipped as prebuilt zips, in download order.
pub const PREBUILT_LIBRARIES: [&str; 4] = ["libxml2", "libxslt", "zlib", "iconv"];

/// A GitHub release as returned by the releases API.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Release {
    /// The release tag.
    #[serde(default)]
    pub tag_name: String,
    /// Files attached to the release.
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// A file attached to a release.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Asset {
    /// The asset's file name.
    pub name: String,
}

/// Target architecture of the prebuilt binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowsArch {
    /// 64-bit ARM.
    Arm64,
    /// 64-bit x86.
    Win64,
    /// 32-bit x86.
    Win32,
}

impl WindowsArch {
    /// The architecture tag used in asset names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Arm64 => "win-arm64",
            Self::Win64 => "win64",
            Self::Win32 => "win32",
        }
    }

    /// Pick the architecture for a host. A Visual Studio cross-compile
    /// target of `arm64` (`VSCMD_ARG_TGT_ARCH`) selects ARM64 too.
    #[must_use]
    pub fn select(arm64_host: bool, vs_target: Option<&str>, wide_pointers: bool) -> Self {
        if arm64_host || vs_target == Some("arm64") {
            Self::Arm64
        } else if wide_pointers {
            Self::Win64
        } else {
            Self::Win32
        }
    }

    /// The architecture of the running host.
    #[must_use]
    pub fn detect() -> Self {
        let vs_target = std::env::var("VSCMD_ARG_TGT_ARCH").ok();
        Self::select(
            cfg!(target_arch = "aarch64"),
            vs_target.as_deref(),
            cfg!(target_pointer_width = "64"),
        )
    }
}

impl fmt::Display for WindowsArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header and library directories of the unpacked bundles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrebuiltOutputs {
    /// One `include` directory per library.
    pub include_dirs: Vec<PathBuf>,
    /// One `lib` directory per library.
    pub library_dirs: Vec<PathBuf>,
}

/// Fetch the release listing and return the release with the greatest tag.
///
/// Tags compare as plain strings; on equal tags the first listed wins.
///
/// # Errors
///
/// Returns [`BuildError::Network`] when the listing cannot be fetched,
/// [`BuildError::ReleaseListing`] for invalid JSON and
/// [`BuildError::NoPrebuiltRelease`] when no release is listed.
pub fn latest_release(reader: &dyn UrlReader) -> Result<Release> {
    let document = reader.read_url(RELEASES_URL, Accept::GithubJson)?;
    let releases: Vec<Release> = serde_json::from_str(&document.body)?;
    releases
        .into_iter()
        .reduce(|best, release| {
            if release.tag_name > best.tag_name {
                release
            } else {
                best
            }
        })
        .ok_or_else(|| BuildError::NoPrebuiltRelease {
            reason: "the release listing is empty".to_owned(),
        })
}

/// Choose the newest zip for each of [`PREBUILT_LIBRARIES`] among the
/// release's assets for `arch`.
///
/// # Errors
///
/// Returns [`BuildError::Resolve`] when a library has no asset for `arch`.
pub fn select_assets(release: &Release, arch: WindowsArch) -> Result<Vec<String>> {
    let marker = format!(".{arch}.");
    let names: Vec<&str> = release
        .assets
        .iter()
        .map(|asset| asset.name.as_str())
        .filter(|name| name.contains(&marker))
        .collect();
    PREBUILT_LIBRARIES
        .iter()
        .map(|library| -> Result<String> {
            let pattern = NamePattern::new(library, &format!("{{name}}-{{version}}.{arch}.zip"))?;
            let version = find_max_version(&names, &pattern)?;
            Ok(pattern.filename(&version))
        })
        .collect()
}

/// Download and unpack the prebuilt bundles into `download_dir`.
///
/// A bundle whose `<file>.keep` marker exists is not downloaded again.
///
/// # Errors
///
/// Returns a [`BuildError`] when the release cannot be selected, a download
/// or extraction fails, or an unpacked bundle lacks `include` or `lib`.
pub fn fetch_prebuilt(
    reader: &dyn UrlReader,
    extractor: &dyn ArchiveExtractor,
    download_dir: &Path,
    arch: WindowsArch,
) -> Result<PrebuiltOutputs> {
    let release = latest_release(reader)?;
    info!("Using prebuilt release {} for {arch}", release.tag_name);
    let base = format!("{DOWNLOAD_BASE}{}/", release.tag_name);
    let files = select_assets(&release, arch)?;

    fs::create_dir_all(download_dir).map_err(BuildError::io(download_dir))?;

    let mut outputs = PrebuiltOutputs::default();
    for file in files {
        let url = join_url(&base, &file)?;
        let dest = download_dir.join(&file);
        if keep_marker(&dest).exists() {
            info!("Using local copy of \"{url}\"");
        } else {
            info!("Retrieving \"{url}\" to \"{}\"", dest.display());
            download_with_retry(reader, &url, &dest, RETRY_DELAY)?;
        }
        let root = extractor.extract(&dest, download_dir)?;
        let include = require_dir(root.join("include"))?;
        let lib = require_dir(root.join("lib"))?;
        outputs.include_dirs.push(include);
        outputs.library_dirs.push(lib);
    }
    Ok(outputs)
}

fn keep_marker(archive: &Path) -> PathBuf {
    let mut marker = archive.as_os_str().to_owned();
    marker.push(".keep");
    PathBuf::from(marker)
}

fn require_dir(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(BuildError::MissingPrebuiltDirectory { path })
    }
}
