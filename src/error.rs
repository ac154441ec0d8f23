//! Error types for the dependency build driver.
//!
//! The resolver, fetcher and extractor each carry their own error enum;
//! [`BuildError`] wraps them alongside the failures that only the build and
//! prebuilt drivers can produce.

use camino::Utf8PathBuf;
use std::path::PathBuf;
use thiserror::Error;

use crate::extraction::ExtractError;
use crate::fetch::NetworkError;
use crate::resolver::ResolveError;

/// Errors that can occur while acquiring or building the native libraries.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Version resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A download failed after its retry.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// An archive could not be unpacked.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// An external build command exited unsuccessfully.
    #[error("command \"{command}\" failed in {cwd} ({status}): {stderr}")]
    CommandFailed {
        /// The full command line.
        command: String,
        /// The working directory.
        cwd: PathBuf,
        /// The exit status as reported by the OS.
        status: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// An external build command could not be started.
    #[error("failed to run \"{command}\": {source}")]
    CommandSpawn {
        /// The full command line.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An unpacked prebuilt bundle lacks an expected directory.
    #[error("prebuilt bundle is missing {path}")]
    MissingPrebuiltDirectory {
        /// The directory that should exist.
        path: PathBuf,
    },

    /// No usable prebuilt release was published.
    #[error("no prebuilt release available: {reason}")]
    NoPrebuiltRelease {
        /// Why no release could be used.
        reason: String,
    },

    /// The GitHub release listing was not valid JSON.
    #[error("invalid release listing: {0}")]
    ReleaseListing(#[from] serde_json::Error),

    /// The configuration file could not be read or parsed.
    #[error("invalid configuration {path}: {reason}")]
    Config {
        /// Path to the configuration file.
        path: Utf8PathBuf,
        /// Description of the problem.
        reason: String,
    },

    /// A filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias using [`BuildError`].
pub type Result<T> = std::result::Result<T, BuildError>;
