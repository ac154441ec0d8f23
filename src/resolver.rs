//! Remote version discovery for upstream source releases.
//!
//! Given a listing URL and a filename template, the resolver reads the
//! listing, keeps the candidates that match the template, and selects the
//! highest [`VersionTuple`]. A second mode walks a versioned directory tree
//! (`.../2.9/`, `.../2.10/`) and picks the directory to list.

use log::{debug, info};
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::fetch::{Accept, NetworkError, UrlReader};
use crate::version::VersionTuple;

/// Placeholder for the version inside a filename template.
const VERSION_PLACEHOLDER: &str = "{version}";

/// Placeholder for the library name inside a filename template.
const NAME_PLACEHOLDER: &str = "{name}";

/// What a version looks like inside a filename: a dotted release with an
/// optional `-suffix` pre-release tag.
const VERSION_CAPTURE: &str = r"([0-9]+(?:\.[0-9]+)*(?:-[a-z0-9]+)?)";

#[expect(clippy::expect_used, reason = "the pattern is a compile-time constant")]
static VERSION_DIRECTORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\shref=["']([0-9]+)\.([0-9]+)/?["']"#).expect("valid directory pattern")
});

/// Errors arising from version resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The listing could not be retrieved.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// No listing entry matched the filename template.
    #[error("could not find the most current version of {name} among {candidates} file(s)")]
    NoMatchingVersion {
        /// The library being resolved.
        name: String,
        /// How many candidate names the listing offered.
        candidates: usize,
    },

    /// The filename template is unusable.
    #[error("invalid filename template \"{template}\": {reason}")]
    InvalidPattern {
        /// The rejected template.
        template: String,
        /// Why the template was rejected.
        reason: String,
    },

    /// A listing or download URL could not be constructed.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The base URL.
        url: String,
        /// The parser's complaint.
        reason: String,
    },
}

/// A filename template such as `{name}-{version}.tar.xz`, compiled into a
/// matcher that captures the version.
///
/// # Examples
///
/// ```
/// use xmldeps::resolver::NamePattern;
///
/// let pattern = NamePattern::new("zlib", "{name}-{version}.tar.gz")?;
/// assert_eq!(pattern.filename("1.3.1"), "zlib-1.3.1.tar.gz");
/// assert_eq!(pattern.capture_version("zlib-1.3.1.tar.gz"), Some("1.3.1"));
/// assert_eq!(pattern.capture_version("zlib-1.3.1.tar.gz.asc"), None);
/// # Ok::<(), xmldeps::resolver::ResolveError>(())
/// ```
#[derive(Debug, Clone)]
pub struct NamePattern {
    name: String,
    template: String,
    matcher: Regex,
}

impl NamePattern {
    /// Compile `template` for the library `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidPattern`] unless the template contains
    /// exactly one `{version}` placeholder.
    pub fn new(name: &str, template: &str) -> Result<Self, ResolveError> {
        let expanded = template.replace(NAME_PLACEHOLDER, name);
        let invalid = |reason: &str| ResolveError::InvalidPattern {
            template: template.to_owned(),
            reason: reason.to_owned(),
        };
        let mut parts = expanded.split(VERSION_PLACEHOLDER);
        let (Some(prefix), Some(suffix), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("expected exactly one {version} placeholder"));
        };
        let source = format!(
            "(?:^|/){}{VERSION_CAPTURE}{}$",
            regex::escape(prefix),
            regex::escape(suffix)
        );
        let matcher = Regex::new(&source).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            name: name.to_owned(),
            template: expanded,
            matcher,
        })
    }

    /// The library name this pattern was built for.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the filename for a concrete version.
    #[must_use]
    pub fn filename(&self, version: &str) -> String {
        self.template.replace(VERSION_PLACEHOLDER, version)
    }

    /// Return the version embedded in `candidate`, if it matches.
    #[must_use]
    pub fn capture_version<'a>(&self, candidate: &'a str) -> Option<&'a str> {
        self.matcher
            .captures(candidate)
            .and_then(|captures| captures.get(1))
            .map(|version| version.as_str())
    }
}

/// A selected release and where to fetch it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    /// The version string as it appears in the filename.
    pub version: String,
    /// The archive filename.
    pub filename: String,
    /// Absolute download URL.
    pub url: String,
}

/// Resolve the newest release offered at `listing_source`.
///
/// When `explicit_version` is given no listing is fetched; the filename is
/// built directly from the pattern.
///
/// # Errors
///
/// Returns [`ResolveError::Network`] when the listing cannot be retrieved,
/// [`ResolveError::NoMatchingVersion`] when nothing matches the pattern, and
/// [`ResolveError::InvalidUrl`] when the download URL cannot be built.
pub fn resolve_latest_version(
    reader: &dyn UrlReader,
    listing_source: &str,
    pattern: &NamePattern,
    explicit_version: Option<&str>,
) -> Result<ResolvedVersion, ResolveError> {
    let version = match explicit_version {
        Some(pinned) => pinned.to_owned(),
        None => {
            let candidates = list_candidates(reader, listing_source)?;
            info!("Found {} links at {listing_source}", candidates.len());
            find_max_version(&candidates, pattern)?
        }
    };
    let filename = pattern.filename(&version);
    let url = join_url(listing_source, &filename)?;
    Ok(ResolvedVersion {
        version,
        filename,
        url,
    })
}

/// Read a listing and return every candidate name it offers.
///
/// # Errors
///
/// Returns [`ResolveError::Network`] when the listing cannot be retrieved.
pub fn list_candidates(reader: &dyn UrlReader, url: &str) -> Result<Vec<String>, ResolveError> {
    let document = reader.read_url(url, Accept::Any)?;
    debug!(
        "Listing {url} as {:?} ({} bytes)",
        document.format(),
        document.body.len()
    );
    Ok(document.format().entries(&document.body).collect())
}

/// Select the highest version among `candidates` that match `pattern`.
///
/// Ties keep the first candidate seen.
///
/// # Errors
///
/// Returns [`ResolveError::NoMatchingVersion`] when no candidate matches.
pub fn find_max_version<S: AsRef<str>>(
    candidates: &[S],
    pattern: &NamePattern,
) -> Result<String, ResolveError> {
    let mut best: Option<(VersionTuple, &str)> = None;
    for candidate in candidates {
        let Some(version) = pattern.capture_version(candidate.as_ref()) else {
            continue;
        };
        let tuple = VersionTuple::parse(version);
        if best.as_ref().is_none_or(|(current, _)| tuple > *current) {
            best = Some((tuple, version));
        }
    }
    let (_, version) = best.ok_or_else(|| ResolveError::NoMatchingVersion {
        name: pattern.name().to_owned(),
        candidates: candidates.len(),
    })?;
    info!("Latest version of {} is {version}", pattern.name());
    Ok(version.to_owned())
}

/// Pick the `major.minor` release directory to list under `url`.
///
/// The highest directory wins unless `version`'s own `major.minor` exists,
/// in which case that directory is used. When the page lists no version
/// directories, `url` itself is returned.
///
/// # Errors
///
/// Returns [`ResolveError::Network`] when the page cannot be retrieved.
pub fn find_latest_version_directory(
    reader: &dyn UrlReader,
    url: &str,
    version: Option<&str>,
) -> Result<String, ResolveError> {
    let document = reader.read_url(url, Accept::Any)?;
    let directories = version_directories(&document.body);
    select_version_directory(&directories, version).map_or_else(
        || Ok(url.to_owned()),
        |(major, minor)| join_url(url, &format!("{major}.{minor}/")),
    )
}

/// Collect the `major.minor` directory links on an index page.
#[must_use]
pub fn version_directories(body: &str) -> Vec<(u64, u64)> {
    VERSION_DIRECTORY
        .captures_iter(body)
        .filter_map(|captures| {
            let major = captures.get(1)?.as_str().parse().ok()?;
            let minor = captures.get(2)?.as_str().parse().ok()?;
            Some((major, minor))
        })
        .collect()
}

/// Choose between the discovered directories, honouring a pinned version.
#[must_use]
pub fn select_version_directory(
    directories: &[(u64, u64)],
    version: Option<&str>,
) -> Option<(u64, u64)> {
    let latest = directories.iter().copied().max()?;
    let pinned = version
        .and_then(major_minor)
        .filter(|pair| directories.contains(pair));
    Some(pinned.unwrap_or(latest))
}

fn major_minor(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.split(['.', '-']);
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Resolve `relative` against the directory URL `base`.
///
/// # Errors
///
/// Returns [`ResolveError::InvalidUrl`] when `base` is not a valid URL.
pub fn join_url(base: &str, relative: &str) -> Result<String, ResolveError> {
    let invalid = |reason: String| ResolveError::InvalidUrl {
        url: base.to_owned(),
        reason,
    };
    let parsed = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    parsed
        .join(relative)
        .map(String::from)
        .map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
