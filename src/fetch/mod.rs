//! Remote retrieval of listings and archives.
//!
//! Provides a trait-based abstraction over "retrieve a URL" so that version
//! resolution and downloads can be exercised without network access. The
//! production implementation speaks HTTP(S) through a shared `ureq` agent
//! and falls back to a minimal passive-mode FTP client for `ftp://` URLs.

mod ftp;

use log::{info, warn};
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::listing::ListingFormat;

/// Network timeout for listing and archive requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// `User-Agent` sent with every HTTP request.
const USER_AGENT: &str = concat!("xmldeps/", env!("CARGO_PKG_VERSION"));

/// Media type requested from the GitHub releases API.
const GITHUB_JSON: &str = "application/vnd.github+json";

/// Delay before the single download retry.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Which representation a request should ask the server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// Whatever the server prefers (directory listings, archives).
    Any,
    /// GitHub REST API JSON; also attaches the API token when configured.
    GithubJson,
}

/// A retrieved text document and its declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocument {
    /// Decoded response body.
    pub body: String,
    /// The `Content-Type` header, when the protocol provides one.
    pub content_type: Option<String>,
}

impl RemoteDocument {
    /// Listing format implied by the content type.
    #[must_use]
    pub fn format(&self) -> ListingFormat {
        ListingFormat::from_content_type(self.content_type.as_deref())
    }
}

/// Errors arising from remote retrieval.
///
/// All variants are transient from the caller's point of view: retrying
/// the same request may succeed.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The HTTP request failed.
    #[error("request failed for {url}: {reason}")]
    Http {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The server answered 404.
    #[error("not found: {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// The FTP server rejected a command.
    #[error("FTP request failed for {url}: {reason}")]
    Ftp {
        /// The URL that was requested.
        url: String,
        /// The rejected command and the server's reply.
        reason: String,
    },

    /// I/O failure on the connection or while writing the download.
    #[error("I/O error while retrieving {url}: {source}")]
    Io {
        /// The URL that was requested.
        url: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The URL scheme is neither HTTP(S) nor FTP.
    #[error("unsupported URL scheme: {url}")]
    UnsupportedScheme {
        /// The rejected URL.
        url: String,
    },
}

/// Retrieves documents and files by URL.
#[cfg_attr(test, mockall::automock)]
pub trait UrlReader {
    /// Read `url` as text.
    ///
    /// # Errors
    ///
    /// Returns a [`NetworkError`] when the request cannot be completed.
    fn read_url(&self, url: &str, accept: Accept) -> Result<RemoteDocument, NetworkError>;

    /// Download `url` into the file at `dest`.
    ///
    /// # Errors
    ///
    /// Returns a [`NetworkError`] when the request or the file write fails.
    fn download(&self, url: &str, dest: &Path) -> Result<(), NetworkError>;
}

/// Production reader: `ureq` for HTTP(S), a passive FTP client for `ftp://`.
///
/// # Examples
///
/// ```
/// use xmldeps::fetch::HttpReader;
///
/// let reader = HttpReader::default().with_api_token("secret");
/// // Use reader.read_url(url, Accept::Any) in production
/// # let _ = reader;
/// ```
#[derive(Debug, Clone, Default)]
pub struct HttpReader {
    api_token: Option<String>,
}

impl HttpReader {
    /// Build a reader that picks up `GITHUB_API_TOKEN` from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            api_token: std::env::var("GITHUB_API_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
        }
    }

    /// Attach a bearer token for GitHub API requests.
    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    fn get(
        &self,
        url: &str,
        accept: Accept,
    ) -> Result<ureq::http::Response<ureq::Body>, NetworkError> {
        let mut request = http_agent().get(url).header("User-Agent", USER_AGENT);
        if accept == Accept::GithubJson {
            request = request.header("Accept", GITHUB_JSON);
            if let Some(token) = &self.api_token {
                request = request.header("Authorization", format!("Bearer {token}"));
            }
        }
        request.call().map_err(|e| map_ureq_error(url, &e))
    }
}

impl UrlReader for HttpReader {
    fn read_url(&self, url: &str, accept: Accept) -> Result<RemoteDocument, NetworkError> {
        match Scheme::of(url) {
            Some(Scheme::Ftp) => Ok(RemoteDocument {
                body: ftp::list_directory(url)?,
                content_type: None,
            }),
            Some(Scheme::Http) => {
                let response = self.get(url, accept)?;
                let content_type = response
                    .headers()
                    .get("content-type")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                let bytes = response
                    .into_body()
                    .read_to_vec()
                    .map_err(|e| map_ureq_error(url, &e))?;
                Ok(RemoteDocument {
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                    content_type,
                })
            }
            None => Err(NetworkError::UnsupportedScheme {
                url: url.to_owned(),
            }),
        }
    }

    fn download(&self, url: &str, dest: &Path) -> Result<(), NetworkError> {
        if Scheme::of(url) != Some(Scheme::Http) {
            return Err(NetworkError::UnsupportedScheme {
                url: url.to_owned(),
            });
        }
        let response = self.get(url, Accept::Any)?;
        let io_error = |source| NetworkError::Io {
            url: url.to_owned(),
            source,
        };
        // `dest` only ever holds a complete download.
        let dir = dest
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(io_error)?;
        std::io::copy(&mut response.into_body().into_reader(), staged.as_file_mut())
            .map_err(io_error)?;
        staged.as_file_mut().flush().map_err(io_error)?;
        staged.persist(dest).map_err(|e| io_error(e.error))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Http,
    Ftp,
}

impl Scheme {
    fn of(url: &str) -> Option<Self> {
        let scheme = url.split_once("://")?.0.to_ascii_lowercase();
        match scheme.as_str() {
            "http" | "https" => Some(Self::Http),
            "ftp" => Some(Self::Ftp),
            _ => None,
        }
    }
}

/// Download `url` to `dest`, retrying exactly once after `delay`.
///
/// # Errors
///
/// Returns the second attempt's [`NetworkError`] when both attempts fail.
pub fn download_with_retry(
    reader: &dyn UrlReader,
    url: &str,
    dest: &Path,
    delay: Duration,
) -> Result<(), NetworkError> {
    info!("Downloading {} from {url}", dest.display());
    match reader.download(url, dest) {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(
                "Download failed: {err}, retrying in {} seconds",
                delay.as_secs()
            );
            std::thread::sleep(delay);
            reader.download(url, dest)
        }
    }
}

/// Shared `ureq` agent with request timeout configuration.
fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

/// Map a ureq error to a [`NetworkError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> NetworkError {
    match err {
        ureq::Error::StatusCode(404) => NetworkError::NotFound {
            url: url.to_owned(),
        },
        other => NetworkError::Http {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}
