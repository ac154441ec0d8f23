//! Candidate filename extraction from remote directory listings.
//!
//! Upstream mirrors answer a directory request either with an HTML index
//! page or with FTP `LIST` output. Both formats are reduced to the same lazy
//! sequence of candidate names; the format is chosen from the response
//! content type rather than by sniffing the body.

use percent_encoding::percent_decode_str;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Number of leading whitespace-separated fields in an FTP `LIST` line
/// (permissions, links, owner, group, size, month, day, time/year).
const FTP_LEADING_FIELDS: usize = 8;

#[expect(clippy::expect_used, reason = "the pattern is a compile-time constant")]
static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?im)<a[^>]*\shref=["']([^;?"']+?)[;?"']"#).expect("valid href pattern")
});

/// The shape of a listing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFormat {
    /// An HTML index page; candidates are anchor `href` targets.
    Html,
    /// Line-oriented FTP `LIST` output; candidates are the trailing names.
    FtpText,
}

impl ListingFormat {
    /// Select the format from a response `Content-Type` header.
    ///
    /// # Examples
    ///
    /// ```
    /// use xmldeps::listing::ListingFormat;
    ///
    /// assert_eq!(
    ///     ListingFormat::from_content_type(Some("text/html; charset=utf-8")),
    ///     ListingFormat::Html
    /// );
    /// assert_eq!(ListingFormat::from_content_type(None), ListingFormat::FtpText);
    /// ```
    #[must_use]
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let is_html = content_type.is_some_and(|value| {
            value
                .trim_start()
                .get(..9)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("text/html"))
        });
        if is_html { Self::Html } else { Self::FtpText }
    }

    /// Iterate over the candidate names in `body`.
    #[must_use]
    pub fn entries<'a>(self, body: &'a str) -> Box<dyn Iterator<Item = String> + 'a> {
        match self {
            Self::Html => Box::new(parse_html_filelist(body)),
            Self::FtpText => Box::new(parse_text_ftplist(body)),
        }
    }
}

/// Extract file links from an HTML index page.
///
/// Links are deduplicated, links ending in `/` (sub-directories) are
/// dropped, and percent-escapes are decoded. The result is sorted so that
/// iteration order does not depend on hashing.
pub fn parse_html_filelist(body: &str) -> impl Iterator<Item = String> {
    let links: BTreeSet<&str> = HREF
        .captures_iter(body)
        .filter_map(|captures| captures.get(1))
        .map(|link| link.as_str())
        .collect();
    links
        .into_iter()
        .filter(|link| !link.ends_with('/'))
        .map(|link| percent_decode_str(link).decode_utf8_lossy().into_owned())
        .collect::<Vec<_>>()
        .into_iter()
}

/// Extract file names from FTP `LIST` output, skipping directories.
///
/// Only the first eight fields are split off, so a trailing name that
/// contains spaces survives intact.
pub fn parse_text_ftplist(body: &str) -> impl Iterator<Item = String> + '_ {
    body.lines()
        .filter(|line| !line.starts_with('d'))
        .filter_map(trailing_name)
        .map(str::to_owned)
}

fn trailing_name(line: &str) -> Option<&str> {
    let mut rest = line.trim_start();
    let mut last = None;
    for _ in 0..FTP_LEADING_FIELDS {
        if rest.is_empty() {
            break;
        }
        match rest.split_once(char::is_whitespace) {
            Some((field, tail)) => {
                last = Some(field);
                rest = tail.trim_start();
            }
            None => return Some(rest),
        }
    }
    if rest.is_empty() { last } else { Some(rest) }
}
