//! Ordered version tuples derived from dotted release strings.
//!
//! A version string such as `2.10.0` or `2.9.0-rc1` is decomposed into
//! [`VersionComponent`]s so that releases compare numerically rather than
//! lexically (`2.10` sorts above `2.9`). A `-` introduces a pre-release
//! suffix that becomes its own text component, so `2.9.0-rc1` decomposes
//! into `[2, 9, 0, "-rc1"]`.
//!
//! Ordering rules:
//!
//! - numbers compare numerically and text compares lexically;
//! - at the same position, text always sorts below a number, so
//!   `2.9.0-rc1 < 2.9.0.1`;
//! - a tuple that is a strict prefix of another sorts below it, so
//!   `2.9.0 < 2.9.0-rc1`.

use std::cmp::Ordering;
use std::fmt;

/// One dot-separated piece of a version string.
///
/// Variant order matters: the derived [`Ord`] places every `Text`
/// component below every `Number` component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VersionComponent {
    /// A piece that is not a plain unsigned integer, such as `-rc1`.
    Text(String),
    /// A piece made only of ASCII digits.
    Number(u64),
}

impl VersionComponent {
    fn parse(piece: &str) -> Self {
        piece
            .parse::<u64>()
            .map_or_else(|_| Self::Text(piece.to_owned()), Self::Number)
    }
}

impl fmt::Display for VersionComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

/// A comparable decomposition of a version string.
///
/// # Examples
///
/// ```
/// use xmldeps::version::VersionTuple;
///
/// assert!(VersionTuple::parse("2.10.0") > VersionTuple::parse("2.9.14"));
/// assert!(VersionTuple::parse("2.9.0-rc1") < VersionTuple::parse("2.9.0.1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionTuple(Vec<VersionComponent>);

impl VersionTuple {
    /// Parse a version string, keeping any pre-release suffix as a text
    /// component.
    #[must_use]
    pub fn parse(version: &str) -> Self {
        let mut components = Vec::new();
        let mut segments = version.split('-');
        if let Some(release) = segments.next() {
            components.extend(release.split('.').map(VersionComponent::parse));
        }
        for suffix in segments {
            let mut pieces = suffix.split('.');
            if let Some(first) = pieces.next() {
                components.push(VersionComponent::Text(format!("-{first}")));
            }
            components.extend(pieces.map(VersionComponent::parse));
        }
        Self(components)
    }

    /// Parse only the release part of a version string, ignoring anything
    /// after the first `-`.
    #[must_use]
    pub fn parse_release(version: &str) -> Self {
        let release = version.split('-').next().unwrap_or(version);
        Self::parse(release)
    }

    /// Returns true when this version is at or above the given numeric
    /// release, e.g. `is_at_least(&[2, 9, 5])`.
    #[must_use]
    pub fn is_at_least(&self, release: &[u64]) -> bool {
        let floor = Self(release.iter().copied().map(VersionComponent::Number).collect());
        *self >= floor
    }
}

impl Ord for VersionTuple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for VersionTuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, component) in self.0.iter().enumerate() {
            let is_suffix = matches!(component, VersionComponent::Text(text) if text.starts_with('-'));
            if index > 0 && !is_suffix {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
        }
        Ok(())
    }
}
