//! Acquire and build the native XML library stack: libxml2, libxslt (with
//! libexslt), libiconv and zlib.
//!
//! The crate discovers the newest upstream release of each library from its
//! HTML or FTP directory listing, downloads it with a single retry, unpacks
//! it with path-traversal protection, and drives the configure / make
//! builds into a private static prefix. On Windows the prebuilt binaries are
//! fetched from their GitHub releases instead.
//!
//! The network, archive and process seams are traits
//! ([`fetch::UrlReader`], [`extraction::ArchiveExtractor`],
//! [`builder::CommandExecutor`]) so every step can be exercised offline.

pub mod builder;
pub mod cli;
pub mod config;
pub mod error;
pub mod extraction;
pub mod fetch;
pub mod library;
pub mod listing;
pub mod prebuilt;
pub mod resolver;
pub mod version;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
