//! Build configuration loaded from `xmldeps.toml`.
//!
//! Every field is optional in the file; omitted values fall back to the
//! defaults the build has always used (`libs` for downloads, `build/tmp` for
//! unpacked sources, zlib enabled). Command-line flags are applied on top by
//! the binary.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::{BuildError, Result};
use crate::library::Library;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "xmldeps.toml";

/// Settings for a source or prebuilt build.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Where downloaded archives are kept between runs.
    pub download_dir: Utf8PathBuf,
    /// Where sources are unpacked and the private prefix is installed.
    pub build_dir: Utf8PathBuf,
    /// Parallel `make` jobs. Unset picks a default from the CPU count;
    /// `1` disables parallel builds.
    pub multicore: Option<u32>,
    /// Build and link zlib.
    pub with_zlib: bool,
    /// Pinned library versions; unset entries resolve the latest release.
    pub versions: LibraryVersions,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            download_dir: Utf8PathBuf::from("libs"),
            build_dir: Utf8PathBuf::from("build/tmp"),
            multicore: None,
            with_zlib: true,
            versions: LibraryVersions::default(),
        }
    }
}

impl BuildConfig {
    /// Parse configuration from TOML text. `origin` names the source in
    /// error messages.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Config`] for invalid TOML or unknown keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use xmldeps::config::BuildConfig;
    ///
    /// let config = BuildConfig::from_toml_str(
    ///     "with_zlib = false\n[versions]\nlibxml2 = \"2.10.3\"\n",
    ///     Utf8Path::new("inline"),
    /// )?;
    /// assert!(!config.with_zlib);
    /// assert_eq!(config.versions.libxml2.as_deref(), Some("2.10.3"));
    /// # Ok::<(), xmldeps::error::BuildError>(())
    /// ```
    pub fn from_toml_str(text: &str, origin: &Utf8Path) -> Result<Self> {
        toml::from_str(text).map_err(|e| BuildError::Config {
            path: origin.to_owned(),
            reason: e.message().to_owned(),
        })
    }

    /// Load configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Config`] when the file cannot be read or parsed.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BuildError::Config {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Load `path` when given, else `xmldeps.toml` if it exists, else the
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Config`] when a file is present but invalid.
    pub fn discover(path: Option<&Utf8Path>) -> Result<Self> {
        match path {
            Some(explicit) => Self::load(explicit),
            None if Utf8Path::new(CONFIG_FILE_NAME).is_file() => {
                Self::load(Utf8Path::new(CONFIG_FILE_NAME))
            }
            None => Ok(Self::default()),
        }
    }
}

/// Per-library version pins.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryVersions {
    /// libxml2 version.
    pub libxml2: Option<String>,
    /// libxslt version.
    pub libxslt: Option<String>,
    /// libiconv version.
    pub libiconv: Option<String>,
    /// zlib version.
    pub zlib: Option<String>,
}

impl LibraryVersions {
    /// The pin for `library`, ignoring blank values.
    #[must_use]
    pub fn get(&self, library: Library) -> Option<&str> {
        let pin = match library {
            Library::Libxml2 => &self.libxml2,
            Library::Libxslt => &self.libxslt,
            Library::Libiconv => &self.libiconv,
            Library::Zlib => &self.zlib,
        };
        pin.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    /// Replace the pin for `library`.
    pub fn set(&mut self, library: Library, version: Option<String>) {
        let slot = match library {
            Library::Libxml2 => &mut self.libxml2,
            Library::Libxslt => &mut self.libxslt,
            Library::Libiconv => &mut self.libiconv,
            Library::Zlib => &mut self.zlib,
        };
        *slot = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(text: &str) -> Result<BuildConfig> {
        BuildConfig::from_toml_str(text, Utf8Path::new("xmldeps.toml"))
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse("").expect("empty config");
        assert_eq!(config, BuildConfig::default());
        assert_eq!(config.download_dir, "libs");
        assert_eq!(config.build_dir, "build/tmp");
        assert!(config.with_zlib);
    }

    #[test]
    fn overrides_are_applied() {
        let config = parse(
            r#"
download_dir = "cache"
multicore = 1
with_zlib = false

[versions]
libiconv = "1.17"
"#,
        )
        .expect("config");

        assert_eq!(config.download_dir, "cache");
        assert_eq!(config.multicore, Some(1));
        assert!(!config.with_zlib);
        assert_eq!(config.versions.get(Library::Libiconv), Some("1.17"));
        assert_eq!(config.versions.get(Library::Libxml2), None);
    }

    #[rstest]
    #[case("jobs = 4")]
    #[case("[versions]\nlibfoo = \"1.0\"")]
    fn unknown_fields_are_rejected(#[case] text: &str) {
        let err = parse(text).expect_err("unknown field");
        assert!(matches!(err, BuildError::Config { .. }));
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn blank_pins_are_ignored() {
        let config = parse("[versions]\nzlib = \"  \"").expect("config");
        assert_eq!(config.versions.get(Library::Zlib), None);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = BuildConfig::load(Utf8Path::new("/nonexistent/xmldeps.toml"))
            .expect_err("missing file");
        assert!(matches!(err, BuildError::Config { .. }));
    }

    #[test]
    fn set_replaces_a_pin() {
        let mut versions = LibraryVersions::default();
        versions.set(Library::Libxslt, Some("1.1.39".to_owned()));
        assert_eq!(versions.get(Library::Libxslt), Some("1.1.39"));
    }
}
