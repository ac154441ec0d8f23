//! CLI argument definitions for `xmldeps`.
//!
//! Kept apart from the entrypoint so argument parsing and config overrides
//! can be tested without running a build.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

use crate::config::BuildConfig;
use crate::library::Library;

/// Fetch, unpack and build the native libxml2/libxslt dependency stack.
#[derive(Parser, Debug)]
#[command(name = "xmldeps")]
#[command(version, about)]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Build the static stack into build/tmp/libxml2:\n",
    "    $ xmldeps build\n\n",
    "  Pin libxml2 and build without zlib:\n",
    "    $ xmldeps build --libxml2-version 2.10.3 --without-zlib\n\n",
    "  Show the newest libxslt release:\n",
    "    $ xmldeps resolve libxslt\n\n",
    "  Fetch the prebuilt Windows binaries:\n",
    "    $ xmldeps prebuilt --download-dir libs",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl Cli {
    /// The log level selected by `-v` / `-q`. `RUST_LOG` may still refine it.
    ///
    /// # Examples
    ///
    /// ```
    /// use clap::Parser;
    /// use log::LevelFilter;
    /// use xmldeps::cli::Cli;
    ///
    /// let cli = Cli::parse_from(["xmldeps", "-v", "resolve", "zlib"]);
    /// assert_eq!(cli.log_level(), LevelFilter::Debug);
    /// ```
    #[must_use]
    pub const fn log_level(&self) -> LevelFilter {
        match (self.quiet, self.verbosity) {
            (true, _) => LevelFilter::Warn,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            (false, _) => LevelFilter::Trace,
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Download and build the libraries from source.
    Build(BuildArgs),

    /// Download the prebuilt Windows binaries.
    Prebuilt(PrebuiltArgs),

    /// Print the release a library would be built from.
    Resolve(ResolveArgs),

    /// Safely unpack an archive and print its top-level directory.
    Extract(ExtractArgs),
}

/// Arguments for the build command.
#[derive(Parser, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Configuration file [default: xmldeps.toml when present].
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Directory for downloaded archives.
    #[arg(long, value_name = "DIR")]
    pub download_dir: Option<Utf8PathBuf>,

    /// Directory for unpacked sources and the install prefix.
    #[arg(long, value_name = "DIR")]
    pub build_dir: Option<Utf8PathBuf>,

    /// libxml2 version to build.
    #[arg(long, value_name = "VERSION")]
    pub libxml2_version: Option<String>,

    /// libxslt version to build.
    #[arg(long, value_name = "VERSION")]
    pub libxslt_version: Option<String>,

    /// libiconv version to build.
    #[arg(long, value_name = "VERSION")]
    pub libiconv_version: Option<String>,

    /// zlib version to build.
    #[arg(long, value_name = "VERSION")]
    pub zlib_version: Option<String>,

    /// Number of parallel make jobs (1 disables parallel builds).
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<u32>,

    /// Do not build zlib; libxml2 is configured without compression.
    #[arg(long)]
    pub without_zlib: bool,
}

impl BuildArgs {
    /// Apply the flags that were given on top of `config`.
    ///
    /// # Examples
    ///
    /// ```
    /// use xmldeps::cli::BuildArgs;
    /// use xmldeps::config::BuildConfig;
    ///
    /// let mut config = BuildConfig::default();
    /// BuildArgs { jobs: Some(2), without_zlib: true, ..BuildArgs::default() }
    ///     .apply(&mut config);
    /// assert_eq!(config.multicore, Some(2));
    /// assert!(!config.with_zlib);
    /// ```
    pub fn apply(&self, config: &mut BuildConfig) {
        if let Some(dir) = &self.download_dir {
            config.download_dir.clone_from(dir);
        }
        if let Some(dir) = &self.build_dir {
            config.build_dir.clone_from(dir);
        }
        if self.jobs.is_some() {
            config.multicore = self.jobs;
        }
        if self.without_zlib {
            config.with_zlib = false;
        }
        let pins = [
            (Library::Libxml2, &self.libxml2_version),
            (Library::Libxslt, &self.libxslt_version),
            (Library::Libiconv, &self.libiconv_version),
            (Library::Zlib, &self.zlib_version),
        ];
        for (library, pin) in pins {
            if pin.is_some() {
                config.versions.set(library, pin.clone());
            }
        }
    }
}

/// Arguments for the prebuilt command.
#[derive(Parser, Debug, Clone)]
pub struct PrebuiltArgs {
    /// Directory for downloaded and unpacked bundles.
    #[arg(long, value_name = "DIR", default_value = "libs")]
    pub download_dir: Utf8PathBuf,
}

/// Arguments for the resolve command.
#[derive(Parser, Debug, Clone)]
pub struct ResolveArgs {
    /// Library to resolve: libxml2, libxslt, libiconv or zlib.
    pub library: Library,

    /// Use this version instead of the newest listed one.
    #[arg(long, value_name = "VERSION")]
    pub version: Option<String>,
}

/// Arguments for the extract command.
#[derive(Parser, Debug, Clone)]
pub struct ExtractArgs {
    /// Archive to unpack (.tar.gz, .tar.xz, .tar or .zip).
    pub archive: PathBuf,

    /// Destination directory.
    pub destination: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("xmldeps").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn build_flags_override_config_file() {
        let cli = parse(&[
            "build",
            "--download-dir",
            "cache",
            "--libxml2-version",
            "2.10.3",
            "-j",
            "4",
        ]);
        let Command::Build(args) = cli.command else {
            panic!("expected build command");
        };
        let mut config = BuildConfig::default();
        config.versions.set(Library::Libxml2, Some("2.9.14".to_owned()));
        config.versions.set(Library::Zlib, Some("1.3".to_owned()));

        args.apply(&mut config);

        assert_eq!(config.download_dir, "cache");
        assert_eq!(config.build_dir, "build/tmp");
        assert_eq!(config.multicore, Some(4));
        assert_eq!(config.versions.get(Library::Libxml2), Some("2.10.3"));
        assert_eq!(config.versions.get(Library::Zlib), Some("1.3"));
        assert!(config.with_zlib);
    }

    #[rstest]
    #[case(&["resolve", "zlib"], LevelFilter::Info)]
    #[case(&["-q", "resolve", "zlib"], LevelFilter::Warn)]
    #[case(&["resolve", "zlib", "-vv"], LevelFilter::Trace)]
    fn verbosity_selects_log_level(#[case] args: &[&str], #[case] expected: LevelFilter) {
        assert_eq!(parse(args).log_level(), expected);
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        let result = Cli::try_parse_from(["xmldeps", "-v", "-q", "resolve", "zlib"]);
        assert!(result.is_err());
    }

    #[test]
    fn resolve_parses_library_aliases() {
        let Command::Resolve(args) = parse(&["resolve", "xslt", "--version", "1.1.39"]).command
        else {
            panic!("expected resolve command");
        };
        assert_eq!(args.library, Library::Libxslt);
        assert_eq!(args.version.as_deref(), Some("1.1.39"));
    }

    #[test]
    fn unknown_library_is_a_usage_error() {
        let result = Cli::try_parse_from(["xmldeps", "resolve", "libfoo"]);
        assert!(result.is_err());
    }

    #[test]
    fn prebuilt_defaults_to_libs() {
        let Command::Prebuilt(args) = parse(&["prebuilt"]).command else {
            panic!("expected prebuilt command");
        };
        assert_eq!(args.download_dir, "libs");
    }
}
