//! Source builds of zlib, libiconv, libxml2 and libxslt into a private
//! static prefix.
//!
//! Each library is downloaded, unpacked under the build directory and built
//! with the usual configure / make / make install sequence. Static archives
//! already in the prefix are reused when they are newer than their unpacked
//! sources; once any library is rebuilt, every library after it is rebuilt
//! too since it may link against the fresh one.

use log::info;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::config::{BuildConfig, LibraryVersions};
use crate::error::{BuildError, Result};
use crate::extraction::ArchiveExtractor;
use crate::fetch::UrlReader;
use crate::library::{Library, download_library};
use crate::version::VersionTuple;

/// An external command with its working directory and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to run.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Variables added to the inherited environment.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// A command with no arguments running in `cwd`.
    #[must_use]
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add environment variables.
    #[must_use]
    pub fn envs(mut self, env: &[(String, String)]) -> Self {
        self.env.extend_from_slice(env);
        self
    }

    /// A different program sharing this command's directory and environment.
    fn sibling(&self, program: &str) -> Self {
        Self {
            program: program.to_owned(),
            args: Vec::new(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Abstraction for running external commands.
pub trait CommandExecutor {
    /// Runs a command and returns the captured output.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::CommandSpawn`] when the command cannot be
    /// started.
    fn run(&self, command: &CommandSpec) -> Result<Output>;
}

/// Executes commands on the host system.
///
/// # Examples
///
/// ```no_run
/// use xmldeps::builder::{CommandExecutor, CommandSpec, SystemCommandExecutor};
///
/// let executor = SystemCommandExecutor;
/// let output = executor.run(&CommandSpec::new("make", ".").arg("--version"))?;
/// assert!(output.status.success());
/// # Ok::<(), xmldeps::error::BuildError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandExecutor;

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, command: &CommandSpec) -> Result<Output> {
        Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .envs(command.env.iter().map(|(key, value)| (key, value)))
            .output()
            .map_err(|source| BuildError::CommandSpawn {
                command: command.to_string(),
                source,
            })
    }
}

/// Run `command` and fail unless it exits successfully.
///
/// # Errors
///
/// Returns [`BuildError::CommandFailed`] with the captured stderr on a
/// non-zero exit, or the executor's spawn error.
pub fn run_checked(executor: &dyn CommandExecutor, command: &CommandSpec) -> Result<Output> {
    info!("Running \"{command}\" in {}", command.cwd.display());
    let output = executor.run(command)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BuildError::CommandFailed {
            command: command.to_string(),
            cwd: command.cwd.clone(),
            status: output.status.to_string(),
            stderr: stderr.trim().to_owned(),
        });
    }
    Ok(output)
}

/// Parallel `make` jobs for a build.
///
/// An explicit `multicore` above one is used as is and `1` disables
/// parallel builds. Otherwise hosts with more than one CPU get
/// `min(cpus, 5) + 1` jobs.
///
/// # Examples
///
/// ```
/// use xmldeps::builder::make_jobs;
///
/// assert_eq!(make_jobs(None, 8), Some(6));
/// assert_eq!(make_jobs(Some(3), 8), Some(3));
/// assert_eq!(make_jobs(Some(1), 8), None);
/// assert_eq!(make_jobs(None, 1), None);
/// ```
#[must_use]
pub fn make_jobs(multicore: Option<u32>, cpus: u32) -> Option<u32> {
    match multicore {
        Some(jobs) if jobs > 1 => Some(jobs),
        Some(1) => None,
        _ if cpus > 1 => Some(cpus.min(5) + 1),
        _ => None,
    }
}

/// Configure, make, make install.
///
/// The make steps run in the configure command's directory with its
/// environment.
///
/// # Errors
///
/// Returns the first failing command's error.
pub fn cmmi(
    executor: &dyn CommandExecutor,
    configure: &CommandSpec,
    jobs: Option<u32>,
) -> Result<()> {
    info!("Starting build in {}", configure.cwd.display());
    run_checked(executor, configure)?;
    let job_flag = jobs.map(|count| format!("-j{count}"));
    let make = configure.sibling("make").args(job_flag);
    run_checked(executor, &make)?;
    run_checked(executor, &make.arg("install"))?;
    Ok(())
}

/// Tracks which static libraries in the prefix can be reused.
#[derive(Debug, Default)]
pub struct BuildSession {
    rebuild_following: bool,
    existing_libs: HashMap<String, PathBuf>,
}

impl BuildSession {
    /// Index the static archives in `lib_dir` for each of `names`. A missing
    /// directory yields an empty session.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Io`] when `lib_dir` exists but cannot be read.
    pub fn scan(lib_dir: &Path, names: &[&str]) -> Result<Self> {
        if !lib_dir.is_dir() {
            return Ok(Self::default());
        }
        let listing = sorted_file_names(lib_dir)?;
        let existing_libs = names
            .iter()
            .filter_map(|name| {
                let file = matching_archives(&listing, name).last()?;
                Some(((*name).to_owned(), lib_dir.join(file)))
            })
            .collect();
        Ok(Self {
            rebuild_following: false,
            existing_libs,
        })
    }

    /// Whether the static library `name` is newer than its unpacked
    /// `source_dir`.
    ///
    /// Always false once an earlier library was rebuilt. A miss marks every
    /// following library for rebuilding.
    pub fn has_current_lib(&mut self, name: &str, source_dir: &Path) -> bool {
        if self.rebuild_following {
            return false;
        }
        let found = self
            .existing_libs
            .get(name)
            .is_some_and(|lib| newer_than(lib, source_dir));
        if found {
            info!("Found pre-built '{name}'");
        } else {
            self.rebuild_following = true;
        }
        found
    }
}

fn newer_than(lib: &Path, source_dir: &Path) -> bool {
    let modified = |path: &Path| fs::metadata(path).and_then(|meta| meta.modified()).ok();
    match (modified(lib), modified(source_dir)) {
        (Some(built), Some(unpacked)) => built > unpacked,
        _ => false,
    }
}

fn sorted_file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = fs::read_dir(dir)
        .map_err(BuildError::io(dir))?
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect::<Vec<_>>();
    names.sort();
    Ok(names)
}

fn matching_archives<'a>(
    listing: &'a [String],
    name: &'a str,
) -> impl Iterator<Item = &'a String> + 'a {
    listing
        .iter()
        .filter(move |file| file.contains(name) && file.ends_with(".a"))
}

/// Library name fragments identifying the static archives to link.
#[must_use]
pub fn lib_names(with_zlib: bool) -> Vec<&'static str> {
    let mut names = vec!["libxml2", "libexslt", "libxslt", "iconv"];
    if with_zlib {
        names.push("libz");
    }
    names
}

/// Host platform facts that change how sources are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// macOS with the given major version.
    MacOs {
        /// The major release number.
        major: u32,
    },
    /// Any other Unix-like host.
    Other,
}

impl Platform {
    /// Detect the host platform, asking `sw_vers` for the macOS release.
    #[must_use]
    pub fn detect(executor: &dyn CommandExecutor) -> Self {
        if !cfg!(target_os = "macos") {
            return Self::Other;
        }
        let command = CommandSpec::new("sw_vers", ".").arg("-productVersion");
        executor
            .run(&command)
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| parse_major(&String::from_utf8_lossy(&output.stdout)))
            .map_or(Self::Other, |major| Self::MacOs { major })
    }

    /// Extra environment for configure and make on this platform.
    ///
    /// On macOS 11 and later this targets both `x86_64` and `arm64`.
    /// Variables already set according to `lookup` are left alone.
    #[must_use]
    pub fn build_env(self, lookup: impl Fn(&str) -> Option<String>) -> Vec<(String, String)> {
        let Self::MacOs { major } = self else {
            return Vec::new();
        };
        if major < 11 {
            return Vec::new();
        }
        [
            ("CFLAGS", "-arch x86_64 -arch arm64 -O3"),
            ("LDFLAGS", "-arch x86_64 -arch arm64"),
            ("MACOSX_DEPLOYMENT_TARGET", "11.0"),
        ]
        .into_iter()
        .filter(|(key, _)| lookup(key).is_none())
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
    }
}

fn parse_major(version: &str) -> Option<u32> {
    version.trim().split('.').next()?.parse().ok()
}

/// Inputs to [`build_libxml2xslt`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Where archives are downloaded.
    pub download_dir: PathBuf,
    /// Where sources are unpacked and the prefix lives.
    pub build_dir: PathBuf,
    /// Pinned versions.
    pub versions: LibraryVersions,
    /// Explicit parallel job count.
    pub multicore: Option<u32>,
    /// Build zlib and link libxml2 against it.
    pub with_zlib: bool,
    /// Host CPU count, used when `multicore` is unset.
    pub cpus: u32,
    /// Extra environment for every build command.
    pub env: Vec<(String, String)>,
}

impl From<&BuildConfig> for BuildOptions {
    fn from(config: &BuildConfig) -> Self {
        let cpus = std::thread::available_parallelism()
            .map_or(1, |count| u32::try_from(count.get()).unwrap_or(u32::MAX));
        Self {
            download_dir: config.download_dir.clone().into_std_path_buf(),
            build_dir: config.build_dir.clone().into_std_path_buf(),
            versions: config.versions.clone(),
            multicore: config.multicore,
            with_zlib: config.with_zlib,
            cpus,
            env: Vec::new(),
        }
    }
}

/// What a downstream build needs to compile and link against the libraries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutputs {
    /// Header search directories.
    pub include_dirs: Vec<PathBuf>,
    /// Library search directories.
    pub library_dirs: Vec<PathBuf>,
    /// Static archives to link, in dependency order of the library names.
    pub static_libraries: Vec<PathBuf>,
    /// `xml2-config`, when installed.
    pub xml2_config: Option<PathBuf>,
    /// `xslt-config`, when installed.
    pub xslt_config: Option<PathBuf>,
}

impl BuildOutputs {
    fn collect(prefix: &Path, names: &[&str]) -> Result<Self> {
        let lib_dir = prefix.join("lib");
        let listing = sorted_file_names(&lib_dir)?;
        let static_libraries = names
            .iter()
            .flat_map(|name| matching_archives(&listing, name))
            .map(|file| lib_dir.join(file))
            .collect();
        let include = prefix.join("include");
        let tool = |name: &str| Some(prefix.join("bin").join(name)).filter(|path| path.is_file());
        Ok(Self {
            include_dirs: vec![
                include.clone(),
                include.join("libxml2"),
                include.join("libxslt"),
                include.join("libexslt"),
            ],
            library_dirs: vec![lib_dir],
            static_libraries,
            xml2_config: tool("xml2-config"),
            xslt_config: tool("xslt-config"),
        })
    }
}

/// `./configure --prefix=<prefix>` as zlib's configure script expects.
#[must_use]
pub fn zlib_configure(source_dir: &Path, prefix: &Path) -> CommandSpec {
    CommandSpec::new("./configure", source_dir).arg(format!("--prefix={}", prefix.display()))
}

/// The autoconf configure command shared by libiconv, libxml2 and libxslt.
#[must_use]
pub fn static_configure(source_dir: &Path, prefix: &Path) -> CommandSpec {
    CommandSpec::new("./configure", source_dir).args([
        "--disable-dependency-tracking".to_owned(),
        "--disable-shared".to_owned(),
        format!("--prefix={}", prefix.display()),
    ])
}

/// Configure command for libxml2 `version` unpacked in `source_dir`.
///
/// Sources without a generated `configure` script (git checkouts) are
/// bootstrapped through `./autogen.sh` with the same flags.
#[must_use]
pub fn libxml2_configure(
    source_dir: &Path,
    prefix: &Path,
    version: &str,
    with_zlib: bool,
) -> CommandSpec {
    let zlib = if with_zlib {
        format!("--with-zlib={}", prefix.display())
    } else {
        "--without-zlib".to_owned()
    };
    let mut command = static_configure(source_dir, prefix).args([
        "--without-python".to_owned(),
        format!("--with-iconv={}", prefix.display()),
        zlib,
    ]);
    let release = VersionTuple::parse_release(version);
    if release.is_at_least(&[2, 9, 5]) {
        command = command.arg("--without-lzma");
    }
    if release.is_at_least(&[2, 7, 3]) {
        command = command.arg("--enable-rebuild-docs=no");
    }
    if !source_dir.join("configure").exists() {
        command.program = "./autogen.sh".to_owned();
    }
    command
}

/// Configure command for libxslt (and libexslt).
#[must_use]
pub fn libxslt_configure(source_dir: &Path, prefix: &Path) -> CommandSpec {
    static_configure(source_dir, prefix).args([
        "--without-python".to_owned(),
        format!("--with-libxml-prefix={}", prefix.display()),
        "--without-crypto".to_owned(),
    ])
}

/// Fix libxslt's configure script, which up to 1.1.34 invokes
/// `xml2-config --libs print`. Returns true when the script was changed.
///
/// # Errors
///
/// Returns [`BuildError::Io`] when the script cannot be read or written.
pub fn patch_libxslt_configure(source_dir: &Path) -> Result<bool> {
    let script = source_dir.join("configure");
    let contents = fs::read(&script).map_err(BuildError::io(&script))?;
    let Some(patched) = replace_bytes(&contents, b" --libs print ", b" --libs ") else {
        return Ok(false);
    };
    fs::write(&script, patched).map_err(BuildError::io(&script))?;
    Ok(true)
}

fn replace_bytes(haystack: &[u8], from: &[u8], to: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    let mut changed = false;
    while let Some(pos) = rest.windows(from.len()).position(|window| window == from) {
        let (before, matched) = rest.split_at(pos);
        out.extend_from_slice(before);
        out.extend_from_slice(to);
        rest = matched.strip_prefix(from).unwrap_or_default();
        changed = true;
    }
    out.extend_from_slice(rest);
    changed.then_some(out)
}

/// The version encoded in an unpacked source directory name such as
/// `libxml2-2.10.3`.
fn version_from_dir(source_dir: &Path) -> String {
    let name = source_dir
        .file_name()
        .map(|file| file.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.split_once('-')
        .map(|(_, version)| version.to_owned())
        .unwrap_or(name)
}

struct Sources {
    zlib: Option<PathBuf>,
    libiconv: PathBuf,
    libxml2: PathBuf,
    libxslt: PathBuf,
}

fn fetch_sources(
    reader: &dyn UrlReader,
    extractor: &dyn ArchiveExtractor,
    options: &BuildOptions,
) -> Result<Sources> {
    let unpack = |library: Library| -> Result<PathBuf> {
        let archive = download_library(
            reader,
            &options.download_dir,
            library,
            options.versions.get(library),
        )?;
        info!("Unpacking {} into {}", archive.display(), options.build_dir.display());
        Ok(extractor.extract(&archive, &options.build_dir)?)
    };
    let zlib = if options.with_zlib {
        Some(unpack(Library::Zlib)?)
    } else {
        None
    };
    Ok(Sources {
        zlib,
        libiconv: unpack(Library::Libiconv)?,
        libxml2: unpack(Library::Libxml2)?,
        libxslt: unpack(Library::Libxslt)?,
    })
}

/// Download, unpack and build the whole stack into
/// `<build_dir>/libxml2`, returning what to compile and link against.
///
/// Libraries whose static archives are newer than their sources are not
/// rebuilt, until one library needs rebuilding.
///
/// # Errors
///
/// Returns a [`BuildError`] from the first failing download, extraction or
/// build command.
pub fn build_libxml2xslt(
    reader: &dyn UrlReader,
    extractor: &dyn ArchiveExtractor,
    executor: &dyn CommandExecutor,
    options: &BuildOptions,
) -> Result<BuildOutputs> {
    fs::create_dir_all(&options.download_dir).map_err(BuildError::io(&options.download_dir))?;
    fs::create_dir_all(&options.build_dir).map_err(BuildError::io(&options.build_dir))?;

    let sources = fetch_sources(reader, extractor, options)?;

    let prefix = std::path::absolute(&options.build_dir)
        .map_err(BuildError::io(&options.build_dir))?
        .join("libxml2");
    fs::create_dir_all(&prefix).map_err(BuildError::io(&prefix))?;

    let names = lib_names(options.with_zlib);
    let mut session = BuildSession::scan(&prefix.join("lib"), &names)?;
    let jobs = make_jobs(options.multicore, options.cpus);
    let build = |configure: CommandSpec| cmmi(executor, &configure.envs(&options.env), jobs);

    if let Some(zlib_dir) = &sources.zlib {
        if !session.has_current_lib("libz", zlib_dir) {
            build(zlib_configure(zlib_dir, &prefix))?;
        }
    }

    if !session.has_current_lib("iconv", &sources.libiconv) {
        build(static_configure(&sources.libiconv, &prefix))?;
    }

    let libxml2_version = options
        .versions
        .get(Library::Libxml2)
        .map_or_else(|| version_from_dir(&sources.libxml2), str::to_owned);
    if !session.has_current_lib("libxml2", &sources.libxml2) {
        build(libxml2_configure(
            &sources.libxml2,
            &prefix,
            &libxml2_version,
            options.with_zlib,
        ))?;
    }

    patch_libxslt_configure(&sources.libxslt)?;
    if !(session.has_current_lib("libxslt", &sources.libxslt)
        && session.has_current_lib("libexslt", &sources.libxslt))
    {
        build(libxslt_configure(&sources.libxslt, &prefix))?;
    }

    BuildOutputs::collect(&prefix, &names)
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
