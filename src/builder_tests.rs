//! Unit tests for the source builder.

use super::*;
use crate::extraction::MockArchiveExtractor;
use crate::fetch::MockUrlReader;
use crate::test_utils::{ExpectedCall, StubExecutor, failure_output};
use filetime::FileTime;
use rstest::{fixture, rstest};
use tempfile::TempDir;

fn set_mtime(path: &Path, seconds: i64) {
    filetime::set_file_mtime(path, FileTime::from_unix_time(seconds, 0)).expect("set mtime");
}

fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, b"").expect("touch");
}

fn args(command: &CommandSpec) -> Vec<&str> {
    command.args.iter().map(String::as_str).collect()
}

#[rstest]
#[case(None, 1, None)]
#[case(None, 2, Some(3))]
#[case(None, 4, Some(5))]
#[case(None, 16, Some(6))]
#[case(Some(0), 4, Some(5))]
#[case(Some(1), 16, None)]
#[case(Some(8), 2, Some(8))]
fn make_jobs_follows_cpu_count_and_override(
    #[case] multicore: Option<u32>,
    #[case] cpus: u32,
    #[case] expected: Option<u32>,
) {
    assert_eq!(make_jobs(multicore, cpus), expected);
}

#[test]
fn cmmi_runs_configure_make_and_install_in_source_dir() {
    let executor = StubExecutor::new(vec![
        ExpectedCall::ok("./configure", &["--prefix=/opt/x"]),
        ExpectedCall::ok("make", &["-j3"]),
        ExpectedCall::ok("make", &["-j3", "install"]),
    ]);
    let configure = CommandSpec::new("./configure", "/src/zlib-1.3")
        .arg("--prefix=/opt/x")
        .envs(&[("CFLAGS".to_owned(), "-O2".to_owned())]);

    cmmi(&executor, &configure, Some(3)).expect("build");

    executor.assert_finished();
    for command in executor.seen() {
        assert_eq!(command.cwd, Path::new("/src/zlib-1.3"));
        assert_eq!(command.env, vec![("CFLAGS".to_owned(), "-O2".to_owned())]);
    }
}

#[test]
fn cmmi_stops_at_failing_configure() {
    let executor = StubExecutor::new(vec![ExpectedCall {
        program: "./configure",
        args: Vec::new(),
        result: Ok(failure_output("C compiler cannot create executables\n")),
    }]);
    let configure = CommandSpec::new("./configure", "/src/libiconv-1.17");

    let err = cmmi(&executor, &configure, None).expect_err("configure fails");

    executor.assert_finished();
    match err {
        BuildError::CommandFailed { command, stderr, .. } => {
            assert_eq!(command, "./configure");
            assert_eq!(stderr, "C compiler cannot create executables");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn command_display_joins_program_and_args() {
    let command = CommandSpec::new("make", ".").args(["-j6", "install"]);
    assert_eq!(command.to_string(), "make -j6 install");
}

#[test]
fn session_without_lib_dir_rebuilds_everything() {
    let temp = TempDir::new().expect("temp dir");
    let mut session =
        BuildSession::scan(&temp.path().join("missing"), &lib_names(true)).expect("scan");

    assert!(!session.has_current_lib("libz", temp.path()));
    assert!(!session.has_current_lib("libxml2", temp.path()));
}

#[test]
fn current_lib_is_reused_until_a_rebuild() {
    let temp = TempDir::new().expect("temp dir");
    let lib_dir = temp.path().join("lib");
    let source = temp.path().join("src");
    fs::create_dir_all(&source).expect("source dir");
    set_mtime(&source, 1_000_000_000);
    for name in ["libz.a", "libiconv.a", "libxml2.a"] {
        touch(&lib_dir.join(name));
    }
    set_mtime(&lib_dir.join("libiconv.a"), 900_000_000);

    let mut session = BuildSession::scan(&lib_dir, &lib_names(true)).expect("scan");

    assert!(session.has_current_lib("libz", &source));
    assert!(!session.has_current_lib("iconv", &source));
    // libxml2.a is fresh, but a dependency was just rebuilt.
    assert!(!session.has_current_lib("libxml2", &source));
}

#[test]
fn libxslt_name_does_not_match_libexslt() {
    let listing = vec!["libexslt.a".to_owned(), "libxslt.a".to_owned()];
    let matches: Vec<_> = matching_archives(&listing, "libxslt").collect();
    assert_eq!(matches, vec!["libxslt.a"]);
}

#[rstest]
#[case("2.7.2", false, false)]
#[case("2.7.3", false, true)]
#[case("2.9.4", false, true)]
#[case("2.9.5", true, true)]
#[case("2.10.0-rc1", true, true)]
fn libxml2_flags_depend_on_version(
    #[case] version: &str,
    #[case] without_lzma: bool,
    #[case] no_docs: bool,
) {
    let temp = TempDir::new().expect("temp dir");
    touch(&temp.path().join("configure"));

    let command = libxml2_configure(temp.path(), Path::new("/p"), version, true);

    assert_eq!(command.program, "./configure");
    assert_eq!(args(&command).contains(&"--without-lzma"), without_lzma);
    assert_eq!(args(&command).contains(&"--enable-rebuild-docs=no"), no_docs);
    assert!(args(&command).contains(&"--with-zlib=/p"));
}

#[test]
fn libxml2_without_configure_uses_autogen() {
    let temp = TempDir::new().expect("temp dir");

    let command = libxml2_configure(temp.path(), Path::new("/p"), "2.11.0", false);

    assert_eq!(command.program, "./autogen.sh");
    assert_eq!(
        args(&command)[..6],
        [
            "--disable-dependency-tracking",
            "--disable-shared",
            "--prefix=/p",
            "--without-python",
            "--with-iconv=/p",
            "--without-zlib",
        ]
    );
}

#[test]
fn libxslt_configure_script_is_patched_once() {
    let temp = TempDir::new().expect("temp dir");
    let script = temp.path().join("configure");
    fs::write(&script, "LIBS=`$XML_CONFIG --libs print `\n").expect("seed");

    assert!(patch_libxslt_configure(temp.path()).expect("patch"));
    assert_eq!(
        fs::read_to_string(&script).expect("read"),
        "LIBS=`$XML_CONFIG --libs `\n"
    );
    assert!(!patch_libxslt_configure(temp.path()).expect("second patch"));
}

#[rstest]
#[case::every_occurrence(b"a --libs print b --libs print ", Some(&b"a --libs b --libs "[..]))]
#[case::match_at_start(b" --libs print x", Some(&b" --libs x"[..]))]
#[case::no_match(b"LIBS=--libs", None)]
fn replaces_byte_sequences(#[case] haystack: &[u8], #[case] expected: Option<&[u8]>) {
    let replaced = replace_bytes(haystack, b" --libs print ", b" --libs ");
    assert_eq!(replaced.as_deref(), expected);
}

#[test]
fn version_is_taken_from_directory_name() {
    assert_eq!(version_from_dir(Path::new("/b/libxml2-2.10.3")), "2.10.3");
    assert_eq!(version_from_dir(Path::new("/b/libxml2-2.9.0-rc1")), "2.9.0-rc1");
    assert_eq!(version_from_dir(Path::new("/b/libxml2")), "libxml2");
}

#[rstest]
#[case(Platform::Other, 0)]
#[case(Platform::MacOs { major: 10 }, 0)]
#[case(Platform::MacOs { major: 11 }, 3)]
fn platform_env_targets_universal_binaries_on_recent_macos(
    #[case] platform: Platform,
    #[case] expected: usize,
) {
    assert_eq!(platform.build_env(|_| None).len(), expected);
}

#[test]
fn process_environment_overrides_macos_defaults() {
    let env = temp_env::with_var("CFLAGS", Some("-O0"), || {
        Platform::MacOs { major: 14 }.build_env(|key| std::env::var(key).ok())
    });

    assert!(env.iter().all(|(key, _)| key != "CFLAGS"));
    assert!(
        env.contains(&("MACOSX_DEPLOYMENT_TARGET".to_owned(), "11.0".to_owned()))
    );
}

struct BuildTree {
    temp: TempDir,
    options: BuildOptions,
}

impl BuildTree {
    fn source(&self, name: &str) -> PathBuf {
        self.options.build_dir.join(name)
    }

    fn prefix(&self) -> PathBuf {
        self.options.build_dir.join("libxml2")
    }

    fn prefix_arg(&self) -> String {
        format!("--prefix={}", self.prefix().display())
    }
}

/// Pinned archives already downloaded and source trees already unpacked.
#[fixture]
fn tree() -> BuildTree {
    let temp = TempDir::new().expect("temp dir");
    let download_dir = temp.path().join("libs");
    let build_dir = temp.path().join("build");
    for archive in [
        "zlib-1.3.1.tar.gz",
        "libiconv-1.17.tar.gz",
        "libxml2-2.10.3.tar.xz",
        "libxslt-1.1.34.tar.xz",
    ] {
        touch(&download_dir.join(archive));
    }
    for source in ["zlib-1.3.1", "libiconv-1.17", "libxml2-2.10.3", "libxslt-1.1.34"] {
        touch(&build_dir.join(source).join("configure"));
    }
    fs::write(
        build_dir.join("libxslt-1.1.34/configure"),
        "$XML_CONFIG --libs print \n",
    )
    .expect("seed configure");

    let mut versions = LibraryVersions::default();
    versions.set(Library::Zlib, Some("1.3.1".to_owned()));
    versions.set(Library::Libiconv, Some("1.17".to_owned()));
    versions.set(Library::Libxml2, Some("2.10.3".to_owned()));
    versions.set(Library::Libxslt, Some("1.1.34".to_owned()));

    let options = BuildOptions {
        download_dir,
        build_dir,
        versions,
        multicore: None,
        with_zlib: true,
        cpus: 1,
        env: Vec::new(),
    };
    BuildTree { temp, options }
}

fn offline_reader() -> MockUrlReader {
    let mut reader = MockUrlReader::new();
    reader.expect_read_url().never();
    reader.expect_download().never();
    reader
}

fn unpacked_extractor() -> MockArchiveExtractor {
    let mut extractor = MockArchiveExtractor::new();
    extractor.expect_extract().times(4).returning(|archive, dest| {
        let name = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name.trim_end_matches(".tar.gz").trim_end_matches(".tar.xz");
        Ok(dest.join(stem))
    });
    extractor
}

fn seed_libs(tree: &BuildTree, mtime: i64) {
    let lib_dir = tree.prefix().join("lib");
    for name in ["libz.a", "libiconv.a", "libxml2.a", "libxslt.a", "libexslt.a"] {
        let path = lib_dir.join(name);
        touch(&path);
        set_mtime(&path, mtime);
    }
}

#[rstest]
fn builds_every_library_in_order(tree: BuildTree) {
    // Stale archives: older than the unpacked sources.
    seed_libs(&tree, 1_000_000_000);
    let prefix = tree.prefix().display().to_string();
    let prefix_arg = tree.prefix_arg();
    let static_flags = [
        "--disable-dependency-tracking",
        "--disable-shared",
        prefix_arg.as_str(),
    ];
    let with = |extra: &[&str]| -> Vec<String> {
        static_flags
            .iter()
            .chain(extra)
            .map(|arg| (*arg).to_owned())
            .collect()
    };
    let mut expected = Vec::new();
    let mut cmmi_calls = |configure_args: Vec<String>| {
        expected.push(ExpectedCall {
            program: "./configure",
            args: configure_args,
            result: Ok(crate::test_utils::success_output()),
        });
        expected.push(ExpectedCall::ok("make", &[]));
        expected.push(ExpectedCall::ok("make", &["install"]));
    };
    cmmi_calls(vec![prefix_arg.clone()]);
    cmmi_calls(with(&[]));
    cmmi_calls(with(&[
        "--without-python",
        &format!("--with-iconv={prefix}"),
        &format!("--with-zlib={prefix}"),
        "--without-lzma",
        "--enable-rebuild-docs=no",
    ]));
    cmmi_calls(with(&[
        "--without-python",
        &format!("--with-libxml-prefix={prefix}"),
        "--without-crypto",
    ]));
    let executor = StubExecutor::new(expected);

    let outputs = build_libxml2xslt(
        &offline_reader(),
        &unpacked_extractor(),
        &executor,
        &tree.options,
    )
    .expect("build");

    executor.assert_finished();
    let cwds: Vec<_> = executor.seen().iter().map(|c| c.cwd.clone()).collect();
    assert_eq!(cwds[0], tree.source("zlib-1.3.1"));
    assert_eq!(cwds[11], tree.source("libxslt-1.1.34"));
    assert_eq!(
        fs::read_to_string(tree.source("libxslt-1.1.34/configure")).expect("configure"),
        "$XML_CONFIG --libs \n"
    );
    assert_eq!(outputs.static_libraries.len(), 5);
}

#[rstest]
fn current_libraries_are_not_rebuilt(tree: BuildTree) {
    for source in ["zlib-1.3.1", "libiconv-1.17", "libxml2-2.10.3", "libxslt-1.1.34"] {
        set_mtime(&tree.source(source), 1_000_000_000);
    }
    seed_libs(&tree, 1_600_000_000);
    touch(&tree.prefix().join("bin/xml2-config"));
    let executor = StubExecutor::new(Vec::new());

    let outputs = build_libxml2xslt(
        &offline_reader(),
        &unpacked_extractor(),
        &executor,
        &tree.options,
    )
    .expect("build");

    assert!(executor.seen().is_empty());
    let lib_dir = tree.prefix().join("lib");
    assert_eq!(
        outputs.static_libraries,
        vec![
            lib_dir.join("libxml2.a"),
            lib_dir.join("libexslt.a"),
            lib_dir.join("libxslt.a"),
            lib_dir.join("libiconv.a"),
            lib_dir.join("libz.a"),
        ]
    );
    assert_eq!(outputs.library_dirs, vec![lib_dir]);
    assert_eq!(outputs.include_dirs[0], tree.prefix().join("include"));
    assert_eq!(outputs.include_dirs.len(), 4);
    assert_eq!(outputs.xml2_config, Some(tree.prefix().join("bin/xml2-config")));
    assert_eq!(outputs.xslt_config, None);
    assert!(tree.temp.path().join("libs").is_dir());
}
