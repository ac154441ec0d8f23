//! `xmldeps` CLI entrypoint.
//!
//! Builds the static libxml2/libxslt stack from source (or fetches the
//! prebuilt Windows binaries) and prints the directories a downstream build
//! should compile and link against.

use clap::Parser;
use log::LevelFilter;
use std::io::Write;
use xmldeps::builder::{
    BuildOptions, BuildOutputs, Platform, SystemCommandExecutor, build_libxml2xslt,
};
use xmldeps::cli::{BuildArgs, Cli, Command, ExtractArgs, PrebuiltArgs, ResolveArgs};
use xmldeps::config::BuildConfig;
use xmldeps::error::Result;
use xmldeps::extraction::{SafeExtractor, extract};
use xmldeps::fetch::HttpReader;
use xmldeps::library::resolve_library;
use xmldeps::prebuilt::{PrebuiltOutputs, WindowsArch, fetch_prebuilt};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level());
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut stdout);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn run(cli: &Cli, stdout: &mut dyn Write) -> Result<()> {
    match &cli.command {
        Command::Build(args) => run_build(args, stdout),
        Command::Prebuilt(args) => run_prebuilt(args, stdout),
        Command::Resolve(args) => run_resolve(args, stdout),
        Command::Extract(args) => run_extract(args, stdout),
    }
}

fn run_build(args: &BuildArgs, stdout: &mut dyn Write) -> Result<()> {
    let mut config = BuildConfig::discover(args.config.as_deref())?;
    args.apply(&mut config);

    let executor = SystemCommandExecutor;
    let mut options = BuildOptions::from(&config);
    options.env = Platform::detect(&executor).build_env(|key| std::env::var(key).ok());

    let outputs = build_libxml2xslt(&HttpReader::from_env(), &SafeExtractor, &executor, &options)?;
    report_build(&outputs, stdout);
    Ok(())
}

fn run_prebuilt(args: &PrebuiltArgs, stdout: &mut dyn Write) -> Result<()> {
    let outputs = fetch_prebuilt(
        &HttpReader::from_env(),
        &SafeExtractor,
        args.download_dir.as_std_path(),
        WindowsArch::detect(),
    )?;
    report_prebuilt(&outputs, stdout);
    Ok(())
}

fn run_resolve(args: &ResolveArgs, stdout: &mut dyn Write) -> Result<()> {
    let resolved = resolve_library(&HttpReader::from_env(), args.library, args.version.as_deref())?;
    write_line(stdout, format!("{} {}", resolved.version, resolved.filename));
    write_line(stdout, resolved.url);
    Ok(())
}

fn run_extract(args: &ExtractArgs, stdout: &mut dyn Write) -> Result<()> {
    let top = extract(&args.archive, &args.destination)?;
    write_line(stdout, top.display());
    Ok(())
}

fn report_build(outputs: &BuildOutputs, stdout: &mut dyn Write) {
    for dir in &outputs.include_dirs {
        write_line(stdout, format!("include {}", dir.display()));
    }
    for dir in &outputs.library_dirs {
        write_line(stdout, format!("libdir {}", dir.display()));
    }
    for lib in &outputs.static_libraries {
        write_line(stdout, format!("static {}", lib.display()));
    }
    if let Some(tool) = &outputs.xml2_config {
        write_line(stdout, format!("xml2-config {}", tool.display()));
    }
    if let Some(tool) = &outputs.xslt_config {
        write_line(stdout, format!("xslt-config {}", tool.display()));
    }
}

fn report_prebuilt(outputs: &PrebuiltOutputs, stdout: &mut dyn Write) {
    for dir in &outputs.include_dirs {
        write_line(stdout, format!("include {}", dir.display()));
    }
    for dir in &outputs.library_dirs {
        write_line(stdout, format!("libdir {}", dir.display()));
    }
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_line(stderr, format!("error: {err}"));
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                write_line(stderr, format!("  caused by: {cause}"));
                source = cause.source();
            }
            1
        }
    }
}

fn write_line(out: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(out, "{message}").is_err() {
        // Best-effort output; ignore write failures.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use xmldeps::error::BuildError;

    #[test]
    fn exit_code_for_run_result_returns_zero_on_success() {
        let mut stderr = Vec::new();
        let exit_code = exit_code_for_run_result(Ok(()), &mut stderr);
        assert_eq!(exit_code, 0);
        assert!(stderr.is_empty());
    }

    #[test]
    fn exit_code_for_run_result_prints_error_chain_and_returns_one() {
        let err = BuildError::Io {
            path: PathBuf::from("build/tmp"),
            source: std::io::Error::other("disk full"),
        };

        let mut stderr = Vec::new();
        let exit_code = exit_code_for_run_result(Err(err), &mut stderr);
        assert_eq!(exit_code, 1);

        let stderr_text = String::from_utf8(stderr).expect("stderr was not UTF-8");
        assert!(stderr_text.starts_with("error: I/O error at build/tmp"));
        assert!(stderr_text.contains("caused by: disk full"));
    }

    #[test]
    fn build_report_lists_every_output() {
        let outputs = BuildOutputs {
            include_dirs: vec![PathBuf::from("/p/include")],
            library_dirs: vec![PathBuf::from("/p/lib")],
            static_libraries: vec![PathBuf::from("/p/lib/libxml2.a")],
            xml2_config: Some(PathBuf::from("/p/bin/xml2-config")),
            xslt_config: None,
        };

        let mut stdout = Vec::new();
        report_build(&outputs, &mut stdout);

        assert_eq!(
            String::from_utf8(stdout).expect("utf-8"),
            "include /p/include\nlibdir /p/lib\nstatic /p/lib/libxml2.a\nxml2-config /p/bin/xml2-config\n"
        );
    }

    #[test]
    fn extract_prints_top_level_directory() {
        let temp = tempfile::tempdir().expect("temp dir");
        let archive = temp.path().join("zlib-1.3.zip");
        xmldeps::test_utils::ZipFixture::new()
            .file("zlib-1.3/zlib.h", b"/* zlib */")
            .write(&archive);
        let args = ExtractArgs {
            archive,
            destination: temp.path().join("out"),
        };

        let mut stdout = Vec::new();
        run_extract(&args, &mut stdout).expect("extract");

        let printed = String::from_utf8(stdout).expect("utf-8");
        assert!(printed.trim_end().ends_with("zlib-1.3"));
    }
}
