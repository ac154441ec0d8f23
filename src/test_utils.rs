//! Shared test utilities for the crate.
//!
//! Archive fixtures here write raw tar headers so that hostile member names
//! (`../escape`, absolute paths, outward link targets) survive into the
//! archive; `tar::Builder`'s own path helpers refuse them.

use crate::builder::{CommandExecutor, CommandSpec};
use crate::error::Result;
use crate::fetch::{NetworkError, RemoteDocument, UrlReader};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::process::{ExitStatus, Output};

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code.unsigned_abs())
}

/// Creates a successful command `Output` with empty stdout and stderr.
pub fn success_output() -> Output {
    Output {
        status: exit_status(0),
        stdout: Vec::new(),
        stderr: Vec::new(),
    }
}

/// Creates a failed command `Output` with the given stderr message.
pub fn failure_output(stderr: &str) -> Output {
    Output {
        status: exit_status(1),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// Represents an expected command invocation for testing.
#[derive(Debug)]
pub struct ExpectedCall {
    /// The program to execute (e.g., "make").
    pub program: &'static str,
    /// The arguments to pass to the program.
    pub args: Vec<String>,
    /// The result to return when this command is invoked.
    pub result: Result<Output>,
}

impl ExpectedCall {
    /// An expected call that succeeds with empty output.
    pub fn ok(program: &'static str, args: &[&str]) -> Self {
        Self {
            program,
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            result: Ok(success_output()),
        }
    }
}

/// A stub implementation of `CommandExecutor` for testing.
///
/// Records expected command invocations and returns predefined results,
/// allowing tests to verify command execution without side effects.
#[derive(Debug)]
pub struct StubExecutor {
    expected: RefCell<VecDeque<ExpectedCall>>,
    seen: RefCell<Vec<CommandSpec>>,
}

impl StubExecutor {
    /// Creates a new `StubExecutor` with the given expected calls.
    pub fn new(expected: Vec<ExpectedCall>) -> Self {
        Self {
            expected: RefCell::new(expected.into()),
            seen: RefCell::new(Vec::new()),
        }
    }

    /// Every command run so far, in order.
    pub fn seen(&self) -> Vec<CommandSpec> {
        self.seen.borrow().clone()
    }

    /// Asserts that all expected command invocations have been consumed.
    ///
    /// # Panics
    ///
    /// Panics if there are remaining expected calls that were not invoked.
    pub fn assert_finished(&self) {
        assert!(
            self.expected.borrow().is_empty(),
            "expected no further command invocations"
        );
    }
}

impl CommandExecutor for StubExecutor {
    fn run(&self, command: &CommandSpec) -> Result<Output> {
        self.seen.borrow_mut().push(command.clone());
        let mut expected = self.expected.borrow_mut();
        let call = expected
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected command invocation: {command}"));

        assert_eq!(call.program, command.program);
        assert_eq!(call.args, command.args);

        call.result
    }
}

/// A `UrlReader` that serves canned documents and downloads.
///
/// Unknown URLs fail with [`NetworkError::NotFound`].
#[derive(Debug, Default)]
pub struct ScriptedReader {
    documents: HashMap<String, RemoteDocument>,
    files: HashMap<String, Vec<u8>>,
    requests: RefCell<Vec<String>>,
}

impl ScriptedReader {
    /// Serve `body` as HTML at `url`.
    #[must_use]
    pub fn with_html(mut self, url: &str, body: &str) -> Self {
        self.documents.insert(
            url.to_owned(),
            RemoteDocument {
                body: body.to_owned(),
                content_type: Some("text/html".to_owned()),
            },
        );
        self
    }

    /// Serve `body` as plain text (FTP-style listing) at `url`.
    #[must_use]
    pub fn with_text(mut self, url: &str, body: &str) -> Self {
        self.documents.insert(
            url.to_owned(),
            RemoteDocument {
                body: body.to_owned(),
                content_type: None,
            },
        );
        self
    }

    /// Serve `body` as JSON at `url`.
    #[must_use]
    pub fn with_json(mut self, url: &str, body: &str) -> Self {
        self.documents.insert(
            url.to_owned(),
            RemoteDocument {
                body: body.to_owned(),
                content_type: Some("application/json".to_owned()),
            },
        );
        self
    }

    /// Serve `bytes` as a downloadable file at `url`.
    #[must_use]
    pub fn with_file(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(url.to_owned(), bytes);
        self
    }

    /// Every URL requested so far, listings and downloads alike.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    fn record(&self, url: &str) {
        self.requests.borrow_mut().push(url.to_owned());
    }
}

impl UrlReader for ScriptedReader {
    fn read_url(
        &self,
        url: &str,
        _accept: crate::fetch::Accept,
    ) -> std::result::Result<RemoteDocument, NetworkError> {
        self.record(url);
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| NetworkError::NotFound {
                url: url.to_owned(),
            })
    }

    fn download(&self, url: &str, dest: &Path) -> std::result::Result<(), NetworkError> {
        self.record(url);
        let bytes = self.files.get(url).ok_or_else(|| NetworkError::NotFound {
            url: url.to_owned(),
        })?;
        std::fs::write(dest, bytes).map_err(|source| NetworkError::Io {
            url: url.to_owned(),
            source,
        })
    }
}

/// Builds tar archives in memory, member by member.
pub struct TarFixture {
    builder: tar::Builder<Vec<u8>>,
}

impl Default for TarFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl TarFixture {
    /// An empty archive.
    pub fn new() -> Self {
        Self {
            builder: tar::Builder::new(Vec::new()),
        }
    }

    /// Append a regular file.
    #[must_use]
    pub fn file(self, name: &str, contents: &[u8]) -> Self {
        self.member(name, tar::EntryType::Regular, None, 0o644, contents)
    }

    /// Append a directory.
    #[must_use]
    pub fn dir(self, name: &str) -> Self {
        self.member(name, tar::EntryType::Directory, None, 0o755, &[])
    }

    /// Append a symbolic link.
    #[must_use]
    pub fn symlink(self, name: &str, target: &str) -> Self {
        self.member(name, tar::EntryType::Symlink, Some(target), 0o777, &[])
    }

    /// Append a hard link.
    #[must_use]
    pub fn hardlink(self, name: &str, target: &str) -> Self {
        self.member(name, tar::EntryType::Link, Some(target), 0o644, &[])
    }

    /// Append a FIFO.
    #[must_use]
    pub fn fifo(self, name: &str) -> Self {
        self.member(name, tar::EntryType::Fifo, None, 0o644, &[])
    }

    fn member(
        mut self,
        name: &str,
        kind: tar::EntryType,
        link: Option<&str>,
        mode: u32,
        contents: &[u8],
    ) -> Self {
        let mut header = tar::Header::new_gnu();
        {
            let raw = header.as_old_mut();
            copy_field(&mut raw.name, name);
            if let Some(link) = link {
                copy_field(&mut raw.linkname, link);
            }
        }
        header.set_entry_type(kind);
        header.set_mode(mode);
        header.set_mtime(1_700_000_000);
        header.set_size(contents.len() as u64);
        header.set_cksum();
        self.builder
            .append(&header, contents)
            .expect("append tar member");
        self
    }

    /// The finished, uncompressed archive bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.builder.into_inner().expect("finish tar archive")
    }

    /// Write the archive gzip-compressed to `path`.
    pub fn write_gz(self, path: &Path) {
        let bytes = self.into_bytes();
        let file = std::fs::File::create(path).expect("create archive");
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(&bytes).expect("gzip archive");
        encoder.finish().expect("finish gzip");
    }

    /// Write the archive xz-compressed to `path`.
    pub fn write_xz(self, path: &Path) {
        let bytes = self.into_bytes();
        let file = std::fs::File::create(path).expect("create archive");
        let mut encoder = xz2::write::XzEncoder::new(file, 6);
        encoder.write_all(&bytes).expect("xz archive");
        encoder.finish().expect("finish xz");
    }

    /// Write the archive uncompressed to `path`.
    pub fn write_plain(self, path: &Path) {
        std::fs::write(path, self.into_bytes()).expect("write archive");
    }
}

fn copy_field(field: &mut [u8; 100], value: &str) {
    let bytes = value.as_bytes();
    assert!(bytes.len() < field.len(), "tar field too long: {value}");
    field.fill(0);
    field[..bytes.len()].copy_from_slice(bytes);
}

/// Builds zip archives in memory.
pub struct ZipFixture {
    writer: zip::ZipWriter<std::io::Cursor<Vec<u8>>>,
}

impl Default for ZipFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipFixture {
    /// An empty archive.
    pub fn new() -> Self {
        Self {
            writer: zip::ZipWriter::new(std::io::Cursor::new(Vec::new())),
        }
    }

    /// Append a file.
    #[must_use]
    pub fn file(mut self, name: &str, contents: &[u8]) -> Self {
        self.writer
            .start_file(name, zip::write::SimpleFileOptions::default())
            .expect("start zip entry");
        self.writer.write_all(contents).expect("write zip entry");
        self
    }

    /// Append a directory.
    #[must_use]
    pub fn dir(mut self, name: &str) -> Self {
        self.writer
            .add_directory(name, zip::write::SimpleFileOptions::default())
            .expect("add zip directory");
        self
    }

    /// The finished archive bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.finish().expect("finish zip").into_inner()
    }

    /// Write the finished archive to `path`.
    pub fn write(self, path: &Path) {
        std::fs::write(path, self.into_bytes()).expect("write zip");
    }
}
