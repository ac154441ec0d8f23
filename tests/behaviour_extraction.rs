//! BDD tests for safe archive extraction.

use filetime::FileTime;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::path::PathBuf;
use xmldeps::extraction::{ExtractError, extract};
use xmldeps::test_utils::{TarFixture, ZipFixture};

const OLD_TIMESTAMP: i64 = 1_000_000_000;

struct ExtractionWorld {
    temp_dir: tempfile::TempDir,
    archive: Option<PathBuf>,
    result: Option<Result<PathBuf, ExtractError>>,
}

impl ExtractionWorld {
    fn destination(&self) -> PathBuf {
        self.temp_dir.path().join("build").join("tmp")
    }

    fn archive_path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }
}

#[fixture]
fn world() -> ExtractionWorld {
    ExtractionWorld {
        temp_dir: tempfile::tempdir().expect("temp dir"),
        archive: None,
        result: None,
    }
}

#[given("a gzip tarball with members under \"{top}\"")]
fn given_source_tarball(world: &mut ExtractionWorld, top: String) {
    let path = world.archive_path(&format!("{top}.tar.gz"));
    TarFixture::new()
        .dir(&format!("{top}/"))
        .file(&format!("{top}/README"), b"read me\n")
        .dir(&format!("{top}/include/libxml/"))
        .file(&format!("{top}/include/libxml/tree.h"), b"/* tree */\n")
        .write_gz(&path);
    world.archive = Some(path);
}

#[given("a tarball with a member named \"{member}\"")]
fn given_hostile_member(world: &mut ExtractionWorld, member: String) {
    let path = world.archive_path("hostile.tar");
    TarFixture::new()
        .file("pkg/ok.txt", b"fine")
        .file(&member, b"escaped")
        .write_plain(&path);
    world.archive = Some(path);
}

#[given("a tarball with a symlink \"{link}\" pointing to \"{target}\"")]
fn given_hostile_symlink(world: &mut ExtractionWorld, link: String, target: String) {
    let path = world.archive_path("links.tar");
    TarFixture::new()
        .dir("pkg/")
        .symlink(&link, &target)
        .write_plain(&path);
    world.archive = Some(path);
}

#[given("a zip archive with members under \"{first}\" and \"{second}\"")]
fn given_split_zip(world: &mut ExtractionWorld, first: String, second: String) {
    let path = world.archive_path("split.zip");
    ZipFixture::new()
        .file(&format!("{first}/a.txt"), b"a")
        .file(&format!("{second}/b.txt"), b"b")
        .write(&path);
    world.archive = Some(path);
}

#[when("the archive is extracted")]
fn when_extracted(world: &mut ExtractionWorld) {
    let archive = world.archive.as_ref().expect("archive set");
    world.result = Some(extract(archive, &world.destination()));
}

#[when("the file \"{path}\" is given an old timestamp")]
fn when_file_aged(world: &mut ExtractionWorld, path: String) {
    filetime::set_file_mtime(
        world.destination().join(path),
        FileTime::from_unix_time(OLD_TIMESTAMP, 0),
    )
    .expect("set mtime");
}

#[then("extraction succeeds with top-level directory \"{top}\"")]
fn then_top_level(world: &mut ExtractionWorld, top: String) {
    let result = world.result.as_ref().expect("result set");
    let dir = result.as_ref().expect("extraction should succeed");
    let expected = world
        .destination()
        .canonicalize()
        .expect("canonical destination")
        .join(top);
    assert_eq!(*dir, expected);
}

#[then("the file \"{path}\" exists in the destination")]
fn then_file_exists(world: &mut ExtractionWorld, path: String) {
    assert!(world.destination().join(&path).is_file(), "{path} missing");
}

#[then("extraction fails with a path escape")]
fn then_path_escape(world: &mut ExtractionWorld) {
    let result = world.result.as_ref().expect("result set");
    assert!(
        matches!(result, Err(ExtractError::PathEscape { .. })),
        "expected PathEscape, got {result:?}"
    );
}

#[then("extraction fails with an inconsistent top-level directory")]
fn then_inconsistent(world: &mut ExtractionWorld) {
    let result = world.result.as_ref().expect("result set");
    assert!(
        matches!(result, Err(ExtractError::InconsistentTopLevelDirectory { .. })),
        "expected InconsistentTopLevelDirectory, got {result:?}"
    );
}

#[then("nothing is written next to the destination")]
fn then_nothing_outside(world: &mut ExtractionWorld) {
    assert!(!world.temp_dir.path().join("escape.txt").exists());
    let siblings: Vec<_> = std::fs::read_dir(world.temp_dir.path().join("build"))
        .expect("read build dir")
        .map(|entry| entry.expect("dir entry").file_name())
        .collect();
    assert_eq!(siblings, vec![std::ffi::OsString::from("tmp")]);
}

#[then("the file \"{path}\" still has the old timestamp")]
fn then_timestamp_kept(world: &mut ExtractionWorld, path: String) {
    let result = world.result.as_ref().expect("result set");
    assert!(result.is_ok(), "re-extraction failed: {result:?}");
    let meta = std::fs::metadata(world.destination().join(path)).expect("metadata");
    assert_eq!(
        FileTime::from_last_modification_time(&meta).unix_seconds(),
        OLD_TIMESTAMP
    );
}

#[scenario(
    path = "tests/features/extraction.feature",
    name = "Tarball unpacks into its top-level directory"
)]
fn scenario_tarball_unpacks(world: ExtractionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/extraction.feature",
    name = "Parent traversal is rejected"
)]
fn scenario_parent_traversal(world: ExtractionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/extraction.feature",
    name = "Symlink pointing outside is rejected"
)]
fn scenario_symlink_escape(world: ExtractionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/extraction.feature",
    name = "Members under two roots are rejected"
)]
fn scenario_split_zip(world: ExtractionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/extraction.feature",
    name = "Re-extraction skips files already present"
)]
fn scenario_reextraction(world: ExtractionWorld) {
    let _ = world;
}
