use super::common::{tarball, MemoryArchives, MemoryIndex, Sandbox};
use crate::config::FingerprintMode;
use crate::error::Error;
use crate::fetch::FetchOptions;
use crate::fsutil::LOCK_FILE;
use crate::installer::{InstallSummary, Installer, Phase, ResolutionOrigin};
use crate::lockfile;
use crate::naming::Source;
use std::fs;

const MANIFEST: &str = "\
name: demo
version: 0.1.0
deps:
  X: \">=1.0\"
  github/o/y: v2.0
";

fn index() -> MemoryIndex {
    let mut index = MemoryIndex::new();
    index.add("X", "0.9.0", &[]).add("X", "1.0.0", &[]);
    index
}

fn run(sb: &Sandbox, index: &MemoryIndex, archives: &MemoryArchives) -> crate::error::Result<InstallSummary> {
    Installer::new(&sb.config, index, archives).install(
        &sb.project(),
        &FetchOptions { jobs: 2 },
        &mut |_: Phase| {},
    )
}

fn serve(sb: &Sandbox, archives: &MemoryArchives) {
    archives.serve(&sb.config, Source::Poac, "X", "1.0.0", tarball("X-1.0.0", &[("x.hpp", "x")]));
    archives.serve(&sb.config, Source::Github, "o/y", "v2.0", tarball("y-2.0", &[("y.hpp", "y")]));
}

#[test]
fn first_install_resolves_fetches_and_locks() {
    let sb = Sandbox::new();
    sb.write_manifest(MANIFEST);
    let (index, archives) = (index(), MemoryArchives::new());
    serve(&sb, &archives);

    let mut phases = Vec::new();
    let summary = Installer::new(&sb.config, &index, &archives)
        .install(&sb.project(), &FetchOptions { jobs: 2 }, &mut |p: Phase| phases.push(p))
        .unwrap();
    assert_eq!(
        phases,
        [Phase::ResolvingPackages, Phase::ResolvingDependencies, Phase::Fetching]
    );
    assert_eq!(summary.origin, ResolutionOrigin::Resolved);
    assert!(summary.lock_written);
    assert_eq!(summary.report.fetched_count(), 2);
    assert!(sb.cache().is_dir());
    assert!(sb.deps().join("X-1.0.0/x.hpp").is_file());
    assert!(sb.deps().join("github-o--y-v2.0/y.hpp").is_file());

    let lock = lockfile::load(&sb.project().join(LOCK_FILE)).unwrap();
    assert_eq!(lock.dependencies["X"].version, "1.0.0");
    assert_eq!(lock.dependencies["o/y"].source, Source::Github);
}

#[test]
fn second_install_is_a_no_op() {
    let sb = Sandbox::new();
    sb.write_manifest(MANIFEST);
    let (index, archives) = (index(), MemoryArchives::new());
    serve(&sb, &archives);

    run(&sb, &index, &archives).unwrap();
    let lock_before = fs::read_to_string(sb.project().join(LOCK_FILE)).unwrap();

    let second = run(&sb, &index, &archives).unwrap();
    assert_eq!(second.origin, ResolutionOrigin::Locked);
    assert!(!second.lock_written);
    assert!(second.report.all_already_installed());
    assert_eq!(second.report.fetched_count(), 0);
    assert_eq!(archives.downloads(), 2);
    assert_eq!(fs::read_to_string(sb.project().join(LOCK_FILE)).unwrap(), lock_before);
}

#[test]
fn lock_is_written_even_when_a_fetch_fails() {
    let sb = Sandbox::new();
    sb.write_manifest(MANIFEST);
    let (index, archives) = (index(), MemoryArchives::new());
    serve(&sb, &archives);
    archives.fail(&sb.config, Source::Github, "o/y", "v2.0");

    let summary = run(&sb, &index, &archives).unwrap();
    assert_eq!(summary.report.fetched_count(), 1);
    assert_eq!(summary.report.failed_count(), 1);
    assert!(summary.lock_written);
    assert!(sb.project().join(LOCK_FILE).is_file());
    assert!(sb.deps().join("X-1.0.0").is_dir());
}

#[test]
fn missing_manifest_is_reported() {
    let sb = Sandbox::new();
    let err = run(&sb, &index(), &MemoryArchives::new()).unwrap_err();
    match err.downcast_ref::<Error>() {
        Some(Error::Manifest(msg)) => assert!(msg.contains("poac init")),
        other => panic!("expected a manifest error, got {other:?}"),
    }
}

#[test]
fn resolution_failure_writes_nothing() {
    let sb = Sandbox::new();
    sb.write_manifest("name: demo\nversion: 0.1.0\ndeps:\n  X: \">=5\"\n");
    let archives = MemoryArchives::new();

    let err = run(&sb, &index(), &archives).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::NoMatchingVersion { .. })
    ));
    assert!(!sb.project().join(LOCK_FILE).exists());
    assert!(!sb.deps().exists());
    assert_eq!(archives.downloads(), 0);
}

#[test]
fn content_fingerprint_sees_same_second_edits() {
    let mut sb = Sandbox::new();
    sb.config.fingerprint = FingerprintMode::Content;
    sb.write_manifest(MANIFEST);
    let (mut index, archives) = (index(), MemoryArchives::new());
    serve(&sb, &archives);
    run(&sb, &index, &archives).unwrap();

    index.add("Z", "3.1.0", &[]);
    archives.serve(&sb.config, Source::Poac, "Z", "3.1.0", tarball("Z-3.1.0", &[("z.hpp", "z")]));
    sb.write_manifest(&format!("{MANIFEST}  Z: \"3\"\n"));

    let summary = run(&sb, &index, &archives).unwrap();
    assert_eq!(summary.origin, ResolutionOrigin::Resolved);
    assert!(summary.lock_written);
    assert!(sb.deps().join("Z-3.1.0/z.hpp").is_file());
}
