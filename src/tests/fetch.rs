use super::common::{tarball, MemoryArchives, Sandbox};
use crate::cache::CacheManager;
use crate::error::{Error, TransportError};
use crate::fetch::{FetchOptions, FetchStage, Fetcher, PackageStatus};
use crate::naming::Source;
use crate::resolver::{Backtracked, ResolvedPackage};
use std::fs;

fn assignment(pkgs: &[(&str, &str, Source)]) -> Backtracked {
    pkgs.iter()
        .map(|(name, version, source)| {
            (
                name.to_string(),
                ResolvedPackage {
                    name: name.to_string(),
                    version: version.to_string(),
                    source: *source,
                },
            )
        })
        .collect()
}

fn serve_x_and_y(sb: &Sandbox, archives: &MemoryArchives) {
    archives.serve(&sb.config, Source::Poac, "X", "1.0.0", tarball("X-1.0.0", &[("x.hpp", "x")]));
    archives.serve(&sb.config, Source::Github, "o/y", "v2.0", tarball("y-2.0", &[("y.hpp", "y")]));
}

#[test]
fn registry_and_github_packages_land_under_deterministic_names() {
    let sb = Sandbox::new();
    let archives = MemoryArchives::new();
    serve_x_and_y(&sb, &archives);
    let cache = CacheManager::new(sb.cache().to_path_buf(), sb.deps());
    let fetcher = Fetcher::new(&cache, &archives, &sb.config.hosts);
    let deps = assignment(&[("X", "1.0.0", Source::Poac), ("o/y", "v2.0", Source::Github)]);

    let report = fetcher.fetch_all(&deps, &FetchOptions { jobs: 2 }).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.fetched_count(), 2);
    assert_eq!(archives.downloads(), 2);
    let names: Vec<&str> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, ["X", "o/y"]);
    assert!(sb.cache().join("poac-X-1.0.0/x.hpp").is_file());
    assert!(sb.cache().join("github-o--y-v2.0/y.hpp").is_file());
    assert!(sb.deps().join("X-1.0.0/x.hpp").is_file());
    assert!(sb.deps().join("github-o--y-v2.0/y.hpp").is_file());

    // Dropping only X's project copy brings it back from the cache.
    fs::remove_dir_all(sb.deps().join("X-1.0.0")).unwrap();
    let again = fetcher.fetch_all(&deps, &FetchOptions { jobs: 2 }).unwrap();
    assert_eq!(archives.downloads(), 2);
    assert!(sb.deps().join("X-1.0.0/x.hpp").is_file());
    assert!(matches!(
        again.outcomes[0].status,
        PackageStatus::Installed { from_cache: true }
    ));
    assert!(matches!(again.outcomes[1].status, PackageStatus::AlreadyInstalled));
    assert!(!again.all_already_installed());
}

#[test]
fn cached_entries_never_touch_the_network() {
    let sb = Sandbox::new();
    let archives = MemoryArchives::new();
    let cache = CacheManager::new(sb.cache().to_path_buf(), sb.deps());
    cache
        .insert_archive("poac-fmt-5.3.0", &tarball("fmt-5.3.0", &[("core.h", "")]))
        .unwrap();

    let fetcher = Fetcher::new(&cache, &archives, &sb.config.hosts);
    let report = fetcher
        .fetch_all(&assignment(&[("fmt", "5.3.0", Source::Poac)]), &FetchOptions::default())
        .unwrap();
    assert_eq!(archives.downloads(), 0);
    let outcome = &report.outcomes[0];
    assert!(outcome.was_cached);
    assert_eq!(outcome.reached, FetchStage::Materialized);
    assert!(sb.deps().join("fmt-5.3.0/core.h").is_file());
}

#[test]
fn one_failed_download_does_not_stop_the_batch() {
    let sb = Sandbox::new();
    let archives = MemoryArchives::new();
    serve_x_and_y(&sb, &archives);
    archives.fail(&sb.config, Source::Github, "o/y", "v2.0");
    let cache = CacheManager::new(sb.cache().to_path_buf(), sb.deps());
    let fetcher = Fetcher::new(&cache, &archives, &sb.config.hosts);

    let report = fetcher
        .fetch_all(
            &assignment(&[("X", "1.0.0", Source::Poac), ("o/y", "v2.0", Source::Github)]),
            &FetchOptions { jobs: 4 },
        )
        .unwrap();
    assert_eq!(report.fetched_count(), 1);
    assert_eq!(report.failed_count(), 1);
    assert!(!report.is_clean());

    let failed = report.failures().next().unwrap();
    assert_eq!(failed.name, "o/y");
    assert_eq!(failed.reached, FetchStage::Pending);
    assert!(matches!(
        failed.status,
        PackageStatus::Failed {
            error: Error::Transport(TransportError::Status { status: 503, .. })
        }
    ));
    assert!(!cache.is_cached("github-o--y-v2.0"));
    assert!(sb.deps().join("X-1.0.0/x.hpp").is_file());
}

#[test]
fn corrupt_archive_fails_after_download() {
    let sb = Sandbox::new();
    let archives = MemoryArchives::new();
    archives.serve(&sb.config, Source::Poac, "bad", "1.0.0", b"garbage".to_vec());
    let cache = CacheManager::new(sb.cache().to_path_buf(), sb.deps());
    let fetcher = Fetcher::new(&cache, &archives, &sb.config.hosts);

    let report = fetcher
        .fetch_all(&assignment(&[("bad", "1.0.0", Source::Poac)]), &FetchOptions::default())
        .unwrap();
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.reached, FetchStage::Downloaded);
    assert!(matches!(
        outcome.status,
        PackageStatus::Failed {
            error: Error::Extraction { .. }
        }
    ));
    assert!(cache.entries().unwrap().is_empty());
    assert!(!sb.deps().join("bad-1.0.0").exists());
}

#[test]
fn empty_batch_counts_as_already_installed() {
    let sb = Sandbox::new();
    let archives = MemoryArchives::new();
    let cache = CacheManager::new(sb.cache().to_path_buf(), sb.deps());
    let report = Fetcher::new(&cache, &archives, &sb.config.hosts)
        .fetch_all(&Backtracked::new(), &FetchOptions::default())
        .unwrap();
    assert!(report.all_already_installed());
    assert!(report.is_clean());
}

#[test]
fn slashed_github_tags_install_cleanly() {
    let sb = Sandbox::new();
    let archives = MemoryArchives::new();
    archives.serve(
        &sb.config,
        Source::Github,
        "o/y",
        "release/1.0",
        tarball("y-release-1.0", &[("y.hpp", "y")]),
    );
    let cache = CacheManager::new(sb.cache().to_path_buf(), sb.deps());
    let fetcher = Fetcher::new(&cache, &archives, &sb.config.hosts);
    let deps = assignment(&[("o/y", "release/1.0", Source::Github)]);

    let report = fetcher.fetch_all(&deps, &FetchOptions { jobs: 1 }).unwrap();
    assert!(report.is_clean(), "{:?}", report.outcomes);
    assert!(sb.cache().join("github-o--y-release--1.0/y.hpp").is_file());
    assert!(sb.deps().join("github-o--y-release--1.0/y.hpp").is_file());
}
