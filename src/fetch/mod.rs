//! Download, extract and materialize resolved packages.
//!
//! Each package moves through `Pending → Downloaded → Extracted →
//! Materialized`. A package already in the global cache starts at
//! `Extracted` and never touches the network; one already in the project's
//! `deps/` directory is skipped entirely. A failure stops that package at the
//! last stage it reached and never aborts the rest of the batch.

pub mod http;

use crate::cache::CacheManager;
use crate::config::Hosts;
use crate::error::{Error, Result, TransportError};
use crate::naming::{self, Source};
use crate::resolver::{Backtracked, ResolvedPackage};
use http::HttpClient;
use rayon::prelude::*;
use tracing::debug;
use url::Url;

/// Where package archives come from.
pub trait ArchiveSource: Sync {
    fn download(&self, url: &Url) -> std::result::Result<Vec<u8>, TransportError>;
}

impl ArchiveSource for HttpClient {
    fn download(&self, url: &Url) -> std::result::Result<Vec<u8>, TransportError> {
        self.get_bytes(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FetchStage {
    Pending,
    Downloaded,
    Extracted,
    Materialized,
}

impl FetchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStage::Pending => "pending",
            FetchStage::Downloaded => "downloaded",
            FetchStage::Extracted => "extracted",
            FetchStage::Materialized => "materialized",
        }
    }
}

#[derive(Debug)]
pub enum PackageStatus {
    AlreadyInstalled,
    Installed { from_cache: bool },
    Failed { error: Error },
}

#[derive(Debug)]
pub struct PackageOutcome {
    pub name: String,
    pub version: String,
    pub source: Source,
    pub cache_name: String,
    pub current_name: String,
    /// Whether the global cache held the entry before this run touched it.
    pub was_cached: bool,
    pub reached: FetchStage,
    pub status: PackageStatus,
}

impl PackageOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, PackageStatus::Failed { .. })
    }
}

#[derive(Debug, Default)]
pub struct FetchReport {
    /// Sorted by package name.
    pub outcomes: Vec<PackageOutcome>,
}

impl FetchReport {
    /// True when nothing had to be done, including for an empty batch.
    pub fn all_already_installed(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.status, PackageStatus::AlreadyInstalled))
    }

    pub fn fetched_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, PackageStatus::Installed { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn is_clean(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &PackageOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Upper bound on packages fetched at once.
    pub jobs: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self { jobs: 1 }
    }
}

pub struct Fetcher<'a> {
    cache: &'a CacheManager,
    archives: &'a dyn ArchiveSource,
    hosts: &'a Hosts,
}

impl<'a> Fetcher<'a> {
    pub fn new(cache: &'a CacheManager, archives: &'a dyn ArchiveSource, hosts: &'a Hosts) -> Self {
        Self {
            cache,
            archives,
            hosts,
        }
    }

    pub fn fetch_all(&self, packages: &Backtracked, options: &FetchOptions) -> Result<FetchReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs.max(1))
            .thread_name(|index| format!("poac-fetch-{index}"))
            .build()?;
        let list: Vec<&ResolvedPackage> = packages.values().collect();
        let mut outcomes: Vec<PackageOutcome> =
            pool.install(|| list.par_iter().map(|pkg| self.fetch_one(pkg)).collect());
        outcomes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(FetchReport { outcomes })
    }

    pub fn fetch_one(&self, pkg: &ResolvedPackage) -> PackageOutcome {
        let cache_name = naming::cache_name(pkg.source, &pkg.name, &pkg.version);
        let current_name = naming::current_name(pkg.source, &pkg.name, &pkg.version);
        let was_cached = self.cache.is_cached(&cache_name);
        let mut outcome = PackageOutcome {
            name: pkg.name.clone(),
            version: pkg.version.clone(),
            source: pkg.source,
            cache_name,
            current_name,
            was_cached,
            reached: FetchStage::Pending,
            status: PackageStatus::AlreadyInstalled,
        };

        if self.cache.is_materialized(&outcome.current_name) {
            debug!(package = %outcome.name, current = %outcome.current_name, "already materialized");
            outcome.reached = FetchStage::Materialized;
            return outcome;
        }

        outcome.status = match self.advance(pkg, &outcome.cache_name, &outcome.current_name, &mut outcome.reached) {
            Ok(()) => PackageStatus::Installed {
                from_cache: was_cached,
            },
            Err(error) => {
                debug!(package = %outcome.name, stage = outcome.reached.as_str(), %error, "fetch failed");
                PackageStatus::Failed { error }
            }
        };
        outcome
    }

    fn advance(
        &self,
        pkg: &ResolvedPackage,
        cache_name: &str,
        current_name: &str,
        stage: &mut FetchStage,
    ) -> std::result::Result<(), Error> {
        if self.cache.is_cached(cache_name) {
            debug!(%cache_name, "cache hit");
        } else {
            let url = naming::archive_url_in(self.hosts, pkg.source, &pkg.name, &pkg.version)?;
            let bytes = self.archives.download(&url)?;
            *stage = FetchStage::Downloaded;
            self.cache.insert_archive(cache_name, &bytes)?;
        }
        *stage = FetchStage::Extracted;
        self.cache.materialize(cache_name, current_name)?;
        *stage = FetchStage::Materialized;
        Ok(())
    }
}
