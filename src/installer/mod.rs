//! `poac install` without the terminal: lock → resolve → fetch → lock.

use crate::cache::CacheManager;
use crate::config::Config;
use crate::error::Result;
use crate::fetch::{ArchiveSource, FetchOptions, FetchReport, Fetcher};
use crate::fsutil::{ensure_dir, DEPS_DIR, LOCK_FILE, MANIFEST_FILE};
use crate::lockfile;
use crate::manifest;
use crate::registry::PackageIndex;
use crate::resolver::{self, Activated, Backtracked};
use anyhow::Context;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOrigin {
    /// Reused from a lock file whose fingerprint matched the manifest.
    Locked,
    /// Computed by the resolver during this run.
    Resolved,
}

/// Progress points reported to the caller as the install moves along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ResolvingPackages,
    ResolvingDependencies,
    Fetching,
}

#[derive(Debug)]
pub struct InstallSummary {
    pub origin: ResolutionOrigin,
    pub report: FetchReport,
    pub lock_written: bool,
}

pub struct Installer<'a> {
    config: &'a Config,
    index: &'a dyn PackageIndex,
    archives: &'a dyn ArchiveSource,
}

impl<'a> Installer<'a> {
    pub fn new(config: &'a Config, index: &'a dyn PackageIndex, archives: &'a dyn ArchiveSource) -> Self {
        Self {
            config,
            index,
            archives,
        }
    }

    /// Install every dependency of the project at `project_root`.
    ///
    /// Resolution errors abort before anything is fetched. Fetch failures are
    /// reported per package in the summary; the lock is still written because
    /// it records the resolution, not the state of `deps/`.
    pub fn install(
        &self,
        project_root: &Path,
        options: &FetchOptions,
        on_phase: &mut dyn FnMut(Phase),
    ) -> Result<InstallSummary> {
        ensure_dir(&self.config.cache_root)
            .with_context(|| format!("create cache directory {}", self.config.cache_root.display()))?;

        let manifest_path = project_root.join(MANIFEST_FILE);
        let manifest = manifest::load(&manifest_path)?;
        let fingerprint = manifest::fingerprint(&manifest_path, self.config.fingerprint)?;
        let lock_path = project_root.join(LOCK_FILE);
        let locked = lockfile::try_load(&lock_path, &fingerprint)?;

        on_phase(Phase::ResolvingPackages);
        let requests = match locked {
            Some(_) => Vec::new(),
            None => manifest.requests()?,
        };

        on_phase(Phase::ResolvingDependencies);
        let (origin, backtracked, fresh): (ResolutionOrigin, Backtracked, Option<Activated>) =
            match locked {
                Some(backtracked) => {
                    debug!(packages = backtracked.len(), "using locked resolution");
                    (ResolutionOrigin::Locked, backtracked, None)
                }
                None => {
                    let resolved = resolver::resolve(self.index, &requests)
                        .context("failed to resolve dependencies")?;
                    (ResolutionOrigin::Resolved, resolved.backtracked, Some(resolved.activated))
                }
            };

        on_phase(Phase::Fetching);
        let deps_root = project_root.join(DEPS_DIR);
        ensure_dir(&deps_root).with_context(|| format!("create {}", deps_root.display()))?;
        let cache = CacheManager::new(self.config.cache_root.clone(), deps_root);
        let report = Fetcher::new(&cache, self.archives, &self.config.hosts).fetch_all(&backtracked, options)?;

        let lock_written = match &fresh {
            Some(activated) => {
                lockfile::store(&lock_path, &fingerprint, activated)?;
                true
            }
            None => false,
        };

        Ok(InstallSummary {
            origin,
            report,
            lock_written,
        })
    }
}
