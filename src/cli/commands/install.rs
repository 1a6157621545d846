use crate::colors::*;
use crate::config::Config;
use crate::fetch::http::HttpClient;
use crate::fetch::{FetchOptions, PackageOutcome, PackageStatus};
use crate::installer::{Installer, Phase, ResolutionOrigin};
use crate::registry::RegistryIndex;
use anyhow::{bail, Result};
use std::env;

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    pub quiet: bool,
    pub verbose: bool,
    pub jobs: Option<usize>,
}

pub fn cmd_install(opts: InstallOptions) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(jobs) = opts.jobs {
        config.jobs = jobs.max(1);
    }
    let client = HttpClient::new(&config.network)?;
    let index = RegistryIndex::new(client.clone(), &config.hosts);
    let project_root = env::current_dir()?;

    let installer = Installer::new(&config, &index, &client);
    let summary = installer.install(
        &project_root,
        &FetchOptions { jobs: config.jobs },
        &mut |phase: Phase| {
            if opts.quiet {
                return;
            }
            match phase {
                Phase::ResolvingPackages => status("Resolving packages..."),
                Phase::ResolvingDependencies => status("Resolving dependencies..."),
                Phase::Fetching => {
                    status("Fetching...");
                    println!();
                }
            }
        },
    )?;

    let report = &summary.report;
    if opts.verbose {
        for outcome in &report.outcomes {
            print_detail(outcome);
        }
    }
    if !opts.quiet {
        for outcome in &report.outcomes {
            print_outcome(outcome);
        }
        if report.all_already_installed() {
            println!("{C_GRAY}[poac]{C_RESET} {C_YELLOW}warning{C_RESET} already installed");
        }
        println!();
        let lock_note = match (summary.origin, summary.lock_written) {
            (ResolutionOrigin::Locked, _) => " (from poac.lock)",
            (ResolutionOrigin::Resolved, true) => " (poac.lock updated)",
            (ResolutionOrigin::Resolved, false) => "",
        };
        println!(
            "{C_GRAY}[poac]{C_RESET} {C_GREEN}Done.{C_RESET} {fetched} fetched, {failed} failed{C_DIM}{lock_note}{C_RESET}",
            fetched = report.fetched_count(),
            failed = report.failed_count(),
        );
    }

    if !report.is_clean() {
        let names: Vec<&str> = report.failures().map(|o| o.name.as_str()).collect();
        bail!(
            "{} package(s) failed to install: {}",
            names.len(),
            names.join(", ")
        );
    }
    Ok(())
}

fn status(msg: &str) {
    println!("{C_GRAY}[poac]{C_RESET} {C_CYAN}{msg}{C_RESET}");
}

fn print_detail(o: &PackageOutcome) {
    println!(
        "NAME: {}\n  VERSION: {}\n  SOURCE: {}\n  CACHE_NAME: {}\n  CURRENT_NAME: {}\n  IS_CACHED: {}\n",
        o.name, o.version, o.source, o.cache_name, o.current_name, o.was_cached
    );
}

fn print_outcome(o: &PackageOutcome) {
    match &o.status {
        PackageStatus::AlreadyInstalled => {}
        PackageStatus::Installed { from_cache } => {
            let origin = if *from_cache { " (cached)" } else { "" };
            println!(
                "  {C_GREEN}fetched{C_RESET} {} {} (from: {}){C_DIM}{origin}{C_RESET}",
                o.name, o.version, o.source
            );
        }
        PackageStatus::Failed { error } => {
            println!(
                "  {C_RED}failed{C_RESET}  {} {} (from: {}) {C_DIM}at {}: {error}{C_RESET}",
                o.name,
                o.version,
                o.source,
                o.reached.as_str()
            );
        }
    }
}
