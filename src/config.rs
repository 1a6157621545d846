//! Runtime configuration.
//!
//! Every setting has a built-in default and can be overridden through a
//! `POAC_*` environment variable; command-line flags override both.

use crate::fsutil;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_STORAGE_HOST: &str = "https://storage.googleapis.com/poac-pm.appspot.com";
pub const DEFAULT_API_HOST: &str = "https://poac.pm/api/packages";
pub const DEFAULT_GITHUB_HOST: &str = "https://github.com";

/// How the manifest change-detection token stored in the lock file is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FingerprintMode {
    /// Last-modification time of the manifest, in seconds since the Unix epoch.
    #[default]
    ModifiedTime,
    /// SHA-256 of the manifest bytes.
    Content,
}

impl FromStr for FingerprintMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mtime" | "timestamp" => Ok(FingerprintMode::ModifiedTime),
            "content" | "sha256" => Ok(FingerprintMode::Content),
            other => anyhow::bail!("unknown lock fingerprint mode '{other}', use 'mtime' or 'content'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    /// Total attempts per request, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Hosts {
    pub storage: Url,
    pub api: Url,
    pub github: Url,
}

impl Default for Hosts {
    fn default() -> Self {
        Self {
            storage: Url::parse(DEFAULT_STORAGE_HOST).expect("default storage host is a valid URL"),
            api: Url::parse(DEFAULT_API_HOST).expect("default api host is a valid URL"),
            github: Url::parse(DEFAULT_GITHUB_HOST).expect("default github host is a valid URL"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_root: PathBuf,
    pub hosts: Hosts,
    pub network: NetworkConfig,
    pub jobs: usize,
    pub fingerprint: FingerprintMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root: fsutil::default_cache_root(),
            hosts: Hosts::default(),
            network: NetworkConfig::default(),
            jobs: default_jobs(),
            fingerprint: FingerprintMode::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();
        if let Some(dir) = env::var_os("POAC_CACHE_DIR") {
            cfg.cache_root = PathBuf::from(dir);
        }
        if let Some(url) = env_url("POAC_STORAGE_HOST")? {
            cfg.hosts.storage = url;
        }
        if let Some(url) = env_url("POAC_API_HOST")? {
            cfg.hosts.api = url;
        }
        if let Some(url) = env_url("POAC_GITHUB_HOST")? {
            cfg.hosts.github = url;
        }
        if let Some(jobs) = env_parse::<usize>("POAC_JOBS")? {
            cfg.jobs = jobs.max(1);
        }
        if let Some(n) = env_parse::<u32>("POAC_RETRIES")? {
            cfg.network.max_attempts = n.max(1);
        }
        if let Some(secs) = env_parse::<u64>("POAC_CONNECT_TIMEOUT")? {
            cfg.network.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("POAC_TIMEOUT")? {
            cfg.network.timeout = Duration::from_secs(secs);
        }
        if let Some(mode) = env_parse::<FingerprintMode>("POAC_LOCK_FINGERPRINT")? {
            cfg.fingerprint = mode;
        }
        Ok(cfg)
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8)
}

fn env_url(key: &str) -> Result<Option<Url>> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            let url = Url::parse(raw.trim()).with_context(|| format!("parse {key}='{raw}'"))?;
            Ok(Some(url))
        }
        _ => Ok(None),
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {key}='{raw}': {e}")),
        _ => Ok(None),
    }
}
