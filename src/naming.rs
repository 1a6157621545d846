//! Deterministic names for cache entries, project entries and archive URLs.
//!
//! These strings are the join key between resolver output, cache lookups and
//! downloads, so they depend only on `(source, name, version)`.

use crate::config::Hosts;
use crate::error::Error;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

static DEFAULT_HOSTS: Lazy<Hosts> = Lazy::new(Hosts::default);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// The poac registry.
    Poac,
    /// A GitHub repository (`owner/repo`) pinned by tag.
    Github,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Poac => "poac",
            Source::Github => "github",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "poac" => Ok(Source::Poac),
            "github" => Ok(Source::Github),
            other => Err(Error::UnknownSource(other.to_string())),
        }
    }
}

/// Split a manifest dependency key into its source and bare package name.
///
/// `github/owner/repo` selects GitHub; any other key is a registry name, which
/// may itself contain `/` (e.g. `boost/optional`).
pub fn split_source(key: &str) -> (Source, &str) {
    match key.strip_prefix("github/") {
        Some(rest) if !rest.is_empty() => (Source::Github, rest),
        _ => (Source::Poac, key),
    }
}

/// `/` becomes `--`; neither registry names nor GitHub owners contain `--`
/// adjacent to a path separator, so distinct names keep distinct slugs.
fn slug(name: &str) -> String {
    name.replace('/', "--")
}

/// Versions are slugged too: GitHub tags such as `release/1.0` are legal.
pub fn cache_name(source: Source, name: &str, version: &str) -> String {
    format!("{}-{}-{}", source, slug(name), slug(version))
}

pub fn current_name(source: Source, name: &str, version: &str) -> String {
    match source {
        Source::Poac => format!("{}-{}", slug(name), slug(version)),
        Source::Github => format!("github-{}-{}", slug(name), slug(version)),
    }
}

pub fn archive_url(source: Source, name: &str, version: &str) -> Result<Url, Error> {
    archive_url_in(&DEFAULT_HOSTS, source, name, version)
}

pub fn archive_url_in(hosts: &Hosts, source: Source, name: &str, version: &str) -> Result<Url, Error> {
    let (base, segments): (&Url, Vec<String>) = match source {
        Source::Poac => (
            &hosts.storage,
            vec![format!("{}-{}.tar.gz", slug(name), version)],
        ),
        Source::Github => {
            let (owner, repo) = name.split_once('/').ok_or_else(|| {
                Error::Manifest(format!("GitHub dependency `{name}` must be written as owner/repo"))
            })?;
            let mut segments = vec![owner.to_string(), repo.to_string(), "archive".to_string()];
            segments.extend(version.split('/').map(str::to_string));
            if let Some(last) = segments.last_mut() {
                last.push_str(".tar.gz");
            }
            (&hosts.github, segments)
        }
    };
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| Error::Invariant(format!("host {base} cannot carry a path")))?;
        path.pop_if_empty();
        for seg in &segments {
            path.push(seg);
        }
    }
    Ok(url)
}
