//! `poac.lock`: the last resolution, keyed by a fingerprint of the manifest.
//!
//! ```yaml
//! # Please do not edit this file.
//! timestamp: "1545041312"
//! dependencies:
//!   boost/optional:
//!     version: 1.66.0
//!     source: poac
//!     dependencies:
//!       boost/config:
//!         version: 1.66.0
//!         source: poac
//! ```

use crate::error::Result;
use crate::naming::Source;
use crate::resolver::{self, Activated, ActivatedNode, Backtracked};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

const HEADER: &str = "# Please do not edit this file.\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedDependency {
    pub version: String,
    pub source: Source,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, LockedDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    pub timestamp: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, LockedDependency>,
}

impl LockFile {
    pub fn new(fingerprint: impl Into<String>, activated: &Activated) -> Self {
        Self {
            timestamp: fingerprint.into(),
            dependencies: to_locked(activated),
        }
    }

    pub fn activated(&self) -> Activated {
        from_locked(&self.dependencies)
    }
}

fn to_locked(nodes: &Activated) -> BTreeMap<String, LockedDependency> {
    nodes
        .iter()
        .map(|n| {
            (
                n.name.clone(),
                LockedDependency {
                    version: n.version.clone(),
                    source: n.source,
                    dependencies: to_locked(&n.children),
                },
            )
        })
        .collect()
}

fn from_locked(deps: &BTreeMap<String, LockedDependency>) -> Activated {
    deps.iter()
        .map(|(name, d)| ActivatedNode {
            name: name.clone(),
            version: d.version.clone(),
            source: d.source,
            children: from_locked(&d.dependencies),
        })
        .collect()
}

pub fn load(path: &Path) -> Result<LockFile> {
    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let lock: LockFile =
        serde_yaml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(lock)
}

/// The locked assignment, if the lock exists and was written for `fingerprint`.
///
/// Anything short of an exact, consistent match is a miss: the caller resolves
/// again and overwrites the lock.
pub fn try_load(path: &Path, fingerprint: &str) -> Result<Option<Backtracked>> {
    if !path.exists() {
        debug!(path = %path.display(), "no lock file");
        return Ok(None);
    }
    let lock = match load(path) {
        Ok(lock) => lock,
        Err(e) => {
            warn!(path = %path.display(), error = %format!("{e:#}"), "ignoring unreadable lock file");
            return Ok(None);
        }
    };
    if lock.timestamp != fingerprint {
        debug!(locked = %lock.timestamp, current = %fingerprint, "lock is stale");
        return Ok(None);
    }
    match resolver::flatten(&lock.activated()) {
        Ok(backtracked) => Ok(Some(backtracked)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring inconsistent lock file");
            Ok(None)
        }
    }
}

/// Write the lock through a temporary file in the same directory so readers
/// never see a half-written lock.
pub fn store(path: &Path, fingerprint: &str, activated: &Activated) -> Result<()> {
    let lock = LockFile::new(fingerprint, activated);
    let body = serde_yaml::to_string(&lock)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(HEADER.as_bytes())?;
    tmp.write_all(body.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("write {}", path.display()))?;
    debug!(path = %path.display(), "lock written");
    Ok(())
}
