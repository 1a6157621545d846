use crate::config::FingerprintMode;
use crate::error::{Error, Result};
use crate::naming::{split_source, Source};
use crate::resolver::ConstraintRequest;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::UNIX_EPOCH;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSystem {
    Poac,
    Cmake,
}

impl FromStr for BuildSystem {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Error> {
        match s {
            "poac" => Ok(BuildSystem::Poac),
            "cmake" => Ok(BuildSystem::Cmake),
            other => Err(Error::UnknownBuildSystem(other.to_string())),
        }
    }
}

/// `build: cmake` or `build: { system: cmake }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildNode {
    System(String),
    Detailed { system: String },
}

impl BuildNode {
    pub fn system(&self) -> std::result::Result<BuildSystem, Error> {
        match self {
            BuildNode::System(s) | BuildNode::Detailed { system: s } => s.parse(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DetailedDep {
    version: Option<Value>,
    build: Option<BuildNode>,
    source: Option<String>,
}

/// `poac.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildNode>,
    /// Dependency key to either a bare constraint or a detailed table.
    #[serde(default)]
    pub deps: BTreeMap<String, Value>,
}

impl Manifest {
    pub fn new(name: String, version: String) -> Self {
        Self {
            name,
            version,
            build: None,
            deps: BTreeMap::new(),
        }
    }

    pub fn build_system(&self) -> std::result::Result<Option<BuildSystem>, Error> {
        self.build.as_ref().map(BuildNode::system).transpose()
    }

    /// One request per dependency name. When two keys name the same package
    /// (e.g. `github/o/r` and `o/r` with `source: github`) the later key wins.
    pub fn requests(&self) -> std::result::Result<Vec<ConstraintRequest>, Error> {
        let mut out: BTreeMap<String, ConstraintRequest> = BTreeMap::new();
        for (key, node) in &self.deps {
            let req = parse_dep(key, node)?;
            if let Some(prev) = out.insert(req.name.clone(), req) {
                warn!(package = %prev.name, key = %key, "dependency declared more than once; using the last declaration");
            }
        }
        Ok(out.into_values().collect())
    }
}

fn parse_dep(key: &str, node: &Value) -> std::result::Result<ConstraintRequest, Error> {
    let (implied, bare) = split_source(key);
    let (constraint, detail) = match node {
        Value::Mapping(_) => {
            let detail: DetailedDep = serde_yaml::from_value(node.clone())
                .map_err(|e| Error::Manifest(format!("invalid entry for dependency `{key}`: {e}")))?;
            (detail.version.as_ref().and_then(scalar), detail)
        }
        other => (scalar(other), DetailedDep::default()),
    };

    let (source, name) = match detail.source.as_deref() {
        None => (implied, bare),
        Some(tag) => match tag.parse::<Source>()? {
            s if s == implied => (s, bare),
            s => (s, key),
        },
    };
    if let Some(build) = &detail.build {
        build.system()?;
    }

    let constraint = match (source, constraint) {
        (_, Some(c)) if !c.trim().is_empty() => c,
        (Source::Poac, _) => "*".to_string(),
        (Source::Github, _) => {
            return Err(Error::Manifest(format!(
                "GitHub dependency `{key}` needs a tag as its version"
            )))
        }
    };
    if source == Source::Github {
        match name.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {}
            _ => {
                return Err(Error::Manifest(format!(
                    "GitHub dependency `{key}` must be written as github/owner/repo"
                )))
            }
        }
    }
    Ok(ConstraintRequest::new(name, constraint, source))
}

/// YAML reads `version: 1.2` as a float; constraints are always text.
fn scalar(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn load(path: &Path) -> Result<Manifest> {
    if !path.exists() {
        return Err(Error::Manifest(format!(
            "{} does not exist.\nPlease execute `poac init`.",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        ))
        .into());
    }
    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let m: Manifest = serde_yaml::from_str(&data)
        .map_err(|e| Error::Manifest(format!("failed to parse {}: {e}", path.display())))?;
    if m.name.trim().is_empty() {
        return Err(Error::Manifest("`name` must not be empty".into()).into());
    }
    m.build_system()?;
    Ok(m)
}

pub fn write(manifest: &Manifest, path: &Path) -> Result<()> {
    let data = serde_yaml::to_string(manifest)?;
    fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Change-detection token stored in the lock file's `timestamp` field.
pub fn fingerprint(path: &Path, mode: FingerprintMode) -> Result<String> {
    match mode {
        FingerprintMode::ModifiedTime => {
            let modified = fs::metadata(path)
                .and_then(|m| m.modified())
                .with_context(|| format!("stat {}", path.display()))?;
            let secs = modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            Ok(secs.to_string())
        }
        FingerprintMode::Content => {
            let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
            Ok(format!("sha256:{}", hex::encode(Sha256::digest(&bytes))))
        }
    }
}
