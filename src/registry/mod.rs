use crate::config::Hosts;
use crate::error::{Error, TransportError};
use crate::fetch::http::HttpClient;
use crate::naming::{split_source, Source};
use crate::resolver::ConstraintRequest;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// Package metadata the resolver needs: which versions exist and what each
/// version depends on.
pub trait PackageIndex: Sync {
    fn versions(&self, source: Source, name: &str) -> Result<Vec<String>, Error>;

    fn dependencies(
        &self,
        source: Source,
        name: &str,
        version: &str,
    ) -> Result<Vec<ConstraintRequest>, Error>;
}

/// Reads metadata from the registry's HTTP API.
///
/// GitHub-sourced packages are pinned to a tag and carry no dependency
/// metadata, so they never hit the network here.
#[derive(Debug)]
pub struct RegistryIndex {
    client: HttpClient,
    api: Url,
    versions_cache: Mutex<HashMap<String, Vec<String>>>,
}

impl RegistryIndex {
    pub fn new(client: HttpClient, hosts: &Hosts) -> Self {
        Self {
            client,
            api: hosts.api.clone(),
            versions_cache: Mutex::new(HashMap::new()),
        }
    }

    fn endpoint(&self, name: &str, tail: &[&str]) -> Result<Url, Error> {
        let mut url = self.api.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| Error::Invariant(format!("api host {} cannot carry a path", self.api)))?;
            path.pop_if_empty();
            for part in name.split('/') {
                path.push(part);
            }
            path.extend(tail);
        }
        Ok(url)
    }
}

impl PackageIndex for RegistryIndex {
    fn versions(&self, source: Source, name: &str) -> Result<Vec<String>, Error> {
        if source == Source::Github {
            return Ok(Vec::new());
        }
        if let Some(hit) = self.versions_cache.lock().get(name).cloned() {
            return Ok(hit);
        }
        let url = self.endpoint(name, &["versions"])?;
        let versions: Vec<String> = match self.client.get_json(&url) {
            Ok(v) => v,
            Err(TransportError::Status { status: 404, .. }) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        self.versions_cache
            .lock()
            .insert(name.to_string(), versions.clone());
        Ok(versions)
    }

    fn dependencies(
        &self,
        source: Source,
        name: &str,
        version: &str,
    ) -> Result<Vec<ConstraintRequest>, Error> {
        if source == Source::Github {
            return Ok(Vec::new());
        }
        let url = self.endpoint(name, &[version, "deps"])?;
        let deps: Option<BTreeMap<String, Option<String>>> = self.client.get_json(&url)?;
        Ok(deps
            .unwrap_or_default()
            .into_iter()
            .map(|(key, constraint)| {
                let (source, bare) = split_source(&key);
                ConstraintRequest::new(bare, constraint.unwrap_or_else(|| "*".into()), source)
            })
            .collect())
    }
}
