use crate::config::{Config, FingerprintMode, NetworkConfig};
use crate::error::{Error, TransportError};
use crate::fetch::ArchiveSource;
use crate::fsutil::MANIFEST_FILE;
use crate::naming::{self, Source};
use crate::registry::PackageIndex;
use crate::resolver::ConstraintRequest;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use url::Url;

/// In-memory registry: name → version → dependencies.
#[derive(Default)]
pub struct MemoryIndex {
    packages: BTreeMap<String, BTreeMap<String, Vec<ConstraintRequest>>>,
    pub version_lookups: AtomicUsize,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// `deps` keys use manifest syntax, so `github/o/r` is a GitHub edge.
    pub fn add(&mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> &mut Self {
        let reqs = deps
            .iter()
            .map(|(key, c)| {
                let (source, bare) = naming::split_source(key);
                ConstraintRequest::new(bare, *c, source)
            })
            .collect();
        self.packages
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), reqs);
        self
    }
}

impl PackageIndex for MemoryIndex {
    fn versions(&self, source: Source, name: &str) -> Result<Vec<String>, Error> {
        self.version_lookups.fetch_add(1, Ordering::SeqCst);
        if source == Source::Github {
            return Ok(Vec::new());
        }
        Ok(self
            .packages
            .get(name)
            .map(|v| v.keys().cloned().collect())
            .unwrap_or_default())
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
        Ok(self
            .packages
            .get(name)
            .and_then(|v| v.get(version))
            .cloned()
            .unwrap_or_default())
    }
}

/// Archive server keyed by URL that counts every download attempt.
#[derive(Default)]
pub struct MemoryArchives {
    archives: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    downloads: AtomicUsize,
}

impl MemoryArchives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, config: &Config, source: Source, name: &str, version: &str, bytes: Vec<u8>) {
        let url = naming::archive_url_in(&config.hosts, source, name, version).unwrap();
        self.archives.lock().insert(url.to_string(), bytes);
    }

    /// Respond with a 503 for this package, as if retries ran out.
    pub fn fail(&self, config: &Config, source: Source, name: &str, version: &str) {
        let url = naming::archive_url_in(&config.hosts, source, name, version).unwrap();
        self.failing.lock().insert(url.to_string());
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl ArchiveSource for MemoryArchives {
    fn download(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let key = url.to_string();
        if self.failing.lock().contains(&key) {
            return Err(TransportError::Status { url: key, status: 503, attempts: 1 });
        }
        self.archives
            .lock()
            .get(&key)
            .cloned()
            .ok_or(TransportError::Status { url: key, status: 404, attempts: 1 })
    }
}

/// A gzip tarball with every file under a single `root/` directory, the way
/// GitHub and the registry storage ship packages.
pub fn tarball(root: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let enc = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(enc);
    for (path, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{root}/{path}"), body.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Temporary project directory plus a private global cache.
pub struct Sandbox {
    temp: tempfile::TempDir,
    pub config: Config,
}

impl Sandbox {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("create sandbox tempdir");
        fs::create_dir_all(temp.path().join("project")).expect("create project dir");
        let config = Config {
            cache_root: temp.path().join("cache"),
            jobs: 2,
            fingerprint: FingerprintMode::ModifiedTime,
            ..Config::default()
        };
        Self { temp, config }
    }

    pub fn project(&self) -> PathBuf {
        self.temp.path().join("project")
    }

    pub fn deps(&self) -> PathBuf {
        self.project().join("deps")
    }

    pub fn cache(&self) -> &Path {
        &self.config.cache_root
    }

    pub fn write_manifest(&self, body: &str) -> PathBuf {
        let path = self.project().join(MANIFEST_FILE);
        fs::write(&path, body).expect("write poac.yml");
        path
    }
}

pub fn req(name: &str, constraint: &str) -> ConstraintRequest {
    let (source, bare) = naming::split_source(name);
    ConstraintRequest::new(bare, constraint, source)
}

/// Minimal HTTP/1.1 server on a loopback port. Every request path is recorded
/// and answered with whatever `respond` returns for it.
pub struct StubServer {
    pub base: Url,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub fn start<F>(respond: F) -> Self
    where
        F: Fn(&str) -> (u16, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
        let base = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                loop {
                    let mut line = String::new();
                    match reader.read_line(&mut line) {
                        Ok(0) | Err(_) => break,
                        Ok(_) if line == "\r\n" => break,
                        Ok(_) => {}
                    }
                }
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                let (status, body) = respond(&path);
                seen.lock().push(path);
                let _ = write!(
                    stream,
                    "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.flush();
            }
        });
        Self { base, requests }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().len()
    }
}

/// Network settings that retry quickly enough for tests.
pub fn fast_network(max_attempts: u32) -> NetworkConfig {
    NetworkConfig {
        connect_timeout: Duration::from_secs(2),
        timeout: Duration::from_secs(5),
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}
