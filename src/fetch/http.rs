use crate::config::NetworkConfig;
use crate::error::TransportError;
use backoff::ExponentialBackoffBuilder;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const USER_AGENT: &str = concat!("poac/", env!("CARGO_PKG_VERSION"), " (+https://github.com/poacpm/poac)");

/// Blocking HTTP client with timeouts and bounded retries on transient failures.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl HttpClient {
    pub fn new(config: &NetworkConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
        })
    }

    pub fn get_bytes(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        self.with_retry(url, || {
            let resp = self.send(url)?;
            let bytes = resp.bytes().map_err(|e| network(url, e))?;
            Ok(bytes.to_vec())
        })
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, TransportError> {
        let bytes = self.get_bytes(url)?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    fn send(&self, url: &Url) -> Result<reqwest::blocking::Response, TransportError> {
        debug!(%url, "GET");
        let resp = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| network(url, e))?;
        if !resp.status().is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
                attempts: 1,
            });
        }
        Ok(resp)
    }

    fn with_retry<T>(
        &self,
        url: &Url,
        mut op: impl FnMut() -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build();
        let mut attempts = 0u32;
        let max_attempts = self.max_attempts;
        let result = backoff::retry(policy, || {
            attempts += 1;
            match op() {
                Ok(v) => Ok(v),
                Err(e) if e.is_transient() && attempts < max_attempts => {
                    warn!(%url, attempt = attempts, error = %e, "retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        });
        result.map_err(|e| {
            let err = match e {
                backoff::Error::Permanent(err) => err,
                backoff::Error::Transient { err, .. } => err,
            };
            err.with_attempts(attempts)
        })
    }
}

fn network(url: &Url, source: reqwest::Error) -> TransportError {
    TransportError::Network {
        url: url.to_string(),
        attempts: 1,
        source,
    }
}
