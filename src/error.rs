use std::fmt;
use thiserror::Error;

pub type Result<T> = anyhow::Result<T>;

/// One side of a resolution conflict: who asked for a package and with which constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub requester: String,
    pub constraint: String,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} requires {}", self.requester, self.constraint)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Manifest(String),

    #[error("unknown source `{0}` (expected `poac` or `github`)")]
    UnknownSource(String),

    #[error("unknown build system `{0}` (expected `poac` or `cmake`)")]
    UnknownBuildSystem(String),

    #[error("invalid version constraint `{constraint}` for {name}: {reason}")]
    InvalidConstraint {
        name: String,
        constraint: String,
        reason: String,
    },

    #[error("no version of {name} satisfies `{}` (required by {})", .requirement.constraint, .requirement.requester)]
    NoMatchingVersion {
        name: String,
        requirement: Requirement,
    },

    #[error("conflicting requirements for {name}: {existing}, but {incoming}")]
    ResolutionConflict {
        name: String,
        existing: Requirement,
        incoming: Requirement,
    },

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to extract {cache_name}: {reason}")]
    Extraction { cache_name: String, reason: String },

    #[error("failed to copy {cache_name} into {current_name}: {reason}")]
    Materialize {
        cache_name: String,
        current_name: String,
        reason: String,
    },

    #[error("unexpected error: {0}")]
    Invariant(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("GET {url} returned {status} after {attempts} attempt(s)")]
    Status { url: String, status: u16, attempts: u32 },

    #[error("GET {url} failed after {attempts} attempt(s): {source}")]
    Network {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl TransportError {
    /// Connection resets, timeouts and server-side failures are worth another attempt;
    /// client errors and undecodable bodies are not.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => *status >= 500 || *status == 429,
            TransportError::Network { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request() || source.is_body()
            }
            TransportError::Decode { .. } => false,
        }
    }

    pub(crate) fn with_attempts(mut self, n: u32) -> Self {
        match &mut self {
            TransportError::Status { attempts, .. } | TransportError::Network { attempts, .. } => {
                *attempts = n;
            }
            TransportError::Decode { .. } => {}
        }
        self
    }
}
