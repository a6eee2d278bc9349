//! Error types for host API calls and discovery.

use std::time::Duration;

use thiserror::Error;

use fleet_state::StateError;

pub type HostApiResult<T> = Result<T, HostApiError>;

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Failure of a single call against a host's container-management API.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HostApiError {
    /// Connection refused, reset, DNS failure, malformed response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The API answered but the object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The API refused the request (name clash, port already allocated, ...).
    #[error("rejected by host: {0}")]
    Rejected(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl HostApiError {
    /// Transport-class failures: the host could not be talked to.
    pub fn is_transport(&self) -> bool {
        matches!(self, HostApiError::Transport(_) | HostApiError::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("host {0} is not registered")]
    HostNotFound(String),

    #[error("host {host_id}: {source}")]
    Host {
        host_id: String,
        #[source]
        source: HostApiError,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

impl DiscoveryError {
    pub fn host(host_id: &str, source: HostApiError) -> Self {
        DiscoveryError::Host {
            host_id: host_id.to_string(),
            source,
        }
    }
}
