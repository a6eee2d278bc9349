//! Orchestrator error types.

use serde::Serialize;
use thiserror::Error;

use fleet_discovery::{DiscoveryError, HostApiError};
use fleet_placement::PlacementError;
use fleet_state::{DeploymentState, PortSpecError, StateError};

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A host could not be reached or timed out.
    Transport,
    /// The request conflicts with current state.
    Conflict,
    /// The host accepted the request but the outcome was not observed.
    Verification,
    NotFound,
    Invalid,
    Internal,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("deployment record not found: {0}")]
    RecordNotFound(String),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("no container recorded for {0}")]
    NoContainer(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("cannot {action} {key}: record is {state:?}")]
    InvalidTransition {
        key: String,
        state: DeploymentState,
        action: &'static str,
    },

    #[error("host port {port} already bound on host {host_id}")]
    PortConflict { host_id: String, port: u16 },

    #[error("no free host port on {0}")]
    PortsExhausted(String),

    #[error("container {container_id} for {key} not running after start (state: {observed})")]
    Verification {
        key: String,
        container_id: String,
        observed: String,
    },

    #[error("host {host_id}: {source}")]
    Host {
        host_id: String,
        #[source]
        source: HostApiError,
    },

    #[error(transparent)]
    Ports(#[from] PortSpecError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl OrchestratorError {
    pub fn host(host_id: &str, source: HostApiError) -> Self {
        Self::Host {
            host_id: host_id.to_string(),
            source,
        }
    }

    /// The host answered that the container does not exist.
    pub fn is_missing_container(&self) -> bool {
        matches!(
            self,
            Self::Host {
                source: HostApiError::NotFound(_),
                ..
            }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RecordNotFound(_) | Self::HostNotFound(_) | Self::NoContainer(_) => ErrorKind::NotFound,
            Self::Invalid(_) => ErrorKind::Invalid,
            Self::InvalidTransition { .. } | Self::PortConflict { .. } | Self::PortsExhausted(_) => {
                ErrorKind::Conflict
            }
            Self::Verification { .. } => ErrorKind::Verification,
            Self::Host { source, .. } => match source {
                HostApiError::NotFound(_) => ErrorKind::NotFound,
                HostApiError::Rejected(_) => ErrorKind::Conflict,
                HostApiError::Transport(_) | HostApiError::Timeout(_) => ErrorKind::Transport,
            },
            Self::Ports(_) => ErrorKind::Invalid,
            Self::Placement(e) => match e {
                PlacementError::NoEligibleHost { .. } => ErrorKind::Conflict,
                PlacementError::AssetNotFound(_) => ErrorKind::NotFound,
                PlacementError::State(_) => ErrorKind::Internal,
            },
            Self::Discovery(e) => match e {
                DiscoveryError::HostNotFound(_) => ErrorKind::NotFound,
                DiscoveryError::Host { .. } => ErrorKind::Transport,
                DiscoveryError::State(_) => ErrorKind::Internal,
            },
            Self::State(_) => ErrorKind::Internal,
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn kinds_follow_taxonomy() {
        let timeout = OrchestratorError::host("h1", HostApiError::Timeout(Duration::from_secs(1)));
        assert_eq!(timeout.kind(), ErrorKind::Transport);

        let busy = OrchestratorError::InvalidTransition {
            key: "ex:a:img".into(),
            state: DeploymentState::Deploying,
            action: "stop",
        };
        assert_eq!(busy.kind(), ErrorKind::Conflict);
        assert!(busy.to_string().contains("Deploying"));

        let unverified = OrchestratorError::Verification {
            key: "ex:a:img".into(),
            container_id: "c1".into(),
            observed: "exited".into(),
        };
        assert_eq!(unverified.kind(), ErrorKind::Verification);
        assert_eq!(
            OrchestratorError::from(PortSpecError::Empty).kind(),
            ErrorKind::Invalid
        );
    }
}
