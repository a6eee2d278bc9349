use thiserror::Error;

use fleet_discovery::DiscoveryError;
use fleet_health::RegistryError;
use fleet_state::{PortSpecError, StateError};

pub type ProtectionResult<T> = Result<T, ProtectionError>;

#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error(transparent)]
    Ports(#[from] PortSpecError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    State(#[from] StateError),
}
