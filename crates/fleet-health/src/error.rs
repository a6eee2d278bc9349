use thiserror::Error;

use fleet_state::StateError;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("host not found: {0}")]
    NotFound(String),

    #[error("host already registered: {0}")]
    AlreadyExists(String),

    #[error("invalid host: {0}")]
    Invalid(String),

    #[error("host {host_id} still runs {} live deployment(s)", .live_records.len())]
    InUse { host_id: String, live_records: Vec<String> },

    #[error(transparent)]
    State(#[from] StateError),
}
