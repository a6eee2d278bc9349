use thiserror::Error;

use fleet_state::StateError;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no deployment record for {0}")]
    NotFound(String),

    #[error(transparent)]
    State(#[from] StateError),
}
