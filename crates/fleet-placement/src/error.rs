use thiserror::Error;

use fleet_state::StateError;

pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no eligible host for asset {asset_id}: {reason}")]
    NoEligibleHost { asset_id: String, reason: String },

    #[error("asset not found: {0}")]
    AssetNotFound(String),

    #[error(transparent)]
    State(#[from] StateError),
}
