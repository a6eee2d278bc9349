//! fleet-placement: decides which host runs an exercise container.
//!
//! Scores hosts with one explicit weighted formula and produces placement
//! decisions that the orchestrator executes. Host load is read through the
//! discovery client; placement never changes anything on a host.
//!
//! # Components
//!
//! - **`scorer`**: Host scoring and deterministic ranking
//! - **`selector`**: `select_node` for one target (fixed strategy first)
//! - **`redistribute`**: Batch reassignment with projected load
//! - **`capacity`**: Capacity alerts and cluster load

pub mod capacity;
pub mod error;
pub mod redistribute;
pub mod scorer;
pub mod selector;

pub use capacity::{AlertLevel, CapacityAlert, ClusterLoad, capacity_alerts, cluster_load};
pub use error::{PlacementError, PlacementResult};
pub use redistribute::{Assignment, redistribute};
pub use scorer::{HostLoad, HostScore, ScoreBreakdown, ScoringWeights, rank_hosts, score_host};
pub use selector::{Placement, PlacementSelector, select_node};
