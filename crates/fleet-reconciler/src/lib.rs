//! fleet-reconciler: keeps deployment records honest.
//!
//! Each pass:
//!
//! 1. Re-lists containers (cache bypassed) on every active host and every
//!    host a `DEPLOYED` record points at.
//! 2. Checks each `DEPLOYED` record's container: present and running means
//!    `SYNCED`; otherwise the drift counter grows, and at the limit the sync
//!    state becomes `FAILED` and an alert is raised. Records on hosts that
//!    could not be queried are left alone.
//!    A `DEPLOYED` record whose container is gone from every host follows
//!    the running container labeled with its key instead.
//! 3. Fails `DEPLOYING` records with no deploy job behind them, unless a
//!    running container for the key shows the deploy landed.
//! 4. Adopts labeled containers that have no record, and refreshes idle
//!    records from the container observed for their key.
//! 5. Purges sync rows of records that have been `FAILED` past retention.
//!
//! Passes never overlap: a trigger while one is running returns
//! [`TriggerOutcome::AlreadyRunning`]. Deployment records are never deleted
//! here.

pub mod error;
pub mod reconciler;

pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::{
    ReconcileReport, Reconciler, ReconcilerConfig, ReconcilerStatus, RecordSync, SyncAlert,
    SyncStatistics, TriggerOutcome,
};
