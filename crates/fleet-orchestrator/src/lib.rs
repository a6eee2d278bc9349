//! fleet-orchestrator: deployment lifecycle for exercise containers.
//!
//! ```text
//! PENDING ──deploy──► DEPLOYING ──► DEPLOYED ──stop──► STOPPED
//!                         │                              │
//!                         └──► FAILED ◄──────deploy──────┘ (via DEPLOYING)
//! ```
//!
//! Deploys run on a bounded [`DeployWorker`]; the record is the only
//! channel through which their outcome is observed. Complete removal is
//! allowed from every state except `DEPLOYING` and leaves the record in
//! place if the host refuses.

pub mod error;
pub mod orchestrator;
pub mod ports;
pub mod worker;

pub use error::{ErrorKind, OrchestratorError, OrchestratorResult};
pub use orchestrator::{DeploymentStatus, Orchestrator, OrchestratorConfig, container_name};
pub use ports::{ImageFamily, allocate_bindings};
pub use worker::DeployWorker;
