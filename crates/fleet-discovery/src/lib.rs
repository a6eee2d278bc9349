//! fleet-discovery: what is each host running?
//!
//! Queries a host's container-management API for containers and images and
//! normalizes the answers into a host-agnostic shape.
//!
//! # Architecture
//!
//! ```text
//! DiscoveryClient
//!   ├── TtlCache (per host, injected Clock)
//!   ├── HostConnector → Arc<dyn HostApi>
//!   │     ├── DockerHostApi (bollard, HTTP)
//!   │     └── MockHost (feature "mock")
//!   └── fan-out: Semaphore + JoinSet, per-host timeout
//!         └── FleetSnapshot { per_host, failures }
//! ```
//!
//! A host that is down, slow or answers garbage never aborts a fleet-wide
//! query; it shows up in `failures` and the other hosts' results are kept.

pub mod api;
pub mod cache;
pub mod client;
pub mod docker;
pub mod error;
pub mod model;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use api::{ContainerInspect, ContainerSpec, HostApi, HostConnector, PortBinding, RawContainer, RawImage};
pub use cache::{Clock, ManualClock, SystemClock, TtlCache};
pub use client::{DiscoveryClient, DiscoveryConfig, ExerciseDiscovery, FleetSnapshot, HostFailure};
pub use docker::DockerConnector;
pub use error::{DiscoveryError, DiscoveryResult, HostApiError, HostApiResult};
pub use model::{ContainerInfo, HealthIndicator, ImageEntry, RunState};
