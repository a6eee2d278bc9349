//! fleet-health: host registry and prober.
//!
//! Tracks known hosts and keeps their status current with lightweight
//! probes.
//!
//! # Architecture
//!
//! ```text
//! HostRegistry
//!   ├── register / get_active / update_status / delete_host
//!   ├── health_check(id) ─┐
//!   ├── batch_health_check┤ (bounded concurrency, linear retry)
//!   │                     └── classify(): TCP probe → GET /_ping
//!   │                           → SUCCESS | NETWORK_ISSUE | UNREACHABLE
//!   └── HealthTracker per host (exponential re-probe backoff)
//! HealthMonitor: periodic batch over hosts that are due
//! ```
//!
//! Probe outcomes map onto host status: `SUCCESS → active`,
//! `NETWORK_ISSUE → inactive`, `UNREACHABLE → unreachable`. Hosts in
//! `maintenance` keep their status. No host is ever removed by a probe.

pub mod error;
pub mod monitor;
pub mod prober;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use monitor::HealthMonitor;
pub use prober::{HealthTracker, NetworkProbe, Probe, classify, http_ping};
pub use registry::{BatchHealthReport, HealthReport, HostDeletion, HostRegistry, RegistryConfig};
