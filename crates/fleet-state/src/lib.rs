//! fleet-state: embedded state store for the container fleet.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for hosts, assets, deployment records, sync status and
//! image mappings.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Record-scoped tables share the composite key `{exercise}:{asset}:{image}`
//! so an exercise's rows can be found by prefix scan.
//!
//! The [`DeploymentIndex`] sits on top of the store as the live, typed view
//! keyed by [`RecordKey`]; it writes through on every mutation and is
//! rehydrated from the store on startup.

pub mod error;
pub mod index;
pub mod ports;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use index::DeploymentIndex;
pub use ports::{PortMapping, PortSpecError, parse_port_spec};
pub use store::{HostRemoval, StateStore};
pub use types::*;
