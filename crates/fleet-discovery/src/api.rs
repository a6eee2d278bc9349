//! The per-host container-management API contract.
//!
//! Everything above this crate talks to hosts through [`HostApi`]; the
//! Docker implementation lives in [`crate::docker`], the scripted one used by
//! tests in [`crate::mock`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use fleet_state::HostNode;

use crate::error::HostApiResult;

/// A container as reported by the host, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawContainer {
    pub id: Option<String>,
    pub names: Vec<String>,
    pub image: Option<String>,
    /// Machine state: `running`, `exited`, `paused`, ...
    pub state: Option<String>,
    /// Human status text: `Up 3 minutes (healthy)`.
    pub status: Option<String>,
    pub ports: Vec<RawPort>,
    pub labels: HashMap<String, String>,
    pub created: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawPort {
    pub private_port: u16,
    pub public_port: Option<u16>,
    pub protocol: String,
}

/// An image as reported by the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawImage {
    pub id: Option<String>,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    pub size: i64,
}

/// One host-port → container-port binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
}

/// Everything needed to create a container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub labels: BTreeMap<String, String>,
}

/// Result of inspecting a single container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInspect {
    pub id: String,
    pub running: bool,
    /// Raw state string, kept as diagnostic detail.
    pub status: String,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
}

#[async_trait]
pub trait HostApi: Send + Sync {
    async fn ping(&self) -> HostApiResult<()>;

    async fn list_containers(&self) -> HostApiResult<Vec<RawContainer>>;

    async fn list_images(&self) -> HostApiResult<Vec<RawImage>>;

    /// Create (but do not start) a container, returning its identifier.
    async fn create_container(&self, spec: &ContainerSpec) -> HostApiResult<String>;

    async fn start_container(&self, id: &str) -> HostApiResult<()>;

    /// Stop a container. Stopping an already stopped container succeeds.
    async fn stop_container(&self, id: &str) -> HostApiResult<()>;

    async fn remove_container(&self, id: &str) -> HostApiResult<()>;

    async fn inspect_container(&self, id: &str) -> HostApiResult<ContainerInspect>;

    /// Last `tail` log lines of a container.
    async fn container_logs(&self, id: &str, tail: usize) -> HostApiResult<Vec<String>>;
}

/// Resolves a registered host to a client for its API.
pub trait HostConnector: Send + Sync {
    fn connect(&self, host: &HostNode) -> HostApiResult<Arc<dyn HostApi>>;
}
