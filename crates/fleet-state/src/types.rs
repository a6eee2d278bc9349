//! Domain types for the fleet state store.
//!
//! These types represent the persisted state of hosts, assets, image
//! mappings, deployment records and their sync status. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unique identifier for a managed host.
pub type HostId = String;

/// Unique identifier for an asset (deployment target).
pub type AssetId = String;

/// Unique identifier for an exercise (range) scope.
pub type ExerciseId = String;

pub const DEFAULT_CONTROL_PORT: u16 = 2376;
pub const DEFAULT_MAX_CONTAINERS: u32 = 50;
pub const DEFAULT_PRIORITY: u32 = 1;

// ── Hosts ──────────────────────────────────────────────────────────

/// One managed Docker-capable machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostNode {
    pub id: HostId,
    pub name: String,
    /// IP address or DNS name of the host.
    pub address: String,
    /// Port of the container-management API.
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default)]
    pub status: HostStatus,
    /// Environment tag ("prod", "training", ...), if any.
    #[serde(default)]
    pub environment: Option<String>,
    /// Container-count ceiling used as the capacity hint.
    #[serde(default = "default_max_containers")]
    pub max_containers: u32,
    /// Higher priority hosts are preferred during placement.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    /// Unix timestamp of the last health probe.
    #[serde(default)]
    pub last_health_check: Option<u64>,
    #[serde(default)]
    pub last_probe: Option<ProbeOutcome>,
    #[serde(default)]
    pub created_at: u64,
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

fn default_max_containers() -> u32 {
    DEFAULT_MAX_CONTAINERS
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

impl HostNode {
    /// A host with default capacity hints, active status and no environment tag.
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            address: address.into(),
            control_port: DEFAULT_CONTROL_PORT,
            status: HostStatus::Active,
            environment: None,
            max_containers: DEFAULT_MAX_CONTAINERS,
            priority: DEFAULT_PRIORITY,
            labels: BTreeMap::new(),
            cpu_cores: None,
            memory_mb: None,
            last_health_check: None,
            last_probe: None,
            created_at: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == HostStatus::Active
    }

    /// `address:control_port`, the socket address of the management API.
    pub fn control_endpoint(&self) -> String {
        format!("{}:{}", self.address, self.control_port)
    }
}

/// Administrative / probed status of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
    Unreachable,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostStatus::Active => "active",
            HostStatus::Inactive => "inactive",
            HostStatus::Maintenance => "maintenance",
            HostStatus::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

/// Three-way classification of a host health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeOutcome {
    /// Reachable and the management API answered.
    Success,
    /// Reachable, but the management API failed.
    NetworkIssue,
    /// Neither probe succeeded.
    Unreachable,
}

impl ProbeOutcome {
    pub fn is_healthy(self) -> bool {
        self == ProbeOutcome::Success
    }

    /// Status written back to the registry for this outcome.
    pub fn host_status(self) -> HostStatus {
        match self {
            ProbeOutcome::Success => HostStatus::Active,
            ProbeOutcome::NetworkIssue => HostStatus::Inactive,
            ProbeOutcome::Unreachable => HostStatus::Unreachable,
        }
    }
}

// ── Assets ─────────────────────────────────────────────────────────

/// How an asset chooses its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    /// Pinned to `preferred_host`.
    Fixed,
    /// Any eligible host, load balanced.
    #[default]
    Any,
}

/// A logical exercise component that resolves to one or more containers.
///
/// Owned by the administrative layer; the core keeps a copy so that host
/// deletion can clear references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentTarget {
    pub id: AssetId,
    pub exercise_id: ExerciseId,
    pub name: String,
    /// Desired image reference, e.g. `nginx:1.25`.
    #[serde(default)]
    pub image: Option<String>,
    /// Port configuration: `"8080:80"`, `"80"` or a range `"8000-8002"`.
    #[serde(default)]
    pub ports: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub preferred_host: Option<HostId>,
    #[serde(default)]
    pub strategy: DeploymentStrategy,
    /// Environment the asset should be placed in.
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub updated_at: u64,
}

impl DeploymentTarget {
    pub fn new(exercise_id: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            exercise_id: exercise_id.into(),
            name: name.into(),
            image: None,
            ports: None,
            env: BTreeMap::new(),
            preferred_host: None,
            strategy: DeploymentStrategy::Any,
            environment: None,
            updated_at: 0,
        }
    }
}

// ── Record keys ────────────────────────────────────────────────────

/// Composite identity of a deployment record: (exercise, asset, image).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub exercise_id: ExerciseId,
    pub asset_id: AssetId,
    pub image_id: String,
}

impl RecordKey {
    pub fn new(
        exercise_id: impl Into<String>,
        asset_id: impl Into<String>,
        image_id: impl Into<String>,
    ) -> Self {
        Self {
            exercise_id: exercise_id.into(),
            asset_id: asset_id.into(),
            image_id: image_id.into(),
        }
    }

    /// Persisted key form: `{exercise}:{asset}:{image}`.
    pub fn table_key(&self) -> String {
        format!("{}:{}:{}", self.exercise_id, self.asset_id, self.image_id)
    }

    /// Prefix shared by every key of one exercise.
    pub fn exercise_prefix(exercise_id: &str) -> String {
        format!("{exercise_id}:")
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.table_key())
    }
}

// ── Image mappings ─────────────────────────────────────────────────

/// An asset's deployable image entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageMapping {
    pub key: RecordKey,
    /// Repository part, e.g. `nginx`.
    pub image_name: String,
    pub image_tag: String,
    /// Host the image was discovered on, if known.
    #[serde(default)]
    pub host_id: Option<HostId>,
    pub added_at: u64,
}

impl ImageMapping {
    /// `repository:tag`.
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.image_name, self.image_tag)
    }
}

/// Split `repo[:tag]` into `(repo, tag)`, defaulting the tag to `latest`.
///
/// A colon that belongs to a registry port (`registry:5000/app`) is not a tag
/// separator.
pub fn split_image_ref(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
        _ => (image.to_string(), "latest".to_string()),
    }
}

/// Stable image id derived from an image reference: `nginx:1.25` → `nginx-1.25`.
///
/// The whole repository path is kept so `team/nginx` and `nginx` stay apart;
/// only the implicit Docker Hub prefixes are dropped.
pub fn image_id_for(image: &str) -> String {
    let (repo, tag) = split_image_ref(image);
    let repo = repo.strip_prefix("docker.io/").unwrap_or(&repo);
    let repo = repo.strip_prefix("library/").unwrap_or(repo);
    format!("{repo}-{tag}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect()
}

// ── Deployment records ─────────────────────────────────────────────

/// Lifecycle state of a deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    Pending,
    Deploying,
    Deployed,
    Failed,
    Stopped,
}

impl DeploymentState {
    /// Whether `self → next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: DeploymentState) -> bool {
        use DeploymentState::*;
        matches!(
            (self, next),
            (Pending, Deploying)
                | (Deploying, Deployed)
                | (Deploying, Failed)
                | (Deployed, Stopped)
                | (Stopped, Deploying)
                | (Failed, Deploying)
        )
    }

    /// A live container is (or is about to be) associated with the record.
    pub fn is_active(self) -> bool {
        matches!(self, DeploymentState::Deploying | DeploymentState::Deployed)
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentState::Pending => "PENDING",
            DeploymentState::Deploying => "DEPLOYING",
            DeploymentState::Deployed => "DEPLOYED",
            DeploymentState::Failed => "FAILED",
            DeploymentState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    #[default]
    Operator,
    /// Adopted by the reconciler from an observed container.
    Discovered,
}

/// Network endpoint of a deployed container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub host_port: u16,
    pub container_port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.host_port)
    }
}

/// Desired + observed state for one (exercise, asset, image) triple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub key: RecordKey,
    /// Full image reference deployed for this record.
    pub image: String,
    pub state: DeploymentState,
    #[serde(default)]
    pub host_id: Option<HostId>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub origin: RecordOrigin,
    #[serde(default)]
    pub deploy_started_at: Option<u64>,
    #[serde(default)]
    pub deployed_at: Option<u64>,
    #[serde(default)]
    pub stopped_at: Option<u64>,
    pub updated_at: u64,
}

impl DeploymentRecord {
    /// A fresh `PENDING` record.
    pub fn pending(key: RecordKey, image: impl Into<String>, now: u64) -> Self {
        Self {
            key,
            image: image.into(),
            state: DeploymentState::Pending,
            host_id: None,
            container_id: None,
            container_name: None,
            endpoint: None,
            error: None,
            origin: RecordOrigin::Operator,
            deploy_started_at: None,
            deployed_at: None,
            stopped_at: None,
            updated_at: now,
        }
    }
}

// ── Sync status ────────────────────────────────────────────────────

/// Reconciliation outcome for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    #[default]
    Synced,
    NeedsReconciliation,
    Failed,
}

/// Per-record reconciliation tracking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStatus {
    pub key: RecordKey,
    pub state: SyncState,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_checked_at: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub fn synced(key: RecordKey, now: u64) -> Self {
        Self {
            key,
            state: SyncState::Synced,
            consecutive_failures: 0,
            last_checked_at: now,
            last_error: None,
        }
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
