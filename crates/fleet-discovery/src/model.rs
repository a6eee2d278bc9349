//! Host-agnostic shapes of discovered containers and images.
//!
//! Raw host output is normalized here: containers collapse onto a two-state
//! [`RunState`] with a separate [`HealthIndicator`], entries without an id
//! are dropped, and infrastructure containers are filtered out.

use std::collections::BTreeMap;

use serde::Serialize;

use fleet_state::{HostId, RecordKey};

use crate::api::{RawContainer, RawImage};

/// Label carrying the exercise id on containers the fleet created.
pub const LABEL_EXERCISE: &str = "fleet.exercise";
pub const LABEL_ASSET: &str = "fleet.asset";
pub const LABEL_IMAGE: &str = "fleet.image";

/// Name/image fragments of containers that belong to the container runtime
/// or orchestrator rather than to any exercise.
const SYSTEM_MARKERS: &[&str] = &[
    "k8s_pod",
    "k8s_coredns",
    "k8s_kube-",
    "docker-desktop",
    "com.docker.",
    "/pause:",
    "pause:",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIndicator {
    Healthy,
    Unhealthy,
    Starting,
    /// The image defines no health check.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedPort {
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: String,
}

/// A normalized container observed on one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub run_state: RunState,
    /// Host-reported state, kept for diagnostics.
    pub raw_state: String,
    pub health: HealthIndicator,
    pub host_id: HostId,
    pub ports: Vec<PublishedPort>,
    pub labels: BTreeMap<String, String>,
    pub created: Option<i64>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }

    /// Record key from the fleet labels, if the container carries all three.
    pub fn record_key(&self) -> Option<RecordKey> {
        Some(RecordKey::new(
            self.labels.get(LABEL_EXERCISE)?,
            self.labels.get(LABEL_ASSET)?,
            self.labels.get(LABEL_IMAGE)?,
        ))
    }

    /// Host-side ports this container has bound.
    pub fn bound_host_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().filter_map(|p| p.host_port)
    }

    /// Short id form used in logs and messages.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

/// One discovered image on one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageEntry {
    pub image_id: String,
    pub repository: String,
    pub tag: String,
    pub digest: Option<String>,
    pub size: i64,
    pub host_id: HostId,
}

impl ImageEntry {
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

/// Collapse a host-reported state onto the two-state view.
///
/// Falls back to the status text (`Up 5 minutes`) when the state is absent.
pub fn run_state(state: Option<&str>, status: Option<&str>) -> RunState {
    let state = state.map(str::to_ascii_lowercase);
    match state.as_deref() {
        Some("running") | Some("restarting") => RunState::Running,
        Some(_) => RunState::Stopped,
        None => match status {
            Some(text) if text.trim_start().to_ascii_lowercase().starts_with("up") => {
                RunState::Running
            }
            _ => RunState::Stopped,
        },
    }
}

pub fn health_indicator(status: Option<&str>) -> HealthIndicator {
    let Some(text) = status.map(str::to_ascii_lowercase) else {
        return HealthIndicator::None;
    };
    if text.contains("(unhealthy)") {
        HealthIndicator::Unhealthy
    } else if text.contains("(healthy)") {
        HealthIndicator::Healthy
    } else if text.contains("health: starting") {
        HealthIndicator::Starting
    } else {
        HealthIndicator::None
    }
}

fn is_system_container(name: &str, image: &str) -> bool {
    let name = name.to_ascii_lowercase();
    let image = image.to_ascii_lowercase();
    SYSTEM_MARKERS
        .iter()
        .any(|m| name.starts_with(m.trim_start_matches('/')) || image.contains(m))
        || image == "pause"
}

/// Normalize raw containers from `host_id`, dropping entries without an id
/// and infrastructure containers.
pub fn normalize_containers(host_id: &str, raw: Vec<RawContainer>) -> Vec<ContainerInfo> {
    raw.into_iter()
        .filter_map(|c| {
            let id = c.id.filter(|id| !id.trim().is_empty())?;
            let name = c
                .names
                .first()
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| id.chars().take(12).collect());
            let image = c.image.unwrap_or_default();
            if is_system_container(&name, &image) {
                return None;
            }
            let raw_state = c
                .state
                .clone()
                .or_else(|| c.status.clone())
                .unwrap_or_else(|| "unknown".to_string());
            Some(ContainerInfo {
                run_state: run_state(c.state.as_deref(), c.status.as_deref()),
                health: health_indicator(c.status.as_deref()),
                raw_state,
                id,
                name,
                image,
                host_id: host_id.to_string(),
                ports: c
                    .ports
                    .into_iter()
                    .map(|p| PublishedPort {
                        host_port: p.public_port,
                        container_port: p.private_port,
                        protocol: p.protocol,
                    })
                    .collect(),
                labels: c.labels.into_iter().collect(),
                created: c.created,
            })
        })
        .collect()
}

/// Normalize raw images, one entry per repository tag.
pub fn normalize_images(host_id: &str, raw: Vec<RawImage>) -> Vec<ImageEntry> {
    let mut entries = Vec::new();
    for image in raw {
        let Some(image_id) = image.id.filter(|id| !id.is_empty()) else {
            continue;
        };
        let digest = image
            .repo_digests
            .first()
            .and_then(|d| d.split_once('@'))
            .map(|(_, digest)| digest.to_string());

        let tags: Vec<_> = image
            .repo_tags
            .iter()
            .filter(|t| t.as_str() != "<none>:<none>")
            .collect();
        if tags.is_empty() {
            entries.push(ImageEntry {
                image_id,
                repository: "<none>".to_string(),
                tag: "<none>".to_string(),
                digest,
                size: image.size,
                host_id: host_id.to_string(),
            });
            continue;
        }
        for tag in tags {
            let (repository, tag) = fleet_state::split_image_ref(tag);
            entries.push(ImageEntry {
                image_id: image_id.clone(),
                repository,
                tag,
                digest: digest.clone(),
                size: image.size,
                host_id: host_id.to_string(),
            });
        }
    }
    entries
}
