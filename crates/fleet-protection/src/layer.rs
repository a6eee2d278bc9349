//! The protection layer: host connectivity, lost-container detection, port
//! prechecks, rematch suggestions and host validation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use fleet_discovery::{ContainerInfo, DiscoveryClient};
use fleet_health::HostRegistry;
use fleet_state::*;

use crate::error::{ProtectionError, ProtectionResult};
use crate::ports::{PortPrecheck, precheck};
use crate::rematch::{RematchCandidate, suggest_rematch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostStatusReport {
    pub host_id: HostId,
    pub connectivity: Connectivity,
    pub status: Option<HostStatus>,
    pub probe: Option<ProbeOutcome>,
    pub running_containers: Option<usize>,
    pub total_containers: Option<usize>,
    pub message: String,
    pub checked_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LostReason {
    ContainerMissing,
    HostUnreachable,
    HostMissing,
}

#[derive(Debug, Clone, Serialize)]
pub struct LostContainer {
    pub key: RecordKey,
    pub asset_id: AssetId,
    pub host_id: Option<HostId>,
    pub container_id: Option<String>,
    pub reason: LostReason,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostValidation {
    pub host_id: HostId,
    pub valid: bool,
    pub status: HostStatus,
    pub running: u32,
    pub capacity: u32,
    pub issues: Vec<String>,
}

/// Read-mostly checks that surface anomalies to operators.
///
/// Nothing here deletes or repairs state; the only write is the host status
/// refresh that comes with a probe.
pub struct ProtectionLayer {
    store: StateStore,
    index: Arc<DeploymentIndex>,
    registry: Arc<HostRegistry>,
    discovery: DiscoveryClient,
}

impl ProtectionLayer {
    pub fn new(
        store: StateStore,
        index: Arc<DeploymentIndex>,
        registry: Arc<HostRegistry>,
        discovery: DiscoveryClient,
    ) -> Self {
        Self {
            store,
            index,
            registry,
            discovery,
        }
    }

    /// Probe a host and, when it answers, count its containers.
    pub async fn check_host_status(&self, host_id: &str) -> ProtectionResult<HostStatusReport> {
        let now = epoch_secs();
        if self.store.get_host(host_id)?.is_none() {
            return Ok(HostStatusReport {
                host_id: host_id.to_string(),
                connectivity: Connectivity::NotFound,
                status: None,
                probe: None,
                running_containers: None,
                total_containers: None,
                message: format!("host {host_id} is not registered"),
                checked_at: now,
            });
        }

        let probe = self.registry.probe_host(host_id).await?;
        let mut report = HostStatusReport {
            host_id: host_id.to_string(),
            connectivity: Connectivity::Offline,
            status: Some(probe.status),
            probe: Some(probe.outcome),
            running_containers: None,
            total_containers: None,
            message: String::new(),
            checked_at: probe.checked_at,
        };

        if !probe.outcome.is_healthy() {
            report.message = match probe.outcome {
                ProbeOutcome::NetworkIssue => "host reachable but container API not responding".into(),
                _ => "host unreachable".into(),
            };
            return Ok(report);
        }

        report.connectivity = Connectivity::Online;
        match self.discovery.refresh_containers(host_id).await {
            Ok(containers) => {
                let running = containers.iter().filter(|c| c.is_running()).count();
                report.running_containers = Some(running);
                report.total_containers = Some(containers.len());
                report.message = format!("online, {running}/{} containers running", containers.len());
            }
            Err(e) => {
                warn!(%host_id, error = %e, "container listing failed after healthy probe");
                report.message = format!("online, container listing failed: {e}");
            }
        }
        Ok(report)
    }

    /// Deployed records whose container can no longer be accounted for.
    pub async fn detect_lost_containers(&self) -> ProtectionResult<Vec<LostContainer>> {
        let deployed = self.index.in_state(DeploymentState::Deployed).await;
        let hosts: BTreeMap<HostId, HostNode> = self
            .store
            .list_hosts()?
            .into_iter()
            .map(|h| (h.id.clone(), h))
            .collect();

        let mut probe_targets: Vec<HostNode> = deployed
            .iter()
            .filter_map(|r| r.host_id.as_deref())
            .filter_map(|id| hosts.get(id))
            .filter(|h| h.status != HostStatus::Unreachable)
            .cloned()
            .collect();
        probe_targets.sort_by(|a, b| a.id.cmp(&b.id));
        probe_targets.dedup_by(|a, b| a.id == b.id);
        let snapshot = self.discovery.containers_across(&probe_targets, true).await;

        let mut lost = Vec::new();
        for record in deployed {
            let verdict = match record.host_id.as_deref() {
                None => Some((LostReason::HostMissing, "no host recorded".to_string())),
                Some(host_id) => match hosts.get(host_id) {
                    None => Some((LostReason::HostMissing, format!("host {host_id} no longer registered"))),
                    Some(host) if host.status == HostStatus::Unreachable => {
                        Some((LostReason::HostUnreachable, format!("host {host_id} marked unreachable")))
                    }
                    Some(_) => match snapshot.per_host.get(host_id) {
                        None => {
                            let error = snapshot
                                .failures
                                .iter()
                                .find(|f| f.host_id == host_id)
                                .map(|f| f.error.clone())
                                .unwrap_or_else(|| "no answer".into());
                            Some((LostReason::HostUnreachable, format!("discovery failed: {error}")))
                        }
                        Some(containers) => missing(&record, containers),
                    },
                },
            };

            if let Some((reason, detail)) = verdict {
                lost.push(LostContainer {
                    asset_id: record.key.asset_id.clone(),
                    key: record.key,
                    host_id: record.host_id,
                    container_id: record.container_id,
                    reason,
                    detail,
                });
            }
        }

        if !lost.is_empty() {
            warn!(count = lost.len(), "lost containers detected");
        }
        Ok(lost)
    }

    /// Check a port specification against the containers on `host_id`.
    pub async fn precheck_port_conflicts(&self, mapping: &str, host_id: &str) -> ProtectionResult<PortPrecheck> {
        let requested = parse_port_spec(mapping)?;
        let host = self
            .store
            .get_host(host_id)?
            .ok_or_else(|| ProtectionError::HostNotFound(host_id.to_string()))?;
        let containers = self.discovery.containers_for(&host, true).await?;
        let result = precheck(host_id, requested, &containers);
        if result.has_conflict {
            info!(%host_id, %mapping, conflicts = result.conflicts.len(), "port precheck found conflicts");
        }
        Ok(result)
    }

    /// Rank observed containers as replacements for an asset's container.
    ///
    /// Falls back to the record's image when the asset has none.
    pub async fn rematch(&self, exercise_id: &str, asset_id: &str) -> ProtectionResult<Vec<RematchCandidate>> {
        let mut asset = self
            .store
            .get_asset(asset_id)?
            .unwrap_or_else(|| DeploymentTarget::new(exercise_id, asset_id, asset_id));
        if asset.image.is_none() {
            asset.image = self
                .index
                .for_exercise(exercise_id)
                .await
                .into_iter()
                .find(|r| r.key.asset_id == asset_id)
                .map(|r| r.image);
        }

        let hosts: Vec<HostNode> = self.registry.get_active()?;
        let containers: Vec<ContainerInfo> = self
            .discovery
            .containers_across(&hosts, false)
            .await
            .per_host
            .into_values()
            .flatten()
            .collect();
        Ok(suggest_rematch(&asset, &containers))
    }

    /// Whether a host can take on a new deployment right now.
    pub async fn validate_host_operation(&self, host_id: &str) -> ProtectionResult<HostValidation> {
        let host = self
            .store
            .get_host(host_id)?
            .ok_or_else(|| ProtectionError::HostNotFound(host_id.to_string()))?;
        let recorded = self.index.active_per_host().await.get(host_id).copied().unwrap_or(0);

        let mut issues = Vec::new();
        let running = if host.is_active() {
            match self.discovery.containers_for(&host, false).await {
                Ok(containers) => containers.iter().filter(|c| c.is_running()).count() as u32,
                Err(e) => {
                    warn!(%host_id, error = %e, "could not list containers, using recorded load");
                    issues.push(format!("host API unavailable: {e}"));
                    recorded
                }
            }
        } else {
            issues.push(format!("host status is {}", host.status));
            recorded
        };
        if running >= host.max_containers {
            issues.push(format!("host at capacity ({running}/{})", host.max_containers));
        }

        Ok(HostValidation {
            host_id: host.id,
            valid: issues.is_empty(),
            status: host.status,
            running,
            capacity: host.max_containers,
            issues,
        })
    }
}

fn missing(record: &DeploymentRecord, containers: &[ContainerInfo]) -> Option<(LostReason, String)> {
    let Some(container_id) = record.container_id.as_deref() else {
        return Some((LostReason::ContainerMissing, "no container recorded".into()));
    };
    if containers.iter().any(|c| c.id == container_id) {
        return None;
    }
    Some((
        LostReason::ContainerMissing,
        format!("container {container_id} not found on host"),
    ))
}
