//! Port conflict precheck against what a host has already bound.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use fleet_discovery::ContainerInfo;
use fleet_state::{HostId, PortMapping};

/// Ports commonly held by host services or well-known daemons.
pub const RESERVED_PORTS: [u16; 14] = [22, 23, 25, 53, 80, 110, 143, 443, 993, 995, 3306, 5432, 6379, 27017];

pub const MIN_USER_PORT: u16 = 1024;
pub const SUGGESTION_START: u16 = 8000;
pub const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PortConflict {
    pub port: u16,
    pub container_id: String,
    pub container_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortPrecheck {
    pub host_id: HostId,
    pub requested: Vec<PortMapping>,
    pub has_conflict: bool,
    pub conflicts: Vec<PortConflict>,
    pub warnings: Vec<String>,
    /// Free host ports, lowest first.
    pub suggestions: Vec<u16>,
}

pub fn precheck(host_id: &str, requested: Vec<PortMapping>, containers: &[ContainerInfo]) -> PortPrecheck {
    let mut bound: BTreeMap<u16, &ContainerInfo> = BTreeMap::new();
    for container in containers {
        for port in container.bound_host_ports() {
            bound.entry(port).or_insert(container);
        }
    }

    let mut conflicts = Vec::new();
    let mut warnings = Vec::new();
    let mut seen = BTreeSet::new();

    for port in requested.iter().filter_map(|m| m.host_port) {
        if !seen.insert(port) {
            warnings.push(format!("port {port} requested more than once"));
            continue;
        }
        if let Some(owner) = bound.get(&port) {
            conflicts.push(PortConflict {
                port,
                container_id: owner.id.clone(),
                container_name: owner.name.clone(),
            });
        }
        if RESERVED_PORTS.contains(&port) {
            warnings.push(format!("port {port} is commonly reserved by system services"));
        } else if port < MIN_USER_PORT {
            warnings.push(format!("port {port} is outside the recommended range {MIN_USER_PORT}-65535"));
        }
    }

    let suggestions = (SUGGESTION_START..=u16::MAX)
        .filter(|p| !bound.contains_key(p) && !seen.contains(p) && !RESERVED_PORTS.contains(p))
        .take(MAX_SUGGESTIONS)
        .collect();

    PortPrecheck {
        host_id: host_id.to_string(),
        has_conflict: !conflicts.is_empty(),
        requested,
        conflicts,
        warnings,
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_discovery::model::{HealthIndicator, PublishedPort, RunState};

    fn container(id: &str, host_port: u16) -> ContainerInfo {
        ContainerInfo {
            id: id.into(),
            name: format!("svc-{id}"),
            image: "nginx:latest".into(),
            run_state: RunState::Running,
            raw_state: "running".into(),
            health: HealthIndicator::None,
            host_id: "h1".into(),
            ports: vec![PublishedPort {
                host_port: Some(host_port),
                container_port: 80,
                protocol: "tcp".into(),
            }],
            labels: Default::default(),
            created: None,
        }
    }

    fn wanted(host_port: u16) -> PortMapping {
        PortMapping {
            host_port: Some(host_port),
            container_port: 80,
        }
    }

    #[test]
    fn flags_bound_port() {
        let result = precheck("h1", vec![wanted(8080)], &[container("c1", 8080)]);
        assert!(result.has_conflict);
        assert_eq!(result.conflicts[0].container_id, "c1");
        assert_eq!(result.conflicts[0].port, 8080);
    }

    #[test]
    fn free_port_has_no_conflict() {
        let result = precheck("h1", vec![wanted(9000)], &[container("c1", 8080)]);
        assert!(!result.has_conflict);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn warns_on_reserved_and_low_ports() {
        let result = precheck("h1", vec![wanted(3306), wanted(81), wanted(81)], &[]);
        assert!(!result.has_conflict);
        assert_eq!(result.warnings.len(), 3);
        assert!(result.warnings[0].contains("reserved"));
        assert!(result.warnings[1].contains("1024-65535"));
        assert!(result.warnings[2].contains("more than once"));
    }

    #[test]
    fn suggests_free_ports_from_8000() {
        let result = precheck(
            "h1",
            vec![wanted(8002)],
            &[container("c1", 8000), container("c2", 8003)],
        );
        assert_eq!(result.suggestions, vec![8001, 8004, 8005, 8006, 8007]);
    }
}
