//! Capacity alerts and cluster-wide load figures.

use serde::Serialize;

use fleet_state::HostId;

use crate::scorer::HostLoad;

pub const INFO_THRESHOLD: f64 = 0.7;
pub const WARNING_THRESHOLD: f64 = 0.8;
pub const CRITICAL_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn for_ratio(ratio: f64) -> Option<Self> {
        if ratio >= CRITICAL_THRESHOLD {
            Some(Self::Critical)
        } else if ratio >= WARNING_THRESHOLD {
            Some(Self::Warning)
        } else if ratio >= INFO_THRESHOLD {
            Some(Self::Info)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CapacityAlert {
    pub host_id: HostId,
    pub level: AlertLevel,
    pub load_ratio: f64,
    pub running: u32,
    pub capacity: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterLoad {
    pub total_hosts: usize,
    pub active_hosts: usize,
    pub running: u32,
    pub capacity: u32,
    /// Aggregate over active hosts only.
    pub load_ratio: f64,
    pub busiest_host: Option<HostId>,
}

/// Alerts for active hosts above the info threshold, most severe first.
pub fn capacity_alerts(loads: &[HostLoad]) -> Vec<CapacityAlert> {
    let mut alerts: Vec<_> = loads
        .iter()
        .filter(|l| l.host.is_active())
        .filter_map(|l| {
            let ratio = l.load_ratio();
            AlertLevel::for_ratio(ratio).map(|level| CapacityAlert {
                host_id: l.host.id.clone(),
                level,
                load_ratio: ratio,
                running: l.running,
                capacity: l.host.max_containers,
                message: format!(
                    "host {} at {:.0}% capacity ({}/{})",
                    l.host.id,
                    ratio * 100.0,
                    l.running,
                    l.host.max_containers
                ),
            })
        })
        .collect();
    alerts.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| a.host_id.cmp(&b.host_id)));
    alerts
}

pub fn cluster_load(loads: &[HostLoad]) -> ClusterLoad {
    let active: Vec<_> = loads.iter().filter(|l| l.host.is_active()).collect();
    let running = active.iter().map(|l| l.running).sum();
    let capacity = active.iter().map(|l| l.host.max_containers).sum();
    let busiest_host = active
        .iter()
        .max_by(|a, b| {
            a.load_ratio()
                .total_cmp(&b.load_ratio())
                .then_with(|| b.host.id.cmp(&a.host.id))
        })
        .map(|l| l.host.id.clone());

    ClusterLoad {
        total_hosts: loads.len(),
        active_hosts: active.len(),
        running,
        capacity,
        load_ratio: if capacity == 0 { 0.0 } else { running as f64 / capacity as f64 },
        busiest_host,
    }
}
