//! Batch reassignment of `any`-strategy targets using projected load.
//!
//! Targets are placed one at a time in asset-id order; every placement bumps
//! the projected load of the chosen host so later targets see it.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use fleet_state::{AssetId, DeploymentStrategy, DeploymentTarget, HostId};

use crate::scorer::{HostLoad, ScoringWeights, rank_hosts};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Assignment {
    pub asset_id: AssetId,
    pub previous_host: Option<HostId>,
    /// `None` when the target was skipped or nothing qualified.
    pub host_id: Option<HostId>,
    pub score: Option<f64>,
    pub justification: String,
}

impl Assignment {
    pub fn moves(&self) -> bool {
        self.host_id.is_some() && self.host_id != self.previous_host
    }
}

/// Compute assignments for `targets` over `loads`.
///
/// `current` maps asset id to the host currently running it; those
/// containers are subtracted from the projected load first.
pub fn redistribute(
    targets: &[DeploymentTarget],
    mut loads: Vec<HostLoad>,
    current: &HashMap<AssetId, HostId>,
    weights: &ScoringWeights,
) -> Vec<Assignment> {
    for host_id in current.values() {
        if let Some(load) = loads.iter_mut().find(|l| &l.host.id == host_id) {
            load.running = load.running.saturating_sub(1);
        }
    }

    let mut ordered: Vec<&DeploymentTarget> = targets.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    let mut assignments = Vec::with_capacity(ordered.len());
    for target in ordered {
        let previous_host = current.get(&target.id).cloned();

        if target.strategy == DeploymentStrategy::Fixed {
            let pinned = target.preferred_host.as_deref().unwrap_or("<unset>");
            assignments.push(Assignment {
                asset_id: target.id.clone(),
                previous_host,
                host_id: None,
                score: None,
                justification: format!("skipped: fixed strategy pinned to {pinned}"),
            });
            continue;
        }

        let ranked = rank_hosts(&loads, target.environment.as_deref(), weights);
        let Some(best) = ranked.first() else {
            assignments.push(Assignment {
                asset_id: target.id.clone(),
                previous_host,
                host_id: None,
                score: None,
                justification: "no eligible host with spare capacity".into(),
            });
            continue;
        };

        if let Some(load) = loads.iter_mut().find(|l| l.host.id == best.host_id) {
            load.running += 1;
        }
        debug!(asset = %target.id, host = %best.host_id, score = best.score, "projected assignment");

        assignments.push(Assignment {
            asset_id: target.id.clone(),
            previous_host,
            host_id: Some(best.host_id.clone()),
            score: Some(best.score),
            justification: best.summary(),
        });
    }
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_state::HostNode;

    fn load(id: &str, capacity: u32, running: u32) -> HostLoad {
        let mut host = HostNode::new(id, "10.0.0.1");
        host.max_containers = capacity;
        HostLoad::new(host, running)
    }

    fn any(id: &str) -> DeploymentTarget {
        DeploymentTarget::new("ex1", id, id)
    }

    #[test]
    fn spreads_targets_using_projected_load() {
        let loads = vec![load("a", 4, 0), load("b", 4, 0)];
        let targets = vec![any("t1"), any("t2"), any("t3"), any("t4")];
        let out = redistribute(&targets, loads, &HashMap::new(), &ScoringWeights::default());

        let on_a = out.iter().filter(|a| a.host_id.as_deref() == Some("a")).count();
        let on_b = out.iter().filter(|a| a.host_id.as_deref() == Some("b")).count();
        assert_eq!((on_a, on_b), (2, 2));
        // Ties go to the smaller id first.
        assert_eq!(out[0].host_id.as_deref(), Some("a"));
    }

    #[test]
    fn fixed_targets_are_skipped() {
        let mut pinned = any("db");
        pinned.strategy = DeploymentStrategy::Fixed;
        pinned.preferred_host = Some("a".into());
        let out = redistribute(&[pinned], vec![load("a", 4, 0)], &HashMap::new(), &ScoringWeights::default());

        assert_eq!(out.len(), 1);
        assert!(out[0].host_id.is_none());
        assert!(out[0].justification.contains("fixed"));
    }

    #[test]
    fn own_containers_do_not_count_against_current_host() {
        // "a" looks full but one of its containers is t1 itself.
        let loads = vec![load("a", 2, 2), load("b", 2, 1)];
        let current = HashMap::from([("t1".to_string(), "a".to_string())]);
        let out = redistribute(&[any("t1")], loads, &current, &ScoringWeights::default());

        assert_eq!(out[0].previous_host.as_deref(), Some("a"));
        assert!(out[0].host_id.is_some());
    }

    #[test]
    fn runs_out_of_capacity() {
        let out = redistribute(
            &[any("t1"), any("t2")],
            vec![load("a", 1, 0)],
            &HashMap::new(),
            &ScoringWeights::default(),
        );
        assert_eq!(out[0].host_id.as_deref(), Some("a"));
        assert!(out[1].host_id.is_none());
        assert!(!out[1].moves());
    }
}
