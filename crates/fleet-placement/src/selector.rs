//! Node selection for a single deployment target.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use fleet_discovery::DiscoveryClient;
use fleet_state::{DeploymentIndex, DeploymentStrategy, DeploymentTarget, HostNode, StateStore};

use crate::capacity::{CapacityAlert, ClusterLoad, capacity_alerts, cluster_load};
use crate::error::{PlacementError, PlacementResult};
use crate::redistribute::{Assignment, redistribute};
use crate::scorer::{HostLoad, HostScore, ScoringWeights, rank_hosts};

/// The chosen host plus why it was chosen.
#[derive(Debug, Clone, Serialize)]
pub struct Placement {
    pub host: HostNode,
    /// `None` when a fixed target was honoured without scoring.
    pub score: Option<HostScore>,
    pub justification: String,
}

/// Pick a host for `target` from pre-computed loads.
///
/// `environment` overrides the target's own environment tag when given.
pub fn select_node(
    target: &DeploymentTarget,
    environment: Option<&str>,
    loads: &[HostLoad],
    weights: &ScoringWeights,
) -> PlacementResult<Placement> {
    let environment = environment.or(target.environment.as_deref());

    if target.strategy == DeploymentStrategy::Fixed {
        match target.preferred_host.as_deref() {
            Some(preferred) => {
                match loads.iter().find(|l| l.host.id == preferred) {
                    Some(load) if load.host.is_active() => {
                        return Ok(Placement {
                            host: load.host.clone(),
                            score: None,
                            justification: format!("fixed strategy: preferred host {preferred} is active"),
                        });
                    }
                    Some(load) => warn!(
                        asset = %target.id,
                        host = preferred,
                        status = %load.host.status,
                        "preferred host not active, falling back to scoring"
                    ),
                    None => warn!(
                        asset = %target.id,
                        host = preferred,
                        "preferred host unknown, falling back to scoring"
                    ),
                }
            }
            None => warn!(asset = %target.id, "fixed strategy without preferred host"),
        }
    }

    let ranked = rank_hosts(loads, environment, weights);
    for candidate in ranked.iter().take(3) {
        debug!(asset = %target.id, candidate = %candidate.summary(), "placement candidate");
    }

    let best = ranked.into_iter().next().ok_or_else(|| PlacementError::NoEligibleHost {
        asset_id: target.id.clone(),
        reason: no_host_reason(loads, environment),
    })?;

    let host = loads
        .iter()
        .find(|l| l.host.id == best.host_id)
        .map(|l| l.host.clone())
        .ok_or_else(|| PlacementError::NoEligibleHost {
            asset_id: target.id.clone(),
            reason: "scored host vanished".into(),
        })?;

    Ok(Placement {
        host,
        justification: format!("highest score: {}", best.summary()),
        score: Some(best),
    })
}

fn no_host_reason(loads: &[HostLoad], environment: Option<&str>) -> String {
    let active = loads.iter().filter(|l| l.host.is_active()).count();
    if active == 0 {
        return format!("no active host among {} registered", loads.len());
    }
    let with_room = loads.iter().filter(|l| l.host.is_active() && l.has_capacity()).count();
    if with_room == 0 {
        return format!("all {active} active hosts are at capacity");
    }
    match environment {
        Some(env) => format!("no host with spare capacity matches environment '{env}'"),
        None => "no host qualifies".into(),
    }
}

/// Placement over the live host table and what the hosts report.
pub struct PlacementSelector {
    store: StateStore,
    index: Arc<DeploymentIndex>,
    discovery: DiscoveryClient,
    weights: ScoringWeights,
}

impl PlacementSelector {
    pub fn new(store: StateStore, index: Arc<DeploymentIndex>, discovery: DiscoveryClient) -> Self {
        Self::with_weights(store, index, discovery, ScoringWeights::default())
    }

    pub fn with_weights(
        store: StateStore,
        index: Arc<DeploymentIndex>,
        discovery: DiscoveryClient,
        weights: ScoringWeights,
    ) -> Self {
        Self {
            store,
            index,
            discovery,
            weights,
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Every registered host with its current container count.
    ///
    /// Active hosts are counted from the running containers they report.
    /// A host that cannot be listed, and any host that is not active, falls
    /// back to its `DEPLOYING`/`DEPLOYED` records.
    pub async fn host_loads(&self) -> PlacementResult<Vec<HostLoad>> {
        let hosts = self.store.list_hosts()?;
        let active: Vec<HostNode> = hosts.iter().filter(|h| h.is_active()).cloned().collect();
        let observed = self.discovery.containers_across(&active, false).await;
        let recorded = self.index.active_per_host().await;

        let loads = hosts
            .into_iter()
            .map(|host| {
                let count = match observed.per_host.get(&host.id) {
                    Some(containers) => containers.iter().filter(|c| c.is_running()).count() as u32,
                    None => {
                        let count = recorded.get(&host.id).copied().unwrap_or(0);
                        if observed.failed(&host.id) {
                            debug!(host_id = %host.id, count, "host not listable, counting recorded deployments");
                        }
                        count
                    }
                };
                HostLoad::new(host, count)
            })
            .collect();
        Ok(loads)
    }

    pub async fn select_node(
        &self,
        target: &DeploymentTarget,
        environment: Option<&str>,
    ) -> PlacementResult<Placement> {
        let loads = self.host_loads().await?;
        let placement = select_node(target, environment, &loads, &self.weights)?;
        info!(
            asset = %target.id,
            host = %placement.host.id,
            reason = %placement.justification,
            "host selected"
        );
        Ok(placement)
    }

    /// Recompute assignments for the given assets together.
    ///
    /// Active deployments of these assets are not counted against their
    /// current hosts, so the result reflects a fresh distribution.
    pub async fn redistribute(&self, asset_ids: &[String]) -> PlacementResult<Vec<Assignment>> {
        let mut targets = Vec::with_capacity(asset_ids.len());
        for id in asset_ids {
            let target = self
                .store
                .get_asset(id)?
                .ok_or_else(|| PlacementError::AssetNotFound(id.clone()))?;
            targets.push(target);
        }

        let current = self
            .index
            .all()
            .await
            .into_iter()
            .filter(|r| r.state.is_active() && asset_ids.contains(&r.key.asset_id))
            .filter_map(|r| r.host_id.map(|h| (r.key.asset_id, h)))
            .collect();

        let loads = self.host_loads().await?;
        let assignments = redistribute(&targets, loads, &current, &self.weights);
        info!(
            targets = targets.len(),
            placed = assignments.iter().filter(|a| a.host_id.is_some()).count(),
            "redistribution computed"
        );
        Ok(assignments)
    }

    pub async fn capacity_alerts(&self) -> PlacementResult<Vec<CapacityAlert>> {
        Ok(capacity_alerts(&self.host_loads().await?))
    }

    pub async fn cluster_load(&self) -> PlacementResult<ClusterLoad> {
        Ok(cluster_load(&self.host_loads().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fleet_discovery::mock::MockConnector;
    use fleet_discovery::{DiscoveryConfig, HostConnector};
    use fleet_state::{DeploymentRecord, DeploymentState, HostStatus, RecordKey};

    fn load(id: &str, capacity: u32, running: u32) -> HostLoad {
        let mut host = HostNode::new(id, format!("10.0.0.{}", running + 1));
        host.max_containers = capacity;
        HostLoad::new(host, running)
    }

    fn target(id: &str) -> DeploymentTarget {
        DeploymentTarget::new("ex1", id, id)
    }

    #[test]
    fn picks_least_loaded_host() {
        let loads = vec![load("a", 10, 8), load("b", 10, 2)];
        let placement = select_node(&target("web"), None, &loads, &ScoringWeights::default()).unwrap();
        assert_eq!(placement.host.id, "b");
        assert!(placement.score.is_some());
    }

    #[test]
    fn fixed_strategy_wins_regardless_of_load() {
        let loads = vec![load("busy", 10, 9), load("idle", 10, 0)];
        let mut t = target("db");
        t.strategy = DeploymentStrategy::Fixed;
        t.preferred_host = Some("busy".into());

        let placement = select_node(&t, None, &loads, &ScoringWeights::default()).unwrap();
        assert_eq!(placement.host.id, "busy");
        assert!(placement.score.is_none());
    }

    #[test]
    fn fixed_strategy_falls_back_when_preferred_down() {
        let mut down = load("busy", 10, 0);
        down.host.status = HostStatus::Maintenance;
        let loads = vec![down, load("idle", 10, 4)];
        let mut t = target("db");
        t.strategy = DeploymentStrategy::Fixed;
        t.preferred_host = Some("busy".into());

        let placement = select_node(&t, None, &loads, &ScoringWeights::default()).unwrap();
        assert_eq!(placement.host.id, "idle");
    }

    #[test]
    fn no_active_host_is_typed_error() {
        let mut only = load("a", 10, 0);
        only.host.status = HostStatus::Inactive;
        let err = select_node(&target("web"), None, &[only], &ScoringWeights::default()).unwrap_err();
        match err {
            PlacementError::NoEligibleHost { asset_id, reason } => {
                assert_eq!(asset_id, "web");
                assert!(reason.contains("no active host"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn target_environment_is_used_by_default() {
        let mut lab = load("lab", 10, 0);
        lab.host.environment = Some("lab".into());
        let mut prod = load("prod", 10, 6);
        prod.host.environment = Some("prod".into());
        let mut t = target("web");
        t.environment = Some("prod".into());

        let placement = select_node(&t, None, &[lab, prod], &ScoringWeights::default()).unwrap();
        assert_eq!(placement.host.id, "prod");
    }

    fn selector(store: &StateStore, index: Arc<DeploymentIndex>) -> (PlacementSelector, Arc<MockConnector>) {
        let connector = Arc::new(MockConnector::new());
        let discovery = DiscoveryClient::new(
            store.clone(),
            connector.clone() as Arc<dyn HostConnector>,
            DiscoveryConfig {
                per_host_timeout: Duration::from_millis(200),
                ..DiscoveryConfig::default()
            },
        );
        (PlacementSelector::new(store.clone(), index, discovery), connector)
    }

    fn two_hosts(store: &StateStore) {
        for (id, address) in [("a", "10.0.0.1"), ("b", "10.0.0.2")] {
            let mut host = HostNode::new(id, address);
            host.max_containers = 10;
            store.put_host(&host).unwrap();
        }
    }

    #[tokio::test]
    async fn selector_counts_containers_running_on_hosts() {
        let store = StateStore::open_in_memory().unwrap();
        two_hosts(&store);
        let index = Arc::new(DeploymentIndex::rehydrate(store.clone()).await.unwrap());
        let (selector, connector) = selector(&store, index);

        for i in 0..8 {
            connector.host("a").add_container(&format!("a{i}"), &format!("svc{i}"), "nginx", true, None);
        }
        for i in 0..2 {
            connector.host("b").add_container(&format!("b{i}"), &format!("svc{i}"), "nginx", true, None);
        }
        connector.host("b").add_container("b-old", "old", "nginx", false, None);

        let loads = selector.host_loads().await.unwrap();
        let count = |id: &str| loads.iter().find(|l| l.host.id == id).unwrap().running;
        assert_eq!((count("a"), count("b")), (8, 2));

        let placement = selector.select_node(&target("web"), None).await.unwrap();
        assert_eq!(placement.host.id, "b");

        let cluster = selector.cluster_load().await.unwrap();
        assert_eq!(cluster.running, 10);
        let alerts = selector.capacity_alerts().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].host_id, "a");
    }

    #[tokio::test]
    async fn unlistable_host_falls_back_to_records() {
        let store = StateStore::open_in_memory().unwrap();
        two_hosts(&store);
        let index = Arc::new(DeploymentIndex::rehydrate(store.clone()).await.unwrap());
        for i in 0..9 {
            let key = RecordKey::new("ex1", format!("asset{i}"), "nginx-latest");
            let mut record = DeploymentRecord::pending(key, "nginx:latest", 1);
            record.state = DeploymentState::Deployed;
            record.host_id = Some("a".into());
            index.put(record).await.unwrap();
        }
        let (selector, connector) = selector(&store, index);
        connector.host("a").set_offline(true);
        for i in 0..3 {
            connector.host("b").add_container(&format!("b{i}"), &format!("svc{i}"), "nginx", true, None);
        }

        let loads = selector.host_loads().await.unwrap();
        let count = |id: &str| loads.iter().find(|l| l.host.id == id).unwrap().running;
        assert_eq!((count("a"), count("b")), (9, 3));

        let placement = selector.select_node(&target("web"), None).await.unwrap();
        assert_eq!(placement.host.id, "b");
    }

    #[tokio::test]
    async fn redistribute_unknown_asset_errors() {
        let store = StateStore::open_in_memory().unwrap();
        let index = Arc::new(DeploymentIndex::rehydrate(store.clone()).await.unwrap());
        let (selector, _connector) = selector(&store, index);
        let err = selector.redistribute(&["ghost".to_string()]).await.unwrap_err();
        assert!(matches!(err, PlacementError::AssetNotFound(id) if id == "ghost"));
    }
}
