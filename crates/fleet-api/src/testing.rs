//! Fixtures shared by the handler tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fleet_discovery::mock::MockConnector;
use fleet_discovery::{DiscoveryClient, DiscoveryConfig, HostConnector};
use fleet_health::{HostRegistry, Probe, RegistryConfig};
use fleet_orchestrator::OrchestratorConfig;
use fleet_reconciler::ReconcilerConfig;
use fleet_state::{DeploymentIndex, HostNode, StateStore};

use crate::ApiState;

/// Reports every host listed in `up` as healthy, everything else as down.
pub struct FixedProbe {
    pub up: Vec<String>,
}

#[async_trait]
impl Probe for FixedProbe {
    async fn tcp_reachable(&self, host: &HostNode, _: Duration) -> bool {
        self.up.contains(&host.id)
    }
    async fn api_healthy(&self, host: &HostNode, _: Duration) -> bool {
        self.up.contains(&host.id)
    }
}

pub struct Fixture {
    pub state: ApiState,
    pub connector: Arc<MockConnector>,
}

/// An in-memory fleet with `hosts` registered as active, capacity 10.
pub async fn fixture(hosts: &[&str]) -> Fixture {
    let store = StateStore::open_in_memory().unwrap();
    for (i, id) in hosts.iter().enumerate() {
        let mut host = HostNode::new(*id, format!("10.0.0.{}", i + 1));
        host.max_containers = 10;
        store.put_host(&host).unwrap();
    }
    let index = Arc::new(DeploymentIndex::rehydrate(store.clone()).await.unwrap());
    let connector = Arc::new(MockConnector::new());
    let discovery = DiscoveryClient::new(
        store.clone(),
        connector.clone() as Arc<dyn HostConnector>,
        DiscoveryConfig::default(),
    );
    let probe = Arc::new(FixedProbe {
        up: hosts.iter().map(|h| h.to_string()).collect(),
    });
    let registry = Arc::new(HostRegistry::new(
        store.clone(),
        probe,
        RegistryConfig {
            retry_backoff: Duration::from_millis(1),
            ..RegistryConfig::default()
        },
    ));
    let orchestrator = OrchestratorConfig {
        verify_attempts: 3,
        verify_interval: Duration::from_millis(10),
        host_call_timeout: Duration::from_secs(2),
        ..OrchestratorConfig::default()
    };
    Fixture {
        state: ApiState::new(store, index, registry, discovery, orchestrator, ReconcilerConfig::default()),
        connector,
    }
}
