//! Discovery client: cached, timeout-bounded queries against host APIs.
//!
//! Single-host calls resolve the host through the registry, consult the TTL
//! cache and fall through to the host API. Fleet-wide calls fan out over a
//! bounded set of concurrent tasks; each host is bounded by its own timeout
//! and a failing host only adds an entry to [`FleetSnapshot::failures`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use fleet_state::{HostId, HostNode, StateStore};

use crate::api::HostConnector;
use crate::cache::{Clock, SystemClock, TtlCache};
use crate::error::{DiscoveryError, DiscoveryResult, HostApiError};
use crate::model::{ContainerInfo, ImageEntry, LABEL_EXERCISE, normalize_containers, normalize_images};

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub cache_ttl: Duration,
    pub per_host_timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            per_host_timeout: Duration::from_secs(10),
            max_concurrency: 8,
        }
    }
}

/// A host that could not be queried during a fan-out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostFailure {
    pub host_id: HostId,
    pub error: String,
    /// The host could not be talked to at all (as opposed to a registry or
    /// decoding problem).
    pub transport: bool,
}

/// Per-host results of a fan-out, plus the hosts that failed.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSnapshot<T> {
    pub per_host: BTreeMap<HostId, T>,
    pub failures: Vec<HostFailure>,
}

impl<T> FleetSnapshot<T> {
    pub fn failed(&self, host_id: &str) -> bool {
        self.failures.iter().any(|f| f.host_id == host_id)
    }
}

/// Containers and images of one exercise across all active hosts.
#[derive(Debug, Clone, Serialize)]
pub struct ExerciseDiscovery {
    pub exercise_id: String,
    pub hosts: Vec<HostNode>,
    pub containers: Vec<ContainerInfo>,
    pub images: Vec<ImageEntry>,
    pub failures: Vec<HostFailure>,
}

struct Inner {
    store: StateStore,
    connector: Arc<dyn HostConnector>,
    containers: TtlCache<HostId, Vec<ContainerInfo>>,
    images: TtlCache<HostId, Vec<ImageEntry>>,
    config: DiscoveryConfig,
}

#[derive(Clone)]
pub struct DiscoveryClient {
    inner: Arc<Inner>,
}

impl DiscoveryClient {
    pub fn new(store: StateStore, connector: Arc<dyn HostConnector>, config: DiscoveryConfig) -> Self {
        Self::with_clock(store, connector, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: StateStore,
        connector: Arc<dyn HostConnector>,
        config: DiscoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                connector,
                containers: TtlCache::new(config.cache_ttl, clock.clone()),
                images: TtlCache::new(config.cache_ttl, clock),
                config,
            }),
        }
    }

    pub fn connector(&self) -> &Arc<dyn HostConnector> {
        &self.inner.connector
    }

    pub fn per_host_timeout(&self) -> Duration {
        self.inner.config.per_host_timeout
    }

    fn host(&self, host_id: &str) -> DiscoveryResult<HostNode> {
        self.inner
            .store
            .get_host(host_id)?
            .ok_or_else(|| DiscoveryError::HostNotFound(host_id.to_string()))
    }

    // ── Single host ────────────────────────────────────────────────

    pub async fn list_containers(&self, host_id: &str) -> DiscoveryResult<Vec<ContainerInfo>> {
        let host = self.host(host_id)?;
        self.containers_for(&host, false).await
    }

    /// Like [`Self::list_containers`] but bypasses the cache.
    pub async fn refresh_containers(&self, host_id: &str) -> DiscoveryResult<Vec<ContainerInfo>> {
        let host = self.host(host_id)?;
        self.containers_for(&host, true).await
    }

    pub async fn list_images(&self, host_id: &str) -> DiscoveryResult<Vec<ImageEntry>> {
        let host = self.host(host_id)?;
        self.images_for(&host, false).await
    }

    /// Like [`Self::list_images`] but bypasses the cache.
    pub async fn refresh_images(&self, host_id: &str) -> DiscoveryResult<Vec<ImageEntry>> {
        let host = self.host(host_id)?;
        self.images_for(&host, true).await
    }

    /// Forget cached results for a host, e.g. after deploying to it.
    pub async fn invalidate(&self, host_id: &str) {
        self.inner.containers.invalidate(&host_id.to_string()).await;
        self.inner.images.invalidate(&host_id.to_string()).await;
    }

    pub async fn containers_for(&self, host: &HostNode, refresh: bool) -> DiscoveryResult<Vec<ContainerInfo>> {
        if !refresh {
            if let Some(hit) = self.inner.containers.get(&host.id).await {
                debug!(host_id = %host.id, count = hit.len(), "container list served from cache");
                return Ok(hit);
            }
        }
        let api = self
            .inner
            .connector
            .connect(host)
            .map_err(|e| DiscoveryError::host(&host.id, e))?;
        let raw = self
            .bounded(&host.id, api.list_containers())
            .await?;
        let containers = normalize_containers(&host.id, raw);
        debug!(host_id = %host.id, count = containers.len(), "containers discovered");
        self.inner.containers.insert(host.id.clone(), containers.clone()).await;
        Ok(containers)
    }

    pub async fn images_for(&self, host: &HostNode, refresh: bool) -> DiscoveryResult<Vec<ImageEntry>> {
        if !refresh {
            if let Some(hit) = self.inner.images.get(&host.id).await {
                return Ok(hit);
            }
        }
        let api = self
            .inner
            .connector
            .connect(host)
            .map_err(|e| DiscoveryError::host(&host.id, e))?;
        let raw = self.bounded(&host.id, api.list_images()).await?;
        let images = normalize_images(&host.id, raw);
        debug!(host_id = %host.id, count = images.len(), "images discovered");
        self.inner.images.insert(host.id.clone(), images.clone()).await;
        Ok(images)
    }

    /// Run a host call under the per-host timeout. A timeout is a failure.
    async fn bounded<T, F>(&self, host_id: &str, call: F) -> DiscoveryResult<T>
    where
        F: Future<Output = Result<T, HostApiError>>,
    {
        let limit = self.inner.config.per_host_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result.map_err(|e| DiscoveryError::host(host_id, e)),
            Err(_) => Err(DiscoveryError::host(host_id, HostApiError::Timeout(limit))),
        }
    }

    // ── Fan-out ────────────────────────────────────────────────────

    /// Containers on every given host. Failing hosts are reported, not fatal.
    pub async fn containers_across(
        &self,
        hosts: &[HostNode],
        refresh: bool,
    ) -> FleetSnapshot<Vec<ContainerInfo>> {
        self.fan_out(hosts, move |client, host| async move {
            client.containers_for(&host, refresh).await
        })
        .await
    }

    /// Images on every given host. Failing hosts are reported, not fatal.
    pub async fn images_across(&self, hosts: &[HostNode], refresh: bool) -> FleetSnapshot<Vec<ImageEntry>> {
        self.fan_out(hosts, move |client, host| async move {
            client.images_for(&host, refresh).await
        })
        .await
    }

    async fn fan_out<T, F, Fut>(&self, hosts: &[HostNode], call: F) -> FleetSnapshot<T>
    where
        T: Send + 'static,
        F: Fn(DiscoveryClient, HostNode) -> Fut,
        Fut: Future<Output = DiscoveryResult<T>> + Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.inner.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for host in hosts {
            let permits = permits.clone();
            let host_id = host.id.clone();
            let fut = call(self.clone(), host.clone());
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (host_id, fut.await)
            });
        }

        let mut snapshot = FleetSnapshot {
            per_host: BTreeMap::new(),
            failures: Vec::new(),
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((host_id, Ok(value))) => {
                    snapshot.per_host.insert(host_id, value);
                }
                Ok((host_id, Err(e))) => {
                    warn!(%host_id, error = %e, "discovery failed for host");
                    let transport = matches!(&e, DiscoveryError::Host { source, .. } if source.is_transport());
                    snapshot.failures.push(HostFailure {
                        host_id,
                        error: e.to_string(),
                        transport,
                    });
                }
                Err(e) => warn!(error = %e, "discovery task panicked"),
            }
        }
        snapshot.failures.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        snapshot
    }

    /// Containers labeled for `exercise_id` and images across active hosts.
    pub async fn discover_exercise(&self, exercise_id: &str, refresh: bool) -> DiscoveryResult<ExerciseDiscovery> {
        let hosts: Vec<_> = self
            .inner
            .store
            .list_hosts()?
            .into_iter()
            .filter(HostNode::is_active)
            .collect();

        let containers = self.containers_across(&hosts, refresh).await;
        let images = self.images_across(&hosts, refresh).await;

        let mut failures = containers.failures.clone();
        for failure in images.failures {
            if !failures.iter().any(|f| f.host_id == failure.host_id) {
                failures.push(failure);
            }
        }

        Ok(ExerciseDiscovery {
            exercise_id: exercise_id.to_string(),
            containers: containers
                .per_host
                .into_values()
                .flatten()
                .filter(|c| c.labels.get(LABEL_EXERCISE).map(String::as_str) == Some(exercise_id))
                .collect(),
            images: images.per_host.into_values().flatten().collect(),
            hosts,
            failures,
        })
    }
}
