//! Deployment orchestrator: drives records through their lifecycle.
//!
//! `deploy` flips the record to `DEPLOYING` and returns; the container work
//! runs on the [`DeployWorker`] and writes `DEPLOYED` or `FAILED` back to
//! the record when it ends. `stop` and `remove_completely` are synchronous
//! and only touch the record once the host has done its part.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use fleet_discovery::model::{LABEL_ASSET, LABEL_EXERCISE, LABEL_IMAGE};
use fleet_discovery::{ContainerSpec, DiscoveryClient, HostApi, HostApiError, HostApiResult};
use fleet_placement::PlacementSelector;
use fleet_state::*;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::ports::{FIRST_HOST_PORT, ImageFamily, allocate_bindings};
use crate::worker::DeployWorker;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Prepended to every container name.
    pub container_prefix: String,
    pub max_parallel_deploys: usize,
    /// Inspections after start before the deploy counts as unverified.
    pub verify_attempts: u32,
    pub verify_interval: Duration,
    /// Upper bound for any single host API call.
    pub host_call_timeout: Duration,
    pub first_host_port: u16,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            container_prefix: "drill-".to_string(),
            max_parallel_deploys: 4,
            verify_attempts: 5,
            verify_interval: Duration::from_secs(1),
            host_call_timeout: Duration::from_secs(30),
            first_host_port: FIRST_HOST_PORT,
        }
    }
}

/// A record with its reconciliation state and worker status.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStatus {
    pub record: DeploymentRecord,
    pub sync: Option<SyncStatus>,
    pub in_flight: bool,
}

struct DeployOutcome {
    host_id: HostId,
    container_id: String,
    container_name: String,
    endpoint: Option<Endpoint>,
}

/// What a deploy job got done before it stopped.
#[derive(Default)]
struct Attempt {
    host_id: Option<HostId>,
    previous_removed: bool,
}

struct Inner {
    store: StateStore,
    index: Arc<DeploymentIndex>,
    discovery: DiscoveryClient,
    placement: Arc<PlacementSelector>,
    worker: DeployWorker,
    config: OrchestratorConfig,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        store: StateStore,
        index: Arc<DeploymentIndex>,
        discovery: DiscoveryClient,
        placement: Arc<PlacementSelector>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                worker: DeployWorker::new(config.max_parallel_deploys),
                store,
                index,
                discovery,
                placement,
                config,
            }),
        }
    }

    pub fn index(&self) -> &Arc<DeploymentIndex> {
        &self.inner.index
    }

    pub fn worker(&self) -> &DeployWorker {
        &self.inner.worker
    }

    // ── Image mappings ─────────────────────────────────────────────

    /// Register `image_name` for an asset and create its `PENDING` record.
    ///
    /// Adding the same image twice returns the existing record.
    pub async fn add_image(
        &self,
        exercise_id: &str,
        asset_id: &str,
        image_name: &str,
        host_id: Option<&str>,
    ) -> OrchestratorResult<DeploymentRecord> {
        let image_name = image_name.trim();
        if exercise_id.is_empty() || asset_id.is_empty() || image_name.is_empty() {
            return Err(OrchestratorError::Invalid(
                "exercise, asset and image are required".into(),
            ));
        }

        let (repository, tag) = split_image_ref(image_name);
        let key = RecordKey::new(exercise_id, asset_id, image_id_for(image_name));
        let index = &self.inner.index;
        let now = epoch_secs();

        if index.mapping(&key).await.is_none() {
            index
                .put_mapping(ImageMapping {
                    key: key.clone(),
                    image_name: repository.clone(),
                    image_tag: tag.clone(),
                    host_id: host_id.map(str::to_string),
                    added_at: now,
                })
                .await?;
        }

        if let Some(existing) = index.get(&key).await {
            debug!(%key, "image already mapped");
            return Ok(existing);
        }

        let record = DeploymentRecord::pending(key.clone(), format!("{repository}:{tag}"), now);
        index.put(record.clone()).await?;
        info!(%key, image = %record.image, "image added");
        Ok(record)
    }

    /// Drop an image mapping; refused while it is deployed or deploying.
    pub async fn remove_image(&self, key: &RecordKey) -> OrchestratorResult<()> {
        let record = self.record(key).await?;
        if record.state.is_active() {
            return Err(OrchestratorError::InvalidTransition {
                key: key.to_string(),
                state: record.state,
                action: "remove image",
            });
        }
        self.remove_completely(key).await
    }

    pub async fn images(&self, exercise_id: &str) -> Vec<ImageMapping> {
        self.inner.index.images_for_exercise(exercise_id).await
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start deploying `key`; returns the record in `DEPLOYING`.
    pub async fn deploy(&self, key: &RecordKey) -> OrchestratorResult<DeploymentRecord> {
        let now = epoch_secs();
        let mut prior = None;
        let record = self
            .inner
            .index
            .update_record(key, |r| {
                if !r.state.can_transition_to(DeploymentState::Deploying) {
                    return Err(OrchestratorError::InvalidTransition {
                        key: key.to_string(),
                        state: r.state,
                        action: "deploy",
                    });
                }
                prior = Some(r.clone());
                r.state = DeploymentState::Deploying;
                r.error = None;
                r.deploy_started_at = Some(now);
                Ok(())
            })
            .await?
            .ok_or_else(|| OrchestratorError::RecordNotFound(key.to_string()))?;
        let prior = prior.unwrap_or_else(|| record.clone());

        info!(%key, image = %record.image, redeploy = prior.container_id.is_some(), "deploy queued");
        let this = self.clone();
        let job_key = key.clone();
        self.inner
            .worker
            .spawn(key.clone(), async move {
                let runner = this.clone();
                let run_key = job_key.clone();
                let job = tokio::spawn(async move { runner.run_deploy(run_key, prior).await });
                if let Err(e) = job.await {
                    error!(key = %job_key, error = %e, "deploy job aborted");
                    this.settle_interrupted(&job_key, &format!("deploy job aborted: {e}")).await;
                }
            })
            .await;
        Ok(record)
    }

    /// Mark `DEPLOYING` records with no job behind them as `FAILED`.
    ///
    /// Run once at startup, before any deploy is accepted: records left in
    /// `DEPLOYING` by a previous process can never finish otherwise.
    pub async fn recover_interrupted(&self) -> OrchestratorResult<Vec<RecordKey>> {
        let mut recovered = Vec::new();
        for record in self.inner.index.in_state(DeploymentState::Deploying).await {
            if self.fail_if_orphaned(&record.key, "deploy interrupted before completion").await? {
                recovered.push(record.key);
            }
        }
        if !recovered.is_empty() {
            warn!(count = recovered.len(), "interrupted deploys marked failed");
        }
        Ok(recovered)
    }

    /// Fail `key` if it is `DEPLOYING` and no deploy job is running for it.
    /// Returns whether the record was changed.
    pub async fn fail_if_orphaned(&self, key: &RecordKey, reason: &str) -> StateResult<bool> {
        if self.inner.worker.is_in_flight(key).await {
            return Ok(false);
        }
        let mut changed = false;
        self.inner
            .index
            .update_record(key, |r| -> StateResult<()> {
                if r.state == DeploymentState::Deploying {
                    r.state = DeploymentState::Failed;
                    r.error = Some(reason.to_string());
                    changed = true;
                }
                Ok(())
            })
            .await?;
        if changed {
            warn!(%key, %reason, "orphaned deploy marked failed");
        }
        Ok(changed)
    }

    async fn settle_interrupted(&self, key: &RecordKey, reason: &str) {
        let result = self
            .inner
            .index
            .update_record(key, |r| -> StateResult<()> {
                if r.state == DeploymentState::Deploying {
                    r.state = DeploymentState::Failed;
                    r.error = Some(reason.to_string());
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            error!(%key, error = %e, "failed to persist aborted deploy");
        }
    }

    async fn run_deploy(&self, key: RecordKey, prior: DeploymentRecord) {
        let mut attempt = Attempt::default();
        let outcome = self.execute_deploy(&key, &prior, &mut attempt).await;
        let now = epoch_secs();

        let written = self
            .inner
            .index
            .update_record(&key, |r| -> OrchestratorResult<()> {
                match &outcome {
                    Ok(done) => {
                        r.state = DeploymentState::Deployed;
                        r.host_id = Some(done.host_id.clone());
                        r.container_id = Some(done.container_id.clone());
                        r.container_name = Some(done.container_name.clone());
                        r.endpoint = done.endpoint.clone();
                        r.deployed_at = Some(now);
                        r.stopped_at = None;
                        r.error = None;
                    }
                    Err(e) => {
                        r.state = DeploymentState::Failed;
                        r.error = Some(e.to_string());
                        if attempt.host_id.is_some() {
                            r.host_id = attempt.host_id.clone();
                        }
                        if attempt.previous_removed {
                            r.container_id = None;
                            r.container_name = None;
                        }
                    }
                }
                Ok(())
            })
            .await;

        match (&outcome, written) {
            (Ok(done), Ok(Some(_))) => {
                info!(%key, host = %done.host_id, container = %done.container_id, "deployed");
                if let Err(e) = self
                    .inner
                    .index
                    .put_sync_status(SyncStatus::synced(key.clone(), now))
                    .await
                {
                    warn!(%key, error = %e, "failed to reset sync status");
                }
            }
            (Err(e), Ok(Some(_))) => warn!(%key, error = %e, kind = ?e.kind(), "deploy failed"),
            (_, Ok(None)) => error!(%key, "record vanished during deploy"),
            (_, Err(e)) => error!(%key, error = %e, "failed to persist deploy outcome"),
        }

        if let Some(host_id) = &attempt.host_id {
            self.inner.discovery.invalidate(host_id).await;
        }
    }

    async fn execute_deploy(
        &self,
        key: &RecordKey,
        prior: &DeploymentRecord,
        attempt: &mut Attempt,
    ) -> OrchestratorResult<DeployOutcome> {
        let target = self.target_for(key)?;
        let host = self.resolve_host(&target, prior).await?;
        attempt.host_id = Some(host.id.clone());
        let api = self.connect(&host)?;

        attempt.previous_removed = self.clear_previous(prior, &host, api.as_ref()).await?;

        let same_host = prior.host_id.as_deref() == Some(host.id.as_str());
        let mut requested = match target.ports.as_deref() {
            Some(spec) => parse_port_spec(spec)?,
            None => vec![PortMapping {
                host_port: None,
                container_port: ImageFamily::detect(&prior.image).default_port(),
            }],
        };
        if let (true, Some(previous), Some(first)) = (same_host, &prior.endpoint, requested.first_mut()) {
            if first.host_port.is_none() && first.container_port == previous.container_port {
                first.host_port = Some(previous.host_port);
            }
        }

        let in_use: BTreeSet<u16> = self
            .inner
            .discovery
            .refresh_containers(&host.id)
            .await?
            .iter()
            .flat_map(|c| c.bound_host_ports())
            .collect();
        let bindings = allocate_bindings(&host.id, &requested, &in_use, self.inner.config.first_host_port)?;

        let container_name = container_name(&self.inner.config.container_prefix, key);
        let spec = ContainerSpec {
            name: container_name.clone(),
            image: prior.image.clone(),
            env: target.env.clone(),
            ports: bindings.clone(),
            labels: BTreeMap::from([
                (LABEL_EXERCISE.to_string(), key.exercise_id.clone()),
                (LABEL_ASSET.to_string(), key.asset_id.clone()),
                (LABEL_IMAGE.to_string(), key.image_id.clone()),
            ]),
        };

        let container_id = self.call(&host.id, api.create_container(&spec)).await?;
        debug!(%key, host = %host.id, container = %container_id, "container created");

        if let Err(e) = self.call(&host.id, api.start_container(&container_id)).await {
            self.discard(&host.id, api.as_ref(), &container_id).await;
            return Err(e);
        }
        if let Err(e) = self.verify_running(key, &host.id, api.as_ref(), &container_id).await {
            self.discard(&host.id, api.as_ref(), &container_id).await;
            return Err(e);
        }

        Ok(DeployOutcome {
            host_id: host.id.clone(),
            container_id,
            container_name,
            endpoint: bindings.first().map(|b| Endpoint {
                address: host.address.clone(),
                host_port: b.host_port,
                container_port: b.container_port,
            }),
        })
    }

    /// Previous host when it is still active, otherwise a fresh placement.
    async fn resolve_host(&self, target: &DeploymentTarget, prior: &DeploymentRecord) -> OrchestratorResult<HostNode> {
        if let Some(previous) = &prior.host_id {
            match self.inner.store.get_host(previous)? {
                Some(host) if host.is_active() => return Ok(host),
                Some(host) => info!(host = %previous, status = %host.status, "previous host not active, re-placing"),
                None => info!(host = %previous, "previous host gone, re-placing"),
            }
        }
        Ok(self.inner.placement.select_node(target, None).await?.host)
    }

    /// Remove the container a redeploy replaces. Returns whether it is gone.
    async fn clear_previous(&self, prior: &DeploymentRecord, host: &HostNode, api: &dyn HostApi) -> OrchestratorResult<bool> {
        let (Some(old_id), Some(old_host)) = (&prior.container_id, &prior.host_id) else {
            return Ok(false);
        };

        if *old_host == host.id {
            return match self.call(&host.id, api.remove_container(old_id)).await {
                Ok(()) => {
                    debug!(key = %prior.key, container = %old_id, "previous container removed");
                    Ok(true)
                }
                Err(e) if e.is_missing_container() => Ok(true),
                Err(e) => Err(e),
            };
        }

        // Moving hosts: the old host may be down, so cleanup is best effort.
        let Some(old) = self.inner.store.get_host(old_host)? else {
            return Ok(false);
        };
        match self.connect(&old) {
            Ok(old_api) => match self.call(&old.id, old_api.remove_container(old_id)).await {
                Ok(()) => Ok(true),
                Err(e) if e.is_missing_container() => Ok(true),
                Err(e) => {
                    warn!(host = %old.id, container = %old_id, error = %e, "could not remove previous container");
                    Ok(false)
                }
            },
            Err(e) => {
                warn!(host = %old.id, error = %e, "could not reach previous host");
                Ok(false)
            }
        }
    }

    async fn verify_running(
        &self,
        key: &RecordKey,
        host_id: &str,
        api: &dyn HostApi,
        container_id: &str,
    ) -> OrchestratorResult<()> {
        let attempts = self.inner.config.verify_attempts.max(1);
        let mut observed = String::from("unknown");

        for n in 1..=attempts {
            match self.call(host_id, api.inspect_container(container_id)).await {
                Ok(inspect) if inspect.running => return Ok(()),
                Ok(inspect) => {
                    observed = match (inspect.exit_code, inspect.error) {
                        (_, Some(err)) if !err.is_empty() => format!("{} ({err})", inspect.status),
                        (Some(code), _) => format!("{} (exit code {code})", inspect.status),
                        _ => inspect.status,
                    };
                }
                Err(e) => observed = e.to_string(),
            }
            debug!(%key, container = container_id, attempt = n, %observed, "container not running yet");
            if n < attempts {
                tokio::time::sleep(self.inner.config.verify_interval).await;
            }
        }

        Err(OrchestratorError::Verification {
            key: key.to_string(),
            container_id: container_id.to_string(),
            observed,
        })
    }

    async fn discard(&self, host_id: &str, api: &dyn HostApi, container_id: &str) {
        if let Err(e) = self.call(host_id, api.remove_container(container_id)).await {
            warn!(host = host_id, container = container_id, error = %e, "failed to remove stray container");
        }
    }

    /// `DEPLOYED → STOPPED`. Stopping a stopped record is a no-op.
    pub async fn stop(&self, key: &RecordKey) -> OrchestratorResult<DeploymentRecord> {
        let record = self.record(key).await?;
        match record.state {
            DeploymentState::Stopped => return Ok(record),
            DeploymentState::Deployed => {}
            state => {
                return Err(OrchestratorError::InvalidTransition {
                    key: key.to_string(),
                    state,
                    action: "stop",
                });
            }
        }

        if let (Some(host_id), Some(container_id)) = (&record.host_id, &record.container_id) {
            let host = self.host(host_id)?;
            let api = self.connect(&host)?;
            match self.call(host_id, api.stop_container(container_id)).await {
                Ok(()) => {}
                Err(e) if e.is_missing_container() => {
                    warn!(%key, container = %container_id, "container already gone on stop");
                }
                Err(e) => return Err(e),
            }
            self.inner.discovery.invalidate(host_id).await;
        }

        let now = epoch_secs();
        let stopped = self
            .inner
            .index
            .update_record(key, |r| {
                if !r.state.can_transition_to(DeploymentState::Stopped) {
                    return Err(OrchestratorError::InvalidTransition {
                        key: key.to_string(),
                        state: r.state,
                        action: "stop",
                    });
                }
                r.state = DeploymentState::Stopped;
                r.stopped_at = Some(now);
                Ok(())
            })
            .await?
            .ok_or_else(|| OrchestratorError::RecordNotFound(key.to_string()))?;
        info!(%key, "deployment stopped");
        Ok(stopped)
    }

    /// Stop and remove the container, then erase record and mapping.
    ///
    /// Any host failure aborts before the record is touched, and so does a
    /// running container whose host is no longer registered.
    pub async fn remove_completely(&self, key: &RecordKey) -> OrchestratorResult<()> {
        let record = self.record(key).await?;
        if record.state == DeploymentState::Deploying {
            return Err(OrchestratorError::InvalidTransition {
                key: key.to_string(),
                state: record.state,
                action: "remove",
            });
        }

        if let (Some(host_id), Some(container_id)) = (&record.host_id, &record.container_id) {
            match self.inner.store.get_host(host_id)? {
                Some(host) => {
                    let api = self.connect(&host)?;
                    if record.state == DeploymentState::Deployed {
                        match self.call(host_id, api.stop_container(container_id)).await {
                            Ok(()) => {}
                            Err(e) if e.is_missing_container() => {}
                            Err(e) => return Err(e),
                        }
                    }
                    match self.call(host_id, api.remove_container(container_id)).await {
                        Ok(()) => {}
                        Err(e) if e.is_missing_container() => {}
                        Err(e) => return Err(e),
                    }
                    self.inner.discovery.invalidate(host_id).await;
                }
                None if record.state == DeploymentState::Deployed => {
                    return Err(OrchestratorError::HostNotFound(host_id.clone()));
                }
                None => warn!(%key, host = %host_id, "host no longer registered, skipping container cleanup"),
            }
        }

        if let Some(current) = self.inner.index.get(key).await {
            if current.state == DeploymentState::Deploying {
                return Err(OrchestratorError::InvalidTransition {
                    key: key.to_string(),
                    state: current.state,
                    action: "remove",
                });
            }
        }
        self.inner.index.remove(key).await?;
        info!(%key, "deployment removed");
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────────

    pub async fn status(&self, key: &RecordKey) -> OrchestratorResult<DeploymentStatus> {
        let record = self.record(key).await?;
        Ok(DeploymentStatus {
            sync: self.inner.index.sync_status(key).await,
            in_flight: self.inner.worker.is_in_flight(key).await,
            record,
        })
    }

    pub async fn records(&self, exercise_id: &str) -> Vec<DeploymentRecord> {
        self.inner.index.for_exercise(exercise_id).await
    }

    /// Last `tail` log lines of the record's container.
    pub async fn logs(&self, key: &RecordKey, tail: usize) -> OrchestratorResult<Vec<String>> {
        let record = self.record(key).await?;
        let (Some(host_id), Some(container_id)) = (&record.host_id, &record.container_id) else {
            return Err(OrchestratorError::NoContainer(key.to_string()));
        };
        let host = self.host(host_id)?;
        let api = self.connect(&host)?;
        self.call(host_id, api.container_logs(container_id, tail)).await
    }

    // ── Helpers ────────────────────────────────────────────────────

    async fn record(&self, key: &RecordKey) -> OrchestratorResult<DeploymentRecord> {
        self.inner
            .index
            .get(key)
            .await
            .ok_or_else(|| OrchestratorError::RecordNotFound(key.to_string()))
    }

    fn host(&self, host_id: &str) -> OrchestratorResult<HostNode> {
        self.inner
            .store
            .get_host(host_id)?
            .ok_or_else(|| OrchestratorError::HostNotFound(host_id.to_string()))
    }

    /// Stored asset, or a bare `any` target when the asset was never synced.
    fn target_for(&self, key: &RecordKey) -> OrchestratorResult<DeploymentTarget> {
        Ok(self
            .inner
            .store
            .get_asset(&key.asset_id)?
            .unwrap_or_else(|| DeploymentTarget::new(&key.exercise_id, &key.asset_id, &key.asset_id)))
    }

    fn connect(&self, host: &HostNode) -> OrchestratorResult<Arc<dyn HostApi>> {
        self.inner
            .discovery
            .connector()
            .connect(host)
            .map_err(|e| OrchestratorError::host(&host.id, e))
    }

    async fn call<T>(&self, host_id: &str, fut: impl Future<Output = HostApiResult<T>>) -> OrchestratorResult<T> {
        let limit = self.inner.config.host_call_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(|e| OrchestratorError::host(host_id, e)),
            Err(_) => Err(OrchestratorError::host(host_id, HostApiError::Timeout(limit))),
        }
    }
}

/// `{prefix}{exercise}-{asset}-{image}-{millis}` with unsafe characters replaced.
pub fn container_name(prefix: &str, key: &RecordKey) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let raw = format!("{prefix}{}-{}-{}-{millis}", key.exercise_id, key.asset_id, key.image_id);
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use fleet_discovery::mock::MockConnector;
    use fleet_discovery::{DiscoveryConfig, HostConnector};

    struct Fixture {
        orch: Orchestrator,
        connector: Arc<MockConnector>,
        store: StateStore,
    }

    async fn fixture(hosts: &[(&str, HostStatus)]) -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        for (i, (id, status)) in hosts.iter().enumerate() {
            let mut host = HostNode::new(*id, format!("10.0.0.{}", i + 1));
            host.status = *status;
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
        let placement = Arc::new(PlacementSelector::new(store.clone(), index.clone(), discovery.clone()));
        let config = OrchestratorConfig {
            verify_attempts: 3,
            verify_interval: Duration::from_millis(10),
            host_call_timeout: Duration::from_secs(2),
            ..OrchestratorConfig::default()
        };
        Fixture {
            orch: Orchestrator::new(store.clone(), index, discovery, placement, config),
            connector,
            store,
        }
    }

    async fn deployed(f: &Fixture, asset: &str, image: &str) -> DeploymentRecord {
        let record = f.orch.add_image("ex1", asset, image, None).await.unwrap();
        let started = f.orch.deploy(&record.key).await.unwrap();
        assert_eq!(started.state, DeploymentState::Deploying);
        assert!(f.orch.worker().wait(&record.key).await);
        f.orch.status(&record.key).await.unwrap().record
    }

    #[tokio::test]
    async fn add_image_is_idempotent() {
        let f = fixture(&[("h1", HostStatus::Active)]).await;
        let first = f.orch.add_image("ex1", "web", "nginx:1.25", Some("h1")).await.unwrap();
        let second = f.orch.add_image("ex1", "web", "nginx:1.25", None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.state, DeploymentState::Pending);
        assert_eq!(first.key.image_id, "nginx-1.25");
        let images = f.orch.images("ex1").await;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].host_id.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn deploy_stop_redeploy_keeps_host_and_endpoint() {
        let f = fixture(&[("h1", HostStatus::Active)]).await;
        let first = deployed(&f, "web", "nginx:1.25").await;

        assert_eq!(first.state, DeploymentState::Deployed);
        assert_eq!(first.host_id.as_deref(), Some("h1"));
        let endpoint = first.endpoint.clone().unwrap();
        assert_eq!((endpoint.host_port, endpoint.container_port), (8000, 80));
        assert_eq!(endpoint.address, "10.0.0.1");
        let first_id = first.container_id.clone().unwrap();
        assert!(first.container_name.as_deref().unwrap().starts_with("drill-ex1-web-nginx-1.25-"));

        let mock = f.connector.host("h1");
        let labels = mock.container(&first_id).unwrap().labels;
        assert_eq!(labels.get(LABEL_ASSET).map(String::as_str), Some("web"));

        let stopped = f.orch.stop(&first.key).await.unwrap();
        assert_eq!(stopped.state, DeploymentState::Stopped);
        assert_eq!(stopped.container_id.as_deref(), Some(first_id.as_str()));
        assert_eq!(stopped.endpoint, first.endpoint);
        assert_eq!(mock.container(&first_id).unwrap().state.as_deref(), Some("exited"));

        // Stopping again is a no-op.
        assert_eq!(f.orch.stop(&first.key).await.unwrap().state, DeploymentState::Stopped);

        f.orch.deploy(&first.key).await.unwrap();
        f.orch.worker().wait(&first.key).await;
        let again = f.orch.status(&first.key).await.unwrap();

        assert_eq!(again.record.state, DeploymentState::Deployed);
        assert_eq!(again.record.host_id.as_deref(), Some("h1"));
        assert_eq!(again.record.endpoint, first.endpoint);
        let new_id = again.record.container_id.unwrap();
        assert_ne!(new_id, first_id);
        assert_eq!(mock.container_ids(), vec![new_id]);
        assert!(!again.in_flight);
    }

    #[tokio::test]
    async fn unverified_start_fails_and_cleans_up() {
        let f = fixture(&[("h1", HostStatus::Active)]).await;
        f.connector.host("h1").set_start_exits(true);

        let record = deployed(&f, "web", "nginx:latest").await;
        assert_eq!(record.state, DeploymentState::Failed);
        assert_eq!(record.host_id.as_deref(), Some("h1"));
        assert!(record.error.unwrap().contains("exited"));
        assert!(f.connector.host("h1").container_ids().is_empty());
    }

    #[tokio::test]
    async fn no_active_host_fails_deploy() {
        let f = fixture(&[("h1", HostStatus::Unreachable)]).await;
        let record = deployed(&f, "web", "nginx:latest").await;

        assert_eq!(record.state, DeploymentState::Failed);
        assert!(record.error.unwrap().contains("no eligible host"));
        assert_eq!(f.connector.host("h1").create_calls(), 0);
    }

    #[tokio::test]
    async fn explicit_port_conflict_fails_deploy() {
        let f = fixture(&[("h1", HostStatus::Active)]).await;
        let mut asset = DeploymentTarget::new("ex1", "web", "Web");
        asset.ports = Some("8080:80".into());
        f.store.put_asset(&asset).unwrap();
        f.connector
            .host("h1")
            .add_container("other", "squatter", "httpd:2", true, Some((8080, 80)));

        let record = deployed(&f, "web", "nginx:latest").await;
        assert_eq!(record.state, DeploymentState::Failed);
        assert!(record.error.unwrap().contains("8080"));
    }

    #[tokio::test]
    async fn family_port_and_fixed_host() {
        let f = fixture(&[("h1", HostStatus::Active), ("h2", HostStatus::Active)]).await;
        let mut asset = DeploymentTarget::new("ex1", "db", "Database");
        asset.strategy = DeploymentStrategy::Fixed;
        asset.preferred_host = Some("h2".into());
        f.store.put_asset(&asset).unwrap();

        let record = deployed(&f, "db", "postgres:16").await;
        assert_eq!(record.host_id.as_deref(), Some("h2"));
        assert_eq!(record.endpoint.unwrap().container_port, 5432);
    }

    #[tokio::test]
    async fn stop_and_remove_rejected_while_deploying() {
        let f = fixture(&[("h1", HostStatus::Active)]).await;
        f.connector.host("h1").set_delay(Some(Duration::from_millis(200)));

        let record = f.orch.add_image("ex1", "web", "nginx", None).await.unwrap();
        f.orch.deploy(&record.key).await.unwrap();

        let err = f.orch.stop(&record.key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let err = f.orch.remove_completely(&record.key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let err = f.orch.deploy(&record.key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(f.orch.worker().in_flight().await, vec![record.key.clone()]);

        f.orch.worker().wait(&record.key).await;
        let done = f.orch.status(&record.key).await.unwrap();
        assert_eq!(done.record.state, DeploymentState::Deployed);
    }

    #[tokio::test]
    async fn removal_is_atomic_on_host_failure() {
        let f = fixture(&[("h1", HostStatus::Active)]).await;
        let record = deployed(&f, "web", "nginx").await;
        let mock = f.connector.host("h1");

        mock.set_fail_remove(true);
        let err = f.orch.remove_completely(&record.key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(f.orch.status(&record.key).await.is_ok());
        assert!(f.store.get_record(&record.key).unwrap().is_some());
        assert!(f.store.get_mapping(&record.key).unwrap().is_some());

        mock.set_fail_remove(false);
        f.orch.remove_completely(&record.key).await.unwrap();
        assert!(f.store.get_record(&record.key).unwrap().is_none());
        assert!(f.store.get_mapping(&record.key).unwrap().is_none());
        assert!(mock.container_ids().is_empty());
    }

    #[tokio::test]
    async fn remove_image_refused_while_deployed() {
        let f = fixture(&[("h1", HostStatus::Active)]).await;
        let record = deployed(&f, "web", "nginx").await;

        let err = f.orch.remove_image(&record.key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        f.orch.stop(&record.key).await.unwrap();
        f.orch.remove_image(&record.key).await.unwrap();
        assert!(f.orch.records("ex1").await.is_empty());
    }

    #[tokio::test]
    async fn logs_come_from_the_container() {
        let f = fixture(&[("h1", HostStatus::Active)]).await;
        let pending = f.orch.add_image("ex1", "web", "nginx", None).await.unwrap();
        let err = f.orch.logs(&pending.key, 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        f.connector.host("h1").set_logs(&["one", "two", "three"]);
        let record = deployed(&f, "web", "nginx").await;
        let lines = f.orch.logs(&record.key, 2).await.unwrap();
        assert_eq!(lines, vec!["two".to_string(), "three".to_string()]);
    }

    #[tokio::test]
    async fn interrupted_deploys_fail_on_recovery() {
        let f = fixture(&[("h1", HostStatus::Active)]).await;
        let key = RecordKey::new("ex1", "web", "nginx-latest");
        let mut stale = DeploymentRecord::pending(key.clone(), "nginx:latest", 1);
        stale.state = DeploymentState::Deploying;
        stale.deploy_started_at = Some(1);
        f.store.put_record(&stale).unwrap();

        // A fresh process sees the row as it was left.
        let index = Arc::new(DeploymentIndex::rehydrate(f.store.clone()).await.unwrap());
        let discovery = DiscoveryClient::new(
            f.store.clone(),
            f.connector.clone() as Arc<dyn HostConnector>,
            DiscoveryConfig::default(),
        );
        let placement = Arc::new(PlacementSelector::new(f.store.clone(), index.clone(), discovery.clone()));
        let orch = Orchestrator::new(f.store.clone(), index, discovery, placement, OrchestratorConfig::default());

        assert_eq!(orch.stop(&key).await.unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(orch.recover_interrupted().await.unwrap(), vec![key.clone()]);

        let failed = orch.status(&key).await.unwrap().record;
        assert_eq!(failed.state, DeploymentState::Failed);
        assert!(failed.error.unwrap().contains("interrupted"));
        assert!(orch.recover_interrupted().await.unwrap().is_empty());

        orch.remove_completely(&key).await.unwrap();
        assert!(orch.status(&key).await.is_err());
    }

    #[tokio::test]
    async fn in_flight_deploy_is_not_orphaned() {
        let f = fixture(&[("h1", HostStatus::Active)]).await;
        f.connector.host("h1").set_delay(Some(Duration::from_millis(200)));
        let record = f.orch.add_image("ex1", "web", "nginx", None).await.unwrap();
        f.orch.deploy(&record.key).await.unwrap();

        assert!(!f.orch.fail_if_orphaned(&record.key, "interrupted").await.unwrap());
        assert!(f.orch.recover_interrupted().await.unwrap().is_empty());

        f.orch.worker().wait(&record.key).await;
        let done = f.orch.status(&record.key).await.unwrap().record;
        assert_eq!(done.state, DeploymentState::Deployed);
    }

    #[tokio::test]
    async fn panicking_deploy_job_settles_as_failed() {
        let f = fixture(&[("h1", HostStatus::Active)]).await;
        f.connector.host("h1").set_panic_on_create(true);

        let record = deployed(&f, "web", "nginx").await;
        assert_eq!(record.state, DeploymentState::Failed);
        assert!(record.error.unwrap().contains("aborted"));

        f.connector.host("h1").set_panic_on_create(false);
        f.orch.deploy(&record.key).await.unwrap();
        f.orch.worker().wait(&record.key).await;
        let again = f.orch.status(&record.key).await.unwrap().record;
        assert_eq!(again.state, DeploymentState::Deployed);
    }

    #[tokio::test]
    async fn removal_refused_when_running_container_host_is_gone() {
        let f = fixture(&[("h1", HostStatus::Active)]).await;
        let record = deployed(&f, "web", "nginx").await;
        let container_id = record.container_id.clone().unwrap();

        // Rows written by an older build could still point at a deleted host.
        let mut orphan = record.clone();
        orphan.host_id = Some("gone".into());
        f.orch.index().put(orphan).await.unwrap();

        let err = f.orch.remove_completely(&record.key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(f.store.get_record(&record.key).unwrap().is_some());
        assert_eq!(f.connector.host("h1").container_ids(), vec![container_id]);
    }

    #[test]
    fn container_names_are_docker_safe() {
        let key = RecordKey::new("ex 1", "web/app", "nginx-1.25");
        let name = container_name("drill-", &key);
        assert!(name.starts_with("drill-ex-1-web-app-nginx-1.25-"));
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || "-_.".contains(c)));
    }
}
