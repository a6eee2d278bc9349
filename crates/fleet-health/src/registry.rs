//! Host registry: the set of known hosts and their probed status.
//!
//! Status is written back only by probes or explicit admin action. Probe
//! failures never surface as errors; they degrade the host's status. Hosts
//! are never removed automatically: [`HostRegistry::delete_host`] is an
//! admin operation, refused while live deployments run on the host, and
//! clears asset references first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use fleet_state::*;

use crate::error::{RegistryError, RegistryResult};
use crate::prober::{HealthTracker, Probe, classify};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub probe_timeout: Duration,
    /// Attempts per host during a batch check.
    pub retry_attempts: u32,
    /// Linear backoff unit between attempts (`unit * attempt`).
    pub retry_backoff: Duration,
    pub max_concurrency: usize,
    /// Base re-probe interval of the per-host tracker.
    pub probe_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            retry_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            max_concurrency: 8,
            probe_interval: Duration::from_secs(30),
        }
    }
}

/// Result of probing one host.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub host_id: HostId,
    pub outcome: ProbeOutcome,
    pub previous_status: HostStatus,
    pub status: HostStatus,
    pub attempts: u32,
    pub checked_at: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchHealthReport {
    pub checked: usize,
    pub healthy: usize,
    pub network_issue: usize,
    pub unreachable: usize,
    pub reports: Vec<HealthReport>,
    /// Hosts whose result could not be written back.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostDeletion {
    pub host_id: HostId,
    pub affected_assets: u32,
}

pub struct HostRegistry {
    store: StateStore,
    probe: Arc<dyn Probe>,
    config: RegistryConfig,
    /// Serializes host read-modify-write so probe write-back and admin
    /// updates do not clobber each other's fields.
    write_lock: Mutex<()>,
    trackers: Mutex<HashMap<HostId, HealthTracker>>,
}

impl HostRegistry {
    pub fn new(store: StateStore, probe: Arc<dyn Probe>, config: RegistryConfig) -> Self {
        Self {
            store,
            probe,
            config,
            write_lock: Mutex::new(()),
            trackers: Mutex::new(HashMap::new()),
        }
    }

    // ── Admin operations ───────────────────────────────────────────

    pub async fn register(&self, mut host: HostNode) -> RegistryResult<HostNode> {
        validate(&host)?;
        let _guard = self.write_lock.lock().await;
        if self.store.get_host(&host.id)?.is_some() {
            return Err(RegistryError::AlreadyExists(host.id));
        }
        if host.created_at == 0 {
            host.created_at = epoch_secs();
        }
        self.store.put_host(&host)?;
        info!(host_id = %host.id, address = %host.control_endpoint(), "host registered");
        Ok(host)
    }

    pub fn get(&self, host_id: &str) -> RegistryResult<HostNode> {
        self.store
            .get_host(host_id)?
            .ok_or_else(|| RegistryError::NotFound(host_id.to_string()))
    }

    pub fn list(&self) -> RegistryResult<Vec<HostNode>> {
        let mut hosts = self.store.list_hosts()?;
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hosts)
    }

    pub fn get_active(&self) -> RegistryResult<Vec<HostNode>> {
        Ok(self.list()?.into_iter().filter(HostNode::is_active).collect())
    }

    pub async fn update_status(&self, host_id: &str, status: HostStatus) -> RegistryResult<HostNode> {
        let _guard = self.write_lock.lock().await;
        let mut host = self.get(host_id)?;
        let previous = host.status;
        host.status = status;
        self.store.put_host(&host)?;
        info!(%host_id, %previous, %status, "host status updated");
        Ok(host)
    }

    /// Delete a host after clearing every asset reference to it.
    ///
    /// Fails with [`RegistryError::InUse`] while a `DEPLOYING` or `DEPLOYED`
    /// record points at the host.
    pub async fn delete_host(&self, host_id: &str) -> RegistryResult<HostDeletion> {
        let _guard = self.write_lock.lock().await;
        let affected = match self.store.delete_host_clearing_refs(host_id)? {
            HostRemoval::Removed { affected_assets } => affected_assets,
            HostRemoval::Missing => return Err(RegistryError::NotFound(host_id.to_string())),
            HostRemoval::InUse(keys) => {
                warn!(%host_id, live = keys.len(), "host deletion refused, live deployments remain");
                return Err(RegistryError::InUse {
                    host_id: host_id.to_string(),
                    live_records: keys.iter().map(RecordKey::to_string).collect(),
                });
            }
        };
        self.trackers.lock().await.remove(host_id);
        info!(%host_id, affected_assets = affected, "host deleted, asset references cleared");
        Ok(HostDeletion {
            host_id: host_id.to_string(),
            affected_assets: affected,
        })
    }

    // ── Probing ────────────────────────────────────────────────────

    /// Probe one host once and write back its status.
    pub async fn health_check(&self, host_id: &str) -> RegistryResult<bool> {
        Ok(self.probe_host(host_id).await?.outcome.is_healthy())
    }

    /// Like [`Self::health_check`] but returns the full report.
    pub async fn probe_host(&self, host_id: &str) -> RegistryResult<HealthReport> {
        let host = self.get(host_id)?;
        self.probe_and_record(host, 1).await
    }

    /// Probe every registered host (with retries) and write back status.
    pub async fn batch_health_check(self: &Arc<Self>) -> RegistryResult<BatchHealthReport> {
        let hosts = self.list()?;
        Ok(self.probe_many(hosts).await)
    }

    /// Like [`Self::batch_health_check`] but skips hosts still in backoff.
    pub async fn batch_health_check_due(self: &Arc<Self>) -> RegistryResult<BatchHealthReport> {
        let now = epoch_secs();
        let trackers = self.trackers.lock().await;
        let hosts: Vec<_> = self
            .list()?
            .into_iter()
            .filter(|h| trackers.get(&h.id).is_none_or(|t| t.is_due(now)))
            .collect();
        drop(trackers);
        Ok(self.probe_many(hosts).await)
    }

    async fn probe_many(self: &Arc<Self>, hosts: Vec<HostNode>) -> BatchHealthReport {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let attempts = self.config.retry_attempts.max(1);
        let mut tasks = JoinSet::new();
        for host in hosts {
            let registry = Arc::clone(self);
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let host_id = host.id.clone();
                (host_id, registry.probe_and_record(host, attempts).await)
            });
        }

        let mut batch = BatchHealthReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => {
                    match report.outcome {
                        ProbeOutcome::Success => batch.healthy += 1,
                        ProbeOutcome::NetworkIssue => batch.network_issue += 1,
                        ProbeOutcome::Unreachable => batch.unreachable += 1,
                    }
                    batch.reports.push(report);
                }
                Ok((host_id, Err(e))) => {
                    warn!(%host_id, error = %e, "health write-back failed");
                    batch.errors.push(format!("{host_id}: {e}"));
                }
                Err(e) => batch.errors.push(format!("probe task failed: {e}")),
            }
        }
        batch.checked = batch.reports.len();
        batch.reports.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        info!(
            checked = batch.checked,
            healthy = batch.healthy,
            network_issue = batch.network_issue,
            unreachable = batch.unreachable,
            "batch health check complete"
        );
        batch
    }

    async fn probe_and_record(&self, host: HostNode, attempts: u32) -> RegistryResult<HealthReport> {
        let mut outcome = ProbeOutcome::Unreachable;
        let mut used = 0;
        for attempt in 1..=attempts {
            used = attempt;
            outcome = classify(self.probe.as_ref(), &host, self.config.probe_timeout).await;
            if outcome.is_healthy() {
                break;
            }
            if attempt < attempts {
                debug!(host_id = %host.id, attempt, ?outcome, "probe failed, retrying");
                tokio::time::sleep(self.config.retry_backoff * attempt).await;
            }
        }

        let now = epoch_secs();
        self.trackers
            .lock()
            .await
            .entry(host.id.clone())
            .or_insert_with(|| HealthTracker::new(self.config.probe_interval))
            .record(outcome, now);

        self.write_back(&host.id, outcome, now, used).await
    }

    async fn write_back(
        &self,
        host_id: &str,
        outcome: ProbeOutcome,
        now: u64,
        attempts: u32,
    ) -> RegistryResult<HealthReport> {
        let _guard = self.write_lock.lock().await;
        // Re-read: the host may have been updated or deleted while probing.
        let mut host = self.get(host_id)?;
        let previous_status = host.status;
        if host.status != HostStatus::Maintenance {
            host.status = outcome.host_status();
        }
        host.last_health_check = Some(now);
        host.last_probe = Some(outcome);
        self.store.put_host(&host)?;

        if previous_status != host.status {
            warn!(%host_id, %previous_status, status = %host.status, ?outcome, "host status changed");
        } else {
            debug!(%host_id, status = %host.status, ?outcome, "host probed");
        }

        Ok(HealthReport {
            host_id: host.id,
            outcome,
            previous_status,
            status: host.status,
            attempts,
            checked_at: now,
        })
    }

    pub async fn consecutive_failures(&self, host_id: &str) -> u32 {
        self.trackers
            .lock()
            .await
            .get(host_id)
            .map(HealthTracker::consecutive_failures)
            .unwrap_or(0)
    }
}

fn validate(host: &HostNode) -> RegistryResult<()> {
    if host.id.trim().is_empty() {
        return Err(RegistryError::Invalid("id must not be empty".into()));
    }
    if host.address.trim().is_empty() {
        return Err(RegistryError::Invalid("address must not be empty".into()));
    }
    if host.control_port == 0 {
        return Err(RegistryError::Invalid("control port must be non-zero".into()));
    }
    if host.max_containers == 0 {
        return Err(RegistryError::Invalid("max_containers must be positive".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Per-host scripted probe: hosts in `api_down` answer TCP only, hosts in
    /// `down` answer nothing; `flaky` hosts fail the first attempt.
    #[derive(Default)]
    struct ScriptedProbe {
        down: StdMutex<HashSet<String>>,
        api_down: StdMutex<HashSet<String>>,
        flaky: StdMutex<HashSet<String>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn tcp_reachable(&self, host: &HostNode, _: Duration) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.flaky.lock().unwrap().remove(&host.id) {
                return false;
            }
            !self.down.lock().unwrap().contains(&host.id)
        }
        async fn api_healthy(&self, host: &HostNode, _: Duration) -> bool {
            !self.api_down.lock().unwrap().contains(&host.id)
        }
    }

    fn registry(probe: Arc<ScriptedProbe>) -> (StateStore, Arc<HostRegistry>) {
        let store = StateStore::open_in_memory().unwrap();
        let config = RegistryConfig {
            probe_timeout: Duration::from_millis(50),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(1),
            max_concurrency: 2,
            probe_interval: Duration::from_secs(30),
        };
        (store.clone(), Arc::new(HostRegistry::new(store, probe, config)))
    }

    #[tokio::test]
    async fn register_validates_and_rejects_duplicates() {
        let (_store, reg) = registry(Arc::new(ScriptedProbe::default()));
        let host = reg.register(HostNode::new("h1", "10.0.0.1")).await.unwrap();
        assert!(host.created_at > 0);

        let dup = reg.register(HostNode::new("h1", "10.0.0.9")).await;
        assert!(matches!(dup, Err(RegistryError::AlreadyExists(_))));

        let mut bad = HostNode::new("h2", "10.0.0.2");
        bad.max_containers = 0;
        assert!(matches!(reg.register(bad).await, Err(RegistryError::Invalid(_))));
        assert!(matches!(
            reg.register(HostNode::new("h3", " ")).await,
            Err(RegistryError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn get_active_filters_by_status() {
        let (_store, reg) = registry(Arc::new(ScriptedProbe::default()));
        for id in ["h1", "h2", "h3"] {
            reg.register(HostNode::new(id, "10.0.0.1")).await.unwrap();
        }
        reg.update_status("h2", HostStatus::Maintenance).await.unwrap();

        let active: Vec<_> = reg.get_active().unwrap().into_iter().map(|h| h.id).collect();
        assert_eq!(active, vec!["h1", "h3"]);
        assert!(matches!(
            reg.update_status("ghost", HostStatus::Active).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn health_check_writes_back_status() {
        let probe = Arc::new(ScriptedProbe::default());
        let (store, reg) = registry(probe.clone());
        reg.register(HostNode::new("h1", "10.0.0.1")).await.unwrap();

        assert!(reg.health_check("h1").await.unwrap());
        let host = store.get_host("h1").unwrap().unwrap();
        assert_eq!(host.last_probe, Some(ProbeOutcome::Success));
        assert!(host.last_health_check.is_some());

        probe.api_down.lock().unwrap().insert("h1".into());
        assert!(!reg.health_check("h1").await.unwrap());
        assert_eq!(store.get_host("h1").unwrap().unwrap().status, HostStatus::Inactive);

        probe.down.lock().unwrap().insert("h1".into());
        assert!(!reg.health_check("h1").await.unwrap());
        assert_eq!(store.get_host("h1").unwrap().unwrap().status, HostStatus::Unreachable);
        assert_eq!(reg.consecutive_failures("h1").await, 2);
    }

    #[tokio::test]
    async fn maintenance_status_survives_probes() {
        let probe = Arc::new(ScriptedProbe::default());
        let (store, reg) = registry(probe.clone());
        reg.register(HostNode::new("h1", "10.0.0.1")).await.unwrap();
        reg.update_status("h1", HostStatus::Maintenance).await.unwrap();
        probe.down.lock().unwrap().insert("h1".into());

        reg.health_check("h1").await.unwrap();
        let host = store.get_host("h1").unwrap().unwrap();
        assert_eq!(host.status, HostStatus::Maintenance);
        assert_eq!(host.last_probe, Some(ProbeOutcome::Unreachable));
    }

    #[tokio::test]
    async fn batch_check_classifies_and_never_removes() {
        let probe = Arc::new(ScriptedProbe::default());
        let (store, reg) = registry(probe.clone());
        for id in ["h1", "h2", "h3", "h4"] {
            reg.register(HostNode::new(id, "10.0.0.1")).await.unwrap();
        }
        probe.api_down.lock().unwrap().insert("h2".into());
        probe.down.lock().unwrap().insert("h3".into());
        probe.flaky.lock().unwrap().insert("h4".into());

        let batch = reg.batch_health_check().await.unwrap();
        assert_eq!(batch.checked, 4);
        assert_eq!(batch.healthy, 2);
        assert_eq!(batch.network_issue, 1);
        assert_eq!(batch.unreachable, 1);

        let h3 = batch.reports.iter().find(|r| r.host_id == "h3").unwrap();
        assert_eq!(h3.attempts, 3);
        let h4 = batch.reports.iter().find(|r| r.host_id == "h4").unwrap();
        assert_eq!(h4.attempts, 2);
        assert_eq!(h4.status, HostStatus::Active);

        assert_eq!(store.list_hosts().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn due_batch_skips_hosts_in_backoff() {
        let probe = Arc::new(ScriptedProbe::default());
        let (_store, reg) = registry(probe.clone());
        reg.register(HostNode::new("h1", "10.0.0.1")).await.unwrap();

        assert_eq!(reg.batch_health_check_due().await.unwrap().checked, 1);
        // Just probed: next probe is 30s away.
        assert_eq!(reg.batch_health_check_due().await.unwrap().checked, 0);
        assert_eq!(reg.batch_health_check().await.unwrap().checked, 1);
    }

    #[tokio::test]
    async fn deleting_host_clears_three_asset_references() {
        let (store, reg) = registry(Arc::new(ScriptedProbe::default()));
        reg.register(HostNode::new("h1", "10.0.0.1")).await.unwrap();
        for id in ["a1", "a2", "a3"] {
            let mut asset = DeploymentTarget::new("r1", id, id);
            asset.preferred_host = Some("h1".into());
            asset.strategy = DeploymentStrategy::Fixed;
            store.put_asset(&asset).unwrap();
        }

        let deletion = reg.delete_host("h1").await.unwrap();
        assert_eq!(deletion.affected_assets, 3);
        for asset in store.list_assets().unwrap() {
            assert!(asset.preferred_host.is_none());
            assert_eq!(asset.strategy, DeploymentStrategy::Any);
        }
        assert!(matches!(reg.delete_host("h1").await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn deleting_host_with_live_deployment_is_refused() {
        let (store, reg) = registry(Arc::new(ScriptedProbe::default()));
        reg.register(HostNode::new("h1", "10.0.0.1")).await.unwrap();
        let key = RecordKey::new("r1", "web", "nginx-latest");
        let mut record = DeploymentRecord::pending(key.clone(), "nginx:latest", 1);
        record.state = DeploymentState::Deployed;
        record.host_id = Some("h1".into());
        record.container_id = Some("c1".into());
        store.put_record(&record).unwrap();

        match reg.delete_host("h1").await {
            Err(RegistryError::InUse { host_id, live_records }) => {
                assert_eq!(host_id, "h1");
                assert_eq!(live_records, vec![key.to_string()]);
            }
            other => panic!("expected InUse, got {other:?}"),
        }
        assert!(reg.get("h1").is_ok());
    }
}
