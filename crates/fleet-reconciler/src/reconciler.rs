//! Drift detection between deployment records and the containers hosts
//! report.
//!
//! [`Reconciler::run_once`] covers every record. [`Reconciler::reconcile_key`]
//! and [`Reconciler::reconcile_asset`] are forced passes over a subset: sync
//! counters are reset first, then the subset is checked against a fresh
//! listing. All of them share one running flag, so passes never overlap.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};

use fleet_discovery::{ContainerInfo, DiscoveryClient, FleetSnapshot, HostFailure};
use fleet_orchestrator::Orchestrator;
use fleet_state::*;

use crate::error::{ReconcileError, ReconcileResult};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    /// Sync failures before a record is marked `FAILED`; also the number of
    /// failed loop iterations before periodic runs are suspended.
    pub max_consecutive_failures: u32,
    /// Age after which sync rows of failed records are purged.
    pub retention: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_consecutive_failures: 5,
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncAlert {
    pub key: RecordKey,
    pub host_id: Option<HostId>,
    pub consecutive_failures: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub started_at: u64,
    pub duration_ms: u64,
    pub hosts_checked: usize,
    pub host_failures: Vec<HostFailure>,
    pub records_checked: usize,
    pub synced: usize,
    pub needs_reconciliation: usize,
    /// Records skipped because their host could not be queried.
    pub skipped: usize,
    pub alerts: Vec<SyncAlert>,
    /// Records created for labeled containers nobody knew about.
    pub adopted: Vec<RecordKey>,
    /// Idle records updated from an observed container.
    pub refreshed: Vec<RecordKey>,
    /// Deployed records moved to the container now running for their key.
    pub repointed: Vec<RecordKey>,
    /// `DEPLOYING` records with no deploy job behind them, now `FAILED`.
    pub interrupted: Vec<RecordKey>,
    pub purged: usize,
}

#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    Completed(ReconcileReport),
    /// Another run was in progress; nothing was done.
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcilerStatus {
    pub running: bool,
    pub runs: u64,
    pub loop_failures: u32,
    pub suspended: bool,
    pub last_report: Option<ReconcileReport>,
}

/// Aggregate view over sync rows and record states.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SyncStatistics {
    /// Records with a sync row.
    pub tracked: usize,
    pub synced: usize,
    pub needs_reconciliation: usize,
    pub failed: usize,
    pub total_consecutive_failures: u64,
    /// `DEPLOYED` records never checked yet.
    pub unchecked: usize,
    pub records_by_state: BTreeMap<String, usize>,
}

/// One record with its sync row, if any.
#[derive(Debug, Clone, Serialize)]
pub struct RecordSync {
    pub key: RecordKey,
    pub state: DeploymentState,
    pub host_id: Option<HostId>,
    pub sync: Option<SyncStatus>,
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Records a pass looks at.
enum Scope {
    All,
    Only(HashSet<RecordKey>),
}

impl Scope {
    fn covers(&self, key: &RecordKey) -> bool {
        match self {
            Scope::All => true,
            Scope::Only(keys) => keys.contains(key),
        }
    }
}

type Observed<'a> = HashMap<RecordKey, (&'a HostNode, &'a ContainerInfo)>;

pub struct Reconciler {
    store: StateStore,
    index: Arc<DeploymentIndex>,
    discovery: DiscoveryClient,
    orchestrator: Orchestrator,
    config: ReconcilerConfig,
    running: AtomicBool,
    runs: AtomicU64,
    loop_failures: AtomicU32,
    last_report: RwLock<Option<ReconcileReport>>,
}

impl Reconciler {
    /// `orchestrator` tells which `DEPLOYING` records still have a job
    /// behind them.
    pub fn new(
        store: StateStore,
        index: Arc<DeploymentIndex>,
        discovery: DiscoveryClient,
        orchestrator: Orchestrator,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            index,
            discovery,
            orchestrator,
            config,
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            loop_failures: AtomicU32::new(0),
            last_report: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_suspended(&self) -> bool {
        self.loop_failures.load(Ordering::Acquire) >= self.config.max_consecutive_failures
    }

    pub async fn status(&self) -> ReconcilerStatus {
        ReconcilerStatus {
            running: self.is_running(),
            runs: self.runs.load(Ordering::Acquire),
            loop_failures: self.loop_failures.load(Ordering::Acquire),
            suspended: self.is_suspended(),
            last_report: self.last_report.read().await.clone(),
        }
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(&self.running))
    }

    /// Run one pass unless one is already in progress.
    pub async fn run_once(&self) -> ReconcileResult<TriggerOutcome> {
        let Some(_guard) = self.try_begin() else {
            info!("reconciliation already running, trigger ignored");
            return Ok(TriggerOutcome::AlreadyRunning);
        };

        let report = self.reconcile(&Scope::All).await?;
        self.runs.fetch_add(1, Ordering::AcqRel);
        *self.last_report.write().await = Some(report.clone());
        Ok(TriggerOutcome::Completed(report))
    }

    /// Forced pass over a single record.
    pub async fn reconcile_key(&self, key: &RecordKey) -> ReconcileResult<TriggerOutcome> {
        if self.index.get(key).await.is_none() {
            return Err(ReconcileError::NotFound(key.to_string()));
        }
        self.forced(HashSet::from([key.clone()])).await
    }

    /// Forced pass over every record of `asset_id`, whatever the exercise.
    pub async fn reconcile_asset(&self, asset_id: &str) -> ReconcileResult<TriggerOutcome> {
        let keys: HashSet<RecordKey> = self
            .index
            .all()
            .await
            .into_iter()
            .filter(|r| r.key.asset_id == asset_id)
            .map(|r| r.key)
            .collect();
        if keys.is_empty() {
            return Err(ReconcileError::NotFound(format!("asset {asset_id}")));
        }
        self.forced(keys).await
    }

    async fn forced(&self, keys: HashSet<RecordKey>) -> ReconcileResult<TriggerOutcome> {
        let Some(_guard) = self.try_begin() else {
            info!(records = keys.len(), "reconciliation already running, forced sync ignored");
            return Ok(TriggerOutcome::AlreadyRunning);
        };

        for key in &keys {
            if self.index.sync_status(key).await.is_some() {
                self.clear_sync(key).await?;
            }
        }
        let report = self.reconcile(&Scope::Only(keys)).await?;
        Ok(TriggerOutcome::Completed(report))
    }

    async fn reconcile(&self, scope: &Scope) -> ReconcileResult<ReconcileReport> {
        let clock = Instant::now();
        let now = epoch_secs();
        let mut report = ReconcileReport {
            started_at: now,
            ..ReconcileReport::default()
        };

        let hosts: HashMap<HostId, HostNode> = self
            .store
            .list_hosts()?
            .into_iter()
            .map(|h| (h.id.clone(), h))
            .collect();
        // Taken before listing: a DEPLOYING record seen here that still has
        // no job after the listing is not one that is just being queued.
        let records: Vec<DeploymentRecord> = self
            .index
            .all()
            .await
            .into_iter()
            .filter(|r| scope.covers(&r.key))
            .collect();

        let referenced: BTreeSet<&str> = records
            .iter()
            .filter(|r| r.state == DeploymentState::Deployed)
            .filter_map(|r| r.host_id.as_deref())
            .collect();
        let mut targets: Vec<HostNode> = hosts
            .values()
            .filter(|h| h.is_active() || referenced.contains(h.id.as_str()))
            .cloned()
            .collect();
        targets.sort_by(|a, b| a.id.cmp(&b.id));

        let snapshot = self.discovery.containers_across(&targets, true).await;
        report.hosts_checked = targets.len();
        report.host_failures = snapshot.failures.clone();
        let observed = observed_containers(&hosts, &snapshot, scope);

        // Forward drift: deployed records against what the hosts report.
        for record in records.iter().filter(|r| r.state == DeploymentState::Deployed) {
            self.check_deployed(record, &snapshot, &observed, now, &mut report)
                .await?;
        }

        for record in records.iter().filter(|r| r.state == DeploymentState::Deploying) {
            self.settle_orphan(record, &observed, now, &mut report).await?;
        }

        // Reverse drift: labeled containers the index does not reflect.
        let mut keys: Vec<&RecordKey> = observed.keys().collect();
        keys.sort();
        for key in keys {
            let (host, container) = observed[key];
            self.absorb(host, container, key.clone(), now, &mut report).await?;
        }

        if matches!(scope, Scope::All) {
            report.purged = self.purge(now, self.config.retention).await?;
        }
        report.duration_ms = clock.elapsed().as_millis() as u64;

        info!(
            forced = !matches!(scope, Scope::All),
            hosts = report.hosts_checked,
            host_failures = report.host_failures.len(),
            records = report.records_checked,
            synced = report.synced,
            drifted = report.needs_reconciliation,
            alerts = report.alerts.len(),
            adopted = report.adopted.len(),
            repointed = report.repointed.len(),
            interrupted = report.interrupted.len(),
            purged = report.purged,
            duration_ms = report.duration_ms,
            "reconciliation complete"
        );
        Ok(report)
    }

    async fn check_deployed(
        &self,
        record: &DeploymentRecord,
        snapshot: &FleetSnapshot<Vec<ContainerInfo>>,
        observed: &Observed<'_>,
        now: u64,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<()> {
        // A stop or redeploy may have landed while hosts were listed.
        let Some(current) = self.index.get(&record.key).await else {
            return Ok(());
        };
        if current.state != DeploymentState::Deployed || current.container_id != record.container_id {
            debug!(key = %record.key, state = %current.state, "record changed during pass, not checked");
            return Ok(());
        }

        report.records_checked += 1;
        let problem = match current.host_id.as_deref() {
            None => Some("no host recorded".to_string()),
            Some(host_id) if snapshot.failed(host_id) => {
                report.skipped += 1;
                return Ok(());
            }
            Some(host_id) => match snapshot.per_host.get(host_id) {
                None => Some(format!("host {host_id} no longer registered")),
                Some(containers) => container_problem(&current, containers),
            },
        };

        if problem.is_some() && !listed_anywhere(&current, snapshot) {
            if let Some(&(host, container)) = observed.get(&current.key) {
                if container.is_running() {
                    return self.repoint(&current, host, container, now, report).await;
                }
            }
        }
        self.record_sync(&current, problem, now, report).await
    }

    async fn repoint(
        &self,
        record: &DeploymentRecord,
        host: &HostNode,
        container: &ContainerInfo,
        now: u64,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<()> {
        let endpoint = endpoint_of(host, container);
        let mut moved = false;
        self.index
            .update_record(&record.key, |r| -> ReconcileResult<()> {
                if r.state != DeploymentState::Deployed || r.container_id != record.container_id {
                    return Ok(());
                }
                r.host_id = Some(host.id.clone());
                r.container_id = Some(container.id.clone());
                r.container_name = Some(container.name.clone());
                r.endpoint = endpoint;
                r.error = None;
                moved = true;
                Ok(())
            })
            .await?;
        if !moved {
            return Ok(());
        }

        self.index
            .update_sync_status(&record.key, |s| {
                s.state = SyncState::Synced;
                s.consecutive_failures = 0;
                s.last_error = None;
                s.last_checked_at = now;
            })
            .await?;
        info!(
            key = %record.key,
            from = record.container_id.as_deref().unwrap_or("-"),
            to = container.short_id(),
            host = %host.id,
            "record re-pointed to running container"
        );
        report.synced += 1;
        report.repointed.push(record.key.clone());
        Ok(())
    }

    /// A `DEPLOYING` record whose job is gone either converges on the
    /// running container observed for it, or fails.
    async fn settle_orphan(
        &self,
        record: &DeploymentRecord,
        observed: &Observed<'_>,
        now: u64,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<()> {
        if self.orchestrator.worker().is_in_flight(&record.key).await {
            return Ok(());
        }

        match observed.get(&record.key) {
            Some(&(host, container)) if container.is_running() => {
                let mut changed = false;
                self.index
                    .update_record(&record.key, |r| -> ReconcileResult<()> {
                        if r.state != DeploymentState::Deploying {
                            return Ok(());
                        }
                        apply_observed(r, host, container, DeploymentState::Deployed, now);
                        changed = true;
                        Ok(())
                    })
                    .await?;
                if changed {
                    info!(key = %record.key, host = %host.id, container = container.short_id(), "orphaned deploy converged on running container");
                    report.refreshed.push(record.key.clone());
                }
            }
            _ => {
                if self
                    .orchestrator
                    .fail_if_orphaned(&record.key, "deploy interrupted before completion")
                    .await?
                {
                    report.interrupted.push(record.key.clone());
                }
            }
        }
        Ok(())
    }

    async fn record_sync(
        &self,
        record: &DeploymentRecord,
        problem: Option<String>,
        now: u64,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<()> {
        let max = self.config.max_consecutive_failures;
        let status = self
            .index
            .update_sync_status(&record.key, |s| {
                s.last_checked_at = now;
                match &problem {
                    None => {
                        s.state = SyncState::Synced;
                        s.consecutive_failures = 0;
                        s.last_error = None;
                    }
                    Some(reason) => {
                        s.consecutive_failures += 1;
                        s.last_error = Some(reason.clone());
                        s.state = if s.consecutive_failures >= max {
                            SyncState::Failed
                        } else {
                            SyncState::NeedsReconciliation
                        };
                    }
                }
            })
            .await?;

        match problem {
            None => report.synced += 1,
            Some(reason) => {
                report.needs_reconciliation += 1;
                debug!(key = %record.key, %reason, failures = status.consecutive_failures, "record drifted");
                if status.consecutive_failures == max {
                    warn!(key = %record.key, %reason, "record marked failed after repeated drift");
                    report.alerts.push(SyncAlert {
                        key: record.key.clone(),
                        host_id: record.host_id.clone(),
                        consecutive_failures: status.consecutive_failures,
                        message: format!("{} failed {max} consecutive checks: {reason}", record.key),
                    });
                }
            }
        }
        Ok(())
    }

    async fn absorb(
        &self,
        host: &HostNode,
        container: &ContainerInfo,
        key: RecordKey,
        now: u64,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<()> {
        let observed = if container.is_running() {
            DeploymentState::Deployed
        } else {
            DeploymentState::Stopped
        };

        let Some(existing) = self.index.get(&key).await else {
            let mut record = DeploymentRecord::pending(key.clone(), container.image.clone(), now);
            record.origin = RecordOrigin::Discovered;
            apply_observed(&mut record, host, container, observed, now);
            if observed != DeploymentState::Deployed {
                record.stopped_at = Some(now);
            }

            if self.index.mapping(&key).await.is_none() {
                let (image_name, image_tag) = split_image_ref(&container.image);
                self.index
                    .put_mapping(ImageMapping {
                        key: key.clone(),
                        image_name,
                        image_tag,
                        host_id: Some(host.id.clone()),
                        added_at: now,
                    })
                    .await?;
            }
            self.index.put(record).await?;
            info!(%key, host = %host.id, container = container.short_id(), "adopted unrecorded container");
            report.adopted.push(key);
            return Ok(());
        };

        if existing.state.is_active() {
            return Ok(());
        }
        if existing.state == observed
            && existing.container_id.as_deref() == Some(container.id.as_str())
            && existing.host_id.as_deref() == Some(host.id.as_str())
        {
            return Ok(());
        }

        self.index
            .update_record(&key, |r| -> ReconcileResult<()> {
                if r.state.is_active() {
                    return Ok(());
                }
                let endpoint = r.endpoint.take();
                apply_observed(r, host, container, observed, now);
                if r.endpoint.is_none() {
                    r.endpoint = endpoint;
                }
                Ok(())
            })
            .await?;
        info!(%key, host = %host.id, state = ?observed, "record refreshed from host");
        report.refreshed.push(key);
        Ok(())
    }

    /// Drop sync rows of records `FAILED` for longer than `age`, and of
    /// records that no longer exist.
    pub async fn purge_older_than(&self, age: Duration) -> ReconcileResult<usize> {
        let purged = self.purge(epoch_secs(), age).await?;
        info!(purged, age_secs = age.as_secs(), "sync status cleanup");
        Ok(purged)
    }

    async fn purge(&self, now: u64, age: Duration) -> ReconcileResult<usize> {
        let age = age.as_secs();
        let mut purged = 0;
        for status in self.index.all_sync_status().await {
            let stale = match self.index.get(&status.key).await {
                None => true,
                Some(r) => r.state == DeploymentState::Failed && r.updated_at.saturating_add(age) < now,
            };
            if stale && self.index.remove_sync_status(&status.key).await? {
                debug!(key = %status.key, "sync status purged");
                purged += 1;
            }
        }
        Ok(purged)
    }

    pub async fn statistics(&self) -> SyncStatistics {
        let mut stats = SyncStatistics::default();
        let rows = self.index.all_sync_status().await;
        let tracked: HashSet<&RecordKey> = rows.iter().map(|s| &s.key).collect();
        for status in &rows {
            match status.state {
                SyncState::Synced => stats.synced += 1,
                SyncState::NeedsReconciliation => stats.needs_reconciliation += 1,
                SyncState::Failed => stats.failed += 1,
            }
            stats.total_consecutive_failures += u64::from(status.consecutive_failures);
        }
        stats.tracked = rows.len();

        for record in self.index.all().await {
            *stats.records_by_state.entry(record.state.to_string()).or_default() += 1;
            if record.state == DeploymentState::Deployed && !tracked.contains(&record.key) {
                stats.unchecked += 1;
            }
        }
        stats
    }

    pub async fn sync_states_for_asset(&self, asset_id: &str) -> Vec<RecordSync> {
        self.sync_states_where(|r| r.key.asset_id == asset_id).await
    }

    pub async fn sync_states_for_host(&self, host_id: &str) -> Vec<RecordSync> {
        self.sync_states_where(|r| r.host_id.as_deref() == Some(host_id)).await
    }

    async fn sync_states_where(&self, keep: impl Fn(&DeploymentRecord) -> bool) -> Vec<RecordSync> {
        let mut out = Vec::new();
        for record in self.index.all().await.into_iter().filter(|r| keep(r)) {
            let sync = self.index.sync_status(&record.key).await;
            out.push(RecordSync {
                key: record.key,
                state: record.state,
                host_id: record.host_id,
                sync,
            });
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    async fn clear_sync(&self, key: &RecordKey) -> ReconcileResult<()> {
        self.index
            .update_sync_status(key, |s| {
                s.state = SyncState::Synced;
                s.consecutive_failures = 0;
                s.last_error = None;
            })
            .await?;
        Ok(())
    }

    /// Reset drift counters for one record, or for all when `key` is `None`.
    pub async fn reset_failures(&self, key: Option<&RecordKey>) -> ReconcileResult<usize> {
        let keys: Vec<RecordKey> = match key {
            Some(key) => {
                if self.index.get(key).await.is_none() {
                    return Err(ReconcileError::NotFound(key.to_string()));
                }
                vec![key.clone()]
            }
            None => self.index.all_sync_status().await.into_iter().map(|s| s.key).collect(),
        };

        for key in &keys {
            self.clear_sync(key).await?;
        }
        info!(count = keys.len(), "sync failures reset");
        Ok(keys.len())
    }

    /// Resume periodic runs after they were suspended.
    pub fn reset_loop_failures(&self) {
        self.loop_failures.store(0, Ordering::Release);
        info!("reconciler loop failures reset");
    }

    fn note_loop_result(&self, result: &ReconcileResult<TriggerOutcome>) {
        match result {
            Ok(TriggerOutcome::Completed(_)) => self.loop_failures.store(0, Ordering::Release),
            Ok(TriggerOutcome::AlreadyRunning) => debug!("periodic run skipped, manual run in progress"),
            Err(e) => {
                let failures = self.loop_failures.fetch_add(1, Ordering::AcqRel) + 1;
                error!(error = %e, failures, "reconciliation run failed");
                if failures >= self.config.max_consecutive_failures {
                    warn!(failures, "periodic reconciliation suspended until reset");
                }
            }
        }
    }

    /// Periodic loop; exits when `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.config.interval.as_secs(), "reconciler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    if self.is_suspended() {
                        debug!("reconciler suspended, skipping run");
                        continue;
                    }
                    let result = self.run_once().await;
                    self.note_loop_result(&result);
                    if matches!(result, Ok(TriggerOutcome::Completed(_))) {
                        let stats = self.statistics().await;
                        debug!(
                            tracked = stats.tracked,
                            drifted = stats.needs_reconciliation,
                            failed = stats.failed,
                            unchecked = stats.unchecked,
                            "sync statistics"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!("reconciler shutting down");
                    break;
                }
            }
        }
    }
}

/// Labeled containers per record key; a running one wins over stopped ones.
fn observed_containers<'a>(
    hosts: &'a HashMap<HostId, HostNode>,
    snapshot: &'a FleetSnapshot<Vec<ContainerInfo>>,
    scope: &Scope,
) -> Observed<'a> {
    let mut observed: Observed<'a> = HashMap::new();
    for (host_id, containers) in &snapshot.per_host {
        let Some(host) = hosts.get(host_id) else { continue };
        for container in containers {
            let Some(key) = container.record_key() else { continue };
            if !scope.covers(&key) {
                continue;
            }
            match observed.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert((host, container));
                }
                Entry::Occupied(mut slot) => {
                    if container.is_running() && !slot.get().1.is_running() {
                        slot.insert((host, container));
                    }
                }
            }
        }
    }
    observed
}

fn listed_anywhere(record: &DeploymentRecord, snapshot: &FleetSnapshot<Vec<ContainerInfo>>) -> bool {
    let Some(container_id) = record.container_id.as_deref() else {
        return false;
    };
    snapshot.per_host.values().flatten().any(|c| c.id == container_id)
}

fn endpoint_of(host: &HostNode, container: &ContainerInfo) -> Option<Endpoint> {
    container
        .ports
        .iter()
        .find_map(|p| p.host_port.map(|hp| (hp, p.container_port)))
        .map(|(host_port, container_port)| Endpoint {
            address: host.address.clone(),
            host_port,
            container_port,
        })
}

fn apply_observed(
    r: &mut DeploymentRecord,
    host: &HostNode,
    container: &ContainerInfo,
    state: DeploymentState,
    now: u64,
) {
    r.state = state;
    r.host_id = Some(host.id.clone());
    r.container_id = Some(container.id.clone());
    r.container_name = Some(container.name.clone());
    r.endpoint = endpoint_of(host, container);
    r.error = None;
    if state == DeploymentState::Deployed {
        r.deployed_at = Some(now);
    }
}

fn container_problem(record: &DeploymentRecord, containers: &[ContainerInfo]) -> Option<String> {
    let Some(container_id) = record.container_id.as_deref() else {
        return Some("no container recorded".to_string());
    };
    match containers.iter().find(|c| c.id == container_id) {
        Some(c) if c.is_running() => None,
        Some(c) => Some(format!("container {} is {}", c.short_id(), c.raw_state)),
        None => Some(format!("container {container_id} missing on host")),
    }
}
