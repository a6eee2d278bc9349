//! Scripted in-memory hosts.
//!
//! [`MockConnector`] hands out one [`MockHost`] per host id. Each mock keeps
//! a container table that create/start/stop/remove mutate the way a Docker
//! engine would, and exposes switches to simulate an offline host, a slow
//! host, containers that exit right after start, failing stop/remove and a
//! client that panics mid-create.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use fleet_state::HostNode;

use crate::api::*;
use crate::error::{HostApiError, HostApiResult};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MockConnector {
    hosts: Mutex<HashMap<String, Arc<MockHost>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mock behind `host_id`, created on first use.
    pub fn host(&self, host_id: &str) -> Arc<MockHost> {
        lock(&self.hosts)
            .entry(host_id.to_string())
            .or_insert_with(|| Arc::new(MockHost::default()))
            .clone()
    }
}

impl HostConnector for MockConnector {
    fn connect(&self, host: &HostNode) -> HostApiResult<Arc<dyn HostApi>> {
        Ok(self.host(&host.id))
    }
}

#[derive(Default)]
pub struct MockHost {
    containers: Mutex<Vec<RawContainer>>,
    images: Mutex<Vec<RawImage>>,
    logs: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
    offline: AtomicBool,
    start_exits: AtomicBool,
    fail_stop: AtomicBool,
    fail_remove: AtomicBool,
    panic_on_create: AtomicBool,
    next_id: AtomicU64,
    list_calls: AtomicUsize,
    create_calls: AtomicUsize,
}

impl MockHost {
    /// Every call fails with a transport error while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every call sleeps this long before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    /// Started containers immediately exit with code 1.
    pub fn set_start_exits(&self, exits: bool) {
        self.start_exits.store(exits, Ordering::SeqCst);
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    /// `create_container` panics instead of answering.
    pub fn set_panic_on_create(&self, panic: bool) {
        self.panic_on_create.store(panic, Ordering::SeqCst);
    }

    pub fn set_logs(&self, lines: &[&str]) {
        *lock(&self.logs) = lines.iter().map(|l| l.to_string()).collect();
    }

    pub fn add_raw_container(&self, container: RawContainer) {
        lock(&self.containers).push(container);
    }

    /// Add a container, optionally publishing `host_port → container_port`.
    pub fn add_container(
        &self,
        id: &str,
        name: &str,
        image: &str,
        running: bool,
        port: Option<(u16, u16)>,
    ) {
        self.add_raw_container(RawContainer {
            id: Some(id.to_string()),
            names: vec![format!("/{name}")],
            image: Some(image.to_string()),
            state: Some(if running { "running" } else { "exited" }.to_string()),
            status: Some(if running { "Up 1 minute" } else { "Exited (0)" }.to_string()),
            ports: port
                .map(|(host_port, container_port)| RawPort {
                    private_port: container_port,
                    public_port: Some(host_port),
                    protocol: "tcp".to_string(),
                })
                .into_iter()
                .collect(),
            labels: HashMap::new(),
            created: Some(0),
        });
    }

    pub fn add_image(&self, id: &str, repo_tag: &str) {
        lock(&self.images).push(RawImage {
            id: Some(id.to_string()),
            repo_tags: vec![repo_tag.to_string()],
            repo_digests: vec![],
            size: 1024,
        });
    }

    /// Drop a container behind the fleet's back.
    pub fn vanish(&self, id: &str) {
        lock(&self.containers).retain(|c| c.id.as_deref() != Some(id));
    }

    /// Flip a container's state behind the fleet's back.
    pub fn set_running(&self, id: &str, running: bool) {
        if let Some(c) = lock(&self.containers)
            .iter_mut()
            .find(|c| c.id.as_deref() == Some(id))
        {
            c.state = Some(if running { "running" } else { "exited" }.to_string());
        }
    }

    pub fn container(&self, id: &str) -> Option<RawContainer> {
        lock(&self.containers)
            .iter()
            .find(|c| c.id.as_deref() == Some(id))
            .cloned()
    }

    pub fn container_ids(&self) -> Vec<String> {
        lock(&self.containers)
            .iter()
            .filter_map(|c| c.id.clone())
            .collect()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> HostApiResult<()> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(HostApiError::Transport("connection refused".into()));
        }
        Ok(())
    }

    fn with_container<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut RawContainer) -> T,
    ) -> HostApiResult<T> {
        let mut containers = lock(&self.containers);
        let container = containers
            .iter_mut()
            .find(|c| c.id.as_deref() == Some(id))
            .ok_or_else(|| HostApiError::NotFound(format!("no such container: {id}")))?;
        Ok(f(container))
    }
}

#[async_trait]
impl HostApi for MockHost {
    async fn ping(&self) -> HostApiResult<()> {
        self.gate().await
    }

    async fn list_containers(&self) -> HostApiResult<Vec<RawContainer>> {
        self.gate().await?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.containers).clone())
    }

    async fn list_images(&self) -> HostApiResult<Vec<RawImage>> {
        self.gate().await?;
        Ok(lock(&self.images).clone())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> HostApiResult<String> {
        self.gate().await?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_create.load(Ordering::SeqCst) {
            panic!("mock host client crashed while creating {}", spec.name);
        }
        let mut containers = lock(&self.containers);
        let wanted = format!("/{}", spec.name);
        if containers.iter().any(|c| c.names.contains(&wanted)) {
            return Err(HostApiError::Rejected(format!(
                "container name {} is already in use",
                spec.name
            )));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("mock{n:08x}");
        containers.push(RawContainer {
            id: Some(id.clone()),
            names: vec![wanted],
            image: Some(spec.image.clone()),
            state: Some("created".to_string()),
            status: Some("Created".to_string()),
            ports: spec
                .ports
                .iter()
                .map(|p| RawPort {
                    private_port: p.container_port,
                    public_port: Some(p.host_port),
                    protocol: "tcp".to_string(),
                })
                .collect(),
            labels: spec.labels.clone().into_iter().collect(),
            created: Some(0),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> HostApiResult<()> {
        self.gate().await?;
        let exits = self.start_exits.load(Ordering::SeqCst);
        self.with_container(id, |c| {
            if exits {
                c.state = Some("exited".to_string());
                c.status = Some("Exited (1) 1 second ago".to_string());
            } else {
                c.state = Some("running".to_string());
                c.status = Some("Up 1 second".to_string());
            }
        })
    }

    async fn stop_container(&self, id: &str) -> HostApiResult<()> {
        self.gate().await?;
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(HostApiError::Transport("stop timed out on host".into()));
        }
        self.with_container(id, |c| {
            c.state = Some("exited".to_string());
            c.status = Some("Exited (0) 1 second ago".to_string());
        })
    }

    async fn remove_container(&self, id: &str) -> HostApiResult<()> {
        self.gate().await?;
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(HostApiError::Transport("remove failed on host".into()));
        }
        let mut containers = lock(&self.containers);
        let before = containers.len();
        containers.retain(|c| c.id.as_deref() != Some(id));
        if containers.len() == before {
            return Err(HostApiError::NotFound(format!("no such container: {id}")));
        }
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> HostApiResult<ContainerInspect> {
        self.gate().await?;
        self.with_container(id, |c| {
            let status = c.state.clone().unwrap_or_else(|| "unknown".to_string());
            ContainerInspect {
                id: id.to_string(),
                running: status == "running",
                exit_code: (status == "exited").then_some(1),
                error: None,
                status,
            }
        })
    }

    async fn container_logs(&self, id: &str, tail: usize) -> HostApiResult<Vec<String>> {
        self.gate().await?;
        self.with_container(id, |_| ())?;
        let logs = lock(&self.logs);
        let skip = logs.len().saturating_sub(tail);
        Ok(logs[skip..].to_vec())
    }
}
