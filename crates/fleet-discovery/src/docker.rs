//! Docker Engine adapter for [`HostApi`], built on bollard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding as DockerPortBinding};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, InspectContainerOptions, ListContainersOptionsBuilder,
    ListImagesOptionsBuilder, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
    StartContainerOptions, StopContainerOptionsBuilder,
};
use futures::TryStreamExt;
use tracing::debug;

use fleet_state::HostNode;

use crate::api::*;
use crate::error::{HostApiError, HostApiResult};

/// Seconds a container gets to exit before docker kills it on stop.
const STOP_GRACE_SECS: i32 = 10;

fn map_bollard(e: BollardError) -> HostApiError {
    match e {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => HostApiError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        }
        | BollardError::DockerResponseServerError {
            status_code: 400,
            message,
        } => HostApiError::Rejected(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => HostApiError::Transport(format!("HTTP {status_code}: {message}")),
        other => HostApiError::Transport(other.to_string()),
    }
}

/// One host's Docker Engine API.
pub struct DockerHostApi {
    docker: Docker,
}

impl DockerHostApi {
    /// Connect over plain HTTP to `address:control_port`.
    pub fn connect(host: &HostNode, timeout_secs: u64) -> HostApiResult<Self> {
        let url = format!("http://{}", host.control_endpoint());
        let docker = Docker::connect_with_http(&url, timeout_secs, bollard::API_DEFAULT_VERSION)
            .map_err(map_bollard)?;
        debug!(host_id = %host.id, %url, "docker client created");
        Ok(Self { docker })
    }
}

#[async_trait]
impl HostApi for DockerHostApi {
    async fn ping(&self) -> HostApiResult<()> {
        self.docker.ping().await.map_err(map_bollard)?;
        Ok(())
    }

    async fn list_containers(&self) -> HostApiResult<Vec<RawContainer>> {
        let options = ListContainersOptionsBuilder::default().all(true).build();
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_bollard)?;

        Ok(summaries
            .into_iter()
            .map(|s| RawContainer {
                id: s.id,
                names: s.names.unwrap_or_default(),
                image: s.image,
                state: s.state.map(|st| st.to_string()),
                status: s.status,
                ports: s
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| RawPort {
                        private_port: p.private_port,
                        public_port: p.public_port,
                        protocol: p.typ.map(|t| t.to_string()).unwrap_or_else(|| "tcp".into()),
                    })
                    .collect(),
                labels: s.labels.unwrap_or_default(),
                created: s.created,
            })
            .collect())
    }

    async fn list_images(&self) -> HostApiResult<Vec<RawImage>> {
        let options = ListImagesOptionsBuilder::default().all(false).build();
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(map_bollard)?;

        Ok(images
            .into_iter()
            .map(|img| RawImage {
                id: Some(img.id).filter(|id| !id.is_empty()),
                repo_tags: img.repo_tags,
                repo_digests: img.repo_digests,
                size: img.size,
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> HostApiResult<String> {
        let mut bindings = HashMap::new();
        for port in &spec.ports {
            bindings.insert(
                format!("{}/tcp", port.container_port),
                Some(vec![DockerPortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
        }

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            labels: Some(spec.labels.clone().into_iter().collect()),
            host_config: Some(HostConfig {
                port_bindings: Some(bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptionsBuilder::default().name(&spec.name).build();
        let created = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(map_bollard)?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> HostApiResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(map_bollard)
    }

    async fn stop_container(&self, id: &str) -> HostApiResult<()> {
        let options = StopContainerOptionsBuilder::default().t(STOP_GRACE_SECS).build();
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped.
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_bollard(e)),
        }
    }

    async fn remove_container(&self, id: &str) -> HostApiResult<()> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(map_bollard)
    }

    async fn inspect_container(&self, id: &str) -> HostApiResult<ContainerInspect> {
        let details = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_bollard)?;
        let state = details.state.unwrap_or_default();
        Ok(ContainerInspect {
            id: details.id.unwrap_or_else(|| id.to_string()),
            running: state.running.unwrap_or(false),
            status: state
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            exit_code: state.exit_code,
            error: state.error.filter(|e| !e.is_empty()),
        })
    }

    async fn container_logs(&self, id: &str, tail: usize) -> HostApiResult<Vec<String>> {
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .tail(&tail.to_string())
            .build();
        let chunks: Vec<_> = self
            .docker
            .logs(id, Some(options))
            .try_collect()
            .await
            .map_err(map_bollard)?;
        Ok(chunks
            .iter()
            .flat_map(|chunk| {
                chunk
                    .to_string()
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect())
    }
}

/// Builds and caches one [`DockerHostApi`] per control endpoint.
pub struct DockerConnector {
    timeout_secs: u64,
    clients: Mutex<HashMap<String, Arc<DockerHostApi>>>,
}

impl DockerConnector {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl HostConnector for DockerConnector {
    fn connect(&self, host: &HostNode) -> HostApiResult<Arc<dyn HostApi>> {
        let endpoint = host.control_endpoint();
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&endpoint) {
            return Ok(client.clone());
        }
        let client = Arc::new(DockerHostApi::connect(host, self.timeout_secs)?);
        clients.insert(endpoint, client.clone());
        Ok(client)
    }
}
