//! Image families and host-port allocation.

use std::collections::BTreeSet;

use serde::Serialize;

use fleet_discovery::PortBinding;
use fleet_state::{PortMapping, split_image_ref};

use crate::error::{OrchestratorError, OrchestratorResult};

/// First host port handed out when none is requested.
pub const FIRST_HOST_PORT: u16 = 8000;

/// Known image families and their conventional container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFamily {
    Nginx,
    Httpd,
    Apache,
    Tomcat,
    Mysql,
    Mariadb,
    Postgres,
    Redis,
    Mongo,
    Generic,
}

impl ImageFamily {
    /// Classify by repository name, ignoring registry and namespace.
    pub fn detect(image: &str) -> Self {
        let (repo, _) = split_image_ref(image);
        let stem = repo.rsplit('/').next().unwrap_or(&repo).to_ascii_lowercase();
        match stem.as_str() {
            s if s.starts_with("nginx") => Self::Nginx,
            s if s.starts_with("httpd") => Self::Httpd,
            s if s.starts_with("apache") => Self::Apache,
            s if s.starts_with("tomcat") => Self::Tomcat,
            s if s.starts_with("mysql") => Self::Mysql,
            s if s.starts_with("mariadb") => Self::Mariadb,
            s if s.starts_with("postgres") => Self::Postgres,
            s if s.starts_with("redis") => Self::Redis,
            s if s.starts_with("mongo") => Self::Mongo,
            _ => Self::Generic,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::Nginx | Self::Httpd | Self::Apache | Self::Generic => 80,
            Self::Tomcat => 8080,
            Self::Mysql | Self::Mariadb => 3306,
            Self::Postgres => 5432,
            Self::Redis => 6379,
            Self::Mongo => 27017,
        }
    }
}

/// Turn requested mappings into concrete bindings on one host.
///
/// Explicit host ports must be free; unspecified ones get the lowest free
/// port at or above `first_free`.
pub fn allocate_bindings(
    host_id: &str,
    requested: &[PortMapping],
    in_use: &BTreeSet<u16>,
    first_free: u16,
) -> OrchestratorResult<Vec<PortBinding>> {
    let mut taken = in_use.clone();
    let mut bindings = Vec::with_capacity(requested.len());

    for mapping in requested {
        if let Some(port) = mapping.host_port {
            if !taken.insert(port) {
                return Err(OrchestratorError::PortConflict {
                    host_id: host_id.to_string(),
                    port,
                });
            }
            bindings.push(PortBinding {
                host_port: port,
                container_port: mapping.container_port,
            });
        }
    }

    for mapping in requested.iter().filter(|m| m.host_port.is_none()) {
        let port = (first_free..=u16::MAX)
            .find(|p| !taken.contains(p))
            .ok_or_else(|| OrchestratorError::PortsExhausted(host_id.to_string()))?;
        taken.insert(port);
        bindings.push(PortBinding {
            host_port: port,
            container_port: mapping.container_port,
        });
    }
    Ok(bindings)
}
