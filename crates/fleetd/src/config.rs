//! fleetd.toml configuration.
//!
//! Every section is optional; missing keys take the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleet_discovery::DiscoveryConfig;
use fleet_health::RegistryConfig;
use fleet_orchestrator::OrchestratorConfig;
use fleet_reconciler::ReconcilerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub health: HealthConfig,
    pub discovery: DiscoverySection,
    pub orchestrator: OrchestratorSection,
    pub reconciler: ReconcilerSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8443,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/fleet"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: "info,fleetd=debug".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds between monitor sweeps.
    pub interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_concurrency: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            probe_timeout_secs: 5,
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            max_concurrency: 8,
        }
    }
}

impl HealthConfig {
    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            retry_attempts: self.retry_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_concurrency: self.max_concurrency,
            probe_interval: Duration::from_secs(self.interval_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub cache_ttl_secs: u64,
    pub per_host_timeout_secs: u64,
    pub max_concurrency: usize,
    /// Timeout handed to the Docker client for every request.
    pub docker_timeout_secs: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            per_host_timeout_secs: 10,
            max_concurrency: 8,
            docker_timeout_secs: 30,
        }
    }
}

impl DiscoverySection {
    pub fn client(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            per_host_timeout: Duration::from_secs(self.per_host_timeout_secs),
            max_concurrency: self.max_concurrency,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub container_prefix: String,
    pub max_parallel_deploys: usize,
    pub verify_attempts: u32,
    pub verify_interval_ms: u64,
    pub host_call_timeout_secs: u64,
    pub first_host_port: u16,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            container_prefix: defaults.container_prefix,
            max_parallel_deploys: defaults.max_parallel_deploys,
            verify_attempts: defaults.verify_attempts,
            verify_interval_ms: defaults.verify_interval.as_millis() as u64,
            host_call_timeout_secs: defaults.host_call_timeout.as_secs(),
            first_host_port: defaults.first_host_port,
        }
    }
}

impl OrchestratorSection {
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            container_prefix: self.container_prefix.clone(),
            max_parallel_deploys: self.max_parallel_deploys,
            verify_attempts: self.verify_attempts,
            verify_interval: Duration::from_millis(self.verify_interval_ms),
            host_call_timeout: Duration::from_secs(self.host_call_timeout_secs),
            first_host_port: self.first_host_port,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerSection {
    pub interval_secs: u64,
    pub max_consecutive_failures: u32,
    pub retention_days: u64,
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_consecutive_failures: 5,
            retention_days: 7,
        }
    }
}

impl ReconcilerSection {
    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            interval: Duration::from_secs(self.interval_secs),
            max_consecutive_failures: self.max_consecutive_failures,
            retention: Duration::from_secs(self.retention_days * 24 * 3600),
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: FleetConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.reconciler.reconciler().interval, Duration::from_secs(60));
        assert_eq!(config.orchestrator.orchestrator().container_prefix, "drill-");
        assert_eq!(config.health.registry().retry_attempts, 3);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let toml_str = r#"
[server]
port = 9000

[logging]
format = "json"

[reconciler]
interval_secs = 15
"#;
        let config: FleetConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.reconciler.interval_secs, 15);
        assert_eq!(config.reconciler.max_consecutive_failures, 5);
    }

    #[test]
    fn written_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetd.toml");
        let mut config = FleetConfig::default();
        config.storage.data_dir = dir.path().join("data");
        config.discovery.cache_ttl_secs = 5;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = FleetConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.storage.data_dir, dir.path().join("data"));
        assert_eq!(loaded.discovery.client().cache_ttl, Duration::from_secs(5));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(FleetConfig::load(Some(Path::new("/nonexistent/fleetd.toml"))).is_err());
    }
}
