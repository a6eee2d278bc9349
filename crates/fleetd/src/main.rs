//! fleetd: the fleet daemon.
//!
//! Single binary that assembles the range control plane:
//! - State store (redb) and the deployment record index
//! - Host registry with the periodic health monitor
//! - Discovery client over the Docker API
//! - Deployment orchestrator and placement selector
//! - State reconciler loop
//! - REST API
//!
//! # Usage
//!
//! ```text
//! fleetd --config /etc/fleet/fleetd.toml serve --port 8443 --data-dir /var/lib/fleet
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleet_discovery::{DiscoveryClient, DockerConnector, HostConnector};
use fleet_health::{HealthMonitor, HostRegistry, NetworkProbe};
use fleet_state::{DeploymentIndex, StateStore};

use crate::config::{FleetConfig, LogFormat, LoggingConfig};

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet range control plane daemon")]
struct Cli {
    /// Path to fleetd.toml. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Serve {
        /// Port to listen on (overrides `[server] port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `[storage] data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = FleetConfig::load(cli.config.as_deref())
        .with_context(|| format!("failed to load config {:?}", cli.config))?;

    match cli.command {
        Command::Serve { port, data_dir } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.storage.data_dir = data_dir;
            }
            init_tracing(&config.logging)?;
            run_server(config).await
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.filter))?;
    match logging.format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
    Ok(())
}

async fn run_server(config: FleetConfig) -> anyhow::Result<()> {
    info!("fleet daemon starting");

    // Ensure data directory exists.
    let data_dir = &config.storage.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let db_path = data_dir.join("fleet.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let index = Arc::new(DeploymentIndex::rehydrate(store.clone()).await?);
    info!(records = index.all().await.len(), "deployment index rehydrated");

    let connector: Arc<dyn HostConnector> = Arc::new(DockerConnector::new(config.discovery.docker_timeout_secs));
    let discovery = DiscoveryClient::new(store.clone(), connector, config.discovery.client());
    info!(cache_ttl_secs = config.discovery.cache_ttl_secs, "discovery client initialized");

    let registry = Arc::new(HostRegistry::new(
        store.clone(),
        Arc::new(NetworkProbe),
        config.health.registry(),
    ));
    let monitor = HealthMonitor::new(registry.clone(), Duration::from_secs(config.health.interval_secs));
    info!(hosts = registry.list()?.len(), "host registry initialized");

    let state = fleet_api::ApiState::new(
        store,
        index,
        registry,
        discovery,
        config.orchestrator.orchestrator(),
        config.reconciler.reconciler(),
    );
    let interrupted = state.orchestrator.recover_interrupted().await?;
    info!(interrupted = interrupted.len(), "deploys left over from a previous run settled");
    let reconciler = state.reconciler.clone();
    info!(interval_secs = config.reconciler.interval_secs, "reconciler initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_shutdown = shutdown_rx.clone();
    let reconcile_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let monitor_handle = tokio::spawn(async move {
        monitor.run(monitor_shutdown).await;
    });

    let reconcile_handle = tokio::spawn(async move {
        reconciler.run(reconcile_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = fleet_api::build_router(state);
    let ip = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    let addr = SocketAddr::new(ip, config.server.port);

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = monitor_handle.await;
    let _ = reconcile_handle.await;

    info!("fleet daemon stopped");
    Ok(())
}
