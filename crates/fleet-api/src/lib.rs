//! fleet-api: REST API for the fleet.
//!
//! Provides axum route handlers for host administration, discovery,
//! image mappings, deployments, placement, reconciliation and the
//! protection checks. Every response is `{ success, message, data }`.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/hosts` | List hosts |
//! | POST | `/api/v1/hosts` | Register a host |
//! | POST | `/api/v1/hosts/health` | Probe every host |
//! | GET | `/api/v1/hosts/{id}` | Get a host |
//! | DELETE | `/api/v1/hosts/{id}` | Delete a host, clearing asset references (409 while deployments are live) |
//! | PUT | `/api/v1/hosts/{id}/status` | Set administrative status |
//! | POST | `/api/v1/hosts/{id}/health` | Probe one host |
//! | GET | `/api/v1/hosts/{id}/check` | Connectivity and container counts |
//! | GET | `/api/v1/hosts/{id}/validate` | Can the host take new work |
//! | GET | `/api/v1/hosts/{id}/containers` | Discovered containers (`?refresh=true`) |
//! | GET | `/api/v1/hosts/{id}/images` | Discovered images (`?refresh=true`) |
//! | GET | `/api/v1/assets` | List assets |
//! | PUT | `/api/v1/assets/{id}` | Create or replace an asset |
//! | GET | `/api/v1/exercises/{ex}/discovery` | Exercise containers across hosts |
//! | GET | `/api/v1/exercises/{ex}/images` | List image mappings |
//! | POST | `/api/v1/exercises/{ex}/images` | Add an image mapping |
//! | DELETE | `/api/v1/exercises/{ex}/images/{asset}/{image}` | Remove an image mapping |
//! | GET | `/api/v1/exercises/{ex}/deployments` | List deployment records |
//! | GET | `/api/v1/deployments/{ex}/{asset}/{image}` | Record, sync status, worker state |
//! | DELETE | `/api/v1/deployments/{ex}/{asset}/{image}` | Remove container, record and mapping |
//! | POST | `/api/v1/deployments/{ex}/{asset}/{image}/deploy` | Deploy or redeploy |
//! | POST | `/api/v1/deployments/{ex}/{asset}/{image}/stop` | Stop |
//! | GET | `/api/v1/deployments/{ex}/{asset}/{image}/logs` | Container logs (`?tail=N`) |
//! | POST | `/api/v1/placement/select` | Pick a host for an asset |
//! | POST | `/api/v1/placement/redistribute` | Rebalance a set of assets |
//! | GET | `/api/v1/placement/capacity` | Cluster load and capacity alerts |
//! | POST | `/api/v1/reconcile` | Trigger a reconciliation pass |
//! | GET | `/api/v1/reconcile/status` | Reconciler status and last report |
//! | POST | `/api/v1/reconcile/reset` | Reset sync failure counters |
//! | POST | `/api/v1/reconcile/resume` | Resume a suspended loop |
//! | GET | `/api/v1/reconcile/statistics` | Sync counts and record states |
//! | POST | `/api/v1/reconcile/cleanup` | Purge failed sync rows (`?days=N`, default 7) |
//! | POST | `/api/v1/reconcile/sync/{ex}/{asset}/{image}` | Forced sync of one record |
//! | POST | `/api/v1/reconcile/assets/{asset}/sync` | Forced sync of an asset's records |
//! | GET | `/api/v1/reconcile/assets/{asset}/states` | Sync states of an asset's records |
//! | GET | `/api/v1/reconcile/hosts/{id}/states` | Sync states of records on a host |
//! | GET | `/api/v1/protection/lost` | Records whose container is gone |
//! | POST | `/api/v1/protection/ports` | Port conflict precheck |
//! | GET | `/api/v1/protection/rematch/{ex}/{asset}` | Rematch suggestions |

pub mod deploy_handlers;
pub mod handlers;
pub mod ops_handlers;
pub mod response;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};

use fleet_discovery::DiscoveryClient;
use fleet_health::HostRegistry;
use fleet_orchestrator::{Orchestrator, OrchestratorConfig};
use fleet_placement::PlacementSelector;
use fleet_protection::ProtectionLayer;
use fleet_reconciler::{Reconciler, ReconcilerConfig};
use fleet_state::{DeploymentIndex, StateStore};

pub use response::{ApiError, ApiResponse};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub index: Arc<DeploymentIndex>,
    pub registry: Arc<HostRegistry>,
    pub discovery: DiscoveryClient,
    pub placement: Arc<PlacementSelector>,
    pub orchestrator: Orchestrator,
    pub reconciler: Arc<Reconciler>,
    pub protection: Arc<ProtectionLayer>,
}

impl ApiState {
    /// Assemble the services that sit on top of the store, registry and
    /// discovery client.
    pub fn new(
        store: StateStore,
        index: Arc<DeploymentIndex>,
        registry: Arc<HostRegistry>,
        discovery: DiscoveryClient,
        orchestrator: OrchestratorConfig,
        reconciler: ReconcilerConfig,
    ) -> Self {
        let placement = Arc::new(PlacementSelector::new(
            store.clone(),
            index.clone(),
            discovery.clone(),
        ));
        let orchestrator = Orchestrator::new(
            store.clone(),
            index.clone(),
            discovery.clone(),
            placement.clone(),
            orchestrator,
        );
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            index.clone(),
            discovery.clone(),
            orchestrator.clone(),
            reconciler,
        ));
        let protection = Arc::new(ProtectionLayer::new(
            store.clone(),
            index.clone(),
            registry.clone(),
            discovery.clone(),
        ));
        Self {
            store,
            index,
            registry,
            discovery,
            placement,
            orchestrator,
            reconciler,
            protection,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        // Hosts
        .route("/hosts", get(handlers::list_hosts).post(handlers::register_host))
        .route("/hosts/health", post(handlers::batch_health_check))
        .route("/hosts/{id}", get(handlers::get_host).delete(handlers::delete_host))
        .route("/hosts/{id}/status", put(handlers::update_host_status))
        .route("/hosts/{id}/health", post(handlers::health_check))
        .route("/hosts/{id}/check", get(ops_handlers::check_host_status))
        .route("/hosts/{id}/validate", get(ops_handlers::validate_host))
        // Discovery
        .route("/hosts/{id}/containers", get(handlers::host_containers))
        .route("/hosts/{id}/images", get(handlers::host_images))
        .route("/exercises/{ex}/discovery", get(handlers::discover_exercise))
        // Assets
        .route("/assets", get(handlers::list_assets))
        .route("/assets/{id}", put(handlers::upsert_asset))
        // Image mappings and deployments
        .route(
            "/exercises/{ex}/images",
            get(deploy_handlers::list_images).post(deploy_handlers::add_image),
        )
        .route(
            "/exercises/{ex}/images/{asset}/{image}",
            delete(deploy_handlers::remove_image),
        )
        .route("/exercises/{ex}/deployments", get(deploy_handlers::list_records))
        .route(
            "/deployments/{ex}/{asset}/{image}",
            get(deploy_handlers::deployment_status).delete(deploy_handlers::remove_deployment),
        )
        .route("/deployments/{ex}/{asset}/{image}/deploy", post(deploy_handlers::deploy))
        .route("/deployments/{ex}/{asset}/{image}/stop", post(deploy_handlers::stop))
        .route("/deployments/{ex}/{asset}/{image}/logs", get(deploy_handlers::logs))
        // Placement
        .route("/placement/select", post(ops_handlers::select_node))
        .route("/placement/redistribute", post(ops_handlers::redistribute))
        .route("/placement/capacity", get(ops_handlers::capacity))
        // Reconciliation
        .route("/reconcile", post(ops_handlers::trigger_reconcile))
        .route("/reconcile/status", get(ops_handlers::reconcile_status))
        .route("/reconcile/reset", post(ops_handlers::reset_failures))
        .route("/reconcile/resume", post(ops_handlers::resume_reconciler))
        .route("/reconcile/statistics", get(ops_handlers::sync_statistics))
        .route("/reconcile/cleanup", post(ops_handlers::cleanup_sync))
        .route("/reconcile/sync/{ex}/{asset}/{image}", post(ops_handlers::force_sync_record))
        .route("/reconcile/assets/{asset}/sync", post(ops_handlers::force_sync_asset))
        .route("/reconcile/assets/{asset}/states", get(ops_handlers::asset_sync_states))
        .route("/reconcile/hosts/{id}/states", get(ops_handlers::host_sync_states))
        // Protection
        .route("/protection/lost", get(ops_handlers::lost_containers))
        .route("/protection/ports", post(ops_handlers::precheck_ports))
        .route("/protection/rematch/{ex}/{asset}", get(ops_handlers::rematch))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
