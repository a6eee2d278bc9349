//! Host, discovery and asset handlers.
//!
//! Each handler goes through the registry, the discovery client or the
//! store and returns the JSON envelope from [`crate::response`].

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;

use fleet_health::RegistryError;
use fleet_state::*;

use crate::ApiState;
use crate::response::{ApiError, ApiResponse};

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    pub refresh: bool,
}

// ── Hosts ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterHostRequest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
    #[serde(default)]
    pub control_port: Option<u16>,
    #[serde(default)]
    pub status: Option<HostStatus>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub max_containers: Option<u32>,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
}

impl RegisterHostRequest {
    fn into_host(self) -> HostNode {
        let mut host = HostNode::new(self.id, self.address);
        if let Some(name) = self.name {
            host.name = name;
        }
        if let Some(port) = self.control_port {
            host.control_port = port;
        }
        if let Some(status) = self.status {
            host.status = status;
        }
        if let Some(max) = self.max_containers {
            host.max_containers = max;
        }
        if let Some(priority) = self.priority {
            host.priority = priority;
        }
        host.environment = self.environment;
        host.labels = self.labels;
        host.cpu_cores = self.cpu_cores;
        host.memory_mb = self.memory_mb;
        host
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: HostStatus,
}

/// GET /api/v1/hosts
pub async fn list_hosts(State(state): State<ApiState>) -> impl IntoResponse {
    match state.registry.list() {
        Ok(hosts) => ApiResponse::ok(format!("{} hosts", hosts.len()), hosts).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /api/v1/hosts
pub async fn register_host(
    State(state): State<ApiState>,
    Json(request): Json<RegisterHostRequest>,
) -> impl IntoResponse {
    match state.registry.register(request.into_host()).await {
        Ok(host) => (
            StatusCode::CREATED,
            ApiResponse::ok(format!("host {} registered", host.id), host),
        )
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /api/v1/hosts/:id
pub async fn get_host(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.registry.get(&id) {
        Ok(host) => ApiResponse::ok("host found", host).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// DELETE /api/v1/hosts/:id
pub async fn delete_host(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.registry.delete_host(&id).await {
        Ok(deletion) => {
            state.discovery.invalidate(&id).await;
            let message = format!(
                "host {id} deleted, {} asset references cleared",
                deletion.affected_assets
            );
            ApiResponse::ok(message, deletion).into_response()
        }
        Err(RegistryError::InUse { host_id, live_records }) => ApiResponse::rejected(
            StatusCode::CONFLICT,
            format!("host {host_id} still runs {} live deployment(s)", live_records.len()),
            json!({ "host_id": host_id, "live_records": live_records }),
        ),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// PUT /api/v1/hosts/:id/status
pub async fn update_host_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> impl IntoResponse {
    match state.registry.update_status(&id, update.status).await {
        Ok(host) => ApiResponse::ok(format!("host {id} is now {}", host.status), host).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /api/v1/hosts/:id/health
pub async fn health_check(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.registry.probe_host(&id).await {
        Ok(report) => {
            let message = format!("host {id} probed: {:?}", report.outcome);
            ApiResponse::ok(message, report).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /api/v1/hosts/health
pub async fn batch_health_check(State(state): State<ApiState>) -> impl IntoResponse {
    match state.registry.batch_health_check().await {
        Ok(batch) => {
            let message = format!("{} of {} hosts healthy", batch.healthy, batch.checked);
            ApiResponse::ok(message, batch).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

// ── Discovery ──────────────────────────────────────────────────

/// GET /api/v1/hosts/:id/containers
pub async fn host_containers(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> impl IntoResponse {
    let host = match state.registry.get(&id) {
        Ok(host) => host,
        Err(e) => return ApiError::from(e).into_response(),
    };
    match state.discovery.containers_for(&host, query.refresh).await {
        Ok(containers) => {
            ApiResponse::ok(format!("{} containers on {id}", containers.len()), containers).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /api/v1/hosts/:id/images
pub async fn host_images(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> impl IntoResponse {
    let host = match state.registry.get(&id) {
        Ok(host) => host,
        Err(e) => return ApiError::from(e).into_response(),
    };
    match state.discovery.images_for(&host, query.refresh).await {
        Ok(images) => ApiResponse::ok(format!("{} images on {id}", images.len()), images).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /api/v1/exercises/:ex/discovery
pub async fn discover_exercise(
    State(state): State<ApiState>,
    Path(exercise_id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> impl IntoResponse {
    match state.discovery.discover_exercise(&exercise_id, query.refresh).await {
        Ok(found) => ApiResponse::ok(format!("exercise {exercise_id} discovered"), found).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

// ── Assets ─────────────────────────────────────────────────────

/// GET /api/v1/assets
pub async fn list_assets(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_assets() {
        Ok(assets) => ApiResponse::ok(format!("{} assets", assets.len()), assets).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// PUT /api/v1/assets/:id
pub async fn upsert_asset(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(mut asset): Json<DeploymentTarget>,
) -> impl IntoResponse {
    if asset.id != id {
        return ApiError::bad_request(format!("asset id {} does not match path {id}", asset.id)).into_response();
    }
    if let Err(e) = validate_asset(&state, &asset) {
        return e.into_response();
    }
    asset.updated_at = epoch_secs();
    match state.store.put_asset(&asset) {
        Ok(()) => ApiResponse::ok(format!("asset {id} saved"), asset).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

fn validate_asset(state: &ApiState, asset: &DeploymentTarget) -> Result<(), ApiError> {
    if asset.exercise_id.trim().is_empty() {
        return Err(ApiError::bad_request("exercise_id is required"));
    }
    if let Some(ports) = asset.ports.as_deref() {
        parse_port_spec(ports)?;
    }
    if asset.strategy == DeploymentStrategy::Fixed && asset.preferred_host.is_none() {
        return Err(ApiError::bad_request("fixed strategy requires preferred_host"));
    }
    if let Some(host_id) = asset.preferred_host.as_deref() {
        if state.store.get_host(host_id)?.is_none() {
            return Err(ApiError::bad_request(format!("preferred host {host_id} is not registered")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture;

    fn registration(id: &str) -> RegisterHostRequest {
        RegisterHostRequest {
            id: id.into(),
            name: None,
            address: "10.1.0.9".into(),
            control_port: None,
            status: None,
            environment: Some("training".into()),
            max_containers: Some(20),
            priority: Some(3),
            labels: BTreeMap::new(),
            cpu_cores: None,
            memory_mb: None,
        }
    }

    #[tokio::test]
    async fn register_get_and_duplicate() {
        let f = fixture(&[]).await;
        let resp = register_host(State(f.state.clone()), Json(registration("h9"))).await;
        assert_eq!(resp.into_response().status(), StatusCode::CREATED);

        let host = f.state.registry.get("h9").unwrap();
        assert_eq!(host.max_containers, 20);
        assert_eq!(host.environment.as_deref(), Some("training"));
        assert_eq!(host.control_port, DEFAULT_CONTROL_PORT);

        let resp = register_host(State(f.state.clone()), Json(registration("h9"))).await;
        assert_eq!(resp.into_response().status(), StatusCode::CONFLICT);

        let resp = get_host(State(f.state), Path("missing".into())).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_host_clears_asset_references() {
        let f = fixture(&["h1", "h2"]).await;
        for name in ["a", "b", "c"] {
            let mut asset = DeploymentTarget::new("ex1", name, name);
            asset.preferred_host = Some("h1".into());
            asset.strategy = DeploymentStrategy::Fixed;
            f.state.store.put_asset(&asset).unwrap();
        }

        let resp = delete_host(State(f.state.clone()), Path("h1".into())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);

        for asset in f.state.store.list_assets().unwrap() {
            assert_eq!(asset.preferred_host, None);
            assert_eq!(asset.strategy, DeploymentStrategy::Any);
        }

        let resp = delete_host(State(f.state), Path("h1".into())).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_host_with_live_deployment_is_conflict() {
        let f = fixture(&["h1"]).await;
        let record = f.state.orchestrator.add_image("ex1", "web", "nginx", None).await.unwrap();
        f.state.orchestrator.deploy(&record.key).await.unwrap();
        f.state.orchestrator.worker().wait(&record.key).await;

        let resp = delete_host(State(f.state.clone()), Path("h1".into()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["data"]["live_records"][0], record.key.to_string());
        assert!(f.state.registry.get("h1").is_ok());

        f.state.orchestrator.stop(&record.key).await.unwrap();
        let resp = delete_host(State(f.state), Path("h1".into())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_update_and_probe() {
        let f = fixture(&["h1"]).await;
        let resp = update_host_status(
            State(f.state.clone()),
            Path("h1".into()),
            Json(StatusUpdate {
                status: HostStatus::Maintenance,
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(f.state.registry.get("h1").unwrap().status, HostStatus::Maintenance);

        let resp = health_check(State(f.state.clone()), Path("h1".into())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        // Maintenance survives a successful probe.
        assert_eq!(f.state.registry.get("h1").unwrap().status, HostStatus::Maintenance);

        let resp = batch_health_check(State(f.state)).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn host_containers_are_isolated_per_host() {
        let f = fixture(&["h1", "h2"]).await;
        f.connector.host("h1").add_container("c1", "web", "nginx:latest", true, Some((8000, 80)));
        f.connector.host("h2").add_container("c2", "db", "postgres:16", true, None);

        let resp = host_containers(State(f.state.clone()), Path("h1".into()), Query(RefreshQuery::default())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        let on_h1 = f.state.discovery.list_containers("h1").await.unwrap();
        assert_eq!(on_h1.len(), 1);
        assert_eq!(on_h1[0].id, "c1");

        let resp = host_images(State(f.state), Path("nope".into()), Query(RefreshQuery { refresh: true })).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn offline_host_discovery_is_bad_gateway() {
        let f = fixture(&["h1"]).await;
        f.connector.host("h1").set_offline(true);
        let resp = host_containers(State(f.state), Path("h1".into()), Query(RefreshQuery { refresh: true })).await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn upsert_asset_validates() {
        let f = fixture(&["h1"]).await;

        let mut asset = DeploymentTarget::new("ex1", "web", "webshop");
        asset.ports = Some("8080:80".into());
        let resp = upsert_asset(State(f.state.clone()), Path("web".into()), Json(asset.clone())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert!(f.state.store.get_asset("web").unwrap().unwrap().updated_at > 0);

        let resp = upsert_asset(State(f.state.clone()), Path("other".into()), Json(asset.clone())).await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_REQUEST);

        let mut bad_ports = asset.clone();
        bad_ports.ports = Some("http".into());
        let resp = upsert_asset(State(f.state.clone()), Path("web".into()), Json(bad_ports)).await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_REQUEST);

        let mut fixed = asset;
        fixed.strategy = DeploymentStrategy::Fixed;
        let resp = upsert_asset(State(f.state.clone()), Path("web".into()), Json(fixed.clone())).await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_REQUEST);

        fixed.preferred_host = Some("h1".into());
        let resp = upsert_asset(State(f.state), Path("web".into()), Json(fixed)).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }
}
