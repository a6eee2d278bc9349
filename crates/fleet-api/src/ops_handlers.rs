//! Placement, reconciliation and protection handlers.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use fleet_placement::{CapacityAlert, ClusterLoad, PlacementError};
use fleet_reconciler::{ReconcileResult, TriggerOutcome};
use fleet_state::RecordKey;

use crate::ApiState;
use crate::response::{ApiError, ApiResponse};

// ── Placement ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub asset_id: String,
    /// Overrides the asset's own environment tag.
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RedistributeRequest {
    pub asset_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CapacityView {
    pub cluster: ClusterLoad,
    pub alerts: Vec<CapacityAlert>,
}

/// POST /api/v1/placement/select
pub async fn select_node(State(state): State<ApiState>, Json(request): Json<SelectRequest>) -> impl IntoResponse {
    let target = match state.store.get_asset(&request.asset_id) {
        Ok(Some(target)) => target,
        Ok(None) => return ApiError::from(PlacementError::AssetNotFound(request.asset_id)).into_response(),
        Err(e) => return ApiError::from(e).into_response(),
    };
    match state.placement.select_node(&target, request.environment.as_deref()).await {
        Ok(placement) => {
            let message = format!("selected {}: {}", placement.host.id, placement.justification);
            ApiResponse::ok(message, placement).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /api/v1/placement/redistribute
pub async fn redistribute(
    State(state): State<ApiState>,
    Json(request): Json<RedistributeRequest>,
) -> impl IntoResponse {
    match state.placement.redistribute(&request.asset_ids).await {
        Ok(assignments) => {
            let moves = assignments.iter().filter(|a| a.moves()).count();
            ApiResponse::ok(format!("{moves} assets would move"), assignments).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /api/v1/placement/capacity
pub async fn capacity(State(state): State<ApiState>) -> impl IntoResponse {
    let loads = match state.placement.host_loads().await {
        Ok(loads) => loads,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let view = CapacityView {
        cluster: fleet_placement::cluster_load(&loads),
        alerts: fleet_placement::capacity_alerts(&loads),
    };
    let message = format!(
        "{} of {} slots in use, {} alerts",
        view.cluster.running,
        view.cluster.capacity,
        view.alerts.len()
    );
    ApiResponse::ok(message, view).into_response()
}

// ── Reconciliation ─────────────────────────────────────────────

/// Identify one record, or leave every field out to address all of them.
#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub exercise_id: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
}

impl ResetRequest {
    fn key(self) -> Result<Option<RecordKey>, ApiError> {
        match (self.exercise_id, self.asset_id, self.image_id) {
            (None, None, None) => Ok(None),
            (Some(ex), Some(asset), Some(image)) => Ok(Some(RecordKey::new(ex, asset, image))),
            _ => Err(ApiError::bad_request(
                "exercise_id, asset_id and image_id must be given together",
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupQuery {
    pub days: Option<u64>,
}

const DEFAULT_CLEANUP_DAYS: u64 = 7;

fn pass_response(result: ReconcileResult<TriggerOutcome>) -> Response {
    match result {
        Ok(TriggerOutcome::Completed(report)) => {
            let message = format!(
                "reconciled {} records, {} need attention",
                report.records_checked, report.needs_reconciliation
            );
            ApiResponse::ok(message, report).into_response()
        }
        Ok(TriggerOutcome::AlreadyRunning) => {
            ApiResponse::ok("reconciliation already running", json!({ "status": "already_running" }))
                .into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /api/v1/reconcile
///
/// A trigger while a pass is in flight is not an error; it reports
/// `already_running` and does nothing.
pub async fn trigger_reconcile(State(state): State<ApiState>) -> impl IntoResponse {
    pass_response(state.reconciler.run_once().await)
}

/// POST /api/v1/reconcile/sync/:ex/:asset/:image
pub async fn force_sync_record(
    State(state): State<ApiState>,
    Path((ex, asset, image)): Path<(String, String, String)>,
) -> impl IntoResponse {
    let key = RecordKey::new(ex, asset, image);
    pass_response(state.reconciler.reconcile_key(&key).await)
}

/// POST /api/v1/reconcile/assets/:asset/sync
pub async fn force_sync_asset(State(state): State<ApiState>, Path(asset): Path<String>) -> impl IntoResponse {
    pass_response(state.reconciler.reconcile_asset(&asset).await)
}

/// GET /api/v1/reconcile/statistics
pub async fn sync_statistics(State(state): State<ApiState>) -> impl IntoResponse {
    let stats = state.reconciler.statistics().await;
    let message = format!(
        "{} tracked, {} need reconciliation, {} failed",
        stats.tracked, stats.needs_reconciliation, stats.failed
    );
    ApiResponse::ok(message, stats)
}

/// GET /api/v1/reconcile/assets/:asset/states
pub async fn asset_sync_states(State(state): State<ApiState>, Path(asset): Path<String>) -> impl IntoResponse {
    let states = state.reconciler.sync_states_for_asset(&asset).await;
    ApiResponse::ok(format!("{} records for asset {asset}", states.len()), states)
}

/// GET /api/v1/reconcile/hosts/:id/states
pub async fn host_sync_states(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_host(&id) {
        Ok(Some(_)) => {}
        Ok(None) => return ApiError::not_found(format!("host {id} not found")).into_response(),
        Err(e) => return ApiError::from(e).into_response(),
    }
    let states = state.reconciler.sync_states_for_host(&id).await;
    ApiResponse::ok(format!("{} records on host {id}", states.len()), states).into_response()
}

/// POST /api/v1/reconcile/cleanup?days=N
pub async fn cleanup_sync(State(state): State<ApiState>, Query(query): Query<CleanupQuery>) -> impl IntoResponse {
    let days = query.days.unwrap_or(DEFAULT_CLEANUP_DAYS);
    let age = Duration::from_secs(days.saturating_mul(24 * 3600));
    match state.reconciler.purge_older_than(age).await {
        Ok(purged) => ApiResponse::ok(
            format!("{purged} sync states older than {days} days removed"),
            json!({ "purged": purged, "days": days }),
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /api/v1/reconcile/status
pub async fn reconcile_status(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.reconciler.status().await;
    let message = if status.suspended {
        "periodic reconciliation suspended".to_string()
    } else {
        format!("{} runs completed", status.runs)
    };
    ApiResponse::ok(message, status)
}

/// POST /api/v1/reconcile/reset
pub async fn reset_failures(State(state): State<ApiState>, Json(request): Json<ResetRequest>) -> impl IntoResponse {
    let key = match request.key() {
        Ok(key) => key,
        Err(e) => return e.into_response(),
    };
    match state.reconciler.reset_failures(key.as_ref()).await {
        Ok(count) => ApiResponse::ok(format!("{count} sync states reset"), json!({ "reset": count })).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /api/v1/reconcile/resume
pub async fn resume_reconciler(State(state): State<ApiState>) -> impl IntoResponse {
    state.reconciler.reset_loop_failures();
    ApiResponse::ok("periodic reconciliation resumed", json!({ "suspended": false }))
}

// ── Protection ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PrecheckRequest {
    pub host_id: String,
    /// Port configuration as stored on assets, e.g. `"8080:80"`.
    pub ports: String,
}

/// GET /api/v1/hosts/:id/check
pub async fn check_host_status(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.protection.check_host_status(&id).await {
        Ok(report) => {
            let message = report.message.clone();
            ApiResponse::ok(message, report).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /api/v1/hosts/:id/validate
pub async fn validate_host(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.protection.validate_host_operation(&id).await {
        Ok(validation) => {
            let message = if validation.valid {
                format!("host {id} can take new deployments")
            } else {
                validation.issues.join("; ")
            };
            ApiResponse::ok(message, validation).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /api/v1/protection/lost
pub async fn lost_containers(State(state): State<ApiState>) -> impl IntoResponse {
    match state.protection.detect_lost_containers().await {
        Ok(lost) => ApiResponse::ok(format!("{} lost containers", lost.len()), lost).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /api/v1/protection/ports
pub async fn precheck_ports(
    State(state): State<ApiState>,
    Json(request): Json<PrecheckRequest>,
) -> impl IntoResponse {
    match state
        .protection
        .precheck_port_conflicts(&request.ports, &request.host_id)
        .await
    {
        Ok(result) => {
            let message = if result.has_conflict {
                format!("{} ports already bound", result.conflicts.len())
            } else {
                "no conflicts".to_string()
            };
            ApiResponse::ok(message, result).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /api/v1/protection/rematch/:ex/:asset
pub async fn rematch(
    State(state): State<ApiState>,
    Path((exercise_id, asset_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.protection.rematch(&exercise_id, &asset_id).await {
        Ok(candidates) => {
            ApiResponse::ok(format!("{} candidates", candidates.len()), candidates).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture;
    use axum::http::StatusCode;
    use fleet_state::{DeploymentRecord, DeploymentState, DeploymentStrategy, DeploymentTarget};

    async fn running(f: &crate::testing::Fixture, asset: &str, host: &str, container: &str) -> RecordKey {
        let key = RecordKey::new("ex1", asset, "nginx-latest");
        let mut record = DeploymentRecord::pending(key.clone(), "nginx:latest", 1);
        record.state = DeploymentState::Deployed;
        record.host_id = Some(host.into());
        record.container_id = Some(container.into());
        f.state.index.put(record).await.unwrap();
        key
    }

    #[tokio::test]
    async fn select_honours_fixed_host() {
        let f = fixture(&["h1", "h2"]).await;
        let mut asset = DeploymentTarget::new("ex1", "web", "web");
        asset.strategy = DeploymentStrategy::Fixed;
        asset.preferred_host = Some("h2".into());
        f.state.store.put_asset(&asset).unwrap();

        let resp = select_node(
            State(f.state.clone()),
            Json(SelectRequest {
                asset_id: "web".into(),
                environment: None,
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        let placement = f.state.placement.select_node(&asset, None).await.unwrap();
        assert_eq!(placement.host.id, "h2");

        let resp = select_node(
            State(f.state),
            Json(SelectRequest {
                asset_id: "missing".into(),
                environment: None,
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn select_without_active_host_is_conflict() {
        let f = fixture(&[]).await;
        f.state
            .store
            .put_asset(&DeploymentTarget::new("ex1", "web", "web"))
            .unwrap();
        let resp = select_node(
            State(f.state),
            Json(SelectRequest {
                asset_id: "web".into(),
                environment: None,
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn capacity_reports_cluster_load() {
        let f = fixture(&["h1"]).await;
        let mock = f.connector.host("h1");
        for i in 0..9 {
            mock.add_container(&format!("c{i}"), &format!("a{i}"), "nginx:latest", true, None);
        }
        let resp = capacity(State(f.state.clone())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        let alerts = f.state.placement.capacity_alerts().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].host_id, "h1");
    }

    #[tokio::test]
    async fn trigger_and_reset_reconciler() {
        let f = fixture(&["h1"]).await;
        let resp = trigger_reconcile(State(f.state.clone())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(f.state.reconciler.status().await.runs, 1);

        let resp = reset_failures(State(f.state.clone()), Json(ResetRequest::default())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);

        let partial = ResetRequest {
            exercise_id: Some("ex1".into()),
            ..ResetRequest::default()
        };
        let resp = reset_failures(State(f.state.clone()), Json(partial)).await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_REQUEST);

        let unknown = ResetRequest {
            exercise_id: Some("ex1".into()),
            asset_id: Some("nope".into()),
            image_id: Some("nginx-latest".into()),
        };
        let resp = reset_failures(State(f.state.clone()), Json(unknown)).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);

        let resp = resume_reconciler(State(f.state)).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn precheck_flags_bound_port() {
        let f = fixture(&["h1"]).await;
        f.connector
            .host("h1")
            .add_container("c1", "web", "nginx:latest", true, Some((8080, 80)));

        let result = f.state.protection.precheck_port_conflicts("8080:80", "h1").await.unwrap();
        assert!(result.has_conflict);

        let resp = precheck_ports(
            State(f.state.clone()),
            Json(PrecheckRequest {
                host_id: "h1".into(),
                ports: "not-a-port".into(),
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_REQUEST);

        let resp = precheck_ports(
            State(f.state),
            Json(PrecheckRequest {
                host_id: "ghost".into(),
                ports: "8080:80".into(),
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lost_container_is_reported() {
        let f = fixture(&["h1"]).await;
        f.connector
            .host("h1")
            .add_container("c1", "drill-ex1-a-nginx", "nginx:latest", true, None);
        running(&f, "a", "h1", "c1").await;
        running(&f, "b", "h1", "gone").await;

        let lost = f.state.protection.detect_lost_containers().await.unwrap();
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].asset_id, "b");

        let resp = lost_containers(State(f.state)).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn host_check_validation_and_rematch() {
        let f = fixture(&["h1"]).await;
        f.connector
            .host("h1")
            .add_container("c7", "drill-ex1-web-nginx", "nginx:latest", true, None);

        let resp = check_host_status(State(f.state.clone()), Path("h1".into())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        let report = f.state.protection.check_host_status("ghost").await.unwrap();
        assert_eq!(report.connectivity, fleet_protection::Connectivity::NotFound);

        let resp = validate_host(State(f.state.clone()), Path("h1".into())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert!(f.state.protection.validate_host_operation("h1").await.unwrap().valid);
        let resp = validate_host(State(f.state.clone()), Path("ghost".into())).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);

        let mut asset = DeploymentTarget::new("ex1", "web", "web");
        asset.image = Some("nginx:latest".into());
        f.state.store.put_asset(&asset).unwrap();
        let resp = rematch(State(f.state.clone()), Path(("ex1".into(), "web".into()))).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        let candidates = f.state.protection.rematch("ex1", "web").await.unwrap();
        assert_eq!(candidates[0].container_id, "c7");
    }

    async fn body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn statistics_and_state_filters() {
        let f = fixture(&["h1", "h2"]).await;
        f.connector
            .host("h1")
            .add_container("c1", "drill-ex1-web-nginx", "nginx:latest", true, None);
        running(&f, "web", "h1", "c1").await;
        running(&f, "db", "h2", "gone").await;
        f.state.reconciler.run_once().await.unwrap();

        let resp = sync_statistics(State(f.state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body(resp).await;
        assert_eq!(json["data"]["tracked"], 2);
        assert_eq!(json["data"]["synced"], 1);
        assert_eq!(json["data"]["needs_reconciliation"], 1);
        assert_eq!(json["data"]["records_by_state"]["DEPLOYED"], 2);

        let resp = asset_sync_states(State(f.state.clone()), Path("db".into())).await.into_response();
        let json = body(resp).await;
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
        assert_eq!(json["data"][0]["sync"]["state"], "NEEDS_RECONCILIATION");

        let resp = host_sync_states(State(f.state.clone()), Path("h1".into())).await.into_response();
        let json = body(resp).await;
        assert_eq!(json["data"][0]["key"]["asset_id"], "web");
        assert_eq!(json["data"][0]["sync"]["state"], "SYNCED");

        let resp = host_sync_states(State(f.state), Path("ghost".into())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn forced_sync_of_record_and_asset() {
        let f = fixture(&["h1"]).await;
        let key = running(&f, "web", "h1", "gone").await;
        for _ in 0..2 {
            f.state.reconciler.run_once().await.unwrap();
        }

        let resp = force_sync_record(
            State(f.state.clone()),
            Path(("ex1".into(), "web".into(), "nginx-latest".into())),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body(resp).await["data"]["records_checked"], 1);
        let status = f.state.index.sync_status(&key).await.unwrap();
        assert_eq!(status.consecutive_failures, 1);

        let resp = force_sync_record(
            State(f.state.clone()),
            Path(("ex1".into(), "nope".into(), "nginx-latest".into())),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);

        let resp = force_sync_asset(State(f.state.clone()), Path("web".into())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        let resp = force_sync_asset(State(f.state), Path("nope".into())).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cleanup_defaults_to_a_week() {
        let f = fixture(&[]).await;
        let key = RecordKey::new("ex1", "web", "nginx-latest");
        let mut record = DeploymentRecord::pending(key.clone(), "nginx:latest", fleet_state::epoch_secs());
        record.state = DeploymentState::Failed;
        f.state.index.put(record).await.unwrap();
        f.state
            .index
            .put_sync_status(fleet_state::SyncStatus::synced(key.clone(), 1))
            .await
            .unwrap();

        let resp = cleanup_sync(State(f.state.clone()), Query(CleanupQuery::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body(resp).await;
        assert_eq!((json["data"]["purged"].as_u64(), json["data"]["days"].as_u64()), (Some(0), Some(7)));
        assert!(f.state.index.sync_status(&key).await.is_some());

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let resp = cleanup_sync(State(f.state.clone()), Query(CleanupQuery { days: Some(0) }))
            .await
            .into_response();
        assert_eq!(body(resp).await["data"]["purged"], 1);
        assert!(f.state.index.sync_status(&key).await.is_none());
    }
}
