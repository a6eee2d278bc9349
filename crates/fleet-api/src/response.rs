//! Response envelope and error-to-status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::warn;

use fleet_discovery::DiscoveryError;
use fleet_health::RegistryError;
use fleet_orchestrator::{ErrorKind, OrchestratorError};
use fleet_placement::PlacementError;
use fleet_protection::ProtectionError;
use fleet_reconciler::ReconcileError;
use fleet_state::{PortSpecError, StateError};

/// Response wrapper for consistent API format.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: Some(data),
        })
    }
}

impl<T: Serialize> ApiResponse<T> {
    /// A failure that still carries a payload, e.g. what blocked the request.
    pub fn rejected(status: StatusCode, message: impl Into<String>, data: T) -> Response {
        (
            status,
            Json(Self {
                success: false,
                message: message.into(),
                data: Some(data),
            }),
        )
            .into_response()
    }
}

pub fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            message: msg.to_string(),
            data: None,
        }),
    )
}

/// A failed request: HTTP status plus the message shown to the caller.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, message = %self.message, "request failed");
        }
        error_response(&self.message, self.status).into_response()
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Verification => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Invalid => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self::new(status_for(e.kind()), e.to_string())
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        Self::internal(e)
    }
}

impl From<PortSpecError> for ApiError {
    fn from(e: PortSpecError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let status = match &e {
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::AlreadyExists(_) => StatusCode::CONFLICT,
            RegistryError::Invalid(_) => StatusCode::BAD_REQUEST,
            RegistryError::InUse { .. } => StatusCode::CONFLICT,
            RegistryError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<DiscoveryError> for ApiError {
    fn from(e: DiscoveryError) -> Self {
        let status = match &e {
            DiscoveryError::HostNotFound(_) => StatusCode::NOT_FOUND,
            DiscoveryError::Host { .. } => StatusCode::BAD_GATEWAY,
            DiscoveryError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<PlacementError> for ApiError {
    fn from(e: PlacementError) -> Self {
        let status = match &e {
            PlacementError::NoEligibleHost { .. } => StatusCode::CONFLICT,
            PlacementError::AssetNotFound(_) => StatusCode::NOT_FOUND,
            PlacementError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::NotFound(_) => Self::not_found(e.to_string()),
            ReconcileError::State(e) => e.into(),
        }
    }
}

impl From<ProtectionError> for ApiError {
    fn from(e: ProtectionError) -> Self {
        match e {
            ProtectionError::HostNotFound(_) => Self::not_found(e.to_string()),
            ProtectionError::Ports(e) => e.into(),
            ProtectionError::Discovery(e) => e.into(),
            ProtectionError::Registry(e) => e.into(),
            ProtectionError::State(e) => e.into(),
        }
    }
}
