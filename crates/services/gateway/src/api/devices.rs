//! Device lifecycle endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use camgrid_core::DeviceDescriptor;

use super::{error_response, AppState};

/// Request body for a control call
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    /// Device-specific command name (e.g. `ptz_move`, `led`, `reboot`)
    pub command: String,

    /// Command parameters, passed through opaquely
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Status response for one device
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub id: String,
    pub status: String,
    pub circuit_open: bool,
    pub failure_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

/// Register a device
///
/// POST /api/devices
pub async fn add_device(
    State(state): State<AppState>,
    Json(descriptor): Json<DeviceDescriptor>,
) -> impl IntoResponse {
    match state.connections.add_device(descriptor).await {
        Ok(snapshot) => (StatusCode::CREATED, Json(snapshot)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// List registered devices
///
/// GET /api/devices
pub async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.connections.list_devices().await)
}

/// Get one device
///
/// GET /api/devices/:id
pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    match state.connections.get_snapshot(&device_id).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// Remove a device
///
/// DELETE /api/devices/:id
pub async fn remove_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    match state.connections.remove_device(&device_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// Get a device's health status
///
/// GET /api/devices/:id/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    match state.connections.get_snapshot(&device_id).await {
        Ok(snapshot) => Json(StatusResponse {
            id: snapshot.id,
            status: snapshot.status.to_string(),
            circuit_open: snapshot.circuit_open,
            failure_count: snapshot.failure_count,
            last_seen: snapshot.last_seen.map(|t| t.to_rfc3339()),
        })
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// Issue an opaque control call against a device
///
/// POST /api/devices/:id/control
pub async fn control_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(request): Json<ControlRequest>,
) -> impl IntoResponse {
    match state
        .connections
        .control(&device_id, &request.command, request.params)
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}
