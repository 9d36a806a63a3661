//! HTTP API
//!
//! Thin adapters between HTTP and the managers. All design content lives
//! in the core and streaming modules; handlers translate requests, map
//! errors to status codes, and stream bodies.

pub mod devices;
pub mod events;
pub mod streams;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use camgrid_core::{ConnectionManager, Error, EventBroker, PushEventSource};

use crate::config::GatewayConfig;
use crate::streaming::{LiveProxy, StreamSessionManager};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub connections: Arc<ConnectionManager>,
    pub streams: Arc<StreamSessionManager>,
    pub broker: Arc<EventBroker>,
    pub ingest: Arc<PushEventSource>,
    pub proxy: LiveProxy,
    pub config: Arc<GatewayConfig>,
}

/// JSON error envelope
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Map a core error to a status code and stable error slug
pub(crate) fn error_response(err: &Error) -> (StatusCode, Json<ErrorResponse>) {
    let (status, slug) = match err {
        Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
        Error::DuplicateDevice { .. } => (StatusCode::CONFLICT, "device_exists"),
        Error::DeviceNotFound { .. } => (StatusCode::NOT_FOUND, "device_not_found"),
        Error::SessionNotFound { .. } => (StatusCode::NOT_FOUND, "session_not_found"),
        Error::InvalidPath { .. } => (StatusCode::BAD_REQUEST, "invalid_segment"),
        Error::CircuitOpen { .. } => (StatusCode::SERVICE_UNAVAILABLE, "circuit_open"),
        Error::Connection { .. } => (StatusCode::BAD_GATEWAY, "device_unreachable"),
        Error::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
        Error::Io(_) | Error::Serialization(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: slug.to_string(),
            message: err.to_string(),
        }),
    )
}

/// Build the gateway router
pub fn router(state: AppState) -> Router {
    Router::new()
        // Device lifecycle
        .route("/api/devices", post(devices::add_device).get(devices::list_devices))
        .route(
            "/api/devices/:id",
            get(devices::get_device).delete(devices::remove_device),
        )
        .route("/api/devices/:id/status", get(devices::get_status))
        .route("/api/devices/:id/control", post(devices::control_device))
        // Streaming
        .route("/api/devices/:id/live", get(streams::live_proxy))
        .route("/api/devices/:id/streams", post(streams::start_transcode))
        .route("/api/streams/:sid", delete(streams::stop_session))
        .route("/api/streams/:sid/:artifact", get(streams::get_artifact))
        // Events
        .route("/api/events/stream", get(events::events_sse))
        .route("/api/events/ws", get(events::events_ws))
        .route("/api/events/ingest", post(events::ingest_event))
        .route("/api/events/subscribers", get(events::subscriber_count))
        .layer(TraceLayer::new_for_http())
        // Browser HLS players fetch playlists/segments cross-origin
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let cases = [
            (Error::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                Error::DuplicateDevice {
                    device_id: "cam-1".into(),
                },
                StatusCode::CONFLICT,
            ),
            (Error::device_not_found("cam-1"), StatusCode::NOT_FOUND),
            (Error::session_not_found("hls_a"), StatusCode::NOT_FOUND),
            (
                Error::InvalidPath {
                    name: "../x".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::CircuitOpen {
                    device_id: "cam-1".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::connection("cam-1", "down"), StatusCode::BAD_GATEWAY),
            (Error::upstream("503"), StatusCode::BAD_GATEWAY),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(&err).0, expected, "for {:?}", err);
        }
    }

    #[test]
    fn test_circuit_open_names_the_device() {
        let (_, Json(body)) = error_response(&Error::CircuitOpen {
            device_id: "cam-lobby".into(),
        });
        assert_eq!(body.error, "circuit_open");
        assert!(body.message.contains("cam-lobby"));
    }
}
