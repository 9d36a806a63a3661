//! Integration tests for the CamGrid gateway
//!
//! These tests run the full axum router against a mock device fleet and
//! verify the API surface end to end over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use camgrid_core::{
    CameraProtocol, ConnectionManager, DeviceDescriptor, DeviceInfo, EventBroker, LogStatusSink,
    ProtocolFactory, PushEventSource, Result, StreamKind,
};
use camgrid_gateway::api::{self, AppState};
use camgrid_gateway::config::GatewayConfig;
use camgrid_gateway::streaming::{
    LiveProxy, StreamSessionManager, StreamingConfig, TranscoderConfig,
};

struct MockCamera;

#[async_trait]
impl CameraProtocol for MockCamera {
    async fn login(&self) -> Result<()> {
        Ok(())
    }
    async fn logout(&self) -> Result<()> {
        Ok(())
    }
    async fn probe(&self) -> Result<DeviceInfo> {
        Ok(DeviceInfo {
            model: Some("AX-200".to_string()),
            firmware: Some("2.1.0".to_string()),
        })
    }
    async fn stream_uri(&self, _kind: StreamKind, _channel: u32) -> Result<String> {
        Ok("rtsp://device/stream1".to_string())
    }
    async fn control(&self, command: &str, _params: serde_json::Value) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"command": command, "ok": true}))
    }
}

struct MockFactory;

impl ProtocolFactory for MockFactory {
    fn create(&self, _descriptor: &DeviceDescriptor) -> Result<Arc<dyn CameraProtocol>> {
        Ok(Arc::new(MockCamera))
    }
}

/// Spin up the gateway on an ephemeral port; returns its base URL
async fn start_gateway(data_dir: &std::path::Path) -> (String, AppState) {
    let config = Arc::new(GatewayConfig::default());

    let connections = Arc::new(ConnectionManager::new(
        Arc::new(MockFactory),
        Arc::new(LogStatusSink),
        config.devices.connection_config(),
    ));

    let streams = StreamSessionManager::new(
        connections.clone(),
        StreamingConfig {
            data_dir: data_dir.to_path_buf(),
            public_url: config.server.public_url.clone(),
            session_ttl: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(30),
            transcoder: TranscoderConfig::default(),
        },
    );

    let ingest = Arc::new(PushEventSource::new(64));
    let broker = EventBroker::new(ingest.clone());

    let state = AppState {
        connections,
        streams,
        broker,
        ingest,
        proxy: LiveProxy::new(Duration::from_secs(2)).unwrap(),
        config,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = api::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

fn device_json(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "host": "10.0.0.10",
        "port": 80,
        "username": "admin",
        "password": "pw",
    })
}

#[tokio::test]
async fn device_lifecycle_over_http() {
    let tmp = tempfile::tempdir().unwrap();
    let (base, _state) = start_gateway(tmp.path()).await;
    let http = reqwest::Client::new();

    // Register
    let response = http
        .post(format!("{}/api/devices", base))
        .json(&device_json("cam-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"], "cam-1");
    assert_eq!(body["model"], "AX-200");
    assert_eq!(body["status"], "online");

    // Duplicate registration is rejected
    let response = http
        .post(format!("{}/api/devices", base))
        .json(&device_json("cam-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Validation failures are 400
    let response = http
        .post(format!("{}/api/devices", base))
        .json(&serde_json::json!({
            "id": "cam-2", "host": "", "port": 80,
            "username": "admin", "password": "pw",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // List and status
    let devices: serde_json::Value = http
        .get(format!("{}/api/devices", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(devices.as_array().unwrap().len(), 1);

    let status: serde_json::Value = http
        .get(format!("{}/api/devices/cam-1/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "online");
    assert_eq!(status["circuit_open"], false);

    // Control delegation
    let response = http
        .post(format!("{}/api/devices/cam-1/control", base))
        .json(&serde_json::json!({"command": "ptz_move", "params": {"pan": 15}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Remove, then lookups are 404
    let response = http
        .delete(format!("{}/api/devices/cam-1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = http
        .get(format!("{}/api/devices/cam-1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn ingested_events_reach_subscribers() {
    let tmp = tempfile::tempdir().unwrap();
    let (base, state) = start_gateway(tmp.path()).await;
    let http = reqwest::Client::new();

    // Events published with no subscriber are discarded, not queued
    let response = http
        .post(format!("{}/api/events/ingest", base))
        .json(&serde_json::json!({"device_id": "cam-1", "kind": "motion"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["delivered"], false);

    // With a subscriber the webhook flows through the broker
    let mut subscription = state
        .broker
        .subscribe("sub-test", Some("cam-1".to_string()), 16)
        .await
        .unwrap();

    let response = http
        .post(format!("{}/api/events/ingest", base))
        .json(&serde_json::json!({
            "device_id": "cam-1",
            "kind": "motion",
            "payload": {"zone": 3},
        }))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["delivered"], true);

    let event = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .expect("event within deadline")
        .expect("subscription still open");
    assert_eq!(event.device_id, "cam-1");
    assert_eq!(event.kind, "motion");
    assert_eq!(event.payload["zone"], 3);

    // Events for other devices are filtered out
    http.post(format!("{}/api/events/ingest", base))
        .json(&serde_json::json!({"device_id": "cam-other", "kind": "motion"}))
        .send()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(subscription.try_recv().is_none());

    let count: serde_json::Value = http
        .get(format!("{}/api/events/subscribers", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count["subscribers"], 1);
}

#[tokio::test]
async fn stream_endpoints_reject_unknown_sessions_and_bad_names() {
    let tmp = tempfile::tempdir().unwrap();
    let (base, _state) = start_gateway(tmp.path()).await;
    let http = reqwest::Client::new();

    let response = http
        .get(format!("{}/api/streams/hls_missing/index.m3u8", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "session_not_found");

    let response = http
        .delete(format!("{}/api/streams/hls_missing", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Transcoding against an unknown device is a 404, not a hang
    let response = http
        .post(format!("{}/api/devices/cam-ghost/streams", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
