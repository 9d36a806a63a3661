//! End-to-end fleet lifecycle tests
//!
//! Exercises registration, health probing with circuit breaking, and event
//! fan-out together, the way the gateway wires them in production.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use camgrid_core::{
    CameraProtocol, ConnectionConfig, ConnectionManager, DeviceDescriptor, DeviceEvent,
    DeviceInfo, DeviceStatus, Error, EventBroker, ProtocolFactory, PushEventSource, Result,
    StatusSink, StreamKind,
};

struct FlakyCamera {
    fail_probe: AtomicBool,
    probe_calls: AtomicU32,
}

#[async_trait]
impl CameraProtocol for FlakyCamera {
    async fn login(&self) -> Result<()> {
        Ok(())
    }
    async fn logout(&self) -> Result<()> {
        Ok(())
    }
    async fn probe(&self) -> Result<DeviceInfo> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(Error::connection("cam", "no route to host"));
        }
        Ok(DeviceInfo::default())
    }
    async fn stream_uri(&self, _kind: StreamKind, _channel: u32) -> Result<String> {
        Ok("rtsp://device/stream1".to_string())
    }
    async fn control(&self, _command: &str, _params: serde_json::Value) -> Result<serde_json::Value> {
        Ok(serde_json::json!({}))
    }
}

struct FlakyFactory {
    camera: Arc<FlakyCamera>,
}

impl ProtocolFactory for FlakyFactory {
    fn create(&self, _descriptor: &DeviceDescriptor) -> Result<Arc<dyn CameraProtocol>> {
        Ok(self.camera.clone())
    }
}

struct NullSink;

#[async_trait]
impl StatusSink for NullSink {
    async fn update_status(&self, _device_id: &str, _status: DeviceStatus, _at: chrono::DateTime<chrono::Utc>) {}
}

fn descriptor(id: &str, host: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        id: id.to_string(),
        host: host.to_string(),
        port: 80,
        username: "admin".to_string(),
        password: "pw".to_string(),
        use_tls: false,
        accept_invalid_certs: false,
        model: None,
        firmware: None,
    }
}

fn manager(camera: Arc<FlakyCamera>) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        Arc::new(FlakyFactory { camera }),
        Arc::new(NullSink),
        ConnectionConfig {
            connect_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(500),
            max_retries: 3,
            circuit_reset: Duration::from_secs(60),
            health_interval: Duration::from_secs(30),
        },
    ))
}

#[tokio::test]
async fn register_with_empty_host_fails_validation() {
    let camera = Arc::new(FlakyCamera {
        fail_probe: AtomicBool::new(false),
        probe_calls: AtomicU32::new(0),
    });
    let manager = manager(camera);

    let err = manager.add_device(descriptor("cam-1", "")).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(manager.device_count().await, 0);
}

#[tokio::test]
async fn three_failed_probes_open_circuit_and_fourth_is_skipped() {
    let camera = Arc::new(FlakyCamera {
        fail_probe: AtomicBool::new(false),
        probe_calls: AtomicU32::new(0),
    });
    let manager = manager(camera.clone());

    manager.add_device(descriptor("cam-1", "10.0.0.10")).await.unwrap();
    camera.fail_probe.store(true, Ordering::SeqCst);
    let baseline = camera.probe_calls.load(Ordering::SeqCst);

    for _ in 0..3 {
        manager.health_check_all().await;
    }
    let snapshot = manager.get_snapshot("cam-1").await.unwrap();
    assert!(snapshot.circuit_open);
    assert_eq!(snapshot.status, DeviceStatus::Offline);

    // Fourth probe round: circuit open, no network call recorded
    manager.health_check_all().await;
    assert_eq!(camera.probe_calls.load(Ordering::SeqCst), baseline + 3);

    // Operations fail fast with the device named
    let err = manager
        .control("cam-1", "ptz_move", serde_json::json!({"pan": 10}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { ref device_id } if device_id == "cam-1"));
}

#[tokio::test]
async fn filtered_and_unfiltered_subscribers() {
    let source = Arc::new(PushEventSource::new(64));
    let broker = EventBroker::new(source.clone());

    let mut filtered = broker
        .subscribe("sub-filtered", Some("cam-123".to_string()), 16)
        .await
        .unwrap();
    let mut unfiltered = broker.subscribe("sub-all", None, 16).await.unwrap();

    assert!(source.publish(DeviceEvent::new("cam-456", "motion", serde_json::json!({}))));
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(filtered.try_recv().is_none());
    let event = unfiltered.try_recv().expect("unfiltered subscriber receives the event");
    assert_eq!(event.device_id, "cam-456");
}
