//! Per-device client handle
//!
//! Wraps one device's protocol client with its health bookkeeping. The
//! health fields live behind the client's own lock so concurrent probes of
//! different devices never contend, and breaker state is always checked
//! under that lock before any network contact.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::device::{DeviceDescriptor, DeviceSnapshot, DeviceStatus};
use crate::error::{Error, Result};
use crate::protocol::{CameraProtocol, StreamKind};

/// Mutable health state of one device client
#[derive(Debug)]
struct ClientHealth {
    breaker: CircuitBreaker,
    status: DeviceStatus,
    last_seen: Option<DateTime<Utc>>,
    last_healthy: Option<DateTime<Utc>>,
}

/// Outcome of recording a failed probe
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProbeFailure {
    /// The device just transitioned to offline
    pub status_changed: bool,
    /// This failure tripped the breaker open
    pub circuit_opened: bool,
    /// Consecutive failures including this one
    pub consecutive_failures: u32,
}

/// Handle to one registered device: protocol client plus health state.
///
/// Exactly one `DeviceClient` exists per registered device ID; the
/// [`crate::manager::ConnectionManager`] owns the registry.
pub struct DeviceClient {
    descriptor: DeviceDescriptor,
    protocol: Arc<dyn CameraProtocol>,
    health: Mutex<ClientHealth>,
}

impl DeviceClient {
    /// Create a client for a freshly registered device.
    ///
    /// Registration requires a successful login, so the client starts
    /// online with a closed breaker.
    pub fn new(
        descriptor: DeviceDescriptor,
        protocol: Arc<dyn CameraProtocol>,
        breaker: CircuitBreaker,
    ) -> Self {
        let now = Utc::now();
        Self {
            descriptor,
            protocol,
            health: Mutex::new(ClientHealth {
                breaker,
                status: DeviceStatus::Online,
                last_seen: Some(now),
                last_healthy: Some(now),
            }),
        }
    }

    /// The device ID
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// The registration descriptor (enriched at registration time)
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Current operational status
    pub fn status(&self) -> DeviceStatus {
        self.health.lock().status
    }

    /// Point-in-time copy of the device and its health fields
    pub fn snapshot(&self) -> DeviceSnapshot {
        let health = self.health.lock();
        DeviceSnapshot {
            id: self.descriptor.id.clone(),
            host: self.descriptor.host.clone(),
            port: self.descriptor.port,
            model: self.descriptor.model.clone(),
            firmware: self.descriptor.firmware.clone(),
            status: health.status,
            circuit_open: health.breaker.is_open_readonly(),
            failure_count: health.breaker.consecutive_failures(),
            last_seen: health.last_seen,
            last_healthy: health.last_healthy,
        }
    }

    /// Fail fast if the breaker is not closed
    fn check_circuit(&self) -> Result<()> {
        if self.health.lock().breaker.is_open_readonly() {
            return Err(Error::CircuitOpen {
                device_id: self.descriptor.id.clone(),
            });
        }
        Ok(())
    }

    /// Whether the health loop may probe this device right now.
    ///
    /// Consults the breaker under the client lock; an open breaker past its
    /// reset timeout admits the trial probe here.
    pub(crate) fn probe_allowed(&self) -> bool {
        !self.health.lock().breaker.is_open()
    }

    /// Record a successful probe. Returns `true` if the status changed.
    pub(crate) fn record_probe_success(&self) -> bool {
        let mut health = self.health.lock();
        health.breaker.record_success();
        let now = Utc::now();
        health.last_seen = Some(now);
        health.last_healthy = Some(now);
        let changed = health.status != DeviceStatus::Online;
        health.status = DeviceStatus::Online;
        changed
    }

    /// Record a failed probe
    pub(crate) fn record_probe_failure(&self) -> ProbeFailure {
        let mut health = self.health.lock();
        let was_open = health.breaker.state() == CircuitState::Open;
        health.breaker.record_failure();
        let circuit_opened = !was_open && health.breaker.state() == CircuitState::Open;
        let status_changed = health.status != DeviceStatus::Offline;
        health.status = DeviceStatus::Offline;
        ProbeFailure {
            status_changed,
            circuit_opened,
            consecutive_failures: health.breaker.consecutive_failures(),
        }
    }

    /// Raw protocol access for the manager (probe, logout)
    pub(crate) fn protocol(&self) -> &Arc<dyn CameraProtocol> {
        &self.protocol
    }

    /// Resolve a live-stream locator, breaker-guarded
    pub async fn stream_uri(&self, kind: StreamKind, channel: u32) -> Result<String> {
        self.check_circuit()?;
        self.protocol.stream_uri(kind, channel).await
    }

    /// Issue an opaque control call, breaker-guarded
    pub async fn control(
        &self,
        command: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.check_circuit()?;
        self.protocol.control(command, params).await
    }
}

impl std::fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let health = self.health.lock();
        f.debug_struct("DeviceClient")
            .field("id", &self.descriptor.id)
            .field("status", &health.status)
            .field("breaker", &health.breaker.state())
            .finish()
    }
}
