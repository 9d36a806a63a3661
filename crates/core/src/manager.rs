//! Connection manager
//!
//! Owns the set of device clients, drives registration and removal, and
//! runs the periodic health-check loop that feeds the per-device circuit
//! breakers and reports status transitions to the [`StatusSink`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};

use crate::breaker::CircuitBreaker;
use crate::client::DeviceClient;
use crate::device::{DeviceDescriptor, DeviceSnapshot, DeviceStatus};
use crate::error::{Error, Result};
use crate::protocol::{ProtocolFactory, StatusSink};

/// Timeouts and breaker settings for the manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bound on login during registration
    pub connect_timeout: Duration,

    /// Bound on a single health probe
    pub probe_timeout: Duration,

    /// Consecutive probe failures before the breaker opens
    pub max_retries: u32,

    /// How long an open breaker blocks before admitting a trial probe
    pub circuit_reset: Duration,

    /// Interval of the health-check loop
    pub health_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            max_retries: 3,
            circuit_reset: Duration::from_secs(30),
            health_interval: Duration::from_secs(30),
        }
    }
}

/// Owns one [`DeviceClient`] per registered device.
///
/// The registry lock serializes structural changes (add/remove/enumerate);
/// each client's health fields sit behind its own lock so probes of
/// unrelated devices never contend.
pub struct ConnectionManager {
    clients: RwLock<HashMap<String, Arc<DeviceClient>>>,
    factory: Arc<dyn ProtocolFactory>,
    status_sink: Arc<dyn StatusSink>,
    config: ConnectionConfig,
}

impl ConnectionManager {
    /// Create a manager with the given protocol factory and status sink
    pub fn new(
        factory: Arc<dyn ProtocolFactory>,
        status_sink: Arc<dyn StatusSink>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            factory,
            status_sink,
            config,
        }
    }

    /// Register a device.
    ///
    /// Validates the descriptor, authenticates within `connect_timeout`,
    /// and only then stores the client - a failed login leaves no partial
    /// registration behind. Model/firmware enrichment is best-effort.
    pub async fn add_device(&self, mut descriptor: DeviceDescriptor) -> Result<DeviceSnapshot> {
        descriptor.validate()?;

        {
            let clients = self.clients.read().await;
            if clients.contains_key(&descriptor.id) {
                return Err(Error::DuplicateDevice {
                    device_id: descriptor.id,
                });
            }
        }

        let protocol = self.factory.create(&descriptor)?;

        match tokio::time::timeout(self.config.connect_timeout, protocol.login()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(Error::connection(&descriptor.id, e.to_string()));
            }
            Err(_) => {
                return Err(Error::connection(
                    &descriptor.id,
                    format!("login timed out after {:?}", self.config.connect_timeout),
                ));
            }
        }

        match tokio::time::timeout(self.config.probe_timeout, protocol.probe()).await {
            Ok(Ok(info)) => {
                if info.model.is_some() {
                    descriptor.model = info.model;
                }
                if info.firmware.is_some() {
                    descriptor.firmware = info.firmware;
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(device_id = %descriptor.id, error = %e, "device info enrichment failed");
            }
            Err(_) => {
                tracing::warn!(device_id = %descriptor.id, "device info enrichment timed out");
            }
        }

        let device_id = descriptor.id.clone();
        let client = Arc::new(DeviceClient::new(
            descriptor,
            protocol,
            CircuitBreaker::with_timeout(self.config.max_retries, self.config.circuit_reset),
        ));

        {
            let mut clients = self.clients.write().await;
            if clients.contains_key(&device_id) {
                // Lost a registration race; undo our login
                drop(clients);
                let _ = client.protocol().logout().await;
                return Err(Error::DuplicateDevice { device_id });
            }
            clients.insert(device_id.clone(), client.clone());
        }

        tracing::info!(device_id = %device_id, "device registered");
        self.status_sink
            .update_status(&device_id, DeviceStatus::Online, Utc::now())
            .await;

        Ok(client.snapshot())
    }

    /// Remove a device, logging out best-effort.
    pub async fn remove_device(&self, device_id: &str) -> Result<()> {
        let client = {
            let mut clients = self.clients.write().await;
            clients
                .remove(device_id)
                .ok_or_else(|| Error::device_not_found(device_id))?
        };

        if let Err(e) = client.protocol().logout().await {
            tracing::warn!(device_id = %device_id, error = %e, "logout failed during removal");
        }
        tracing::info!(device_id = %device_id, "device removed");
        Ok(())
    }

    /// Look up a device client
    pub async fn get_device(&self, device_id: &str) -> Result<Arc<DeviceClient>> {
        self.clients
            .read()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| Error::device_not_found(device_id))
    }

    /// Snapshot of one device
    pub async fn get_snapshot(&self, device_id: &str) -> Result<DeviceSnapshot> {
        Ok(self.get_device(device_id).await?.snapshot())
    }

    /// Snapshots of every registered device
    pub async fn list_devices(&self) -> Vec<DeviceSnapshot> {
        let clients = self.clients.read().await;
        let mut snapshots: Vec<DeviceSnapshot> =
            clients.values().map(|c| c.snapshot()).collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Number of registered devices
    pub async fn device_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Issue an opaque control call against a device, breaker-guarded
    pub async fn control(
        &self,
        device_id: &str,
        command: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.get_device(device_id).await?.control(command, params).await
    }

    /// Probe every registered device concurrently.
    ///
    /// Probes are independent: one device timing out never delays or fails
    /// probing of the others.
    pub async fn health_check_all(&self) {
        let clients: Vec<Arc<DeviceClient>> =
            self.clients.read().await.values().cloned().collect();

        futures::future::join_all(clients.iter().map(|client| self.probe_client(client))).await;
    }

    /// Probe one device and update its health state.
    ///
    /// Probe failures are contained here: they show up as status/breaker
    /// state, never as request errors.
    async fn probe_client(&self, client: &Arc<DeviceClient>) {
        if !client.probe_allowed() {
            tracing::debug!(device_id = %client.id(), "skipping probe, circuit open");
            return;
        }

        let outcome =
            match tokio::time::timeout(self.config.probe_timeout, client.protocol().probe()).await
            {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(Error::connection(
                    client.id(),
                    format!("probe timed out after {:?}", self.config.probe_timeout),
                )),
            };

        match outcome {
            Ok(()) => {
                if client.record_probe_success() {
                    tracing::info!(device_id = %client.id(), "device is back online");
                    self.status_sink
                        .update_status(client.id(), DeviceStatus::Online, Utc::now())
                        .await;
                }
            }
            Err(e) => {
                let failure = client.record_probe_failure();
                tracing::warn!(
                    device_id = %client.id(),
                    error = %e,
                    consecutive_failures = failure.consecutive_failures,
                    "health probe failed"
                );
                if failure.circuit_opened {
                    tracing::warn!(
                        device_id = %client.id(),
                        failures = failure.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
                if failure.status_changed {
                    self.status_sink
                        .update_status(client.id(), DeviceStatus::Offline, Utc::now())
                        .await;
                }
            }
        }
    }

    /// Run the periodic health-check loop until shutdown.
    ///
    /// This is the manager's only unbounded background task; spawn it once
    /// at startup.
    pub async fn run_health_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.config.health_interval.as_secs(),
            "health monitor started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.health_interval) => {
                    self.health_check_all().await;
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("health monitor shutting down");
                    break;
                }
            }
        }
    }

    /// Log out every client, best-effort. Called on service shutdown.
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<DeviceClient>> = {
            let mut map = self.clients.write().await;
            map.drain().map(|(_, c)| c).collect()
        };

        for client in clients {
            if let Err(e) = client.protocol().logout().await {
                tracing::debug!(device_id = %client.id(), error = %e, "logout failed during shutdown");
            }
        }
        tracing::info!("connection manager shut down");
    }
}
