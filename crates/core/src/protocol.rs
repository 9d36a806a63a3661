//! Collaborator traits at the edges of the core
//!
//! The device wire protocol, status persistence, and the upstream event
//! feed are external concerns. The core talks to them through the traits
//! defined here; production implementations live in [`crate::http_camera`]
//! and in the consuming service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::device::{DeviceDescriptor, DeviceStatus};
use crate::error::Result;
use crate::events::DeviceEvent;

/// Which live-stream locator to resolve from a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// RTSP pull locator, consumed by the transcoder
    Rtsp,
    /// HTTP MJPEG locator, consumed by the direct proxy
    Mjpeg,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Rtsp => write!(f, "rtsp"),
            StreamKind::Mjpeg => write!(f, "mjpeg"),
        }
    }
}

/// Capabilities reported by a device during a status probe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Hardware model
    #[serde(default)]
    pub model: Option<String>,

    /// Firmware version
    #[serde(default)]
    pub firmware: Option<String>,
}

/// Control channel of one device.
///
/// One instance exists per registered device, created by a
/// [`ProtocolFactory`] at registration time and dropped on removal.
/// Implementations must be safe to call from concurrent tasks.
#[async_trait]
pub trait CameraProtocol: Send + Sync {
    /// Authenticate against the device
    async fn login(&self) -> Result<()>;

    /// Terminate the device session
    async fn logout(&self) -> Result<()>;

    /// Lightweight status query, also used as the health probe
    async fn probe(&self) -> Result<DeviceInfo>;

    /// Resolve a live-stream locator for the given kind and channel
    async fn stream_uri(&self, kind: StreamKind, channel: u32) -> Result<String>;

    /// Device-specific control call, opaque to the core
    async fn control(&self, command: &str, params: serde_json::Value)
        -> Result<serde_json::Value>;
}

/// Builds a protocol client for a device descriptor
pub trait ProtocolFactory: Send + Sync {
    /// Create an unauthenticated client; `login` is driven by the manager
    fn create(&self, descriptor: &DeviceDescriptor) -> Result<std::sync::Arc<dyn CameraProtocol>>;
}

/// Receives device status transitions.
///
/// Invoked only when the status actually changes, never on confirmation of
/// the same status. Persistence is the implementor's concern.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Record that `device_id` transitioned to `status` at `at`
    async fn update_status(&self, device_id: &str, status: DeviceStatus, at: DateTime<Utc>);
}

/// Status sink that only logs transitions
#[derive(Debug, Default)]
pub struct LogStatusSink;

#[async_trait]
impl StatusSink for LogStatusSink {
    async fn update_status(&self, device_id: &str, status: DeviceStatus, at: DateTime<Utc>) {
        tracing::info!(device_id = %device_id, status = %status, at = %at.to_rfc3339(), "device status changed");
    }
}

/// Upstream feed of device-generated events.
///
/// The broker attaches lazily on its first subscriber and detaches when the
/// last one leaves; implementations may discard events while detached.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Attach a listener; events flow through the returned receiver
    async fn attach(&self) -> Result<mpsc::Receiver<DeviceEvent>>;

    /// Detach the current listener
    async fn detach(&self);
}
