//! Device identity and status types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Everything needed to reach and authenticate against one device.
///
/// `model` and `firmware` are reported by the device; they are filled in
/// best-effort during registration and may stay `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Fleet-unique device ID (e.g. `cam-lobby-1`)
    pub id: String,

    /// Host name or IP address
    pub host: String,

    /// Control-channel port
    pub port: u16,

    /// Account used for the control channel
    pub username: String,

    /// Account password - accepted on input, never echoed back
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Use HTTPS for the control channel
    #[serde(default)]
    pub use_tls: bool,

    /// Skip TLS certificate verification (self-signed camera certs)
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Reported hardware model
    #[serde(default)]
    pub model: Option<String>,

    /// Reported firmware version
    #[serde(default)]
    pub firmware: Option<String>,
}

impl DeviceDescriptor {
    /// Validate the required fields.
    ///
    /// ID, host, and username must be non-empty and the port positive;
    /// anything else is rejected before any network contact.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("device id must not be empty".into()));
        }
        if self.host.trim().is_empty() {
            return Err(Error::Validation("device host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Validation("device port must be positive".into()));
        }
        if self.username.trim().is_empty() {
            return Err(Error::Validation("device username must not be empty".into()));
        }
        Ok(())
    }
}

/// Operational status of a registered device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Reachable, last probe succeeded
    Online,

    /// Last probe failed
    Offline,

    /// Unrecoverable device-side fault
    Error,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Offline => write!(f, "offline"),
            DeviceStatus::Error => write!(f, "error"),
        }
    }
}

/// Point-in-time view of a registered device and its health bookkeeping
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    /// Device ID
    pub id: String,

    /// Host name or IP address
    pub host: String,

    /// Control-channel port
    pub port: u16,

    /// Reported hardware model, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Reported firmware version, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,

    /// Current operational status
    pub status: DeviceStatus,

    /// Whether the circuit breaker is currently rejecting calls
    pub circuit_open: bool,

    /// Consecutive probe failures since the last success
    pub failure_count: u32,

    /// Last time any probe succeeded or the device was registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,

    /// Last time a health probe succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_healthy: Option<DateTime<Utc>>,
}
