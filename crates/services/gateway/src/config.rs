//! Gateway configuration
//!
//! Loaded from a TOML file (`CAMGRID_CONFIG` or `./camgrid.toml`); every
//! field has a default so an empty file or no file at all yields a working
//! development setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use camgrid_core::ConnectionConfig;

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub devices: DevicesConfig,
    pub streaming: StreamingSettings,
    pub events: EventsConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the gateway listens on
    pub bind_addr: String,

    /// Public base URL used when building playlist URLs
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            public_url: "http://localhost:8080".to_string(),
        }
    }
}

/// Device connection and health-probe settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Bound on login during registration, in seconds
    pub connect_timeout_secs: u64,

    /// Bound on a single health probe, in seconds
    pub probe_timeout_secs: u64,

    /// Consecutive probe failures before the circuit opens
    pub max_retries: u32,

    /// Seconds an open circuit blocks before admitting a trial probe
    pub circuit_reset_secs: u64,

    /// Health-check loop interval, in seconds
    pub health_interval_secs: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            probe_timeout_secs: 5,
            max_retries: 3,
            circuit_reset_secs: 30,
            health_interval_secs: 30,
        }
    }
}

impl DevicesConfig {
    /// Translate into the core manager's config
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            max_retries: self.max_retries,
            circuit_reset: Duration::from_secs(self.circuit_reset_secs),
            health_interval: Duration::from_secs(self.health_interval_secs),
        }
    }
}

/// Transcoding session settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Root directory for per-session HLS output
    pub data_dir: PathBuf,

    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,

    /// Idle TTL of a session; every playlist/segment read refreshes it
    pub session_ttl_secs: u64,

    /// Interval of the expired-session reaper
    pub reaper_interval_secs: u64,

    /// HLS segment duration in seconds
    pub segment_seconds: u32,

    /// Number of segments kept in the live window
    pub segment_window: u32,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/tmp/camgrid/streams"),
            ffmpeg_path: "ffmpeg".to_string(),
            session_ttl_secs: 120,
            reaper_interval_secs: 30,
            segment_seconds: 2,
            segment_window: 6,
        }
    }
}

impl StreamingSettings {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

/// Event fan-out settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Queue capacity a subscriber gets when it does not ask for one
    pub default_queue_capacity: usize,

    /// Capacity of the upstream ingest feed
    pub ingest_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            default_queue_capacity: 64,
            ingest_capacity: 256,
        }
    }
}

impl GatewayConfig {
    /// Load from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Resolve the config: `CAMGRID_CONFIG`, then `./camgrid.toml`, then defaults
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var("CAMGRID_CONFIG") {
            return Self::from_file(Path::new(&path));
        }
        let default_path = Path::new("camgrid.toml");
        if default_path.exists() {
            return Self::from_file(default_path);
        }
        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.devices.max_retries, 3);
        assert_eq!(config.streaming.segment_seconds, 2);
        assert_eq!(config.events.default_queue_capacity, 64);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [server]
            bind_addr = "127.0.0.1:9000"

            [streaming]
            session_ttl_secs = 300
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.server.public_url, "http://localhost:8080");
        assert_eq!(config.streaming.session_ttl_secs, 300);
        assert_eq!(config.streaming.segment_window, 6);
        assert_eq!(config.devices.probe_timeout_secs, 5);
    }

    #[test]
    fn test_connection_config_translation() {
        let devices = DevicesConfig {
            connect_timeout_secs: 7,
            max_retries: 5,
            ..DevicesConfig::default()
        };
        let cc = devices.connection_config();
        assert_eq!(cc.connect_timeout, Duration::from_secs(7));
        assert_eq!(cc.max_retries, 5);
    }
}
