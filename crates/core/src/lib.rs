//! CamGrid core fleet library
//!
//! Manages a fleet of network video devices: one long-lived protocol client
//! per device with per-device circuit breaking and periodic health probes,
//! plus an event broker that fans a single upstream feed out to independent,
//! filterable subscriber queues.
//!
//! The crate is transport-agnostic: HTTP routing, persistence, and auth live
//! in the consuming service. The seams are the [`protocol::CameraProtocol`],
//! [`protocol::StatusSink`], and [`protocol::EventSource`] traits.

pub mod breaker;
pub mod broker;
pub mod client;
pub mod device;
pub mod error;
pub mod events;
pub mod http_camera;
pub mod manager;
pub mod protocol;

pub use breaker::{CircuitBreaker, CircuitState};
pub use broker::{EventBroker, Subscription};
pub use client::DeviceClient;
pub use device::{DeviceDescriptor, DeviceSnapshot, DeviceStatus};
pub use error::{Error, Result};
pub use events::{DeviceEvent, PushEventSource};
pub use http_camera::{HttpCamera, HttpCameraFactory};
pub use manager::{ConnectionConfig, ConnectionManager};
pub use protocol::{
    CameraProtocol, DeviceInfo, EventSource, LogStatusSink, ProtocolFactory, StatusSink,
    StreamKind,
};
