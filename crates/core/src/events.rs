//! Device event types and the push-style upstream source

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::EventSource;

/// A single event generated by a device (motion, tamper, connectivity, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// Device that generated the event
    pub device_id: String,

    /// Event kind (e.g. `motion`, `tamper`, `storage_full`)
    pub kind: String,

    /// Event-specific payload
    #[serde(default)]
    pub payload: serde_json::Value,

    /// When the event was generated
    pub timestamp: DateTime<Utc>,
}

impl DeviceEvent {
    /// Create an event stamped with the current time
    pub fn new(
        device_id: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            kind: kind.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Push-style [`EventSource`]: callers publish events, the attached broker
/// consumes them.
///
/// Devices deliver events over a transport the core does not care about
/// (the gateway feeds its webhook endpoint in here). While no broker is
/// attached, published events are discarded - the upstream is only
/// consumed when someone is listening.
pub struct PushEventSource {
    feed: parking_lot::Mutex<Option<mpsc::Sender<DeviceEvent>>>,
    capacity: usize,
}

impl PushEventSource {
    /// Create a source whose attached feed buffers up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            feed: parking_lot::Mutex::new(None),
            capacity: capacity.max(1),
        }
    }

    /// Publish one event into the attached feed.
    ///
    /// Returns `true` if the event was handed to a listener. Never blocks:
    /// with no listener attached, or a full feed, the event is dropped.
    pub fn publish(&self, event: DeviceEvent) -> bool {
        let feed = self.feed.lock();
        match feed.as_ref() {
            Some(tx) => match tx.try_send(event) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    tracing::warn!(device_id = %ev.device_id, "event feed full, dropping event");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            None => false,
        }
    }

    /// Whether a listener is currently attached
    pub fn is_attached(&self) -> bool {
        self.feed.lock().is_some()
    }
}

#[async_trait]
impl EventSource for PushEventSource {
    async fn attach(&self) -> Result<mpsc::Receiver<DeviceEvent>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        *self.feed.lock() = Some(tx);
        tracing::debug!("event source attached");
        Ok(rx)
    }

    async fn detach(&self) {
        self.feed.lock().take();
        tracing::debug!("event source detached");
    }
}
