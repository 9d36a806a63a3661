//! Event fan-out broker
//!
//! Turns the single upstream [`EventSource`] feed into N independent
//! subscriber queues. Delivery is non-blocking per subscriber: a full
//! queue drops the newest event for that subscriber only, so a slow or
//! disconnected consumer can never stall the source or its peers.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::DeviceEvent;
use crate::protocol::EventSource;

struct SubscriberEntry {
    /// Deliver only events from this device; `None` means all devices
    filter: Option<String>,
    tx: mpsc::Sender<DeviceEvent>,
    cancel: CancellationToken,
}

/// Handle returned to a subscriber.
///
/// Dropping the handle cancels the subscription; the broker prunes the
/// dead entry on the next delivery attempt.
pub struct Subscription {
    /// Subscriber ID, needed for an explicit unsubscribe
    pub id: String,
    receiver: mpsc::Receiver<DeviceEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Receive the next event; `None` once the queue is closed
    pub async fn recv(&mut self) -> Option<DeviceEvent> {
        self.receiver.recv().await
    }

    /// Receive without waiting
    pub fn try_recv(&mut self) -> Option<DeviceEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Fans one upstream event feed out to independent subscriber queues.
///
/// The broker attaches to the upstream only on the 0 -> 1 subscriber
/// transition and detaches again on 1 -> 0, so an idle broker puts no load
/// on the source.
pub struct EventBroker {
    source: Arc<dyn EventSource>,
    subscribers: RwLock<HashMap<String, SubscriberEntry>>,
    /// Cancellation scope of the running pump task, if attached
    pump: Mutex<Option<CancellationToken>>,
    /// Handle to ourselves for the pump task; weak so the broker can drop
    weak_self: Weak<EventBroker>,
}

impl EventBroker {
    /// Create a broker over the given upstream source
    pub fn new(source: Arc<dyn EventSource>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            source,
            subscribers: RwLock::new(HashMap::new()),
            pump: Mutex::new(None),
            weak_self: weak.clone(),
        })
    }

    /// Register a subscriber.
    ///
    /// `device_filter` limits delivery to one device; an empty filter
    /// receives everything. `capacity` bounds the subscriber's queue.
    /// Re-using an existing ID replaces the previous subscription.
    pub async fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        device_filter: Option<String>,
        capacity: usize,
    ) -> Result<Subscription> {
        let subscriber_id = subscriber_id.into();
        let filter = device_filter.filter(|f| !f.is_empty());
        let (tx, receiver) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();

        let first = {
            let mut subscribers = self.subscribers.write().await;
            let was_empty = subscribers.is_empty();
            if let Some(old) = subscribers.insert(
                subscriber_id.clone(),
                SubscriberEntry {
                    filter,
                    tx,
                    cancel: cancel.clone(),
                },
            ) {
                old.cancel.cancel();
            }
            was_empty
        };

        if first {
            if let Err(e) = self.attach_upstream().await {
                // Without the upstream the subscription is useless; undo it
                self.subscribers.write().await.remove(&subscriber_id);
                return Err(e);
            }
        }

        tracing::debug!(subscriber_id = %subscriber_id, "subscriber registered");
        Ok(Subscription {
            id: subscriber_id,
            receiver,
            cancel,
        })
    }

    /// Remove a subscriber and close its queue.
    ///
    /// Unknown IDs are a silent no-op.
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        let now_empty = {
            let mut subscribers = self.subscribers.write().await;
            match subscribers.remove(subscriber_id) {
                Some(entry) => {
                    entry.cancel.cancel();
                    subscribers.is_empty()
                }
                None => return,
            }
        };

        tracing::debug!(subscriber_id = %subscriber_id, "subscriber removed");
        if now_empty {
            self.detach_upstream().await;
        }
    }

    /// Deliver one upstream event to every matching subscriber.
    ///
    /// Per-subscriber: cancelled scopes are skipped, filter mismatches are
    /// skipped, and a full queue drops the event for that subscriber only.
    pub async fn on_event(&self, event: DeviceEvent) {
        let mut dead: Vec<String> = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            for (id, entry) in subscribers.iter() {
                if entry.cancel.is_cancelled() {
                    // Scope already done - no delivery, and the entry is dead
                    dead.push(id.clone());
                    continue;
                }
                if let Some(filter) = &entry.filter {
                    if filter != &event.device_id {
                        continue;
                    }
                }
                match entry.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(
                            subscriber_id = %id,
                            device_id = %event.device_id,
                            "subscriber queue full, dropping event"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dead.push(id.clone());
                    }
                }
            }
        }

        for id in dead {
            self.unsubscribe(&id).await;
        }
    }

    /// Point-in-time subscriber count
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Attach to the upstream source and start pumping its feed.
    async fn attach_upstream(&self) -> Result<()> {
        let mut pump = self.pump.lock().await;
        if pump.is_some() {
            return Ok(());
        }

        let mut feed = self.source.attach().await?;
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();
        let broker = self.weak_self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    event = feed.recv() => match event {
                        Some(event) => {
                            let Some(broker) = broker.upgrade() else { break };
                            broker.on_event(event).await;
                        }
                        None => {
                            tracing::warn!("upstream event feed closed");
                            break;
                        }
                    }
                }
            }
        });

        *pump = Some(cancel);
        tracing::info!("event broker attached to upstream");
        Ok(())
    }

    /// Stop the pump and detach from the upstream source.
    ///
    /// Only cancels the pump's scope - the pump itself may be the caller
    /// (pruning the last dead subscriber), so it is never joined here.
    async fn detach_upstream(&self) {
        if let Some(cancel) = self.pump.lock().await.take() {
            cancel.cancel();
        }
        self.source.detach().await;
        tracing::info!("event broker detached from upstream");
    }
}
