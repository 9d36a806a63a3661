//! Event endpoints: SSE stream, WebSocket stream, device ingest webhook

use std::convert::Infallible;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};

use camgrid_core::DeviceEvent;

use super::{error_response, AppState};

/// Query parameters for a subscription
#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    /// Only deliver events from this device; omit for all devices
    #[serde(default)]
    pub device_id: Option<String>,

    /// Subscriber queue capacity; excess events are dropped
    #[serde(default)]
    pub capacity: Option<usize>,
}

/// Request body for the device ingest webhook
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub device_id: String,
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Whether a listener was attached to receive the event
    pub delivered: bool,
}

#[derive(Debug, Serialize)]
pub struct SubscriberCountResponse {
    pub subscribers: usize,
}

fn subscriber_id() -> String {
    format!("sub_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

/// Live event stream over Server-Sent Events
///
/// GET /api/events/stream?device_id=cam-1&capacity=64
pub async fn events_sse(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
) -> Response {
    let capacity = query
        .capacity
        .unwrap_or(state.config.events.default_queue_capacity);

    let subscription = match state
        .broker
        .subscribe(subscriber_id(), query.device_id, capacity)
        .await
    {
        Ok(subscription) => subscription,
        Err(e) => return error_response(&e).into_response(),
    };

    let stream: std::pin::Pin<
        Box<dyn Stream<Item = Result<Event, Infallible>> + Send>,
    > = Box::pin(async_stream::stream! {
        let mut subscription = subscription;
        while let Some(event) = subscription.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => yield Ok(Event::default().event(event.kind.clone()).data(json)),
                Err(e) => tracing::error!(error = %e, "failed to serialize event"),
            }
        }
    });

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response()
}

/// Live event stream over WebSocket
///
/// GET /api/events/ws?device_id=cam-1&capacity=64
pub async fn events_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state, query))
}

async fn handle_ws(mut socket: WebSocket, state: AppState, query: SubscribeQuery) {
    let capacity = query
        .capacity
        .unwrap_or(state.config.events.default_queue_capacity);
    let id = subscriber_id();

    let mut subscription = match state
        .broker
        .subscribe(id.clone(), query.device_id, capacity)
        .await
    {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::warn!(error = %e, "websocket subscribe failed");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Ignore pings and client chatter
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.broker.unsubscribe(&id).await;
    tracing::debug!(subscriber_id = %id, "websocket subscriber disconnected");
}

/// Webhook devices POST their events to
///
/// POST /api/events/ingest
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> impl IntoResponse {
    let event = DeviceEvent::new(request.device_id, request.kind, request.payload);
    let delivered = state.ingest.publish(event);
    (StatusCode::ACCEPTED, Json(IngestResponse { delivered }))
}

/// Current subscriber count
///
/// GET /api/events/subscribers
pub async fn subscriber_count(State(state): State<AppState>) -> impl IntoResponse {
    Json(SubscriberCountResponse {
        subscribers: state.broker.subscriber_count().await,
    })
}
