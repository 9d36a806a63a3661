//! Streaming endpoints: direct live proxy and HLS session artifacts

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use camgrid_core::StreamKind;

use super::{error_response, AppState, ErrorResponse};
use crate::streaming::transcoder::PLAYLIST_NAME;

/// Query parameters selecting a device stream
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Locator kind; the proxy wants `mjpeg`, transcoding wants `rtsp`
    #[serde(default = "default_kind")]
    pub kind: StreamKind,

    /// Device channel
    #[serde(default = "default_channel")]
    pub channel: u32,
}

fn default_kind() -> StreamKind {
    StreamKind::Rtsp
}

fn default_channel() -> u32 {
    1
}

/// Relay a device's live stream for the lifetime of this request
///
/// GET /api/devices/:id/live?kind=mjpeg&channel=1
pub async fn live_proxy(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let client = match state.connections.get_device(&device_id).await {
        Ok(client) => client,
        Err(e) => return error_response(&e).into_response(),
    };

    let stream = match state.proxy.open(&client, query.kind, query.channel).await {
        Ok(stream) => stream,
        Err(e) => return error_response(&e).into_response(),
    };

    let content_type = stream
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());

    (
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(stream.bytes),
    )
        .into_response()
}

/// Start a transcoding session
///
/// POST /api/devices/:id/streams?kind=rtsp&channel=1
pub async fn start_transcode(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    match state
        .streams
        .start_transcode(&device_id, query.kind, query.channel)
        .await
    {
        Ok(descriptor) => (StatusCode::CREATED, Json(descriptor)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// Stop a session
///
/// DELETE /api/streams/:sid
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.streams.stop_session(&session_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// Serve a session artifact: the playlist or one segment
///
/// GET /api/streams/:sid/:artifact
pub async fn get_artifact(
    State(state): State<AppState>,
    Path((session_id, artifact)): Path<(String, String)>,
) -> Response {
    let path = if artifact == PLAYLIST_NAME {
        state.streams.playlist_path(&session_id).await
    } else {
        state.streams.segment_path(&session_id, &artifact).await
    };

    let path = match path {
        Ok(path) => path,
        Err(e) => return error_response(&e).into_response(),
    };

    let content_type = if artifact.ends_with(".m3u8") {
        "application/vnd.apple.mpegurl"
    } else {
        "video/mp2t"
    };

    match tokio::fs::read(&path).await {
        Ok(contents) => (
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            contents,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // Session exists but ffmpeg has not produced the artifact yet
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "artifact_not_ready".to_string(),
                    message: format!("{} is not available yet", artifact),
                }),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "internal_error".to_string(),
                message: e.to_string(),
            }),
        )
            .into_response(),
    }
}
