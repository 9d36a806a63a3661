//! CamGrid gateway binary
//!
//! Wires the fleet managers together, spawns the background loops, and
//! serves the HTTP API until SIGINT.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use camgrid_core::{ConnectionManager, EventBroker, HttpCameraFactory, LogStatusSink, PushEventSource};
use camgrid_gateway::api::{self, AppState};
use camgrid_gateway::config::GatewayConfig;
use camgrid_gateway::streaming::{LiveProxy, StreamSessionManager, StreamingConfig, TranscoderConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(GatewayConfig::load()?);
    tracing::info!(bind_addr = %config.server.bind_addr, "starting camgrid gateway");

    tokio::fs::create_dir_all(&config.streaming.data_dir).await?;

    let connection_config = config.devices.connection_config();
    let connect_timeout = connection_config.connect_timeout;
    let connections = Arc::new(ConnectionManager::new(
        Arc::new(HttpCameraFactory::new(connect_timeout)),
        Arc::new(LogStatusSink),
        connection_config,
    ));

    let streams = StreamSessionManager::new(
        connections.clone(),
        StreamingConfig {
            data_dir: config.streaming.data_dir.clone(),
            public_url: config.server.public_url.clone(),
            session_ttl: config.streaming.session_ttl(),
            reaper_interval: config.streaming.reaper_interval(),
            transcoder: TranscoderConfig {
                ffmpeg_path: config.streaming.ffmpeg_path.clone(),
                segment_seconds: config.streaming.segment_seconds,
                segment_window: config.streaming.segment_window,
            },
        },
    );

    if !streams.transcoder().check_available().await {
        tracing::warn!(
            ffmpeg_path = %config.streaming.ffmpeg_path,
            "ffmpeg not available - transcoding sessions will fail to start"
        );
    }

    let ingest = Arc::new(PushEventSource::new(config.events.ingest_capacity));
    let broker = EventBroker::new(ingest.clone());

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(connections.clone().run_health_loop(shutdown_tx.subscribe()));
    tokio::spawn(streams.clone().run_reaper_loop(shutdown_tx.subscribe()));

    let state = AppState {
        connections: connections.clone(),
        streams: streams.clone(),
        broker,
        ingest,
        proxy: LiveProxy::new(connect_timeout)?,
        config: config.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "gateway listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the background loops, then release device and session resources
    let _ = shutdown_tx.send(());
    streams.shutdown().await;
    connections.shutdown().await;
    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
