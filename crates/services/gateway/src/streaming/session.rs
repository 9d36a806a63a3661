//! Transcoding session lifecycle
//!
//! Tracks every active HLS session, refreshes TTLs on artifact reads, and
//! tears sessions down on explicit stop, subprocess exit, or expiry. Stop,
//! exit, and reap can race freely: removal from the registry decides the
//! winner, the losers see an absent session and do nothing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use camgrid_core::{ConnectionManager, Error, Result, StreamKind};

use super::transcoder::{drain_stderr, Transcoder, TranscoderConfig, PLAYLIST_NAME};

/// Settings for the session manager
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Root directory for per-session output
    pub data_dir: PathBuf,

    /// Public base URL used when building playlist URLs
    pub public_url: String,

    /// Idle TTL; refreshed by every playlist/segment read
    pub session_ttl: Duration,

    /// Reaper interval
    pub reaper_interval: Duration,

    /// ffmpeg settings
    pub transcoder: TranscoderConfig,
}

#[derive(Debug, Clone, Copy)]
struct Expiry {
    last_access: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// One active transcoding session
pub struct StreamSession {
    /// Session ID (`hls_` + 12 hex chars)
    pub id: String,

    /// Owning device
    pub device_id: String,

    /// Stream kind the locator was resolved for
    pub kind: StreamKind,

    /// Device channel
    pub channel: u32,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Private output directory holding playlist and segments
    pub dir: PathBuf,

    expiry: parking_lot::Mutex<Expiry>,
    cancel: CancellationToken,
}

impl StreamSession {
    fn new(
        id: String,
        device_id: String,
        kind: StreamKind,
        channel: u32,
        dir: PathBuf,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            device_id,
            kind,
            channel,
            started_at: now,
            dir,
            expiry: parking_lot::Mutex::new(Expiry {
                last_access: now,
                expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Refresh `last_access` and push `expires_at` out by the TTL
    fn touch(&self, ttl: Duration) {
        let mut expiry = self.expiry.lock();
        let now = Utc::now();
        expiry.last_access = now;
        expiry.expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();
    }

    /// When the session expires unless accessed again
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expiry.lock().expires_at
    }

    /// Last artifact read (or creation time)
    pub fn last_access(&self) -> DateTime<Utc> {
        self.expiry.lock().last_access
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry.lock().expires_at
    }

    /// Path of the live playlist (may not exist yet right after start)
    pub fn playlist_path(&self) -> PathBuf {
        self.dir.join(PLAYLIST_NAME)
    }

    /// Path of a named segment, strictly inside the session directory
    pub fn segment_path(&self, name: &str) -> Result<PathBuf> {
        validate_segment_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Descriptor returned to clients
    pub fn descriptor(&self, public_url: &str) -> SessionDescriptor {
        SessionDescriptor {
            id: self.id.clone(),
            device_id: self.device_id.clone(),
            playlist_url: format!(
                "{}/api/streams/{}/{}",
                public_url.trim_end_matches('/'),
                self.id,
                PLAYLIST_NAME
            ),
            started_at: self.started_at,
            expires_at: self.expires_at(),
        }
    }
}

/// Session descriptor returned by the start endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SessionDescriptor {
    /// Session ID
    pub id: String,

    /// Owning device
    pub device_id: String,

    /// URL the player should poll for the playlist
    pub playlist_url: String,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// When the session expires unless accessed
    pub expires_at: DateTime<Utc>,
}

/// Artifact names must stay inside the session directory: plain file
/// names only, no separators, no dot-prefixed names.
fn validate_segment_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 255
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidPath {
            name: name.to_string(),
        })
    }
}

/// Owns every active transcoding session.
///
/// The registry lock covers structural changes; each session's expiry
/// fields sit behind the session's own lock so reads of unrelated
/// sessions never contend.
pub struct StreamSessionManager {
    sessions: RwLock<HashMap<String, Arc<StreamSession>>>,
    connections: Arc<ConnectionManager>,
    transcoder: Transcoder,
    config: StreamingConfig,
    /// Handle to ourselves for exit watchers; weak so shutdown can drop us
    weak_self: std::sync::Weak<StreamSessionManager>,
}

impl StreamSessionManager {
    pub fn new(connections: Arc<ConnectionManager>, config: StreamingConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            sessions: RwLock::new(HashMap::new()),
            connections,
            transcoder: Transcoder::new(config.transcoder.clone()),
            config,
            weak_self: weak.clone(),
        })
    }

    /// The transcoder, for startup dependency checks
    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Start a transcoding session for a device stream.
    ///
    /// Resolves the locator through the breaker-guarded client, launches
    /// ffmpeg into a fresh private directory, and registers the session.
    /// Returns immediately - the playlist appears once ffmpeg has written
    /// the first segments.
    pub async fn start_transcode(
        &self,
        device_id: &str,
        kind: StreamKind,
        channel: u32,
    ) -> Result<SessionDescriptor> {
        let client = self.connections.get_device(device_id).await?;
        let input_url = client.stream_uri(kind, channel).await?;

        let id = format!("hls_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        let dir = self.config.data_dir.join(&id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut child = match self.transcoder.spawn(&input_url, &dir) {
            Ok(child) => child,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&dir).await;
                return Err(e);
            }
        };

        let session = Arc::new(StreamSession::new(
            id.clone(),
            device_id.to_string(),
            kind,
            channel,
            dir,
            self.config.session_ttl,
        ));

        if let Some(stderr) = child.stderr.take() {
            drain_stderr(stderr, id.clone());
        }

        self.sessions.write().await.insert(id.clone(), session.clone());

        // Exit watcher: waits for ffmpeg to finish on its own, or kills it
        // when the session's scope is cancelled. Either way the session is
        // gone afterwards.
        let manager = self.weak_self.clone();
        let watched = session.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watched.cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        tracing::debug!(session_id = %watched.id, error = %e, "transcoder kill failed");
                    }
                    let _ = child.wait().await;
                }
                status = child.wait() => {
                    match status {
                        Ok(status) => tracing::info!(
                            session_id = %watched.id,
                            code = ?status.code(),
                            "transcoder exited"
                        ),
                        Err(e) => tracing::warn!(
                            session_id = %watched.id,
                            error = %e,
                            "failed to wait for transcoder"
                        ),
                    }
                    if let Some(manager) = manager.upgrade() {
                        manager.teardown(&watched.id, "transcoder exit").await;
                    }
                }
            }
        });

        tracing::info!(
            session_id = %id,
            device_id = %device_id,
            kind = %kind,
            channel,
            "transcoding session started"
        );
        Ok(session.descriptor(&self.config.public_url))
    }

    async fn get(&self, session_id: &str) -> Result<Arc<StreamSession>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    /// Path of a session's playlist; refreshes the TTL
    pub async fn playlist_path(&self, session_id: &str) -> Result<PathBuf> {
        let session = self.get(session_id).await?;
        session.touch(self.config.session_ttl);
        Ok(session.playlist_path())
    }

    /// Path of a session segment; refreshes the TTL and rejects names that
    /// would escape the session directory
    pub async fn segment_path(&self, session_id: &str, name: &str) -> Result<PathBuf> {
        let session = self.get(session_id).await?;
        session.touch(self.config.session_ttl);
        session.segment_path(name)
    }

    /// Descriptor of an active session (no TTL refresh)
    pub async fn describe(&self, session_id: &str) -> Result<SessionDescriptor> {
        Ok(self.get(session_id).await?.descriptor(&self.config.public_url))
    }

    /// Stop a session explicitly.
    ///
    /// Removal from the registry is the linearization point: racing with
    /// the exit watcher or the reaper, exactly one path performs the
    /// teardown and the session is reported unknown afterwards.
    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(session_id)
                .ok_or_else(|| Error::session_not_found(session_id))?
        };
        self.cleanup(&session, "explicit stop").await;
        Ok(())
    }

    /// Internal teardown used by the exit watcher and the reaper; absent
    /// sessions are a no-op.
    async fn teardown(&self, session_id: &str, reason: &str) {
        let session = self.sessions.write().await.remove(session_id);
        if let Some(session) = session {
            self.cleanup(&session, reason).await;
        }
    }

    /// Cancel the subprocess scope and delete the output directory.
    ///
    /// Best-effort: the watcher kills ffmpeg concurrently, and a failure
    /// to delete never blocks the teardown from completing.
    async fn cleanup(&self, session: &StreamSession, reason: &str) {
        session.cancel.cancel();
        if let Err(e) = tokio::fs::remove_dir_all(&session.dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    session_id = %session.id,
                    error = %e,
                    "failed to remove session directory"
                );
            }
        }
        tracing::info!(session_id = %session.id, reason, "session stopped");
    }

    /// Tear down every session whose TTL has lapsed
    pub async fn reap_expired(&self) {
        let now = Utc::now();
        let expired: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, s)| s.is_expired(now))
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in expired {
            tracing::info!(session_id = %id, "session TTL expired");
            self.teardown(&id, "ttl expired").await;
        }
    }

    /// Run the periodic reaper until shutdown
    pub async fn run_reaper_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.config.reaper_interval.as_secs(),
            "session reaper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.reaper_interval) => {
                    self.reap_expired().await;
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("session reaper shutting down");
                    break;
                }
            }
        }
    }

    /// Tear down every session. Called on service shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.teardown(&id, "shutdown").await;
        }
    }

    /// Number of active sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Test hook: register a session that has no subprocess behind it
    #[cfg(test)]
    async fn insert_bare_session(
        &self,
        id: &str,
        device_id: &str,
        dir: &std::path::Path,
    ) -> Arc<StreamSession> {
        let session = Arc::new(StreamSession::new(
            id.to_string(),
            device_id.to_string(),
            StreamKind::Rtsp,
            1,
            dir.join(id),
            self.config.session_ttl,
        ));
        tokio::fs::create_dir_all(&session.dir).await.unwrap();
        self.sessions
            .write()
            .await
            .insert(id.to_string(), session.clone());
        session
    }
}
