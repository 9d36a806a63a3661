//! ffmpeg subprocess supervision
//!
//! Each transcoding session runs one ffmpeg process that pulls the device
//! stream and continuously rewrites a bounded HLS live window into the
//! session directory. The process is spawned here; lifecycle (exit watch,
//! cancellation kill) is driven by the session manager.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use camgrid_core::{Error, Result};

/// Name of the playlist file inside every session directory
pub const PLAYLIST_NAME: &str = "index.m3u8";

/// ffmpeg invocation settings
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,

    /// HLS segment duration in seconds
    pub segment_seconds: u32,

    /// Segments kept in the live window; older ones are deleted by ffmpeg
    pub segment_window: u32,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            segment_seconds: 2,
            segment_window: 6,
        }
    }
}

/// Spawns supervised ffmpeg processes for transcoding sessions
#[derive(Debug, Clone)]
pub struct Transcoder {
    config: TranscoderConfig,
}

impl Transcoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Build the ffmpeg argument list for one session.
    ///
    /// The live window is bounded: fixed segment duration, fixed list
    /// size, oldest segments deleted as the window slides.
    fn args(&self, input_url: &str, out_dir: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "warning".into(),
            "-nostdin".into(),
        ];
        if input_url.starts_with("rtsp://") {
            args.push("-rtsp_transport".into());
            args.push("tcp".into());
        }
        args.extend([
            "-i".into(),
            input_url.into(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-tune".into(),
            "zerolatency".into(),
            "-c:a".into(),
            "aac".into(),
            "-f".into(),
            "hls".into(),
            "-hls_time".into(),
            self.config.segment_seconds.to_string(),
            "-hls_list_size".into(),
            self.config.segment_window.to_string(),
            "-hls_flags".into(),
            "delete_segments+append_list".into(),
            "-hls_segment_filename".into(),
            out_dir.join("seg-%05d.ts").to_string_lossy().into_owned(),
            out_dir.join(PLAYLIST_NAME).to_string_lossy().into_owned(),
        ]);
        args
    }

    /// Launch ffmpeg for one session.
    ///
    /// stderr is piped so the caller can drain it; a process that cannot
    /// be launched is an upstream failure and the session never starts.
    pub fn spawn(&self, input_url: &str, out_dir: &Path) -> Result<Child> {
        Command::new(&self.config.ffmpeg_path)
            .args(self.args(input_url, out_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::upstream(format!(
                    "failed to launch {}: {}",
                    self.config.ffmpeg_path, e
                ))
            })
    }

    /// Check whether the configured ffmpeg binary can be executed
    pub async fn check_available(&self) -> bool {
        Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Continuously drain a transcoder's stderr so the process never blocks on
/// a full pipe buffer. Lines surface in our logs at debug level.
pub fn drain_stderr(stderr: ChildStderr, session_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(session_id = %session_id, "ffmpeg: {}", line);
        }
        tracing::debug!(session_id = %session_id, "ffmpeg stderr closed");
    })
}
