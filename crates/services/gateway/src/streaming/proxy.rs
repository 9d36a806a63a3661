//! Direct live-stream proxy
//!
//! Pass-through relay of a device's HTTP live stream (MJPEG and friends).
//! No session bookkeeping: the relay lives exactly as long as the client
//! request, and dropping the returned stream cancels the upstream pull.

use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use camgrid_core::{DeviceClient, Error, Result, StreamKind};

/// Byte stream relayed from a device
pub struct LiveStream {
    /// Upstream content type, forwarded to the client when present
    pub content_type: Option<String>,

    /// The relayed bytes; ends when the upstream closes or errors
    pub bytes: Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>>,
}

impl std::fmt::Debug for LiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStream")
            .field("content_type", &self.content_type)
            .field("bytes", &"<stream>")
            .finish()
    }
}

/// Opens upstream connections for direct proxying
#[derive(Clone)]
pub struct LiveProxy {
    http: reqwest::Client,
}

impl LiveProxy {
    /// Build the proxy's HTTP client.
    ///
    /// No overall request timeout - live streams are unbounded - but
    /// connection setup is bounded.
    pub fn new(connect_timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::upstream(e.to_string()))?;
        Ok(Self { http })
    }

    /// Resolve the device's locator and open the upstream stream.
    ///
    /// The locator resolution goes through the breaker-guarded client; a
    /// non-success upstream response is terminal.
    pub async fn open(
        &self,
        client: &DeviceClient,
        kind: StreamKind,
        channel: u32,
    ) -> Result<LiveStream> {
        let url = client.stream_uri(kind, channel).await?;

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::upstream(format!("connecting to {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::upstream(format!(
                "upstream returned {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)))
            .boxed();

        tracing::debug!(device_id = %client.id(), url = %url, "live proxy opened");
        Ok(LiveStream {
            content_type,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use camgrid_core::{CameraProtocol, CircuitBreaker, DeviceDescriptor, DeviceInfo};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    struct FixedUriCamera {
        uri: String,
    }

    #[async_trait]
    impl CameraProtocol for FixedUriCamera {
        async fn login(&self) -> camgrid_core::Result<()> {
            Ok(())
        }
        async fn logout(&self) -> camgrid_core::Result<()> {
            Ok(())
        }
        async fn probe(&self) -> camgrid_core::Result<DeviceInfo> {
            Ok(DeviceInfo::default())
        }
        async fn stream_uri(&self, _kind: StreamKind, _channel: u32) -> camgrid_core::Result<String> {
            Ok(self.uri.clone())
        }
        async fn control(
            &self,
            _command: &str,
            _params: serde_json::Value,
        ) -> camgrid_core::Result<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
    }

    fn device_client(uri: &str) -> DeviceClient {
        DeviceClient::new(
            DeviceDescriptor {
                id: "cam-1".to_string(),
                host: "10.0.0.10".to_string(),
                port: 80,
                username: "admin".to_string(),
                password: "pw".to_string(),
                use_tls: false,
                accept_invalid_certs: false,
                model: None,
                firmware: None,
            },
            Arc::new(FixedUriCamera {
                uri: uri.to_string(),
            }),
            CircuitBreaker::new(3),
        )
    }

    /// One-shot HTTP stub answering with a canned response
    async fn stub_server(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                use tokio::io::AsyncReadExt;
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}/stream", addr)
    }

    #[tokio::test]
    async fn test_proxy_relays_upstream_bytes() {
        let url = stub_server(
            "HTTP/1.1 200 OK\r\nContent-Type: video/x-motion-jpeg\r\nContent-Length: 9\r\n\r\nframedata",
        )
        .await;
        let client = device_client(&url);
        let proxy = LiveProxy::new(std::time::Duration::from_secs(2)).unwrap();

        let mut stream = proxy.open(&client, StreamKind::Mjpeg, 1).await.unwrap();
        assert_eq!(stream.content_type.as_deref(), Some("video/x-motion-jpeg"));

        let mut body = Vec::new();
        while let Some(chunk) = stream.bytes.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"framedata");
    }

    #[tokio::test]
    async fn test_non_success_upstream_is_terminal() {
        let url = stub_server("HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n").await;
        let client = device_client(&url);
        let proxy = LiveProxy::new(std::time::Duration::from_secs(2)).unwrap();

        let err = proxy.open(&client, StreamKind::Mjpeg, 1).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
    }

    #[tokio::test]
    async fn test_open_circuit_blocks_proxy() {
        use camgrid_core::{
            ConnectionConfig, ConnectionManager, DeviceStatus, ProtocolFactory, StatusSink,
        };

        struct DeadCamera;
        #[async_trait]
        impl CameraProtocol for DeadCamera {
            async fn login(&self) -> camgrid_core::Result<()> {
                Ok(())
            }
            async fn logout(&self) -> camgrid_core::Result<()> {
                Ok(())
            }
            async fn probe(&self) -> camgrid_core::Result<DeviceInfo> {
                Err(Error::connection("cam-1", "unreachable"))
            }
            async fn stream_uri(
                &self,
                _kind: StreamKind,
                _channel: u32,
            ) -> camgrid_core::Result<String> {
                Ok("http://10.255.255.1/never".to_string())
            }
            async fn control(
                &self,
                _command: &str,
                _params: serde_json::Value,
            ) -> camgrid_core::Result<serde_json::Value> {
                Ok(serde_json::json!({}))
            }
        }
        struct DeadFactory;
        impl ProtocolFactory for DeadFactory {
            fn create(
                &self,
                _d: &DeviceDescriptor,
            ) -> camgrid_core::Result<Arc<dyn CameraProtocol>> {
                Ok(Arc::new(DeadCamera))
            }
        }
        struct NullSink;
        #[async_trait]
        impl StatusSink for NullSink {
            async fn update_status(
                &self,
                _device_id: &str,
                _status: DeviceStatus,
                _at: chrono::DateTime<chrono::Utc>,
            ) {
            }
        }

        let manager = ConnectionManager::new(
            Arc::new(DeadFactory),
            Arc::new(NullSink),
            ConnectionConfig {
                max_retries: 3,
                ..ConnectionConfig::default()
            },
        );
        manager
            .add_device(DeviceDescriptor {
                id: "cam-1".to_string(),
                host: "10.0.0.10".to_string(),
                port: 80,
                username: "admin".to_string(),
                password: "pw".to_string(),
                use_tls: false,
                accept_invalid_certs: false,
                model: None,
                firmware: None,
            })
            .await
            .unwrap();
        for _ in 0..3 {
            manager.health_check_all().await;
        }

        let client = manager.get_device("cam-1").await.unwrap();
        let proxy = LiveProxy::new(std::time::Duration::from_secs(2)).unwrap();
        let err = proxy.open(&client, StreamKind::Mjpeg, 1).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { .. }));
    }
}
