//! HTTP device protocol client
//!
//! Production [`CameraProtocol`] implementation for devices exposing the
//! common HTTP control API (JSON over `/api/...`, bearer session token).
//! Wire details stay contained here - the rest of the core only sees the
//! trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::protocol::{CameraProtocol, DeviceInfo, ProtocolFactory, StreamKind};

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct StreamUriResponse {
    url: String,
}

/// One device's HTTP control channel
pub struct HttpCamera {
    device_id: String,
    base: String,
    username: String,
    password: String,
    http: reqwest::Client,
    /// Session token from the last successful login
    token: RwLock<Option<String>>,
}

impl HttpCamera {
    /// Build a client for the descriptor. No network contact happens here.
    pub fn new(descriptor: &DeviceDescriptor, connect_timeout: Duration) -> Result<Self> {
        let scheme = if descriptor.use_tls { "https" } else { "http" };
        let base = format!("{}://{}:{}", scheme, descriptor.host, descriptor.port);

        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(descriptor.accept_invalid_certs)
            .build()
            .map_err(|e| Error::connection(&descriptor.id, e.to_string()))?;

        Ok(Self {
            device_id: descriptor.id.clone(),
            base,
            username: descriptor.username.clone(),
            password: descriptor.password.clone(),
            http,
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn bearer(&self) -> Result<String> {
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::connection(&self.device_id, "not logged in"))
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Error::connection(
                &self.device_id,
                format!("device returned {}", response.status()),
            ))
        }
    }
}

#[async_trait]
impl CameraProtocol for HttpCamera {
    async fn login(&self) -> Result<()> {
        let response = self
            .http
            .post(self.url("/api/login"))
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await
            .map_err(|e| Error::connection(&self.device_id, e.to_string()))?;

        let body: LoginResponse = self
            .check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::connection(&self.device_id, e.to_string()))?;

        *self.token.write().await = Some(body.token);
        tracing::debug!(device_id = %self.device_id, "logged in");
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let token = match self.token.write().await.take() {
            Some(t) => t,
            None => return Ok(()),
        };

        let response = self
            .http
            .post(self.url("/api/logout"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::connection(&self.device_id, e.to_string()))?;
        self.check_status(response).await?;
        Ok(())
    }

    async fn probe(&self) -> Result<DeviceInfo> {
        let response = self
            .http
            .get(self.url("/api/system/info"))
            .bearer_auth(self.bearer().await?)
            .send()
            .await
            .map_err(|e| Error::connection(&self.device_id, e.to_string()))?;

        self.check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::connection(&self.device_id, e.to_string()))
    }

    async fn stream_uri(&self, kind: StreamKind, channel: u32) -> Result<String> {
        let response = self
            .http
            .get(self.url(&format!("/api/streams/{}/{}", kind, channel)))
            .bearer_auth(self.bearer().await?)
            .send()
            .await
            .map_err(|e| Error::connection(&self.device_id, e.to_string()))?;

        let body: StreamUriResponse = self
            .check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::connection(&self.device_id, e.to_string()))?;
        Ok(body.url)
    }

    async fn control(
        &self,
        command: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let response = self
            .http
            .post(self.url("/api/control"))
            .bearer_auth(self.bearer().await?)
            .json(&serde_json::json!({
                "command": command,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| Error::connection(&self.device_id, e.to_string()))?;

        self.check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::connection(&self.device_id, e.to_string()))
    }
}

/// Factory producing [`HttpCamera`] clients
pub struct HttpCameraFactory {
    connect_timeout: Duration,
}

impl HttpCameraFactory {
    /// Create a factory; `connect_timeout` bounds TCP/TLS setup per request
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl ProtocolFactory for HttpCameraFactory {
    fn create(&self, descriptor: &DeviceDescriptor) -> Result<Arc<dyn CameraProtocol>> {
        Ok(Arc::new(HttpCamera::new(descriptor, self.connect_timeout)?))
    }
}
