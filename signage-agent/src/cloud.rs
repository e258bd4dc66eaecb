//! Cloud API client
//!
//! Wire types and transport for every call the player makes:
//! - pairing code issuance and pairing status polling
//! - remote config fetch (channel assignment, settings, commands)
//! - heartbeat push
//! - manifest and content unit download
//!
//! [`CloudApi`] is the seam the services depend on; [`HttpCloudClient`] is the
//! reqwest implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::content::ContentUnit;
use crate::identity::DeviceIdentity;
use crate::manifest::Manifest;
use crate::service::HeartbeatSample;

/// Header carrying the device credential
pub const DEVICE_TOKEN_HEADER: &str = "X-Device-Token";

/// Failure talking to the cloud
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CloudError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for CloudError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CloudError::Timeout
        } else if e.is_decode() {
            CloudError::Decode(e.to_string())
        } else {
            CloudError::Transport(e.to_string())
        }
    }
}

/// `GET /players/pairing-code`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingCodeResponse {
    pub code: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// `GET /players/pairing-status?code=`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairingStatusResponse {
    pub paired: bool,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub device_token: Option<String>,
}

/// `GET /players/{player_id}/config`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub player_id: String,
    #[serde(default)]
    pub channel: Option<ChannelAssignment>,
    #[serde(default)]
    pub settings: RemoteSettings,
    #[serde(default)]
    pub commands: Vec<RemoteCommand>,
}

impl RemoteConfig {
    /// Config used when the cloud cannot be reached: no channel, nothing to do
    pub fn safe_default(player_id: &str) -> Self {
        Self {
            player_id: player_id.to_string(),
            channel: None,
            settings: RemoteSettings::default(),
            commands: Vec::new(),
        }
    }
}

/// Channel the player is assigned to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAssignment {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub manifest_url: Option<String>,
}

impl ChannelAssignment {
    /// Explicit manifest URL, or the conventional one under `api_base_url`
    pub fn manifest_url(&self, api_base_url: &str) -> String {
        match &self.manifest_url {
            Some(url) => url.clone(),
            None => format!("{}/channels/{}/manifest", api_base_url.trim_end_matches('/'), self.id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default)]
    pub orientation: Option<String>,
    #[serde(default)]
    pub volume: Option<u8>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Command queued for the player by the console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCommand {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", alias = "command")]
    pub command_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Commands the runtime knows how to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Reload,
    ClearCache,
    Unpair,
    Unknown,
}

impl RemoteCommand {
    pub fn action(&self) -> CommandAction {
        match self.command_type.to_ascii_lowercase().as_str() {
            "reload" | "refresh" | "reload_manifest" => CommandAction::Reload,
            "clear_cache" | "clear-cache" => CommandAction::ClearCache,
            "unpair" | "reset" => CommandAction::Unpair,
            _ => CommandAction::Unknown,
        }
    }
}

/// Everything the engine asks of the cloud
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn request_pairing_code(&self) -> Result<PairingCodeResponse, CloudError>;

    async fn pairing_status(&self, code: &str) -> Result<PairingStatusResponse, CloudError>;

    async fn fetch_config(&self, identity: &DeviceIdentity) -> Result<RemoteConfig, CloudError>;

    async fn send_heartbeat(
        &self,
        identity: &DeviceIdentity,
        sample: &HeartbeatSample,
    ) -> Result<(), CloudError>;

    async fn fetch_manifest(
        &self,
        manifest_url: &str,
        identity: Option<&DeviceIdentity>,
    ) -> Result<Manifest, CloudError>;

    async fn fetch_app(&self, identity: &DeviceIdentity, app_id: &str) -> Result<ContentUnit, CloudError>;

    /// Base URL used to derive conventional endpoints
    fn base_url(&self) -> &str;
}

/// reqwest-backed [`CloudApi`]
#[derive(Clone)]
pub struct HttpCloudClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCloudClient {
    pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> Result<Self, CloudError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Underlying HTTP client, shared with the content fetcher
    pub fn http(&self) -> reqwest::Client {
        self.client.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CloudError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl CloudApi for HttpCloudClient {
    async fn request_pairing_code(&self) -> Result<PairingCodeResponse, CloudError> {
        let request = self.client.get(self.url("/players/pairing-code"));
        self.send_json(request).await
    }

    async fn pairing_status(&self, code: &str) -> Result<PairingStatusResponse, CloudError> {
        let request = self
            .client
            .get(self.url("/players/pairing-status"))
            .query(&[("code", code)]);
        self.send_json(request).await
    }

    async fn fetch_config(&self, identity: &DeviceIdentity) -> Result<RemoteConfig, CloudError> {
        let request = self
            .client
            .get(self.url(&format!("/players/{}/config", identity.player_id)))
            .header(DEVICE_TOKEN_HEADER, &identity.device_token);
        self.send_json(request).await
    }

    async fn send_heartbeat(
        &self,
        identity: &DeviceIdentity,
        sample: &HeartbeatSample,
    ) -> Result<(), CloudError> {
        let response = self
            .client
            .post(self.url(&format!("/players/{}/heartbeat", identity.player_id)))
            .header(DEVICE_TOKEN_HEADER, &identity.device_token)
            .json(sample)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        debug!("Heartbeat accepted ({})", status);
        Ok(())
    }

    async fn fetch_manifest(
        &self,
        manifest_url: &str,
        identity: Option<&DeviceIdentity>,
    ) -> Result<Manifest, CloudError> {
        let mut request = self.client.get(manifest_url);
        if let Some(identity) = identity {
            request = request.header(DEVICE_TOKEN_HEADER, &identity.device_token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Status {
                status: status.as_u16(),
                url: manifest_url.to_string(),
            });
        }
        let body = response.bytes().await?;
        Manifest::from_json(&body).map_err(|e| CloudError::Decode(e.to_string()))
    }

    async fn fetch_app(&self, identity: &DeviceIdentity, app_id: &str) -> Result<ContentUnit, CloudError> {
        let request = self
            .client
            .get(self.url(&format!("/apps/{}", app_id)))
            .header(DEVICE_TOKEN_HEADER, &identity.device_token);
        self.send_json(request).await
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
