//! Agent configuration
//!
//! Handles:
//! - Cloud endpoint and request timeout
//! - Playback tuning (preload concurrency, content timeout, frame pacing)
//! - Heartbeat, pairing and config refresh intervals
//! - Where the device identity is stored
//!
//! Read from `<config dir>/signage-agent/config.toml`; every field has a default
//! so a missing or partial file is fine. `SIGNAGE_API_URL` overrides the cloud URL.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::composer::ComposerSettings;
use crate::identity::PairingTimings;
use crate::store::{FileStore, IdentityStore, KeyringStore};

pub const API_URL_ENV: &str = "SIGNAGE_API_URL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub cloud: CloudConfig,
    pub playback: PlaybackConfig,
    pub intervals: IntervalConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub preload_concurrency: usize,
    pub content_timeout_secs: u64,
    pub frame_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    pub heartbeat_secs: u64,
    pub pairing_poll_secs: u64,
    pub pairing_timeout_secs: u64,
    pub config_refresh_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Used by the `file` backend; defaults to `<config dir>/signage-agent/identity.json`
    pub identity_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Keyring,
    File,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080/api".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            preload_concurrency: 4,
            content_timeout_secs: 30,
            frame_interval_ms: 40,
        }
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            pairing_poll_secs: 3,
            pairing_timeout_secs: 15 * 60,
            config_refresh_secs: 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Keyring,
            identity_file: None,
        }
    }
}

impl AgentConfig {
    /// Load config from the OS-specific location, then apply environment overrides
    pub async fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_file_path()?).await?;
        config.apply_env();
        Ok(config)
    }

    /// Load config from `path`, or defaults when the file does not exist
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub async fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn config_dir() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push("signage-agent");
        Ok(path)
    }

    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.cloud.api_base_url = url.trim().to_string();
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud.request_timeout_secs.max(1))
    }

    pub fn content_timeout(&self) -> Duration {
        Duration::from_secs(self.playback.content_timeout_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.heartbeat_secs.max(1))
    }

    pub fn config_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.config_refresh_secs.max(1))
    }

    pub fn pairing_timings(&self) -> PairingTimings {
        PairingTimings {
            poll_interval: Duration::from_secs(self.intervals.pairing_poll_secs.max(1)),
            session_timeout: Duration::from_secs(self.intervals.pairing_timeout_secs),
        }
    }

    pub fn composer_settings(&self) -> ComposerSettings {
        ComposerSettings {
            preload_concurrency: self.playback.preload_concurrency,
            frame_interval: Duration::from_millis(self.playback.frame_interval_ms.max(1)),
        }
    }

    /// Build the configured identity store
    pub fn identity_store(&self) -> Result<Arc<dyn IdentityStore>> {
        let store: Arc<dyn IdentityStore> = match self.storage.backend {
            StorageBackend::Keyring => Arc::new(KeyringStore::default()),
            StorageBackend::File => {
                let path = match &self.storage.identity_file {
                    Some(path) => path.clone(),
                    None => Self::config_dir()?.join("identity.json"),
                };
                Arc::new(FileStore::new(path))
            }
        };
        Ok(store)
    }
}
