//! In-process doubles shared by the unit tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::cache::{CacheError, ContentFetcher, FetchedContent};
use crate::cloud::{CloudApi, CloudError, PairingCodeResponse, PairingStatusResponse, RemoteConfig};
use crate::content::{ContentKind, ContentUnit};
use crate::identity::DeviceIdentity;
use crate::manifest::{Manifest, ZoneApp};
use crate::metrics::{MetricsProbe, ResourceMetrics};
use crate::render::{PlaybackError, RenderSink, ResolvedContent};
use crate::service::HeartbeatSample;
use crate::transition::Presentation;

/// Zone entry without inline content
pub fn zone_app(app_id: &str, order: i64, duration_seconds: i64) -> ZoneApp {
    ZoneApp {
        id: None,
        app_id: app_id.to_string(),
        order,
        duration_seconds,
        start_date: None,
        end_date: None,
        app: None,
    }
}

/// Zone entry carrying an inline unit of `kind`
pub fn inline_app(app_id: &str, kind: ContentKind, duration_seconds: i64) -> ZoneApp {
    ZoneApp {
        app: Some(ContentUnit {
            id: app_id.to_string(),
            kind,
            config: serde_json::Value::Null,
            media_url: None,
        }),
        ..zone_app(app_id, 0, duration_seconds)
    }
}

#[derive(Default)]
struct CloudState {
    offline: bool,
    pair_after: Option<(usize, String, String)>,
    status_polls: usize,
    last_token: Option<String>,
    config: Option<RemoteConfig>,
    config_fetches: usize,
    heartbeats: Vec<HeartbeatSample>,
    manifests: HashMap<String, Manifest>,
    manifest_requests: usize,
    apps: HashMap<String, ContentUnit>,
    app_requests: usize,
}

/// Scriptable cloud. Every call fails with a transport error while offline.
#[derive(Default)]
pub struct MockCloud {
    state: Mutex<CloudState>,
}

impl MockCloud {
    pub const PAIRING_CODE: &'static str = "ABC123";

    pub fn new() -> Self {
        Self::default()
    }

    /// Report the code as approved on the `polls`-th status request
    pub fn pair_after_polls(&self, polls: usize, player_id: &str, device_token: &str) {
        self.state.lock().pair_after = Some((polls, player_id.to_string(), device_token.to_string()));
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn set_config(&self, config: RemoteConfig) {
        self.state.lock().config = Some(config);
    }

    pub fn add_manifest(&self, url: &str, manifest: Manifest) {
        self.state.lock().manifests.insert(url.to_string(), manifest);
    }

    pub fn add_app(&self, unit: ContentUnit) {
        self.state.lock().apps.insert(unit.id.clone(), unit);
    }

    pub fn status_polls(&self) -> usize {
        self.state.lock().status_polls
    }

    pub fn last_token(&self) -> Option<String> {
        self.state.lock().last_token.clone()
    }

    pub fn config_fetches(&self) -> usize {
        self.state.lock().config_fetches
    }

    pub fn heartbeats(&self) -> Vec<HeartbeatSample> {
        self.state.lock().heartbeats.clone()
    }

    pub fn manifest_requests(&self) -> usize {
        self.state.lock().manifest_requests
    }

    pub fn app_requests(&self) -> usize {
        self.state.lock().app_requests
    }

    fn check_online(&self) -> Result<(), CloudError> {
        if self.state.lock().offline {
            return Err(CloudError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudApi for MockCloud {
    async fn request_pairing_code(&self) -> Result<PairingCodeResponse, CloudError> {
        self.check_online()?;
        Ok(PairingCodeResponse {
            code: Self::PAIRING_CODE.to_string(),
            expires_at: None,
        })
    }

    async fn pairing_status(&self, _code: &str) -> Result<PairingStatusResponse, CloudError> {
        self.check_online()?;
        let mut state = self.state.lock();
        state.status_polls += 1;
        match &state.pair_after {
            Some((after, player_id, token)) if state.status_polls >= *after => Ok(PairingStatusResponse {
                paired: true,
                player_id: Some(player_id.clone()),
                device_token: Some(token.clone()),
            }),
            _ => Ok(PairingStatusResponse::default()),
        }
    }

    async fn fetch_config(&self, identity: &DeviceIdentity) -> Result<RemoteConfig, CloudError> {
        self.check_online()?;
        let mut state = self.state.lock();
        state.config_fetches += 1;
        state.last_token = Some(identity.device_token.clone());
        Ok(state
            .config
            .clone()
            .unwrap_or_else(|| RemoteConfig::safe_default(&identity.player_id)))
    }

    async fn send_heartbeat(&self, identity: &DeviceIdentity, sample: &HeartbeatSample) -> Result<(), CloudError> {
        self.check_online()?;
        let mut state = self.state.lock();
        state.last_token = Some(identity.device_token.clone());
        state.heartbeats.push(sample.clone());
        Ok(())
    }

    async fn fetch_manifest(&self, manifest_url: &str, _identity: Option<&DeviceIdentity>) -> Result<Manifest, CloudError> {
        self.check_online()?;
        let mut state = self.state.lock();
        state.manifest_requests += 1;
        state.manifests.get(manifest_url).cloned().ok_or_else(|| CloudError::Status {
            status: 404,
            url: manifest_url.to_string(),
        })
    }

    async fn fetch_app(&self, identity: &DeviceIdentity, app_id: &str) -> Result<ContentUnit, CloudError> {
        self.check_online()?;
        let mut state = self.state.lock();
        state.app_requests += 1;
        state.last_token = Some(identity.device_token.clone());
        state.apps.get(app_id).cloned().ok_or_else(|| CloudError::Status {
            status: 404,
            url: format!("/apps/{}", app_id),
        })
    }

    fn base_url(&self) -> &str {
        "https://cloud.test"
    }
}

/// Fetcher that counts calls per URL and logs start/end of each fetch
#[derive(Default)]
pub struct CountingFetcher {
    delay: Duration,
    failing: HashSet<String>,
    calls: Mutex<HashMap<String, usize>>,
    log: Mutex<Vec<String>>,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl ContentFetcher for CountingFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, CacheError> {
        self.log.lock().push(format!("start {}", url));
        *self.calls.lock().entry(url.to_string()).or_insert(0) += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.log.lock().push(format!("end {}", url));

        if self.failing.contains(url) {
            return Err(CacheError::Transport {
                url: url.to_string(),
                reason: "connection reset".to_string(),
            });
        }

        let content_type = if url.ends_with(".png") {
            "image/png"
        } else if url.ends_with(".jpg") {
            "image/jpeg"
        } else if url.ends_with(".mp4") {
            "video/mp4"
        } else {
            "application/octet-stream"
        };
        Ok(FetchedContent {
            content_type: Some(content_type.to_string()),
            body: Bytes::copy_from_slice(url.as_bytes()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Present { zone: String, app_id: String, state: Presentation },
    Discard { zone: String, app_id: String },
    Clear { zone: String },
}

/// Sink that records every call, optionally refusing some apps
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, app_id: &str) {
        self.rejected.lock().insert(app_id.to_string());
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Apps that reached the fully settled state in `zone`, in order
    pub fn settled(&self, zone: &str) -> Vec<String> {
        let mut shown: Vec<String> = Vec::new();
        for event in self.events.lock().iter() {
            if let SinkEvent::Present { zone: z, app_id, state } = event {
                if z == zone && *state == Presentation::SETTLED && shown.last() != Some(app_id) {
                    shown.push(app_id.clone());
                }
            }
        }
        shown
    }

    pub fn cleared(&self, zone: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| matches!(e, SinkEvent::Clear { zone: z } if z == zone))
    }
}

impl RenderSink for RecordingSink {
    fn present(&self, zone_id: &str, content: &ResolvedContent, state: Presentation) -> Result<(), PlaybackError> {
        if self.rejected.lock().contains(&content.app_id) {
            return Err(PlaybackError::Render {
                app_id: content.app_id.clone(),
                reason: "rejected by sink".to_string(),
            });
        }
        self.events.lock().push(SinkEvent::Present {
            zone: zone_id.to_string(),
            app_id: content.app_id.clone(),
            state,
        });
        Ok(())
    }

    fn discard(&self, zone_id: &str, content: &ResolvedContent) {
        self.events.lock().push(SinkEvent::Discard {
            zone: zone_id.to_string(),
            app_id: content.app_id.clone(),
        });
    }

    fn clear(&self, zone_id: &str) {
        self.events.lock().push(SinkEvent::Clear {
            zone: zone_id.to_string(),
        });
    }
}

/// Probe returning fixed figures
pub struct StaticProbe(pub ResourceMetrics);

impl Default for StaticProbe {
    fn default() -> Self {
        Self(ResourceMetrics {
            cpu_percent: 12.5,
            memory_percent: 40.0,
            storage_free_mb: 2048,
        })
    }
}

#[async_trait]
impl MetricsProbe for StaticProbe {
    async fn sample(&self) -> ResourceMetrics {
        self.0
    }
}
