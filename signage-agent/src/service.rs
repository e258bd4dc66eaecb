//! Agent heartbeat and manifest service
//!
//! Handles:
//! - Periodic heartbeat push (one immediately, then every interval)
//! - Manifest download with the built-in demo as fallback
//! - Process uptime and the status/version reported to the cloud
//!
//! Heartbeats are fire-and-forget: a failed send is logged and the next tick
//! is the retry.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cloud::CloudApi;
use crate::identity::DeviceIdentityManager;
use crate::manifest::Manifest;
use crate::metrics::MetricsProbe;
use crate::timer::TimerHandle;

/// Player status as reported in heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Online,
    /// Paired but no channel assigned yet
    Waiting,
    Playing,
}

/// Body of `POST /players/{id}/heartbeat`
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatSample {
    pub status: PlayerStatus,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub storage_free_mb: u64,
    pub current_channel_version: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct Telemetry {
    status: PlayerStatus,
    channel_version: Option<String>,
}

/// Everything a heartbeat tick needs, cloned into the timer task
#[derive(Clone)]
struct Heartbeat {
    api: Arc<dyn CloudApi>,
    identity: Arc<DeviceIdentityManager>,
    metrics: Arc<dyn MetricsProbe>,
    telemetry: Arc<Mutex<Telemetry>>,
}

impl Heartbeat {
    async fn sample(&self) -> HeartbeatSample {
        let resources = self.metrics.sample().await;
        let telemetry = self.telemetry.lock();
        HeartbeatSample {
            status: telemetry.status,
            cpu_percent: resources.cpu_percent,
            memory_percent: resources.memory_percent,
            storage_free_mb: resources.storage_free_mb,
            current_channel_version: telemetry.channel_version.clone(),
            timestamp: Utc::now(),
        }
    }

    async fn beat(&self) -> bool {
        let Some(identity) = self.identity.identity() else {
            debug!("Not paired, skipping heartbeat");
            return false;
        };

        let sample = self.sample().await;
        match self.api.send_heartbeat(&identity, &sample).await {
            Ok(()) => {
                debug!("Heartbeat sent ({:?})", sample.status);
                true
            }
            Err(e) => {
                warn!("Heartbeat dropped: {}", e);
                false
            }
        }
    }
}

pub struct AgentService {
    heartbeat: Heartbeat,
    interval: Duration,
    started: Instant,
    timer: Mutex<Option<TimerHandle>>,
}

impl AgentService {
    pub fn new(
        api: Arc<dyn CloudApi>,
        identity: Arc<DeviceIdentityManager>,
        metrics: Arc<dyn MetricsProbe>,
        interval: Duration,
    ) -> Self {
        Self {
            heartbeat: Heartbeat {
                api,
                identity,
                metrics,
                telemetry: Arc::new(Mutex::new(Telemetry {
                    status: PlayerStatus::Online,
                    channel_version: None,
                })),
            },
            interval,
            started: Instant::now(),
            timer: Mutex::new(None),
        }
    }

    /// Send a heartbeat now and then every interval. No-op if already running.
    pub fn start_heartbeat(&self) {
        let mut timer = self.timer.lock();
        if timer.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            debug!("Heartbeat already running");
            return;
        }

        let heartbeat = self.heartbeat.clone();
        let period = self.interval;
        *timer = Some(TimerHandle::spawn(async move {
            // First tick completes immediately
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                heartbeat.beat().await;
            }
        }));
        info!("Heartbeat started (every {}s)", period.as_secs());
    }

    /// Stop the heartbeat. Safe to call when it is not running.
    pub fn stop_heartbeat(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel();
            info!("Heartbeat stopped");
        }
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.timer.lock().as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Send one heartbeat outside the schedule. Returns whether the cloud accepted it.
    pub async fn heartbeat_now(&self) -> bool {
        self.heartbeat.beat().await
    }

    /// Fetch and parse the manifest, falling back to the demo manifest
    pub async fn load_channel(&self, manifest_url: &str) -> Manifest {
        let identity = self.heartbeat.identity.identity();
        let manifest = match self.heartbeat.api.fetch_manifest(manifest_url, identity.as_ref()).await {
            Ok(manifest) => {
                info!(
                    "Loaded manifest {} ({} zones)",
                    manifest.version().unwrap_or("unversioned"),
                    manifest.zones.len()
                );
                manifest
            }
            Err(e) => {
                warn!("Manifest fetch from {} failed, showing demo content: {}", manifest_url, e);
                Manifest::demo()
            }
        };

        self.heartbeat.telemetry.lock().channel_version = manifest.version().map(str::to_string);
        manifest
    }

    pub fn set_status(&self, status: PlayerStatus) {
        self.heartbeat.telemetry.lock().status = status;
    }

    pub fn status(&self) -> PlayerStatus {
        self.heartbeat.telemetry.lock().status
    }

    pub fn channel_version(&self) -> Option<String> {
        self.heartbeat.telemetry.lock().channel_version.clone()
    }

    /// Time since the service was created
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for AgentService {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}
