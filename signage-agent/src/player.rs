//! Player runtime
//!
//! Wires the services together and runs the agent lifecycle:
//! - unpaired: show the demo screen, issue a pairing code and wait for approval
//! - paired: heartbeat, then refresh the remote config on an interval, reloading
//!   the screen when the assigned channel changes and executing queued commands
//! - shutdown: stop the heartbeat and blank the screen

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::{ContentCache, ContentFetcher, HttpFetcher};
use crate::cloud::{ChannelAssignment, CloudApi, CommandAction, HttpCloudClient, RemoteConfig};
use crate::composer::{ScreenComposer, ScreenEvent};
use crate::config::AgentConfig;
use crate::content::CatalogResolver;
use crate::device::DeviceInfo;
use crate::identity::{DeviceIdentityManager, IdentityError, PairingState};
use crate::manifest::Manifest;
use crate::metrics::{MetricsProbe, SystemProbe};
use crate::render::RenderSink;
use crate::service::{AgentService, PlayerStatus};
use crate::store::IdentityStore;
use crate::timer::TimerHandle;

/// External capabilities the runtime is built on
pub struct Collaborators {
    pub api: Arc<dyn CloudApi>,
    pub store: Arc<dyn IdentityStore>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub sink: Arc<dyn RenderSink>,
    pub metrics: Arc<dyn MetricsProbe>,
}

/// What applying a remote config did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOutcome {
    Unchanged,
    Reloaded,
    Unpaired,
}

#[derive(Debug, Clone, PartialEq)]
enum Showing {
    Nothing,
    /// Demo content while no channel is assigned
    Idle,
    Channel { id: String, version: Option<String> },
}

pub struct PlayerRuntime {
    api: Arc<dyn CloudApi>,
    identity: Arc<DeviceIdentityManager>,
    service: AgentService,
    composer: ScreenComposer,
    resolver: Arc<CatalogResolver>,
    refresh_interval: Duration,
    showing: Mutex<Showing>,
    paired_configs: tokio::sync::Mutex<mpsc::UnboundedReceiver<RemoteConfig>>,
}

impl PlayerRuntime {
    pub fn new(config: &AgentConfig, parts: Collaborators) -> (Self, mpsc::UnboundedReceiver<ScreenEvent>) {
        let identity = Arc::new(
            DeviceIdentityManager::new(parts.api.clone(), parts.store).with_timings(config.pairing_timings()),
        );

        let (paired_tx, paired_rx) = mpsc::unbounded_channel();
        identity.on_paired(move |config| {
            let _ = paired_tx.send(config);
        });

        let resolver = Arc::new(CatalogResolver::new(parts.api.clone(), identity.clone()));
        let cache = ContentCache::new(parts.fetcher, config.content_timeout());
        let (composer, events) =
            ScreenComposer::new(cache, resolver.clone(), parts.sink, config.composer_settings());
        let service = AgentService::new(
            parts.api.clone(),
            identity.clone(),
            parts.metrics,
            config.heartbeat_interval(),
        );

        (
            Self {
                api: parts.api,
                identity,
                service,
                composer,
                resolver,
                refresh_interval: config.config_refresh_interval(),
                showing: Mutex::new(Showing::Nothing),
                paired_configs: tokio::sync::Mutex::new(paired_rx),
            },
            events,
        )
    }

    /// Build the production runtime: HTTP cloud client, configured identity store, sysinfo metrics
    pub fn from_config(
        config: &AgentConfig,
        device: &DeviceInfo,
        sink: Arc<dyn RenderSink>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ScreenEvent>)> {
        let client = HttpCloudClient::new(&config.cloud.api_base_url, config.request_timeout(), &device.user_agent())
            .context("Failed to build HTTP client")?;
        let fetcher = Arc::new(HttpFetcher::new(client.http(), config.content_timeout()));
        let store = config.identity_store().context("Failed to open identity store")?;

        Ok(Self::new(
            config,
            Collaborators {
                api: Arc::new(client),
                store,
                fetcher,
                sink,
                metrics: Arc::new(SystemProbe::new()),
            },
        ))
    }

    pub fn identity(&self) -> &Arc<DeviceIdentityManager> {
        &self.identity
    }

    pub fn service(&self) -> &AgentService {
        &self.service
    }

    pub fn composer(&self) -> &ScreenComposer {
        &self.composer
    }

    /// Run until `shutdown` completes
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Player runtime started ({})", self.api.base_url());

        loop {
            let initial = if self.identity.is_paired() {
                None
            } else {
                self.show_idle();
                tokio::select! {
                    config = self.pair() => Some(config?),
                    _ = &mut shutdown => break,
                }
            };

            self.service.start_heartbeat();
            tokio::select! {
                result = self.serve_paired(initial) => result?,
                _ = &mut shutdown => break,
            }
            info!("Device no longer paired, returning to pairing");
            self.service.stop_heartbeat();
        }

        info!("Shutting down after {}s", self.service.uptime().as_secs());
        self.service.stop_heartbeat();
        self.composer.unload();
        Ok(())
    }

    /// Issue codes until one is approved; returns the config fetched at pairing time
    async fn pair(&self) -> Result<RemoteConfig> {
        let mut paired_configs = self.paired_configs.lock().await;
        loop {
            let session = match self.identity.request_pairing_code().await {
                Ok(session) => session,
                Err(IdentityError::AlreadyPaired) => {
                    return self.identity.fetch_config().await.context("Failed to fetch config");
                }
                Err(e) => return Err(e).context("Failed to start pairing"),
            };
            info!(
                "Enter pairing code {} in the console (valid until {})",
                session.code,
                session.expires_at.format("%H:%M:%S")
            );

            let mut states = self.identity.subscribe();
            loop {
                tokio::select! {
                    config = paired_configs.recv() => {
                        return config.context("Pairing callback dropped");
                    }
                    changed = states.changed() => {
                        changed.context("Pairing state channel closed")?;
                        match &*states.borrow_and_update() {
                            PairingState::Unpaired => break,
                            PairingState::Pairing(session) => info!("Pairing code is now {}", session.code),
                            PairingState::Paired { player_id } => debug!("Paired as {}, waiting for config", player_id),
                        }
                    }
                }
            }
            warn!("Pairing code expired, requesting a new one");
        }
    }

    /// Apply configs until the device is unpaired
    async fn serve_paired(&self, initial: Option<RemoteConfig>) -> Result<()> {
        let start = match initial {
            Some(config) => {
                if self.apply_config(config).await? == ConfigOutcome::Unpaired {
                    return Ok(());
                }
                Instant::now() + self.refresh_interval
            }
            None => Instant::now(),
        };

        let mut ticker = interval_at(start, self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let config = match self.identity.fetch_config().await {
                Ok(config) => config,
                Err(IdentityError::NotPaired) => return Ok(()),
                Err(e) => return Err(e).context("Config refresh failed"),
            };
            if self.apply_config(config).await? == ConfigOutcome::Unpaired {
                return Ok(());
            }
        }
    }

    /// Execute queued commands, then reload the screen if the channel changed
    pub async fn apply_config(&self, config: RemoteConfig) -> Result<ConfigOutcome> {
        let mut force_reload = false;
        for command in &config.commands {
            match command.action() {
                CommandAction::Reload => force_reload = true,
                CommandAction::ClearCache => {
                    info!("Clearing content cache ({} entries)", self.composer.cache().len());
                    self.composer.cache().clear();
                    self.resolver.forget();
                }
                CommandAction::Unpair => {
                    info!("Unpair requested by the console");
                    self.service.stop_heartbeat();
                    self.identity.unpair().context("Failed to clear identity")?;
                    self.resolver.forget();
                    *self.showing.lock() = Showing::Nothing;
                    self.show_idle();
                    return Ok(ConfigOutcome::Unpaired);
                }
                CommandAction::Unknown => warn!("Ignoring unknown command {:?}", command.command_type),
            }
        }

        match config.channel {
            Some(channel) => self.show_channel(&channel, force_reload).await,
            None => {
                self.service.set_status(PlayerStatus::Waiting);
                let reloaded = force_reload || *self.showing.lock() != Showing::Idle;
                if reloaded {
                    info!("No channel assigned, showing demo content");
                    *self.showing.lock() = Showing::Nothing;
                    self.show_idle();
                }
                Ok(if reloaded { ConfigOutcome::Reloaded } else { ConfigOutcome::Unchanged })
            }
        }
    }

    async fn show_channel(&self, channel: &ChannelAssignment, force: bool) -> Result<ConfigOutcome> {
        let wanted = Showing::Channel {
            id: channel.id.clone(),
            version: channel.version.clone(),
        };
        if !force && *self.showing.lock() == wanted {
            return Ok(ConfigOutcome::Unchanged);
        }

        info!(
            "Loading channel {} (version {})",
            channel.name.as_deref().unwrap_or(&channel.id),
            channel.version.as_deref().unwrap_or("unknown")
        );
        let manifest = self.service.load_channel(&channel.manifest_url(self.api.base_url())).await;
        self.composer.load(&manifest);
        self.service.set_status(PlayerStatus::Playing);
        *self.showing.lock() = wanted;
        Ok(ConfigOutcome::Reloaded)
    }

    fn show_idle(&self) {
        let mut showing = self.showing.lock();
        if *showing != Showing::Idle {
            self.composer.load(&Manifest::demo());
            *showing = Showing::Idle;
        }
    }
}

/// Log screen events until the composer goes away
pub fn log_screen_events(mut events: mpsc::UnboundedReceiver<ScreenEvent>) -> TimerHandle {
    TimerHandle::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ScreenEvent::AppChanged { zone_id, app_id } => debug!("[{}] now showing {}", zone_id, app_id),
                ScreenEvent::Error { zone_id, error } => warn!("[{}] {}", zone_id, error),
                ScreenEvent::CycleComplete { zone_id } => debug!("[{}] cycle complete", zone_id),
                ScreenEvent::PreloadProgress { completed, total } => debug!("Preloaded {}/{}", completed, total),
                ScreenEvent::Loaded => info!("All media loaded"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::RemoteCommand;
    use crate::content::ContentKind;
    use crate::identity::DeviceIdentity;
    use crate::manifest::{ChannelDescriptor, Zone};
    use crate::store::MemoryStore;
    use crate::testing::{inline_app, CountingFetcher, MockCloud, RecordingSink, StaticProbe};
    use crate::transition::TransitionKind;

    const MANIFEST_URL: &str = "https://cloud.test/manifests/lobby";

    fn runtime(cloud: Arc<MockCloud>, store: MemoryStore) -> (PlayerRuntime, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let (runtime, _events) = PlayerRuntime::new(
            &AgentConfig::default(),
            Collaborators {
                api: cloud,
                store: Arc::new(store),
                fetcher: Arc::new(CountingFetcher::new()),
                sink: sink.clone(),
                metrics: Arc::new(StaticProbe::default()),
            },
        );
        (runtime, sink)
    }

    fn lobby_manifest(version: &str) -> Manifest {
        Manifest {
            channel: ChannelDescriptor {
                id: Some("lobby".to_string()),
                name: Some("Lobby".to_string()),
                version: Some(version.to_string()),
                background: None,
                transition_type: TransitionKind::None,
                transition_duration_ms: 0,
            },
            zones: vec![Zone {
                zone_id: "full".to_string(),
                name: None,
                x_percent: 0.0,
                y_percent: 0.0,
                width_percent: 100.0,
                height_percent: 100.0,
                z_index: 0,
                background: None,
                apps: vec![inline_app("welcome", ContentKind::Html, 10)],
            }],
        }
    }

    fn config_for(version: &str, commands: &[&str]) -> RemoteConfig {
        RemoteConfig {
            channel: Some(ChannelAssignment {
                id: "lobby".to_string(),
                name: None,
                version: Some(version.to_string()),
                manifest_url: Some(MANIFEST_URL.to_string()),
            }),
            commands: commands
                .iter()
                .map(|c| RemoteCommand {
                    id: None,
                    command_type: c.to_string(),
                    payload: serde_json::Value::Null,
                })
                .collect(),
            ..RemoteConfig::safe_default("p1")
        }
    }

    fn paired_store() -> MemoryStore {
        MemoryStore::with_identity(DeviceIdentity::new("p1", "t1"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_changes_reload_the_screen() {
        let cloud = Arc::new(MockCloud::new());
        cloud.add_manifest(MANIFEST_URL, lobby_manifest("1"));
        let (runtime, _sink) = runtime(cloud.clone(), paired_store());

        assert_eq!(runtime.apply_config(config_for("1", &[])).await.unwrap(), ConfigOutcome::Reloaded);
        assert_eq!(runtime.composer().zone_ids(), vec!["full"]);
        assert_eq!(runtime.service().status(), PlayerStatus::Playing);
        assert_eq!(runtime.service().channel_version().as_deref(), Some("1"));

        assert_eq!(runtime.apply_config(config_for("1", &[])).await.unwrap(), ConfigOutcome::Unchanged);
        assert_eq!(cloud.manifest_requests(), 1);

        assert_eq!(runtime.apply_config(config_for("2", &[])).await.unwrap(), ConfigOutcome::Reloaded);
        assert_eq!(runtime.apply_config(config_for("2", &["reload"])).await.unwrap(), ConfigOutcome::Reloaded);
        assert_eq!(cloud.manifest_requests(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_channel_shows_demo_and_waits() {
        let cloud = Arc::new(MockCloud::new());
        let (runtime, _sink) = runtime(cloud, paired_store());

        let outcome = runtime.apply_config(RemoteConfig::safe_default("p1")).await.unwrap();
        assert_eq!(outcome, ConfigOutcome::Reloaded);
        assert_eq!(runtime.composer().zone_ids(), vec!["main", "sidebar", "ticker"]);
        assert_eq!(runtime.service().status(), PlayerStatus::Waiting);

        let again = runtime.apply_config(RemoteConfig::safe_default("p1")).await.unwrap();
        assert_eq!(again, ConfigOutcome::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cache_and_unpair_commands() {
        let cloud = Arc::new(MockCloud::new());
        cloud.add_manifest(MANIFEST_URL, lobby_manifest("1"));
        let (runtime, _sink) = runtime(cloud, paired_store());

        runtime.composer().cache().load("https://cdn/a.png").await.unwrap();
        runtime.apply_config(config_for("1", &["clear_cache", "screenshot"])).await.unwrap();
        assert!(runtime.composer().cache().is_empty());

        let outcome = runtime.apply_config(config_for("1", &["unpair"])).await.unwrap();
        assert_eq!(outcome, ConfigOutcome::Unpaired);
        assert!(!runtime.identity().is_paired());
        assert!(!runtime.service().is_heartbeat_running());
        assert_eq!(runtime.composer().zone_ids(), vec!["main", "sidebar", "ticker"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_loop_follows_channel_and_outages() {
        let cloud = Arc::new(MockCloud::new());
        cloud.set_config(config_for("1", &[]));
        cloud.add_manifest(MANIFEST_URL, lobby_manifest("1"));
        let (runtime, _sink) = runtime(cloud.clone(), paired_store());

        let (result, ()) = tokio::join!(runtime.run(tokio::time::sleep(Duration::from_secs(150))), async {
            tokio::time::sleep(Duration::from_secs(50)).await;
            assert_eq!(runtime.service().channel_version().as_deref(), Some("1"));
            cloud.set_offline(true);

            // The refresh at 60s could not reach the cloud
            tokio::time::sleep(Duration::from_secs(40)).await;
            assert_eq!(runtime.service().status(), PlayerStatus::Waiting);
            assert_eq!(runtime.composer().zone_ids(), vec!["main", "sidebar", "ticker"]);

            cloud.add_manifest(MANIFEST_URL, lobby_manifest("2"));
            cloud.set_config(config_for("2", &[]));
            cloud.set_offline(false);
        });
        result.unwrap();

        // Refreshes at 0s and 120s reached the cloud, 60s did not
        assert_eq!(cloud.config_fetches(), 2);
        assert_eq!(cloud.manifest_requests(), 2);
        assert_eq!(runtime.service().channel_version().as_deref(), Some("2"));
        assert_eq!(runtime.service().status(), PlayerStatus::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_pairs_then_plays_assigned_channel() {
        let cloud = Arc::new(MockCloud::new());
        cloud.pair_after_polls(2, "p1", "t1");
        cloud.set_config(config_for("1", &[]));
        cloud.add_manifest(MANIFEST_URL, lobby_manifest("1"));
        let (runtime, sink) = runtime(cloud.clone(), MemoryStore::new());

        runtime.run(tokio::time::sleep(Duration::from_secs(20))).await.unwrap();

        assert!(runtime.identity().is_paired());
        assert_eq!(cloud.manifest_requests(), 1);
        assert!(!cloud.heartbeats().is_empty());
        assert_eq!(sink.settled("full"), vec!["welcome"]);
        assert!(sink.cleared("full"));
        assert!(!runtime.service().is_heartbeat_running());
    }
}
