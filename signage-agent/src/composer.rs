//! Screen composer
//!
//! Owns one [`RegionPlaylist`] per zone of the loaded manifest and a presenter
//! task per zone that:
//! - resolves the content of every app change through the shared cache,
//!   without holding up the zone while a download is in flight
//! - drives the zone's [`TransitionCoordinator`] against the [`RenderSink`]
//! - forwards everything as zone-tagged [`ScreenEvent`]s
//!
//! Loading a manifest tears the previous screen down entirely.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::ContentCache;
use crate::content::{resolve_content, ContentResolver};
use crate::manifest::Manifest;
use crate::playlist::{PlaylistEvent, RegionPlaylist};
use crate::render::{PlaybackError, RenderSink, ResolvedContent};
use crate::timer::TimerHandle;
use crate::transition::{Presentation, TransitionCoordinator};

/// What the screen reports to the outside world
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenEvent {
    AppChanged { zone_id: String, app_id: String },
    Error { zone_id: String, error: PlaybackError },
    CycleComplete { zone_id: String },
    PreloadProgress { completed: usize, total: usize },
    /// Every media file of the manifest has been attempted
    Loaded,
}

#[derive(Debug, Clone, Copy)]
pub struct ComposerSettings {
    pub preload_concurrency: usize,
    /// Pace at which in-flight transitions are sampled
    pub frame_interval: Duration,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            preload_concurrency: 4,
            frame_interval: Duration::from_millis(40),
        }
    }
}

struct Region {
    zone_id: String,
    playlist: Arc<RegionPlaylist>,
    _presenter: TimerHandle,
}

/// Shared by every presenter task of a screen
#[derive(Clone)]
struct Stage {
    cache: ContentCache,
    resolver: Arc<dyn ContentResolver>,
    sink: Arc<dyn RenderSink>,
    events: mpsc::UnboundedSender<ScreenEvent>,
}

impl Stage {
    fn emit(&self, event: ScreenEvent) {
        let _ = self.events.send(event);
    }
}

pub struct ScreenComposer {
    stage: Stage,
    settings: ComposerSettings,
    regions: Mutex<Vec<Region>>,
    preload: Mutex<Option<TimerHandle>>,
}

impl ScreenComposer {
    pub fn new(
        cache: ContentCache,
        resolver: Arc<dyn ContentResolver>,
        sink: Arc<dyn RenderSink>,
        settings: ComposerSettings,
    ) -> (Self, mpsc::UnboundedReceiver<ScreenEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                stage: Stage {
                    cache,
                    resolver,
                    sink,
                    events,
                },
                settings,
                regions: Mutex::new(Vec::new()),
                preload: Mutex::new(None),
            },
            rx,
        )
    }

    /// Replace whatever is on screen with `manifest`
    pub fn load(&self, manifest: &Manifest) {
        self.unload();

        let now = chrono::Utc::now();
        let transition = Duration::from_millis(manifest.channel.transition_duration_ms);
        let mut regions = Vec::with_capacity(manifest.zones.len());

        for zone in &manifest.zones {
            let items = zone.active_apps(now);
            if items.is_empty() {
                warn!("Zone {} has nothing to show, leaving it blank", zone.zone_id);
                self.stage.sink.clear(&zone.zone_id);
                continue;
            }

            let (playlist, rx) = RegionPlaylist::new(items);
            let presenter = TimerHandle::spawn(present_zone(
                zone.zone_id.clone(),
                rx,
                self.stage.clone(),
                TransitionCoordinator::new(manifest.channel.transition_type, transition),
                self.settings.frame_interval,
            ));
            let playlist = Arc::new(playlist);
            playlist.play();
            regions.push(Region {
                zone_id: zone.zone_id.clone(),
                playlist,
                _presenter: presenter,
            });
        }

        info!(
            "Screen loaded: {} of {} zones playing",
            regions.len(),
            manifest.zones.len()
        );
        *self.regions.lock() = regions;
        self.start_preload(manifest.media_urls());
    }

    /// Stop every zone and blank the screen
    pub fn unload(&self) {
        if let Some(preload) = self.preload.lock().take() {
            preload.cancel();
        }
        let previous = std::mem::take(&mut *self.regions.lock());
        for region in previous {
            region.playlist.stop();
            self.stage.sink.clear(&region.zone_id);
        }
    }

    /// Zones currently rotating
    pub fn zone_ids(&self) -> Vec<String> {
        self.regions.lock().iter().map(|r| r.zone_id.clone()).collect()
    }

    pub fn playlist(&self, zone_id: &str) -> Option<Arc<RegionPlaylist>> {
        self.regions
            .lock()
            .iter()
            .find(|r| r.zone_id == zone_id)
            .map(|r| r.playlist.clone())
    }

    pub fn cache(&self) -> &ContentCache {
        &self.stage.cache
    }

    fn start_preload(&self, urls: Vec<String>) {
        let stage = self.stage.clone();
        let concurrency = self.settings.preload_concurrency;

        let task = TimerHandle::spawn(async move {
            if !urls.is_empty() {
                let progress = stage.clone();
                let report = stage
                    .cache
                    .preload(
                        &urls,
                        concurrency,
                        |completed, total| progress.emit(ScreenEvent::PreloadProgress { completed, total }),
                        |url, e| debug!("Preload of {} failed: {}", url, e),
                    )
                    .await;
                debug!("Preloaded {}/{} media files", report.loaded, report.total);
            }
            stage.emit(ScreenEvent::Loaded);
        });
        *self.preload.lock() = Some(task);
    }
}

impl Drop for ScreenComposer {
    fn drop(&mut self) {
        self.unload();
    }
}

type Resolution = (u64, Result<ResolvedContent, PlaybackError>);

/// Presenter loop for one zone. Ends when the playlist is dropped.
///
/// Content is resolved off the loop, so a slow download never holds back
/// frames or later app changes. Each resolution carries the sequence number of
/// the app change that asked for it; only the latest one is put on screen.
async fn present_zone(
    zone_id: String,
    mut playlist_events: mpsc::UnboundedReceiver<PlaylistEvent>,
    stage: Stage,
    mut coordinator: TransitionCoordinator<ResolvedContent>,
    frame_interval: Duration,
) {
    let mut frames = tokio::time::interval(frame_interval);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut resolving: FuturesUnordered<BoxFuture<'static, Resolution>> = FuturesUnordered::new();
    let mut latest = 0u64;

    loop {
        tokio::select! {
            event = playlist_events.recv() => match event {
                None => break,
                Some(PlaylistEvent::CycleComplete) => {
                    stage.emit(ScreenEvent::CycleComplete { zone_id: zone_id.clone() });
                }
                Some(PlaylistEvent::AppChanged { item, .. }) => {
                    stage.emit(ScreenEvent::AppChanged {
                        zone_id: zone_id.clone(),
                        app_id: item.app_id.clone(),
                    });

                    latest += 1;
                    let sequence = latest;
                    let resolver = stage.resolver.clone();
                    let cache = stage.cache.clone();
                    resolving.push(
                        async move { (sequence, resolve_content(resolver.as_ref(), &cache, &item).await) }.boxed(),
                    );
                }
            },
            Some((sequence, result)) = resolving.next(), if !resolving.is_empty() => match result {
                Ok(content) if sequence == latest => {
                    let now = Instant::now();
                    coordinator.request(content, now);
                    render(&zone_id, &stage, &mut coordinator, now);
                }
                Ok(content) => {
                    debug!("[{}] {} resolved after the zone moved on", zone_id, content.app_id);
                }
                Err(error) => {
                    warn!("[{}] {}", zone_id, error);
                    stage.emit(ScreenEvent::Error { zone_id: zone_id.clone(), error });
                }
            },
            _ = frames.tick(), if coordinator.is_in_flight() => {
                render(&zone_id, &stage, &mut coordinator, Instant::now());
            }
        }
    }
}

/// Push the coordinator's state at `now` to the sink, completing due transitions
fn render(
    zone_id: &str,
    stage: &Stage,
    coordinator: &mut TransitionCoordinator<ResolvedContent>,
    now: Instant,
) {
    loop {
        match coordinator.finish_due(now) {
            Some(outgoing) => {
                if let Some(outgoing) = outgoing {
                    stage.sink.discard(zone_id, &outgoing);
                }
                if let Some(current) = coordinator.current() {
                    if let Err(error) = stage.sink.present(zone_id, current, Presentation::SETTLED) {
                        warn!("[{}] {}", zone_id, error);
                        stage.emit(ScreenEvent::Error {
                            zone_id: zone_id.to_string(),
                            error,
                        });
                    }
                }
                if !coordinator.start_next(now) {
                    return;
                }
            }
            None => {
                if let Some(frame) = coordinator.frame(now) {
                    if let Some((outgoing, state)) = frame.outgoing {
                        let _ = stage.sink.present(zone_id, outgoing, state);
                    }
                    let (incoming, state) = frame.incoming;
                    // Failures surface once, when the item settles
                    let _ = stage.sink.present(zone_id, incoming, state);
                }
                return;
            }
        }
    }
}
