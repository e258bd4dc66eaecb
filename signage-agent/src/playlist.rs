//! Per-zone playlist state machine
//!
//! A [`RegionPlaylist`] rotates through the apps of one zone:
//! - `Idle` until first played, then `Playing` / `Paused` / `Stopped`
//! - explicit navigation (`next`, `previous`, `go_to`) wraps around
//! - a timer advances to the next item after its `duration_seconds`
//!
//! Changes are reported as [`PlaylistEvent`]s on an unbounded channel, in the
//! order they happened. The advance timer holds only a weak reference and a
//! generation number, so a timer armed before a later mutation never fires
//! against the new state.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::manifest::ZoneApp;
use crate::timer::TimerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistEvent {
    /// The item at `index` is now the one to show
    AppChanged { index: usize, item: ZoneApp },
    /// `next()` wrapped back to the first item
    CycleComplete,
}

struct Core {
    items: Vec<ZoneApp>,
    index: usize,
    state: PlaybackState,
    generation: u64,
    started_at: Option<Instant>,
    /// Time already spent on the current item before the last pause
    carried: Duration,
    timer: Option<TimerHandle>,
    events: mpsc::UnboundedSender<PlaylistEvent>,
}

impl Core {
    fn current(&self) -> Option<&ZoneApp> {
        self.items.get(self.index)
    }

    fn emit(&self, event: PlaylistEvent) {
        // Receiver gone means nobody is displaying this zone anymore
        let _ = self.events.send(event);
    }

    fn emit_current(&self) {
        if let Some(item) = self.current() {
            self.emit(PlaylistEvent::AppChanged {
                index: self.index,
                item: item.clone(),
            });
        }
    }

    fn disarm(&mut self) {
        self.generation += 1;
        self.started_at = None;
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// Time spent on the current item, across pauses
    fn elapsed(&self) -> Duration {
        self.carried + self.started_at.map(|started| started.elapsed()).unwrap_or_default()
    }

    /// Restart the clock for the current item and schedule its advance
    fn arm(&mut self, core: Weak<Mutex<Core>>) {
        self.carried = Duration::ZERO;
        self.resume_clock(core);
    }

    /// Schedule the advance for whatever is left of the current item
    fn resume_clock(&mut self, core: Weak<Mutex<Core>>) {
        self.disarm();
        if self.state != PlaybackState::Playing {
            return;
        }

        self.started_at = Some(Instant::now());
        let Some(seconds) = self.current().map(|item| item.duration_seconds) else {
            return;
        };
        if seconds <= 0 {
            trace!("Item {} has no duration, waiting for explicit navigation", self.index);
            return;
        }

        let remaining = Duration::from_secs(seconds as u64).saturating_sub(self.carried);
        let generation = self.generation;
        self.timer = Some(TimerHandle::after(remaining, move || {
            if let Some(core) = core.upgrade() {
                let weak = Arc::downgrade(&core);
                let mut guard = core.lock();
                if guard.generation == generation && guard.state == PlaybackState::Playing {
                    guard.step_forward(weak);
                }
            }
        }));
    }

    fn step_forward(&mut self, core: Weak<Mutex<Core>>) {
        if self.items.is_empty() {
            return;
        }
        self.index = (self.index + 1) % self.items.len();
        if self.index == 0 {
            self.emit(PlaylistEvent::CycleComplete);
        }
        self.emit_current();
        self.arm(core);
    }

    fn step_back(&mut self, core: Weak<Mutex<Core>>) {
        if self.items.is_empty() {
            return;
        }
        self.index = if self.index == 0 { self.items.len() - 1 } else { self.index - 1 };
        self.emit_current();
        self.arm(core);
    }
}

/// Rotating playlist for one zone. Cheap to share behind an `Arc`.
pub struct RegionPlaylist {
    core: Arc<Mutex<Core>>,
}

impl RegionPlaylist {
    /// Create an idle playlist and the receiver for its events
    pub fn new(items: Vec<ZoneApp>) -> (Self, mpsc::UnboundedReceiver<PlaylistEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let core = Core {
            items: sorted(items),
            index: 0,
            state: PlaybackState::Idle,
            generation: 0,
            started_at: None,
            carried: Duration::ZERO,
            timer: None,
            events: tx,
        };
        (
            Self {
                core: Arc::new(Mutex::new(core)),
            },
            rx,
        )
    }

    fn weak(&self) -> Weak<Mutex<Core>> {
        Arc::downgrade(&self.core)
    }

    pub fn play(&self) {
        let mut core = self.core.lock();
        if core.state == PlaybackState::Playing || core.items.is_empty() {
            return;
        }
        debug!("Playlist playing from item {}", core.index);
        let resuming = core.state == PlaybackState::Paused;
        core.state = PlaybackState::Playing;
        core.emit_current();
        if resuming {
            core.resume_clock(self.weak());
        } else {
            core.arm(self.weak());
        }
    }

    /// Stop the clock, keep the position and the time already spent on the item
    pub fn pause(&self) {
        let mut core = self.core.lock();
        if core.state != PlaybackState::Playing {
            return;
        }
        let elapsed = core.elapsed();
        core.carried = elapsed;
        core.state = PlaybackState::Paused;
        core.disarm();
    }

    pub fn stop(&self) {
        let mut core = self.core.lock();
        core.disarm();
        core.carried = Duration::ZERO;
        core.index = 0;
        core.state = PlaybackState::Stopped;
    }

    pub fn next(&self) {
        self.core.lock().step_forward(self.weak());
    }

    pub fn previous(&self) {
        self.core.lock().step_back(self.weak());
    }

    /// Jump to `index`. Out-of-range requests are ignored; returns whether the jump happened.
    pub fn go_to(&self, index: usize) -> bool {
        let mut core = self.core.lock();
        if index >= core.items.len() {
            trace!("Ignoring go_to({}) on {} items", index, core.items.len());
            return false;
        }
        core.index = index;
        core.emit_current();
        core.arm(self.weak());
        true
    }

    /// Replace the items, keeping the position where possible. The play state is untouched.
    pub fn update_apps(&self, items: Vec<ZoneApp>) {
        let mut core = self.core.lock();
        core.items = sorted(items);
        core.index = core.index.min(core.items.len().saturating_sub(1));
        core.emit_current();
        core.arm(self.weak());
    }

    /// Elapsed share of the current item's duration, in `[0, 1]`
    pub fn progress(&self) -> f32 {
        let core = self.core.lock();
        if core.state != PlaybackState::Playing {
            return 0.0;
        }
        let Some(item) = core.current() else {
            return 0.0;
        };
        if item.duration_seconds <= 0 || core.started_at.is_none() {
            return 0.0;
        }
        let elapsed = core.elapsed().as_secs_f32();
        (elapsed / item.duration_seconds as f32).clamp(0.0, 1.0)
    }

    pub fn current(&self) -> Option<ZoneApp> {
        self.core.lock().current().cloned()
    }

    pub fn current_index(&self) -> usize {
        self.core.lock().index
    }

    pub fn state(&self) -> PlaybackState {
        self.core.lock().state
    }

    pub fn len(&self) -> usize {
        self.core.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.lock().items.is_empty()
    }
}

fn sorted(mut items: Vec<ZoneApp>) -> Vec<ZoneApp> {
    // Stable: equal `order` keeps document order
    items.sort_by_key(|item| item.order);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::zone_app;

    fn drain(rx: &mut mpsc::UnboundedReceiver<PlaylistEvent>) -> Vec<PlaylistEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn changed_to(events: &[PlaylistEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                PlaylistEvent::AppChanged { item, .. } => Some(item.app_id.clone()),
                PlaylistEvent::CycleComplete => None,
            })
            .collect()
    }

    fn cycles(events: &[PlaylistEvent]) -> usize {
        events.iter().filter(|e| **e == PlaylistEvent::CycleComplete).count()
    }

    fn three() -> Vec<ZoneApp> {
        vec![zone_app("a", 0, 5), zone_app("b", 1, 5), zone_app("c", 2, 5)]
    }

    #[tokio::test]
    async fn test_items_sorted_by_order() {
        let (playlist, _rx) = RegionPlaylist::new(vec![
            zone_app("late", 9, 5),
            zone_app("first", 0, 5),
            zone_app("tie-1", 3, 5),
            zone_app("tie-2", 3, 5),
        ]);
        let mut ids = Vec::new();
        for _ in 0..playlist.len() {
            ids.push(playlist.current().unwrap().app_id);
            playlist.next();
        }
        assert_eq!(ids, vec!["first", "tie-1", "tie-2", "late"]);
    }

    #[tokio::test]
    async fn test_n_nexts_wrap_with_one_cycle_complete() {
        let (playlist, mut rx) = RegionPlaylist::new(three());

        for _ in 0..3 {
            playlist.next();
        }

        assert_eq!(playlist.current_index(), 0);
        let events = drain(&mut rx);
        assert_eq!(cycles(&events), 1);
        assert_eq!(changed_to(&events), vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_previous_wraps_to_last() {
        let (playlist, mut rx) = RegionPlaylist::new(three());
        playlist.previous();
        assert_eq!(playlist.current_index(), 2);
        playlist.previous();
        assert_eq!(playlist.current_index(), 1);
        assert_eq!(cycles(&drain(&mut rx)), 0);
    }

    #[tokio::test]
    async fn test_go_to_out_of_range_is_ignored() {
        let (playlist, mut rx) = RegionPlaylist::new(three());
        playlist.play();
        playlist.go_to(1);
        drain(&mut rx);

        assert!(!playlist.go_to(3));
        assert!(!playlist.go_to(usize::MAX));

        assert_eq!(playlist.current_index(), 1);
        assert_eq!(playlist.state(), PlaybackState::Playing);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_duration_never_auto_advances() {
        let (playlist, mut rx) = RegionPlaylist::new(vec![zone_app("still", 0, 0), zone_app("other", 1, 5)]);
        playlist.play();

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(playlist.current_index(), 0);
        assert_eq!(playlist.progress(), 0.0);
        assert_eq!(changed_to(&drain(&mut rx)), vec!["still"]);

        playlist.next();
        assert_eq!(playlist.current_index(), 1);
        playlist.go_to(0);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(playlist.current_index(), 0);
    }

    #[tokio::test]
    async fn test_update_apps_clamps_index_and_emits() {
        let items = (0..5).map(|i| zone_app(&format!("app{i}"), i, 5)).collect();
        let (playlist, mut rx) = RegionPlaylist::new(items);
        playlist.go_to(4);
        drain(&mut rx);

        playlist.update_apps(vec![zone_app("x", 0, 5), zone_app("y", 1, 5)]);

        assert_eq!(playlist.current_index(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![PlaylistEvent::AppChanged { index: 1, item: zone_app("y", 1, 5) }]
        );
        // Playback state untouched
        assert_eq!(playlist.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_update_apps_to_empty() {
        let (playlist, mut rx) = RegionPlaylist::new(three());
        playlist.play();
        playlist.go_to(2);
        drain(&mut rx);

        playlist.update_apps(Vec::new());
        assert_eq!(playlist.current_index(), 0);
        assert!(playlist.current().is_none());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(playlist.progress(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_advances_and_wraps() {
        let (playlist, mut rx) = RegionPlaylist::new(vec![zone_app("a", 0, 5), zone_app("b", 1, 10)]);
        playlist.play();
        assert_eq!(changed_to(&drain(&mut rx)), vec!["a"]);

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(playlist.current_index(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(playlist.current_index(), 0);

        let events = drain(&mut rx);
        assert_eq!(changed_to(&events), vec!["b", "a"]);
        assert_eq!(cycles(&events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_rearms_full_duration() {
        let (playlist, _rx) = RegionPlaylist::new(three());
        playlist.play();

        tokio::time::sleep(Duration::from_secs(4)).await;
        playlist.next();
        // The old deadline at 5s must not fire
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(playlist.current_index(), 1);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(playlist.current_index(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_and_stop() {
        let (playlist, mut rx) = RegionPlaylist::new(three());
        playlist.play();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!((playlist.progress() - 0.5).abs() < 0.01);

        playlist.pause();
        assert_eq!(playlist.state(), PlaybackState::Paused);
        assert_eq!(playlist.progress(), 0.0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(playlist.current_index(), 0);

        // Resume continues the remaining 2.5s
        playlist.play();
        assert!((playlist.progress() - 0.5).abs() < 0.01);
        tokio::time::sleep(Duration::from_millis(2_600)).await;
        assert_eq!(playlist.current_index(), 1);

        playlist.stop();
        assert_eq!(playlist.state(), PlaybackState::Stopped);
        assert_eq!(playlist.current_index(), 0);
        drain(&mut rx);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(drain(&mut rx).is_empty());

        playlist.play();
        assert_eq!(changed_to(&drain(&mut rx)), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_keeps_progress_across_pauses() {
        let (playlist, mut rx) = RegionPlaylist::new(vec![zone_app("a", 0, 10), zone_app("b", 1, 10)]);
        playlist.play();
        tokio::time::sleep(Duration::from_secs(8)).await;

        playlist.pause();
        tokio::time::sleep(Duration::from_secs(30)).await;
        playlist.play();
        assert!((playlist.progress() - 0.8).abs() < 0.01);

        tokio::time::sleep(Duration::from_secs(1)).await;
        playlist.pause();
        playlist.play();
        assert!((playlist.progress() - 0.9).abs() < 0.01);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(playlist.current_index(), 1);
        // The new item starts from zero
        assert!(playlist.progress() < 0.02);
        assert_eq!(changed_to(&drain(&mut rx)), vec!["a", "a", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_while_paused_resets_progress() {
        let (playlist, _rx) = RegionPlaylist::new(three());
        playlist.play();
        tokio::time::sleep(Duration::from_secs(4)).await;
        playlist.pause();
        playlist.next();

        playlist.play();
        assert_eq!(playlist.current_index(), 1);
        assert!(playlist.progress() < 0.01);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(playlist.current_index(), 1);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(playlist.current_index(), 2);
    }

    #[tokio::test]
    async fn test_play_is_noop_when_playing_or_empty() {
        let (empty, mut empty_rx) = RegionPlaylist::new(Vec::new());
        empty.play();
        assert_eq!(empty.state(), PlaybackState::Idle);
        assert!(drain(&mut empty_rx).is_empty());

        let (playlist, mut rx) = RegionPlaylist::new(three());
        playlist.play();
        playlist.play();
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_playlist_cancels_timer() {
        let (playlist, mut rx) = RegionPlaylist::new(three());
        playlist.play();
        drain(&mut rx);
        drop(playlist);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(drain(&mut rx).is_empty());
    }
}
