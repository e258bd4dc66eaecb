//! Timed visual handoff between two items of the same zone
//!
//! The coordinator owns the zone's authoritative item and at most one
//! in-flight transition:
//! - `request()` starts a transition, or queues it (FIFO) when one is running
//! - `frame()` samples the interpolated presentation of both items
//! - `finish_due()` completes the transition once its duration has elapsed,
//!   handing back the outgoing item for disposal
//! - `start_next()` promotes the oldest queued request
//!
//! Time is passed in explicitly so the coordinator itself never sleeps.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Supported visual handoffs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    #[default]
    Fade,
    Slide,
    Zoom,
    #[serde(other)]
    None,
}

impl FromStr for TransitionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(TransitionKind::None),
            "fade" => Ok(TransitionKind::Fade),
            "slide" => Ok(TransitionKind::Slide),
            "zoom" => Ok(TransitionKind::Zoom),
            other => Err(format!("unknown transition: {}", other)),
        }
    }
}

/// Visual state of one item at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Presentation {
    pub opacity: f32,
    /// Horizontal offset in percent of the zone width
    pub offset_x: f32,
    pub scale: f32,
}

impl Presentation {
    /// Fully visible, at rest
    pub const SETTLED: Presentation = Presentation { opacity: 1.0, offset_x: 0.0, scale: 1.0 };
    pub const HIDDEN: Presentation = Presentation { opacity: 0.0, offset_x: 0.0, scale: 1.0 };
}

/// Presentation of (outgoing, incoming) at linear progress `t` in `[0, 1]`
pub fn interpolate(kind: TransitionKind, t: f32) -> (Presentation, Presentation) {
    let t = t.clamp(0.0, 1.0);
    // smoothstep
    let e = t * t * (3.0 - 2.0 * t);

    match kind {
        TransitionKind::None => (Presentation::HIDDEN, Presentation::SETTLED),
        TransitionKind::Fade => (
            Presentation { opacity: 1.0 - e, ..Presentation::SETTLED },
            Presentation { opacity: e, ..Presentation::SETTLED },
        ),
        TransitionKind::Slide => (
            Presentation { offset_x: -100.0 * e, ..Presentation::SETTLED },
            Presentation { offset_x: 100.0 * (1.0 - e), ..Presentation::SETTLED },
        ),
        TransitionKind::Zoom => (
            Presentation { opacity: 1.0 - e, offset_x: 0.0, scale: 1.0 + 0.1 * e },
            Presentation { opacity: e, offset_x: 0.0, scale: 0.9 + 0.1 * e },
        ),
    }
}

/// Outcome of a transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    /// Waiting behind the in-flight transition; position in the queue (1-based)
    Queued(usize),
}

/// One sampled frame of the in-flight transition
#[derive(Debug)]
pub struct Frame<'a, T> {
    pub progress: f32,
    pub outgoing: Option<(&'a T, Presentation)>,
    pub incoming: (&'a T, Presentation),
}

struct ActiveTransition<T> {
    outgoing: Option<T>,
    incoming: T,
    started: Instant,
}

pub struct TransitionCoordinator<T> {
    kind: TransitionKind,
    duration: Duration,
    current: Option<T>,
    active: Option<ActiveTransition<T>>,
    queue: VecDeque<T>,
}

impl<T> TransitionCoordinator<T> {
    pub fn new(kind: TransitionKind, duration: Duration) -> Self {
        // A "none" transition is an instant cut
        let duration = if kind == TransitionKind::None { Duration::ZERO } else { duration };
        Self {
            kind,
            duration,
            current: None,
            active: None,
            queue: VecDeque::new(),
        }
    }

    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    /// The item that is authoritative once no transition is running
    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.active.is_some()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Hand `incoming` over, starting now or after the running transition
    pub fn request(&mut self, incoming: T, now: Instant) -> Admission {
        if self.active.is_some() {
            self.queue.push_back(incoming);
            return Admission::Queued(self.queue.len());
        }
        self.begin(incoming, now);
        Admission::Started
    }

    /// Instant at which the in-flight transition ends
    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|a| a.started + self.duration)
    }

    /// Interpolated presentation of the in-flight transition at `now`
    pub fn frame(&self, now: Instant) -> Option<Frame<'_, T>> {
        let active = self.active.as_ref()?;
        let progress = if self.duration.is_zero() {
            1.0
        } else {
            let elapsed = now.saturating_duration_since(active.started);
            (elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
        };
        let (out_state, in_state) = interpolate(self.kind, progress);

        Some(Frame {
            progress,
            outgoing: active.outgoing.as_ref().map(|item| (item, out_state)),
            incoming: (&active.incoming, in_state),
        })
    }

    /// Complete the in-flight transition if its duration has elapsed.
    ///
    /// Returns `Some(outgoing)` on completion (the inner option is `None` when the
    /// zone was empty before). The incoming item becomes [`current`](Self::current).
    pub fn finish_due(&mut self, now: Instant) -> Option<Option<T>> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        let active = self.active.take()?;
        self.current = Some(active.incoming);
        Some(active.outgoing)
    }

    /// Start the oldest queued request, if any and if nothing is in flight
    pub fn start_next(&mut self, now: Instant) -> bool {
        if self.active.is_some() {
            return false;
        }
        match self.queue.pop_front() {
            Some(next) => {
                self.begin(next, now);
                true
            }
            None => false,
        }
    }

    /// Drop everything, including the authoritative item
    pub fn reset(&mut self) {
        self.current = None;
        self.active = None;
        self.queue.clear();
    }

    fn begin(&mut self, incoming: T, now: Instant) {
        self.active = Some(ActiveTransition {
            outgoing: self.current.take(),
            incoming,
            started: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_interpolation_endpoints() {
        for kind in [TransitionKind::Fade, TransitionKind::Slide, TransitionKind::Zoom] {
            let (out0, in0) = interpolate(kind, 0.0);
            let (out1, in1) = interpolate(kind, 1.0);
            assert_eq!(out0, Presentation::SETTLED, "{:?} outgoing at start", kind);
            assert_eq!(in1, Presentation::SETTLED, "{:?} incoming at end", kind);
            assert!(in0 != Presentation::SETTLED);
            assert!(out1 != Presentation::SETTLED);
        }
    }

    #[test]
    fn test_fade_midpoint() {
        let (out, inc) = interpolate(TransitionKind::Fade, 0.5);
        assert!(approx(out.opacity, 0.5));
        assert!(approx(inc.opacity, 0.5));
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("Zoom".parse::<TransitionKind>().unwrap(), TransitionKind::Zoom);
        assert!("wipe".parse::<TransitionKind>().is_err());
        let kind: TransitionKind = serde_json::from_str("\"wipe\"").unwrap();
        assert_eq!(kind, TransitionKind::None);
        let kind: TransitionKind = serde_json::from_str("\"slide\"").unwrap();
        assert_eq!(kind, TransitionKind::Slide);
        assert_eq!(TransitionKind::default(), TransitionKind::Fade);
    }

    #[test]
    fn test_transition_lifecycle() {
        let start = Instant::now();
        let mut coordinator = TransitionCoordinator::new(TransitionKind::Fade, Duration::from_millis(400));

        assert_eq!(coordinator.request("a", start), Admission::Started);
        assert!(coordinator.frame(start).unwrap().outgoing.is_none());
        assert_eq!(coordinator.finish_due(start + Duration::from_millis(399)), None);
        assert_eq!(coordinator.finish_due(start + Duration::from_millis(400)), Some(None));
        assert_eq!(coordinator.current(), Some(&"a"));

        let t1 = start + Duration::from_secs(1);
        assert_eq!(coordinator.request("b", t1), Admission::Started);
        let frame = coordinator.frame(t1 + Duration::from_millis(200)).unwrap();
        assert!(approx(frame.progress, 0.5));
        assert_eq!(frame.outgoing.map(|(item, _)| *item), Some("a"));
        assert_eq!(*frame.incoming.0, "b");

        assert_eq!(coordinator.finish_due(t1 + Duration::from_millis(500)), Some(Some("a")));
        assert_eq!(coordinator.current(), Some(&"b"));
        assert!(!coordinator.is_in_flight());
    }

    #[test]
    fn test_requests_queue_while_in_flight() {
        let start = Instant::now();
        let mut coordinator = TransitionCoordinator::new(TransitionKind::Slide, Duration::from_millis(100));

        assert_eq!(coordinator.request(1, start), Admission::Started);
        assert_eq!(coordinator.request(2, start), Admission::Queued(1));
        assert_eq!(coordinator.request(3, start), Admission::Queued(2));
        assert!(!coordinator.start_next(start));

        let t = start + Duration::from_millis(100);
        assert_eq!(coordinator.finish_due(t), Some(None));
        assert!(coordinator.start_next(t));
        assert_eq!(coordinator.frame(t).unwrap().outgoing.map(|(i, _)| *i), Some(1));

        let t = t + Duration::from_millis(100);
        assert_eq!(coordinator.finish_due(t), Some(Some(1)));
        assert!(coordinator.start_next(t));
        let t = t + Duration::from_millis(100);
        assert_eq!(coordinator.finish_due(t), Some(Some(2)));
        assert_eq!(coordinator.current(), Some(&3));
        assert_eq!(coordinator.pending(), 0);
    }

    #[test]
    fn test_none_is_instant() {
        let now = Instant::now();
        let mut coordinator = TransitionCoordinator::new(TransitionKind::None, Duration::from_secs(5));
        coordinator.request("x", now);
        assert_eq!(coordinator.deadline(), Some(now));
        assert_eq!(coordinator.finish_due(now), Some(None));
    }
}
