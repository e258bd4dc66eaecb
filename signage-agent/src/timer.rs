//! Cancellable timers for the playback engine
//!
//! Every piece of scheduled work (playlist advance, heartbeat interval,
//! pairing poll) runs as a tokio task owned by a [`TimerHandle`]:
//! - `cancel()` is idempotent and safe to call from any state
//! - dropping the handle cancels the task
//! - tokio's paused clock drives all of it in tests

use std::future::Future;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

/// Handle to a scheduled task. Cancels the task when dropped.
#[derive(Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Run `callback` once after `delay`
    pub fn after<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        })
    }

    /// Take ownership of an arbitrary background task
    pub fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let join: JoinHandle<()> = tokio::spawn(task);
        Self {
            abort: join.abort_handle(),
        }
    }

    /// Stop the task. Calling this more than once has no further effect.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}
