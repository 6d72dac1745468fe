//! Leading-edge debounce with a single trailing call.
//!
//! The first trigger after a quiet period runs right away. Triggers inside the
//! interval collapse into one call at the end of it. Callers should compute
//! their payload when the closure runs, not when they trigger, since only one
//! of the coalesced closures is kept.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Default)]
struct DebounceState {
    last_fired: Option<Instant>,
    trailing: bool,
}

#[derive(Debug, Clone)]
pub struct TrailingDebounce {
    interval: Duration,
    state: Arc<Mutex<DebounceState>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl TrailingDebounce {
    /// Trailing calls run on `tasks` and are dropped once `shutdown` fires.
    pub fn new(interval: Duration, shutdown: CancellationToken, tasks: TaskTracker) -> Self {
        Self {
            interval,
            state: Arc::new(Mutex::new(DebounceState::default())),
            shutdown,
            tasks,
        }
    }

    /// # Trigger
    ///
    /// Runs `action` now if the window since the last fire has passed.
    /// Otherwise schedules it at the window boundary, unless a trailing fire
    /// is already pending, in which case `action` is dropped.
    pub fn trigger<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let now = Instant::now();
        let fire_at = {
            let mut state = self.state.lock().expect("Debounce lock poisoned");
            if state.trailing {
                return;
            }
            match state.last_fired {
                Some(last) if now < last + self.interval => {
                    state.trailing = true;
                    last + self.interval
                }
                _ => {
                    state.last_fired = Some(now);
                    drop(state);
                    action();
                    return;
                }
            }
        };

        let state = Arc::clone(&self.state);
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep_until(fire_at) => {
                    {
                        let mut state = state.lock().expect("Debounce lock poisoned");
                        state.trailing = false;
                        state.last_fired = Some(Instant::now());
                    }
                    action();
                }
            }
        });
    }
}
