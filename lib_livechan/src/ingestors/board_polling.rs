//! # Board Polling Scheduler
//!
//! One self-scheduling loop polls every board, one board at a time. Each turn
//! it asks the source registry for the most urgent board that somebody listens
//! to, sleeps until that board is due, fetches its index and hands the merge
//! result to the dispatch hub.
//!
//! ## Key Design Principles:
//! - **One fetch in flight**: the loop awaits each fetch before choosing the
//!   next board, so the upstream never sees two index requests from us at once.
//! - **Interest gating**: boards without listeners are never selected. When
//!   nothing is watched the loop parks until a [`SchedulerHandle::wake`].
//! - **Interruptible sleep**: a wake during a sleep makes the loop recompute
//!   due times, so a board that just gained its first listener does not wait
//!   for another board's timer.
//! - **Bounded retry**: a failed fetch pushes the board's due time out by the
//!   retry delay instead of retrying in a hot loop.

use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::Notify;

use crate::core::dispatcher::DispatchHub;
use crate::core::sources::Due;
use crate::ingestors::feed::BoardFeed;
use crate::utils::Clock;

/// Wakes the poll loop so it re-evaluates due times. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SchedulerHandle {
    wake: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a re-evaluation. A wake that arrives while the loop is busy is
    /// kept and consumed at the loop's next wait.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    async fn woken(&self) {
        self.wake.notified().await;
    }
}

/// The poll loop. Build one per process and [`spawn`](BoardPoller::spawn) it.
pub struct BoardPoller {
    /// Upstream the index pages come from.
    feed: Arc<dyn BoardFeed>,
    /// Source of interest counts and destination of new posts.
    hub: DispatchHub,
    /// Wall clock for merges, consistent with tokio timers.
    clock: Clock,
}

impl BoardPoller {
    pub fn new(feed: Arc<dyn BoardFeed>, hub: DispatchHub) -> Self {
        Self { feed, hub, clock: Clock::new() }
    }

    /// Replaces the wall clock used for merge timestamps.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Runs the loop on the hub's task tracker; it stops on hub shutdown.
    pub fn spawn(self) {
        let tasks = self.hub.tasks().clone();
        tasks.spawn(self.run());
    }

    /// # Main Execution Loop
    ///
    /// 1.  Pick the watched board with the smallest due time.
    /// 2.  Nothing watched: park until woken.
    /// 3.  Due in the future: sleep until then, or until woken.
    /// 4.  Due now: poll it, then start over.
    pub async fn run(self) {
        let handle = self.hub.scheduler();
        let shutdown = self.hub.shutdown_token();
        let sources = Arc::clone(self.hub.sources());
        info!("Board poller started.");

        loop {
            let next = sources.most_urgent(|key| self.hub.interest_count(key));
            match next {
                None => {
                    debug!("No watched boards, waiting for listeners.");
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = handle.woken() => {}
                    }
                }
                Some((key, Due::At(at))) if at > self.clock.now() => {
                    let wait = self.clock.until(at);
                    debug!("Sleeping {:.1}s until board /{}/ is due.", wait.as_secs_f64(), key);
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = handle.woken() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Some((key, _)) => {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = self.poll_board(&key) => {}
                    }
                }
            }
        }
        info!("Board poller stopped.");
    }

    /// Fetches one board and schedules delivery of whatever is new.
    async fn poll_board(&self, key: &str) {
        let sources = self.hub.sources();
        sources.set_fetching(key, true);
        self.hub.broadcast_status();
        info!("Fetching board /{}/...", key);

        match self.feed.fetch_index(key).await {
            Ok(index) => {
                let now = self.clock.now();
                if let Some(outcome) = sources.merge_index(key, index, now) {
                    if let Some(due) = outcome.next_due {
                        debug!(
                            "Board /{}/ next due in {:.1}s.",
                            key,
                            (due - now).num_milliseconds() as f64 / 1000.0
                        );
                    }
                    for scheduled in outcome.deliveries {
                        self.hub.deliver_item(scheduled.item, key, scheduled.delay);
                    }
                }
            }
            Err(e) => {
                error!("Failed to fetch board /{}/: {}", key, e);
                sources.record_failure(key, self.clock.now());
            }
        }

        sources.set_fetching(key, false);
        self.hub.broadcast_status();
    }
}
