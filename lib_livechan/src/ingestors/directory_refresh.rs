//! Periodic reload of the board directory.
//!
//! New boards are added as they appear. Known boards get fresh metadata and
//! keep their polling state. A failed reload leaves the registry as it was.

use std::sync::Arc;
use std::time::Duration;

use log::error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::dispatcher::DispatchHub;
use crate::core::sources::SourceRegistry;
use crate::ingestors::feed::{BoardFeed, FetchError};

/// Background task keeping the source registry in line with the directory.
pub struct DirectoryRefresher {
    feed: Arc<dyn BoardFeed>,
    sources: Arc<SourceRegistry>,
    /// Time between two reloads.
    period: Duration,
}

impl DirectoryRefresher {
    pub fn new(feed: Arc<dyn BoardFeed>, sources: Arc<SourceRegistry>, period: Duration) -> Self {
        Self { feed, sources, period }
    }

    /// Reloads the directory once. Returns how many boards were new.
    pub async fn refresh_once(&self) -> Result<usize, FetchError> {
        self.sources.refresh(self.feed.as_ref()).await
    }

    /// Reloads every `period`, starting one period from now.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_once().await {
                        error!("Board directory refresh failed: {}", e);
                    }
                }
            }
        }
    }

    /// Runs the refresh loop on the hub's task tracker until hub shutdown.
    pub fn spawn(self, hub: &DispatchHub) {
        let shutdown = hub.shutdown_token();
        hub.tasks().spawn(self.run(shutdown));
    }
}
