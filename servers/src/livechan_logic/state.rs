use lib_livechan::{DispatchHub, SourceRegistry};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    // Listener registry and fan-out point
    pub hub: DispatchHub,
    // Per-socket queue size before a slow client is dropped
    pub listener_queue: usize,
}

impl AppState {
    pub fn new(hub: DispatchHub, listener_queue: usize) -> Self {
        Self { hub, listener_queue }
    }

    pub fn sources(&self) -> &Arc<SourceRegistry> {
        self.hub.sources()
    }
}
