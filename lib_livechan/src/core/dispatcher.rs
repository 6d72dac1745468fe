//! # Dispatch Hub
//!
//! The hub owns every connected listener and is the only place posts and
//! status snapshots leave the engine.
//!
//! ## Fan-out
//!
//! A post is serialized once into an `Arc<str>` and every matching listener gets
//! a clone of the pointer. Nothing is serialized when no listener matches.
//! Sends never wait: a listener whose queue is full or whose transport is gone
//! is logged, closed and unsubscribed, and the others are unaffected.
//!
//! ## Delivery lanes
//!
//! Posts arrive from the poller with a delay (see `core::sources`). Each board
//! has one lane task that sleeps until each post's delivery instant and then
//! fans it out, so posts of one board always leave in the order the poller
//! submitted them.
//!
//! ## Status
//!
//! Listener and fetch changes trigger a debounced status broadcast. The
//! snapshot is built when the broadcast actually fires, so status listeners
//! always see the latest state.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::debounce::TrailingDebounce;
use crate::core::registry::{InterestKey, InterestRegistry};
use crate::core::sink::ListenerSink;
use crate::core::sources::SourceRegistry;
use crate::ingestors::board_polling::SchedulerHandle;
use crate::models::{Item, StatusSnapshot};

/// Opaque handle returned by [`DispatchHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which messages a listener wants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerFilter {
    /// Board key; `None` listens to every board.
    pub source: Option<String>,
    /// Only meaningful together with `source`.
    pub thread: Option<u64>,
    /// Status listeners receive status snapshots and no posts.
    pub status: bool,
}

impl ListenerFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn source(key: impl Into<String>) -> Self {
        Self { source: Some(key.into()), ..Self::default() }
    }

    /// Posts of one thread. Thread `0` (the `resto` of an opening post)
    /// means the whole board.
    pub fn thread(key: impl Into<String>, thread: u64) -> Self {
        Self {
            source: Some(key.into()),
            thread: (thread != 0).then_some(thread),
            status: false,
        }
    }

    pub fn status() -> Self {
        Self { status: true, ..Self::default() }
    }

    /// Whether a post from board `key` should reach this listener.
    pub fn matches(&self, item: &Item, key: &str) -> bool {
        !self.status
            && self.source.as_deref().map_or(true, |source| source == key)
            && self.thread.map_or(true, |thread| thread == item.thread_root())
    }
}

/// Hub knobs.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Minimum spacing between two status broadcasts.
    pub status_debounce: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self { status_debounce: Duration::from_millis(1000) }
    }
}

struct Listener {
    filter: ListenerFilter,
    /// Transport handle; closed when the listener is removed.
    sink: Arc<dyn ListenerSink>,
}

/// One post waiting in a board lane.
struct Delivery {
    item: Item,
    /// Instant the post may leave the lane.
    at: Instant,
}

struct HubInner {
    /// Every connected listener.
    listeners: Mutex<HashMap<ListenerId, Listener>>,
    /// Source of [`ListenerId`]s, never reused.
    next_id: AtomicU64,
    /// Listener counts per interest key, read by the poller.
    interest: InterestRegistry,
    sources: Arc<SourceRegistry>,
    /// Sender side of each board's delivery lane, opened on first use.
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<Delivery>>>,
    status_debounce: TrailingDebounce,
    /// Wakes the poll loop when an item listener arrives.
    scheduler: SchedulerHandle,
    /// Cancelled once by `shutdown`; every background task races it.
    shutdown: CancellationToken,
    /// Lanes, trailing status fires and the loops spawned through the hub.
    tasks: TaskTracker,
}

/// # Dispatch Hub
///
/// Listener registry and fan-out point. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DispatchHub {
    inner: Arc<HubInner>,
}

type Target = (ListenerId, Arc<dyn ListenerSink>);

impl DispatchHub {
    pub fn new(sources: Arc<SourceRegistry>, settings: HubSettings) -> Self {
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let status_debounce =
            TrailingDebounce::new(settings.status_debounce, shutdown.clone(), tasks.clone());
        Self {
            inner: Arc::new(HubInner {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                interest: InterestRegistry::new(),
                sources,
                lanes: Mutex::new(HashMap::new()),
                status_debounce,
                scheduler: SchedulerHandle::new(),
                shutdown,
                tasks,
            }),
        }
    }

    pub fn sources(&self) -> &Arc<SourceRegistry> {
        &self.inner.sources
    }

    /// Handle the poller listens on for wake-ups.
    pub fn scheduler(&self) -> SchedulerHandle {
        self.inner.scheduler.clone()
    }

    /// Fires when [`DispatchHub::shutdown`] starts.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.inner.tasks
    }

    /// # Subscribe
    ///
    /// Registers a listener. Item listeners wake the poller so a board that
    /// just gained its first listener is fetched without waiting. A status
    /// listener immediately receives one snapshot of its own.
    pub fn subscribe<S>(&self, sink: S, filter: ListenerFilter) -> ListenerId
    where
        S: ListenerSink + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let sink: Arc<dyn ListenerSink> = Arc::new(sink);
        if self.inner.shutdown.is_cancelled() {
            sink.close();
            return id;
        }

        let key = InterestKey::for_filter(&filter);
        let is_status = filter.status;
        self.inner.interest.subscribe(&key);
        // Broadcast before the listener is visible, so a new status listener
        // gets exactly one snapshot below.
        self.broadcast_status();
        self.inner
            .listeners
            .lock()
            .expect("Dispatcher lock poisoned")
            .insert(id, Listener { filter, sink });
        log::info!("Listener {} registered for {}", id, key);

        if is_status {
            self.send_status_now(id);
        } else {
            self.inner.scheduler.wake();
        }
        id
    }

    /// # Unsubscribe
    ///
    /// Removes a listener and closes its transport. Returns `false` when the
    /// listener was already gone, in which case nothing else happens.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let removed = self.inner.listeners.lock().expect("Dispatcher lock poisoned").remove(&id);
        match removed {
            Some(listener) => {
                let key = InterestKey::for_filter(&listener.filter);
                self.inner.interest.unsubscribe(&key);
                listener.sink.close();
                log::info!("Listener {} removed from {}", id, key);
                self.broadcast_status();
                true
            }
            None => false,
        }
    }

    /// # Deliver Item
    ///
    /// Queues `item` from board `key` on that board's lane for delivery after
    /// `delay`. Dropped silently once the hub is shutting down.
    pub fn deliver_item(&self, item: Item, key: &str, delay: Duration) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let delivery = Delivery { item, at: Instant::now() + delay };
        let mut lanes = self.inner.lanes.lock().expect("Dispatcher lock poisoned");
        let lane = lanes.entry(key.to_string()).or_insert_with(|| self.open_lane(key));
        if lane.send(delivery).is_err() {
            log::debug!("Delivery lane for /{}/ is closed, dropping post", key);
        }
    }

    fn open_lane(&self, key: &str) -> mpsc::UnboundedSender<Delivery> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let hub: Weak<HubInner> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let key = key.to_string();
        self.inner.tasks.spawn(async move {
            loop {
                let delivery = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(delivery) => delivery,
                        None => break,
                    },
                };
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep_until(delivery.at) => {}
                }
                match hub.upgrade() {
                    Some(inner) => DispatchHub { inner }.fan_out(&delivery.item, &key),
                    None => break,
                }
            }
            log::debug!("Delivery lane for /{}/ stopped", key);
        });
        tx
    }

    /// Sends `item` to every matching item listener right away.
    pub fn fan_out(&self, item: &Item, key: &str) {
        let targets: Vec<Target> = {
            let listeners = self.inner.listeners.lock().expect("Dispatcher lock poisoned");
            listeners
                .iter()
                .filter(|(_, listener)| listener.filter.matches(item, key))
                .map(|(id, listener)| (*id, Arc::clone(&listener.sink)))
                .collect()
        };
        if targets.is_empty() {
            return;
        }
        match serde_json::to_string(item) {
            Ok(text) => self.send_all(targets, Arc::from(text)),
            Err(e) => log::error!("Failed to serialize post {} of /{}/: {}", item.no, key, e),
        }
    }

    fn send_all(&self, targets: Vec<Target>, text: Arc<str>) {
        let failed: Vec<ListenerId> = targets
            .into_iter()
            .filter_map(|(id, sink)| match sink.send_text(Arc::clone(&text)) {
                Ok(()) => None,
                Err(e) => {
                    log::warn!("Send to listener {} failed: {}. Disconnecting.", id, e);
                    Some(id)
                }
            })
            .collect();
        for id in failed {
            self.unsubscribe(id);
        }
    }

    /// Debounced status broadcast to every status listener.
    pub fn broadcast_status(&self) {
        let hub = Arc::downgrade(&self.inner);
        self.inner.status_debounce.trigger(move || {
            if let Some(inner) = hub.upgrade() {
                DispatchHub { inner }.send_status_to_all();
            }
        });
    }

    fn send_status_to_all(&self) {
        let targets: Vec<Target> = {
            let listeners = self.inner.listeners.lock().expect("Dispatcher lock poisoned");
            listeners
                .iter()
                .filter(|(_, listener)| listener.filter.status)
                .map(|(id, listener)| (*id, Arc::clone(&listener.sink)))
                .collect()
        };
        if targets.is_empty() {
            return;
        }
        if let Some(text) = self.status_text() {
            self.send_all(targets, text);
        }
    }

    fn send_status_now(&self, id: ListenerId) {
        let sink = {
            let listeners = self.inner.listeners.lock().expect("Dispatcher lock poisoned");
            listeners.get(&id).map(|listener| Arc::clone(&listener.sink))
        };
        if let (Some(sink), Some(text)) = (sink, self.status_text()) {
            self.send_all(vec![(id, sink)], text);
        }
    }

    fn status_text(&self) -> Option<Arc<str>> {
        match serde_json::to_string(&self.status()) {
            Ok(text) => Some(Arc::from(text)),
            Err(e) => {
                log::error!("Failed to serialize status: {}", e);
                None
            }
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> StatusSnapshot {
        // Counts are copied first so the registry lock is never taken while
        // the interest lock is held.
        let counts = self.inner.interest.snapshot();
        let count = |key: &InterestKey| counts.get(key).copied().unwrap_or(0);
        let all = count(&InterestKey::All);
        StatusSnapshot {
            status_listeners: count(&InterestKey::Status),
            all_listeners: all,
            sources: self
                .inner
                .sources
                .status_rows(|key| count(&InterestKey::Source(key.to_string())), all),
        }
    }

    /// Item listeners that would receive posts from board `key`.
    pub fn interest_count(&self, key: &str) -> u32 {
        self.inner.interest.interest_count(key)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().expect("Dispatcher lock poisoned").len()
    }

    /// Stops background work, closes every listener and waits for the
    /// hub's tasks (poller, lanes, pending status) to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let listeners: Vec<(ListenerId, Listener)> = self
            .inner
            .listeners
            .lock()
            .expect("Dispatcher lock poisoned")
            .drain()
            .collect();
        for (id, listener) in &listeners {
            self.inner.interest.unsubscribe(&InterestKey::for_filter(&listener.filter));
            listener.sink.close();
            log::debug!("Listener {} closed on shutdown", id);
        }
        self.inner.lanes.lock().expect("Dispatcher lock poisoned").clear();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        log::info!("Dispatch hub stopped, {} listeners closed", listeners.len());
    }
}
