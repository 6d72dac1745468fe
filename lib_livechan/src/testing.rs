//! Test doubles for driving the engine without a network.
//!
//! Enabled for this crate's unit tests and, through the `test-util` feature,
//! for integration tests in other workspace members.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Map;

use crate::ingestors::feed::{BoardFeed, FetchError};
use crate::models::chan::IndexThread;
use crate::models::{Directory, IndexPage, Item, SourceMeta};

type Scripted<T> = Result<Option<T>, String>;

/// A [`BoardFeed`] that answers from scripted responses.
///
/// Index responses are queued per board and consumed in order. An exhausted
/// queue answers "not modified". The directory answer is sticky until changed.
pub struct ScriptedFeed {
    directory: Mutex<Scripted<Directory>>,
    indexes: Mutex<HashMap<String, VecDeque<Scripted<IndexPage>>>>,
    calls: Mutex<Vec<String>>,
    directory_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self {
            directory: Mutex::new(Ok(None)),
            indexes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            directory_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Every index fetch takes `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_directory(&self, sources: Vec<SourceMeta>) {
        *self.directory.lock().expect("Feed lock poisoned") = Ok(Some(Directory { sources }));
    }

    /// Makes the directory answer "not modified".
    pub fn clear_directory(&self) {
        *self.directory.lock().expect("Feed lock poisoned") = Ok(None);
    }

    pub fn fail_directory(&self, reason: &str) {
        *self.directory.lock().expect("Feed lock poisoned") = Err(reason.to_string());
    }

    fn push(&self, key: &str, response: Scripted<IndexPage>) {
        let mut indexes = self.indexes.lock().expect("Feed lock poisoned");
        indexes.entry(key.to_string()).or_default().push_back(response);
    }

    pub fn push_index(&self, key: &str, page: IndexPage) {
        self.push(key, Ok(Some(page)));
    }

    pub fn push_not_modified(&self, key: &str) {
        self.push(key, Ok(None));
    }

    pub fn push_failure(&self, key: &str, reason: &str) {
        self.push(key, Err(reason.to_string()));
    }

    /// Boards whose index was requested, in request order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("Feed lock poisoned").clone()
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls.lock().expect("Feed lock poisoned").iter().filter(|k| *k == key).count()
    }

    pub fn directory_calls(&self) -> usize {
        self.directory_calls.load(Ordering::SeqCst)
    }

    /// Highest number of index fetches ever running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BoardFeed for ScriptedFeed {
    async fn fetch_directory(&self) -> Result<Option<Directory>, FetchError> {
        self.directory_calls.fetch_add(1, Ordering::SeqCst);
        self.directory.lock().expect("Feed lock poisoned").clone().map_err(FetchError::Unavailable)
    }

    async fn fetch_index(&self, key: &str) -> Result<Option<IndexPage>, FetchError> {
        self.calls.lock().expect("Feed lock poisoned").push(key.to_string());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = {
            let mut indexes = self.indexes.lock().expect("Feed lock poisoned");
            indexes.get_mut(key).and_then(VecDeque::pop_front)
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or(Ok(None)).map_err(FetchError::Unavailable)
    }
}

/// A post with a unix-seconds timestamp.
pub fn item(no: u64, resto: u64, time: i64) -> Item {
    Item { no, resto, time, extra: Map::new() }
}

/// A post published at `at` (second resolution).
pub fn item_at(no: u64, resto: u64, at: DateTime<Utc>) -> Item {
    item(no, resto, at.timestamp())
}

/// An index page holding `items` as one thread.
pub fn index_of(items: Vec<Item>) -> IndexPage {
    IndexPage { threads: vec![IndexThread { items }] }
}

pub fn meta(key: &str) -> SourceMeta {
    SourceMeta::new(key, format!("/{}/", key))
}
