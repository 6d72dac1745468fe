//! # Interest Registry
//!
//! Reference counts of listeners per interest key. The poller reads these to
//! decide whether a board is worth fetching at all; the status broadcast reads
//! them to report listener numbers.
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::core::dispatcher::ListenerFilter;

/// What a listener counts towards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InterestKey {
    /// Status listeners.
    Status,
    /// Item listeners without a board filter.
    All,
    /// Item listeners filtered to one board (any thread).
    Source(String),
}

impl InterestKey {
    /// The single key a listener with `filter` is counted under.
    pub fn for_filter(filter: &ListenerFilter) -> Self {
        if filter.status {
            return InterestKey::Status;
        }
        match &filter.source {
            Some(key) => InterestKey::Source(key.clone()),
            None => InterestKey::All,
        }
    }
}

impl fmt::Display for InterestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterestKey::Status => f.write_str("status"),
            InterestKey::All => f.write_str("all"),
            InterestKey::Source(key) => write!(f, "/{}/", key),
        }
    }
}

#[derive(Debug, Default)]
pub struct InterestRegistry {
    counts: Mutex<HashMap<InterestKey, u32>>,
}

impl InterestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one listener under `key`. Returns `true` when this is the first one.
    pub fn subscribe(&self, key: &InterestKey) -> bool {
        let mut counts = self.counts.lock().expect("Registry lock poisoned");
        let entry = counts.entry(key.clone()).or_insert(0);
        *entry += 1;
        if *entry == 1 {
            log::debug!("First listener for {}", key);
            true
        } else {
            false
        }
    }

    /// Removes one listener under `key`. Returns `true` when this was the last
    /// one. Counts never go below zero.
    pub fn unsubscribe(&self, key: &InterestKey) -> bool {
        let mut counts = self.counts.lock().expect("Registry lock poisoned");
        match counts.get_mut(key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                counts.remove(key);
                log::debug!("Last listener for {} left", key);
                true
            }
            None => false,
        }
    }

    pub fn count(&self, key: &InterestKey) -> u32 {
        let counts = self.counts.lock().expect("Registry lock poisoned");
        counts.get(key).copied().unwrap_or(0)
    }

    /// Item listeners that would receive posts from board `key`.
    pub fn interest_count(&self, key: &str) -> u32 {
        let counts = self.counts.lock().expect("Registry lock poisoned");
        let all = counts.get(&InterestKey::All).copied().unwrap_or(0);
        let specific = counts.get(&InterestKey::Source(key.to_string())).copied().unwrap_or(0);
        all + specific
    }

    /// Copy of every non-zero count.
    pub fn snapshot(&self) -> HashMap<InterestKey, u32> {
        self.counts.lock().expect("Registry lock poisoned").clone()
    }
}
