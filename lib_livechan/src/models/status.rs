use serde::{Deserialize, Serialize};

/// Aggregate status pushed to status listeners.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Connected status listeners, the receiver included.
    pub status_listeners: u32,
    /// Item listeners without a board filter.
    pub all_listeners: u32,
    /// One line per known board, sorted by key.
    pub sources: Vec<SourceStatus>,
}

/// Per-board line of a [`StatusSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    /// Board key.
    pub key: String,
    /// An index fetch is in flight right now.
    pub fetching: bool,
    /// Listeners filtered to this board (unfiltered ones are counted in `allListeners`).
    pub listeners: u32,
    /// Highest post id seen, `null` before the first successful poll.
    pub last_seen_id: Option<u64>,
    /// Next poll in unix milliseconds; `0` means due now, `null` means not scheduled.
    pub next_due: Option<i64>,
}
