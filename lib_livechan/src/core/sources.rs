//! # Source Registry
//!
//! One [`SourceState`] per board: the directory metadata plus the runtime state
//! the poller needs to decide when to look at the board again. The registry is
//! the only owner of this state; the poller and the dispatch hub go through its
//! methods and never hold references into the map.
//!
//! ## Due-time estimation
//!
//! After every fetch the state keeps the last `history_len` posts and derives
//! the board's posting rate from them:
//!
//! ```text
//! span    = newest.no - oldest.no + 1          (posts in the retained window)
//! average = (now - oldest.time) / span         (time per post)
//! due     = now + min(target_backlog * average, max_sleep)
//! ```
//!
//! so a busy board is polled every few seconds and a dead one every
//! `max_sleep`. New posts from one fetch are then spread over the interval
//! until the next fetch, which turns a burst every poll into a steady trickle
//! on the listener side.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};

use crate::ingestors::feed::{BoardFeed, FetchError};
use crate::models::{IndexPage, Item, SourceMeta, SourceStatus};

/// When a board should be polled next.
///
/// Variant order matters: the derived ordering ranks `Now` before any `At`, and
/// `Never` after everything, so the most urgent board is simply the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Due {
    /// Never polled and somebody is listening.
    Now,
    /// Estimated from the last fetch; may already be in the past.
    At(DateTime<Utc>),
    /// Nobody is listening.
    Never,
}

impl Due {
    /// Status-message encoding: `0` for now, unix milliseconds, or `None`.
    pub fn as_wire(&self) -> Option<i64> {
        match self {
            Due::Now => Some(0),
            Due::At(at) => Some(at.timestamp_millis()),
            Due::Never => None,
        }
    }
}

/// Knobs of the merge and estimation logic.
#[derive(Debug, Clone)]
pub struct PollTuning {
    /// Posts kept per board for rate estimation.
    pub history_len: usize,
    /// How many new posts the next fetch should ideally find.
    pub target_backlog: u32,
    /// Upper bound on the time between two polls of a watched board.
    pub max_sleep: Duration,
    /// On the first fetch, posts younger than this are treated as new.
    pub seed_window: Duration,
    /// Delay before retrying a board whose fetch failed.
    pub retry_delay: Duration,
}

impl Default for PollTuning {
    fn default() -> Self {
        Self {
            history_len: 100,
            target_backlog: 5,
            max_sleep: Duration::from_secs(20 * 60),
            seed_window: Duration::from_secs(20 * 60),
            retry_delay: Duration::from_secs(10),
        }
    }
}

/// A post together with how long to hold it back before delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledItem {
    /// The post, already stamped with its board.
    pub item: Item,
    /// Hold-back before the hub fans it out, relative to the merge.
    pub delay: Duration,
}

/// What a single merge found.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// The board had never been merged before this call.
    pub first_fetch: bool,
    /// Posts that passed the "new" test, in id order.
    pub new_items: usize,
    /// Ids skipped between consecutive new posts.
    pub missed: u64,
    /// When the board should be fetched again.
    pub next_due: Option<DateTime<Utc>>,
    /// Posts to deliver, in id order.
    pub deliveries: Vec<ScheduledItem>,
}

/// Runtime state of one board.
#[derive(Debug, Clone)]
pub struct SourceState {
    /// Directory metadata, replaced on every refresh.
    meta: SourceMeta,
    /// An index fetch for this board is in flight.
    fetching: bool,
    /// Highest post id seen; `None` until the first successful merge.
    last_seen_id: Option<u64>,
    /// Up to `history_len` recent posts, ascending by id.
    recent: Vec<Item>,
    /// Estimated next poll; `None` means never polled.
    next_due_hint: Option<DateTime<Utc>>,
}

impl SourceState {
    pub fn new(meta: SourceMeta) -> Self {
        Self {
            meta,
            fetching: false,
            last_seen_id: None,
            recent: Vec::new(),
            next_due_hint: None,
        }
    }

    pub fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    pub fn key(&self) -> &str {
        &self.meta.key
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    pub fn last_seen_id(&self) -> Option<u64> {
        self.last_seen_id
    }

    /// Retained history, ascending by id.
    pub fn recent_items(&self) -> &[Item] {
        &self.recent
    }

    /// Effective due time given how many listeners care about this board.
    pub fn due(&self, interest: u32) -> Due {
        if interest == 0 {
            return Due::Never;
        }
        match self.next_due_hint {
            None => Due::Now,
            Some(at) => Due::At(at),
        }
    }

    /// Replaces the directory metadata, keeping the runtime fields.
    pub fn update_meta(&mut self, meta: SourceMeta) {
        self.meta = meta;
    }

    /// # Merge Index
    ///
    /// Merges a freshly fetched index page (`None` = not modified) at `now`:
    ///
    /// 1.  Picks the new posts (above `last_seen_id`, or inside the seed
    ///     window on a first fetch), sorted and deduplicated by id.
    /// 2.  Advances `last_seen_id` and counts skipped ids.
    /// 3.  Folds the new posts into the bounded history and re-estimates
    ///     the next due time from it.
    /// 4.  Spreads the new posts over the interval until then.
    pub fn merge_index(
        &mut self,
        index: Option<IndexPage>,
        now: DateTime<Utc>,
        tuning: &PollTuning,
    ) -> MergeOutcome {
        let first_fetch = self.last_seen_id.is_none();
        let seed_cutoff = now - delta(tuning.seed_window);

        let mut newest_in_page: Option<u64> = None;
        let mut candidates: Vec<Item> = Vec::new();
        for mut item in index.into_iter().flat_map(IndexPage::into_items) {
            newest_in_page = newest_in_page.max(Some(item.no));
            let is_new = match self.last_seen_id {
                Some(last) => item.no > last,
                None => item.published_at() > seed_cutoff,
            };
            if is_new {
                item.stamp_source(&self.meta.key);
                candidates.push(item);
            }
        }
        candidates.sort_by_key(|item| item.no);
        candidates.dedup_by_key(|item| item.no);

        let mut missed = 0;
        match self.last_seen_id {
            Some(mut last) => {
                for item in &candidates {
                    if item.no > last + 1 {
                        missed += item.no - last - 1;
                    }
                    last = item.no;
                }
                self.last_seen_id = Some(last);
                if missed > 0 {
                    warn!("Missed {} posts on board /{}/", missed, self.meta.key);
                }
            }
            None => self.last_seen_id = newest_in_page,
        }
        info!("Got {} new posts on board /{}/.", candidates.len(), self.meta.key);

        self.remember(&candidates, tuning.history_len);
        let until = self.estimate_next_due(now, tuning);
        self.next_due_hint = Some(until);

        let deliveries = spread_deliveries(&candidates, first_fetch, now, until);
        MergeOutcome {
            first_fetch,
            new_items: candidates.len(),
            missed,
            next_due: Some(until),
            deliveries,
        }
    }

    /// Schedules a retry after a failed fetch.
    pub fn record_failure(&mut self, now: DateTime<Utc>, tuning: &PollTuning) {
        self.next_due_hint = Some(now + delta(tuning.retry_delay));
    }

    fn remember(&mut self, items: &[Item], capacity: usize) {
        self.recent.extend_from_slice(items);
        self.recent.sort_by_key(|item| item.no);
        self.recent.dedup_by_key(|item| item.no);
        if self.recent.len() > capacity {
            let overflow = self.recent.len() - capacity;
            self.recent.drain(..overflow);
        }
    }

    fn estimate_next_due(&self, now: DateTime<Utc>, tuning: &PollTuning) -> DateTime<Utc> {
        let max_sleep_ms = tuning.max_sleep.as_millis() as f64;
        let wait_ms = match (self.recent.first(), self.recent.last()) {
            (Some(oldest), Some(newest)) => {
                let span = (newest.no - oldest.no + 1) as f64;
                let elapsed_ms = (now - oldest.published_at()).num_milliseconds().max(0) as f64;
                let average_ms = elapsed_ms / span;
                (average_ms * f64::from(tuning.target_backlog)).min(max_sleep_ms)
            }
            _ => max_sleep_ms,
        };
        now + TimeDelta::milliseconds(wait_ms as i64)
    }
}

/// # Delivery Spread
///
/// Spreads `items` (ascending ids) over `[now, until]` in proportion to their
/// publication times, so one fetch trickles out until the next one.
///
/// On a first fetch the window is mirrored into the past (`since = now - (until
/// - now)`); later fetches anchor it on the first new post. Delays are clamped
/// to the window, so posts published before `since` go out right away, in id
/// order.
fn spread_deliveries(
    items: &[Item],
    first_fetch: bool,
    now: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Vec<ScheduledItem> {
    let Some(first) = items.first() else {
        return Vec::new();
    };

    let horizon_ms = (until - now).num_milliseconds().max(0) as f64;
    let since = if first_fetch { now - (until - now) } else { first.published_at() };
    let window_ms = (now - since).num_milliseconds() as f64;

    items
        .iter()
        .map(|item| {
            let offset_ms = (item.published_at() - since).num_milliseconds() as f64;
            let delay_ms = if window_ms > 0.0 { offset_ms / window_ms * horizon_ms } else { 0.0 };
            let delay_ms = delay_ms.clamp(0.0, horizon_ms);
            ScheduledItem {
                item: item.clone(),
                delay: Duration::from_millis(delay_ms as u64),
            }
        })
        .collect()
}

fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::zero())
}

/// # Source Registry
///
/// Every known board, keyed by board id, behind one mutex. Boards are only
/// ever added; a board that leaves the directory keeps its state.
pub struct SourceRegistry {
    /// Board key to runtime state.
    sources: Mutex<HashMap<String, SourceState>>,
    /// Merge and estimation knobs shared by every board.
    tuning: PollTuning,
}

impl SourceRegistry {
    pub fn new(tuning: PollTuning) -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            tuning,
        }
    }

    pub fn tuning(&self) -> &PollTuning {
        &self.tuning
    }

    /// Inserts unseen boards and refreshes metadata of known ones. Returns how
    /// many boards were new. Boards missing from `metas` are left alone.
    pub fn upsert(&self, metas: Vec<SourceMeta>) -> usize {
        let mut sources = self.sources.lock().expect("Registry lock poisoned");
        let mut inserted = 0;
        for meta in metas {
            match sources.get_mut(&meta.key) {
                Some(state) => state.update_meta(meta),
                None => {
                    inserted += 1;
                    sources.insert(meta.key.clone(), SourceState::new(meta));
                }
            }
        }
        inserted
    }

    /// Pulls the directory from `feed` and upserts it. An unchanged directory
    /// is not an error; the previous metadata simply stays.
    pub async fn refresh(&self, feed: &dyn BoardFeed) -> Result<usize, FetchError> {
        match feed.fetch_directory().await? {
            Some(directory) => {
                let total = directory.sources.len();
                let inserted = self.upsert(directory.sources);
                info!("Board directory refreshed: {} boards, {} new.", total, inserted);
                Ok(inserted)
            }
            None => {
                debug!("Board directory not modified.");
                Ok(0)
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sources.lock().expect("Registry lock poisoned").contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<SourceMeta> {
        let sources = self.sources.lock().expect("Registry lock poisoned");
        sources.get(key).map(|state| state.meta.clone())
    }

    /// All board metadata, sorted by key.
    pub fn list(&self) -> Vec<SourceMeta> {
        let sources = self.sources.lock().expect("Registry lock poisoned");
        let mut metas: Vec<SourceMeta> = sources.values().map(|state| state.meta.clone()).collect();
        metas.sort_by(|a, b| a.key.cmp(&b.key));
        metas
    }

    /// Runs `read` against one board's state.
    pub fn inspect<R>(&self, key: &str, read: impl FnOnce(&SourceState) -> R) -> Option<R> {
        let sources = self.sources.lock().expect("Registry lock poisoned");
        sources.get(key).map(read)
    }

    pub fn set_fetching(&self, key: &str, fetching: bool) {
        let mut sources = self.sources.lock().expect("Registry lock poisoned");
        if let Some(state) = sources.get_mut(key) {
            state.fetching = fetching;
        }
    }

    /// Merges a fetched index into board `key`. `None` if the board is unknown.
    pub fn merge_index(
        &self,
        key: &str,
        index: Option<IndexPage>,
        now: DateTime<Utc>,
    ) -> Option<MergeOutcome> {
        let mut sources = self.sources.lock().expect("Registry lock poisoned");
        let state = sources.get_mut(key)?;
        Some(state.merge_index(index, now, &self.tuning))
    }

    pub fn record_failure(&self, key: &str, now: DateTime<Utc>) {
        let mut sources = self.sources.lock().expect("Registry lock poisoned");
        if let Some(state) = sources.get_mut(key) {
            state.record_failure(now, &self.tuning);
        }
    }

    /// # Most Urgent
    ///
    /// The board with the earliest due time among those anyone listens to.
    /// Ties go to the smaller key so the choice is deterministic.
    ///
    /// `interest` is consulted with the registry lock held; it must not call
    /// back into the registry.
    pub fn most_urgent(&self, interest: impl Fn(&str) -> u32) -> Option<(String, Due)> {
        let sources = self.sources.lock().expect("Registry lock poisoned");
        sources
            .values()
            .map(|state| (state, state.due(interest(state.key()))))
            .filter(|(_, due)| *due != Due::Never)
            .min_by(|(a, due_a), (b, due_b)| due_a.cmp(due_b).then_with(|| a.key().cmp(b.key())))
            .map(|(state, due)| (state.key().to_string(), due))
    }

    /// Status lines for every board, sorted by key. `listeners` gives the
    /// board-filtered listener count, `all` the unfiltered one.
    pub fn status_rows(&self, listeners: impl Fn(&str) -> u32, all: u32) -> Vec<SourceStatus> {
        let sources = self.sources.lock().expect("Registry lock poisoned");
        let mut rows: Vec<SourceStatus> = sources
            .values()
            .map(|state| {
                let specific = listeners(state.key());
                SourceStatus {
                    key: state.key().to_string(),
                    fetching: state.fetching,
                    listeners: specific,
                    last_seen_id: state.last_seen_id,
                    next_due: state.due(all + specific).as_wire(),
                }
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{index_of, item_at, meta, ScriptedFeed};

    fn seconds(s: i64) -> TimeDelta {
        TimeDelta::seconds(s)
    }

    // Post times have second resolution; keep `now` on a whole second.
    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    /// A state whose first fetch saw a single post `no`, published 10s ago.
    fn primed(no: u64, now: DateTime<Utc>, tuning: &PollTuning) -> SourceState {
        let mut state = SourceState::new(meta("a"));
        state.merge_index(Some(index_of(vec![item_at(no, 0, now - seconds(10))])), now, tuning);
        assert_eq!(state.last_seen_id(), Some(no));
        state
    }

    #[test]
    fn out_of_order_posts_are_merged_in_id_order() {
        let tuning = PollTuning::default();
        let now = t0();
        let mut state = primed(2, now, &tuning);

        let later = now + seconds(30);
        let page = index_of(vec![
            item_at(5, 0, later - seconds(1)),
            item_at(3, 0, later - seconds(3)),
            item_at(4, 5, later - seconds(2)),
        ]);
        let outcome = state.merge_index(Some(page), later, &tuning);

        let ids: Vec<u64> = outcome.deliveries.iter().map(|d| d.item.no).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(state.last_seen_id(), Some(5));
        assert_eq!(outcome.missed, 0);
        assert!(!outcome.first_fetch);
        assert!(outcome.deliveries.iter().all(|d| d.item.source() == Some("a")));
        // Delays never go backwards within a batch.
        assert!(outcome.deliveries.windows(2).all(|w| w[0].delay <= w[1].delay));
    }

    #[test]
    fn gaps_are_counted_but_not_fatal() {
        let tuning = PollTuning::default();
        let now = t0();
        let mut state = primed(10, now, &tuning);

        let outcome =
            state.merge_index(Some(index_of(vec![item_at(15, 0, now)])), now + seconds(5), &tuning);

        assert_eq!(state.last_seen_id(), Some(15));
        assert_eq!(outcome.missed, 4);
        assert_eq!(outcome.deliveries.len(), 1);
    }

    #[test]
    fn already_seen_posts_are_ignored() {
        let tuning = PollTuning::default();
        let now = t0();
        let mut state = primed(10, now, &tuning);

        let page = index_of(vec![item_at(9, 0, now), item_at(10, 0, now)]);
        let outcome = state.merge_index(Some(page), now + seconds(5), &tuning);

        assert_eq!(outcome.new_items, 0);
        assert!(outcome.deliveries.is_empty());
        assert_eq!(state.last_seen_id(), Some(10));
    }

    #[test]
    fn first_fetch_only_seeds_recent_posts() {
        let tuning = PollTuning::default();
        let now = t0();
        let mut state = SourceState::new(meta("a"));

        let page = index_of(vec![
            item_at(1, 0, now - seconds(2 * 3600)),
            item_at(2, 0, now - seconds(60)),
            item_at(3, 2, now - seconds(40)),
            item_at(4, 2, now - seconds(20)),
        ]);
        let outcome = state.merge_index(Some(page), now, &tuning);

        assert!(outcome.first_fetch);
        assert_eq!(outcome.new_items, 3);
        assert_eq!(state.last_seen_id(), Some(4));
        let ids: Vec<u64> = state.recent_items().iter().map(|i| i.no).collect();
        assert_eq!(ids, vec![2, 3, 4]);

        // span = 3 posts over 60s -> 20s per post -> next poll in 100s, and
        // the three posts are spread over that window by publication time.
        assert_eq!(outcome.next_due, Some(now + seconds(100)));
        let delays: Vec<u64> = outcome.deliveries.iter().map(|d| d.delay.as_secs()).collect();
        assert_eq!(delays, vec![40, 60, 80]);
    }

    #[test]
    fn first_fetch_replays_every_seeded_post() {
        let tuning = PollTuning::default();
        let now = t0();
        let mut state = SourceState::new(meta("a"));

        // 10 posts, one every 10s: next poll in 5 * 10s = 50s. Posts older
        // than the mirrored 50s window go out at once, the rest trickle.
        let page = index_of((1..=10).map(|n| item_at(n, 0, now - seconds(110 - 10 * n as i64))).collect());
        let outcome = state.merge_index(Some(page), now, &tuning);

        assert_eq!(outcome.new_items, 10);
        assert_eq!(state.recent_items().len(), 10);
        let delivered: Vec<u64> = outcome.deliveries.iter().map(|d| d.item.no).collect();
        assert_eq!(delivered, (1..=10).collect::<Vec<u64>>());
        let delays: Vec<u64> = outcome.deliveries.iter().map(|d| d.delay.as_secs()).collect();
        assert_eq!(delays, vec![0, 0, 0, 0, 0, 0, 10, 20, 30, 40]);
    }

    #[test]
    fn first_fetch_with_sparse_ids_delivers_every_recent_post() {
        let tuning = PollTuning::default();
        let now = t0();
        let mut state = SourceState::new(meta("a"));

        // An index page only shows a few posts per thread, so ids jump. The
        // estimate assumes ~100 posts in 10 minutes and the window is short.
        let page = index_of(vec![
            item_at(1000, 0, now - seconds(600)),
            item_at(1050, 1000, now - seconds(300)),
            item_at(1100, 1000, now - seconds(60)),
        ]);
        let outcome = state.merge_index(Some(page), now, &tuning);

        let delivered: Vec<u64> = outcome.deliveries.iter().map(|d| d.item.no).collect();
        assert_eq!(delivered, vec![1000, 1050, 1100]);
        assert!(outcome.deliveries.iter().all(|d| d.delay.is_zero()));
        assert_eq!(state.last_seen_id(), Some(1100));
        // 600s / 101 ids * 5 is just under 30s.
        assert_eq!(outcome.next_due, Some(now + TimeDelta::milliseconds(29_702)));
    }

    #[test]
    fn empty_board_sleeps_for_the_ceiling() {
        let tuning = PollTuning::default();
        let now = t0();
        let mut state = SourceState::new(meta("a"));

        let outcome = state.merge_index(None, now, &tuning);

        assert_eq!(state.last_seen_id(), None);
        assert_eq!(outcome.next_due, Some(now + seconds(1200)));
        assert_eq!(state.due(1), Due::At(now + seconds(1200)));
    }

    #[test]
    fn slow_boards_are_capped_at_max_sleep() {
        let tuning = PollTuning::default();
        let now = t0();
        let mut state = SourceState::new(meta("a"));

        let page = index_of(vec![item_at(1, 0, now - seconds(600)), item_at(2, 0, now - seconds(300))]);
        let outcome = state.merge_index(Some(page), now, &tuning);

        // 600s / 2 posts * 5 = 1500s, above the 1200s ceiling.
        assert_eq!(outcome.next_due, Some(now + seconds(1200)));
    }

    #[test]
    fn history_is_truncated_from_the_oldest_end() {
        let tuning = PollTuning { history_len: 3, ..PollTuning::default() };
        let now = t0();
        let mut state = SourceState::new(meta("a"));

        let page = index_of((1..=5).map(|n| item_at(n, 0, now - seconds(10))).collect());
        state.merge_index(Some(page), now, &tuning);

        let ids: Vec<u64> = state.recent_items().iter().map(|i| i.no).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn due_follows_interest_and_history() {
        let tuning = PollTuning::default();
        let now = t0();
        let mut state = SourceState::new(meta("a"));

        assert_eq!(state.due(0), Due::Never);
        assert_eq!(state.due(2), Due::Now);

        state.record_failure(now, &tuning);
        assert_eq!(state.due(1), Due::At(now + seconds(10)));
        assert_eq!(state.due(0), Due::Never);
    }

    #[test]
    fn due_ordering_and_wire_format() {
        let now = t0();
        assert!(Due::Now < Due::At(DateTime::<Utc>::MIN_UTC));
        assert!(Due::At(now) < Due::At(now + seconds(1)));
        assert!(Due::At(now + seconds(3600)) < Due::Never);

        assert_eq!(Due::Now.as_wire(), Some(0));
        assert_eq!(Due::At(now).as_wire(), Some(now.timestamp_millis()));
        assert_eq!(Due::Never.as_wire(), None);
    }

    #[test]
    fn most_urgent_skips_unwatched_boards() {
        let registry = SourceRegistry::new(PollTuning::default());
        registry.upsert(vec![meta("a"), meta("b"), meta("c")]);
        let now = t0();
        registry.record_failure("a", now - seconds(5));
        registry.record_failure("b", now - seconds(50));

        // Nobody listens: nothing to do.
        assert_eq!(registry.most_urgent(|_| 0), None);

        // Only "a" and "b" are watched; "b" has been due the longest.
        let watched = |key: &str| if key == "c" { 0 } else { 1 };
        assert_eq!(registry.most_urgent(watched).map(|(k, _)| k), Some("b".to_string()));

        // A never-polled board beats any estimate.
        assert_eq!(registry.most_urgent(|_| 1), Some(("c".to_string(), Due::Now)));
    }

    #[tokio::test]
    async fn refresh_upserts_without_losing_runtime_state() {
        let registry = SourceRegistry::new(PollTuning::default());
        let feed = ScriptedFeed::new();
        feed.set_directory(vec![meta("a"), meta("b")]);
        assert_eq!(registry.refresh(&feed).await.unwrap(), 2);

        let now = t0();
        registry.merge_index("a", Some(index_of(vec![item_at(42, 0, now)])), now);

        feed.set_directory(vec![SourceMeta::new("a", "Renamed")]);
        assert_eq!(registry.refresh(&feed).await.unwrap(), 0);

        assert_eq!(registry.get("a").unwrap().title, "Renamed");
        assert_eq!(registry.inspect("a", |s| s.last_seen_id()), Some(Some(42)));
        // Boards gone from the directory linger.
        assert!(registry.contains("b"));

        // A not-modified directory keeps everything.
        feed.clear_directory();
        assert_eq!(registry.refresh(&feed).await.unwrap(), 0);
        assert_eq!(registry.list().len(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_metadata() {
        let registry = SourceRegistry::new(PollTuning::default());
        registry.upsert(vec![meta("a")]);
        let feed = ScriptedFeed::new();
        feed.fail_directory("boom");

        assert!(registry.refresh(&feed).await.is_err());
        assert_eq!(registry.list(), vec![meta("a")]);
    }

    #[test]
    fn status_rows_report_runtime_fields() {
        let registry = SourceRegistry::new(PollTuning::default());
        registry.upsert(vec![meta("b"), meta("a")]);
        registry.set_fetching("a", true);

        let rows = registry.status_rows(|key| if key == "a" { 2 } else { 0 }, 0);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "a");
        assert!(rows[0].fetching);
        assert_eq!(rows[0].listeners, 2);
        assert_eq!(rows[0].next_due, Some(0));
        assert_eq!(rows[1].next_due, None);
        assert_eq!(rows[1].last_seen_id, None);
    }
}
