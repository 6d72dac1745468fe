//! # Upstream Documents
//!
//! Field names follow the public 4chan read-only API (`boards.json`,
//! `<board>/<page>.json`). The engine only interprets a handful of fields; the
//! rest of every document is kept in a flattened JSON map and passed through to
//! clients untouched.
//!
//! The directory and thread arrays also accept the generic spellings
//! `sources` and `items`, so a relay sitting in front of a non-4chan feed can
//! reuse the same engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata for one board as listed by the directory endpoint.
///
/// Only `key` and `title` are read by the engine. Capability flags, limits and
/// cooldowns land in `flags` and are served back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
    /// Short board identifier, e.g. `g`.
    #[serde(rename = "board", alias = "key")]
    pub key: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Everything else the directory says about the board.
    #[serde(flatten)]
    pub flags: Map<String, Value>,
}

impl SourceMeta {
    /// Builds a metadata record with no flags.
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            flags: Map::new(),
        }
    }
}

/// The directory document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    /// Every board the upstream lists.
    #[serde(rename = "boards", alias = "sources", default)]
    pub sources: Vec<SourceMeta>,
}

/// One post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Numeric post id, increasing per board.
    pub no: u64,
    /// Thread the post replies to, `0` for an opening post.
    #[serde(default)]
    pub resto: u64,
    /// Publication time, unix seconds.
    pub time: i64,
    /// Remaining upstream fields (name, comment, attachment data, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Item {
    /// Id of the thread this post belongs to. Opening posts are their own root.
    pub fn thread_root(&self) -> u64 {
        if self.resto == 0 { self.no } else { self.resto }
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.time, 0).unwrap_or_default()
    }

    /// Tags the post with the board it was fetched from.
    pub fn stamp_source(&mut self, key: &str) {
        self.extra.insert("board".to_string(), Value::String(key.to_string()));
    }

    /// Board the post was stamped with, if any.
    pub fn source(&self) -> Option<&str> {
        self.extra.get("board").and_then(Value::as_str)
    }
}

/// One thread preview in a board index page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexThread {
    /// Opening post first, then the latest replies.
    #[serde(rename = "posts", alias = "items", default)]
    pub items: Vec<Item>,
}

/// A board index page: every thread with its opening post and latest replies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexPage {
    /// Threads in bump order.
    #[serde(default)]
    pub threads: Vec<IndexThread>,
}

impl IndexPage {
    /// Flattens the page into its posts, thread by thread.
    pub fn into_items(self) -> impl Iterator<Item = Item> {
        self.threads.into_iter().flat_map(|thread| thread.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_4chan_index_page() {
        let raw = r#"{
          "threads": [
            { "posts": [
                { "no": 100, "resto": 0, "time": 1700000000, "now": "11/14/23(Tue)17:13:20",
                  "name": "Anonymous", "id": "Ab12Cd34", "sub": "thread", "replies": 1 },
                { "no": 101, "resto": 100, "time": 1700000010, "com": "reply" }
            ] },
            { "posts": [ { "no": 90, "time": 1699999000 } ] }
          ]
        }"#;

        let page: IndexPage = serde_json::from_str(raw).unwrap();
        let items: Vec<Item> = page.into_items().collect();

        assert_eq!(items.iter().map(|i| i.no).collect::<Vec<_>>(), vec![100, 101, 90]);
        assert_eq!(items[0].thread_root(), 100);
        assert_eq!(items[1].thread_root(), 100);
        assert_eq!(items[2].resto, 0);
        // The poster id is a string field and must stay in the pass-through map.
        assert_eq!(items[0].extra["id"], "Ab12Cd34");
        assert_eq!(items[1].published_at().timestamp(), 1700000010);
    }

    #[test]
    fn accepts_generic_field_spellings() {
        let dir: Directory =
            serde_json::from_str(r#"{ "sources": [ { "key": "a", "title": "Anime" } ] }"#).unwrap();
        assert_eq!(dir.sources, vec![SourceMeta::new("a", "Anime")]);

        let page: IndexPage =
            serde_json::from_str(r#"{ "threads": [ { "items": [ { "no": 1, "time": 5 } ] } ] }"#)
                .unwrap();
        assert_eq!(page.into_items().count(), 1);
    }

    #[test]
    fn board_flags_round_trip_verbatim() {
        let raw = r#"{ "board": "g", "title": "Technology", "ws_board": 1,
                       "cooldowns": { "threads": 600, "replies": 60, "images": 60 } }"#;
        let meta: SourceMeta = serde_json::from_str(raw).unwrap();

        assert_eq!(meta.key, "g");
        assert_eq!(meta.flags["cooldowns"]["replies"], 60);

        let out = serde_json::to_value(&meta).unwrap();
        assert_eq!(out["board"], "g");
        assert_eq!(out["ws_board"], 1);
    }

    #[test]
    fn stamped_posts_serialize_with_their_board() {
        let mut item: Item = serde_json::from_str(r#"{ "no": 7, "resto": 3, "time": 1 }"#).unwrap();
        item.stamp_source("v");

        assert_eq!(item.source(), Some("v"));
        let out = serde_json::to_value(&item).unwrap();
        assert_eq!(out["board"], "v");
        assert_eq!(out["resto"], 3);
    }
}
