//! # lib_livechan
//!
//! The engine behind the `livechan` relay: it polls an imageboard's public JSON
//! API board by board, works out which posts are new, and pushes them to
//! whoever is listening, while a separate class of listeners receives
//! debounced status snapshots of the poller itself.
//!
//! ## Layout
//!
//! - **`retrieve`**: the rate-limited, conditionally-cached HTTP client for the
//!   upstream API (feature `retrieve`, on by default).
//! - **`core`**: the source registry with its merge/estimation logic, the
//!   listener interest counters, the dispatch hub and its helpers.
//! - **`ingestors`**: the `BoardFeed` seam, the single poll scheduler loop and
//!   the periodic directory refresher.
//! - **`models`**: wire types for upstream JSON and outbound status messages.
//! - **`utils`**: small helpers shared by the modules above.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod core;
pub mod ingestors;
pub mod models;
#[cfg(feature = "retrieve")]
pub mod retrieve;
pub mod utils;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// --- Public API Re-exports ---
pub use crate::core::dispatcher::{DispatchHub, HubSettings, ListenerFilter, ListenerId};
pub use crate::core::sink::{ChannelSink, ListenerSink, SinkError, SinkReceiver};
pub use crate::core::sources::{Due, PollTuning, SourceRegistry};
pub use crate::ingestors::board_polling::{BoardPoller, SchedulerHandle};
pub use crate::ingestors::directory_refresh::DirectoryRefresher;
pub use crate::ingestors::feed::{BoardFeed, FetchError};
pub use crate::models::{Directory, IndexPage, Item, SourceMeta, SourceStatus, StatusSnapshot};
#[cfg(feature = "retrieve")]
pub use crate::retrieve::{ChanClient, ClientSettings};
