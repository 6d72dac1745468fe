//! # Core Engine Module
//!
//! State shared between the poller and the listener side of the relay.
//!
//! ## Core Components:
//!
//! - **`sources`**: every known board with its polling state, plus the merge
//!   and due-time estimation applied to each fetched index page.
//!
//! - **`registry`**: reference-counted listener interest per board, which the
//!   poller consults to skip boards nobody watches.
//!
//! - **`dispatcher`**: the hub that registers listeners, delivers posts through
//!   per-board lanes and broadcasts debounced status snapshots.
//!
//! - **`sink`**: the transport-facing listener interface and its bounded
//!   channel implementation.
//!
//! - **`debounce`**: leading-edge debounce with one trailing call.

pub mod debounce;
pub mod dispatcher;
pub mod registry;
pub mod sink;
pub mod sources;

pub use debounce::TrailingDebounce;
pub use dispatcher::{DispatchHub, HubSettings, ListenerFilter, ListenerId};
pub use registry::{InterestKey, InterestRegistry};
pub use sink::{ChannelSink, ListenerSink, SinkError, SinkReceiver};
pub use sources::{Due, MergeOutcome, PollTuning, ScheduledItem, SourceRegistry, SourceState};
