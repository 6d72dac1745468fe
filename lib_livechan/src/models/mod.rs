//! # Wire Models
//!
//! Serde types for everything that crosses a process boundary: the upstream
//! directory and board index documents, and the status snapshot sent to
//! status listeners.

/// Upstream directory, index and post documents.
pub mod chan;
/// Outbound status snapshot.
pub mod status;

pub use chan::{Directory, IndexPage, IndexThread, Item, SourceMeta};
pub use status::{SourceStatus, StatusSnapshot};
