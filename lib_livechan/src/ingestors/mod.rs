//! # Data Ingestors Module
//!
//! Everything that pulls data from upstream into the engine.
//!
//! ## Contained Modules:
//! - **`feed`**: the `BoardFeed` trait the ingestors fetch through, and its
//!   error type.
//! - **`board_polling`**: the single self-scheduling loop that always polls the
//!   most urgent watched board.
//! - **`directory_refresh`**: periodic reload of the board directory.

pub mod board_polling;
pub mod directory_refresh;
pub mod feed;

pub use board_polling::{BoardPoller, SchedulerHandle};
pub use directory_refresh::DirectoryRefresher;
pub use feed::{BoardFeed, FetchError};
