//! # Utilities Module
//!
//! General-purpose helpers shared across the crate that do not belong to a
//! single component.
//!
//! ## Contained Modules:
//!
//! - **`clock`**: a wall clock anchored on tokio's monotonic clock, so the
//!   poller's timestamps and its sleeps agree (including under paused test
//!   time).

/// Monotonic-anchored wall clock.
pub mod clock;

pub use clock::Clock;
