//! # Data Retrieval Module
//!
//! HTTP access to the upstream board API.
//!
//! ## Contained Modules:
//!
//! - **`chan_http`**: `ChanClient`, the conditional-fetch JSON client built on
//!   `reqwest` and `reqwest-middleware` with transient retries. It implements
//!   `BoardFeed` for the poller and the directory refresher.
//! - **`pacer`**: the global request spacing, usable on its own or as a
//!   middleware.

pub mod chan_http;
pub mod pacer;

pub use chan_http::{ChanClient, ClientSettings};
pub use pacer::{PacerMiddleware, RequestPacer};
