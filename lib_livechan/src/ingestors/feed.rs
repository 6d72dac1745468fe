//! # Board Feed
//!
//! The seam between the engine and the upstream API. The poller and the
//! directory refresher only ever talk to a `dyn BoardFeed`; the production
//! implementation is `retrieve::ChanClient`, tests use scripted feeds.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Directory, IndexPage};

/// Errors surfaced by a fetch against the upstream API.
#[derive(Debug, Error)]
pub enum FetchError {
    #[cfg(feature = "retrieve")]
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest_middleware::Error),

    #[cfg(feature = "retrieve")]
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Upstream answered {}: {}", .status, .body.as_deref().unwrap_or("<no body>"))]
    Status { status: u16, body: Option<String> },

    #[error("Malformed JSON from upstream: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),

    #[error("Empty response for {0}")]
    EmptyBody(String),

    #[error("Upstream unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the upstream board API.
///
/// Both calls are conditional: `Ok(None)` means the document has not changed
/// since the last successful fetch (or came back empty).
#[async_trait]
pub trait BoardFeed: Send + Sync {
    /// Fetches the board directory.
    async fn fetch_directory(&self) -> Result<Option<Directory>, FetchError>;

    /// Fetches the first index page of one board.
    async fn fetch_index(&self, key: &str) -> Result<Option<IndexPage>, FetchError>;
}
