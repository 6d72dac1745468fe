//! # Upstream HTTP Client
//!
//! A `reqwest` client behind a `reqwest-middleware` stack:
//!
//! 1.  `RetryTransientMiddleware` with exponential backoff for connection
//!     errors and 5xx answers.
//! 2.  [`PacerMiddleware`] inside it, so first attempts and retries alike keep
//!     the global request spacing.
//!
//! Every fetch is conditional. The client remembers, per URL, when the last
//! successful answer was produced (the upstream `Last-Modified` if sent,
//! otherwise the time our request went out) and sends it back as
//! `If-Modified-Since`. A `304` comes back as `Ok(None)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use url::Url;

use crate::ingestors::feed::{BoardFeed, FetchError};
use crate::models::{Directory, IndexPage};
use crate::retrieve::pacer::{PacerMiddleware, RequestPacer};

/// Placeholder in [`ClientSettings::index_path`] replaced by the board key.
pub const BOARD_PLACEHOLDER: &str = "{board}";

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Absolute base URL every path is joined to.
    pub base_url: String,
    /// Directory document path, relative to `base_url`.
    pub directory_path: String,
    /// Index page path, with `{board}` standing for the board key.
    pub index_path: String,
    /// Minimum spacing between two requests, retries included.
    pub cooldown: Duration,
    /// Retries on transient failures, on top of the first attempt.
    pub retries: u32,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "https://a.4cdn.org/".to_string(),
            directory_path: "boards.json".to_string(),
            index_path: "{board}/1.json".to_string(),
            cooldown: Duration::from_millis(1000),
            retries: 2,
            timeout: Duration::from_secs(10),
            user_agent: concat!("livechan/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// # Board API Client
///
/// Paced, retrying, conditional JSON client for the upstream board API.
pub struct ChanClient {
    /// reqwest client wrapped in retry and pacer middleware.
    inner: ClientWithMiddleware,
    base_url: Url,
    settings: ClientSettings,
    pacer: Arc<RequestPacer>,
    /// `If-Modified-Since` value per absolute URL.
    last_modified: Mutex<HashMap<String, String>>,
}

impl ChanClient {
    /// Builds the client. Fails on an unusable base URL or TLS backend.
    pub fn new(settings: ClientSettings) -> Result<Self, FetchError> {
        let mut base = settings.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", base, e)))?;

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.as_str())
            .build()?;

        let pacer = Arc::new(RequestPacer::new(settings.cooldown));
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(settings.retries);
        let inner = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .with(PacerMiddleware::new(Arc::clone(&pacer)))
            .build();

        Ok(Self {
            inner,
            base_url,
            settings,
            pacer,
            last_modified: Mutex::new(HashMap::new()),
        })
    }

    pub fn pacer(&self) -> &Arc<RequestPacer> {
        &self.pacer
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// # Fetch
    ///
    /// GETs `path` (relative to the base URL) and decodes it as JSON.
    ///
    /// Returns `Ok(None)` for `304 Not Modified` and for an empty body. With
    /// `force_fresh` no `If-Modified-Since` is sent and an empty body is an
    /// error.
    pub async fn fetch<T>(&self, path: &str, force_fresh: bool) -> Result<Option<T>, FetchError>
    where
        T: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", path, e)))?;
        let key = url.to_string();

        let mut req = self.inner.get(url);
        if !force_fresh {
            let since = self.last_modified.lock().expect("Client lock poisoned").get(&key).cloned();
            if let Some(since) = since {
                req = req.header(IF_MODIFIED_SINCE, since);
            }
        }

        let issued_at = Utc::now();
        let response = req.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            log::debug!("{} not modified", key);
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.ok().filter(|body| !body.is_empty());
            return Err(FetchError::Status { status: status.as_u16(), body });
        }

        let stamp = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| http_date(issued_at));
        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            if force_fresh {
                return Err(FetchError::EmptyBody(key));
            }
            return Ok(None);
        }

        let parsed = serde_json::from_slice::<T>(&body)?;
        self.last_modified.lock().expect("Client lock poisoned").insert(key, stamp);
        Ok(Some(parsed))
    }

    fn index_path(&self, key: &str) -> String {
        self.settings.index_path.replace(BOARD_PLACEHOLDER, key)
    }
}

#[async_trait]
impl BoardFeed for ChanClient {
    async fn fetch_directory(&self) -> Result<Option<Directory>, FetchError> {
        self.fetch(&self.settings.directory_path, false).await
    }

    async fn fetch_index(&self, key: &str) -> Result<Option<IndexPage>, FetchError> {
        self.fetch(&self.index_path(key), false).await
    }
}

/// RFC 7231 IMF-fixdate.
fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
