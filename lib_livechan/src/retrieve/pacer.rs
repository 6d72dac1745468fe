//! # Request Pacer
//!
//! Global minimum spacing between outbound requests. Every caller reserves the
//! next free slot (`max(now, last_slot + cooldown)`) under one mutex and then
//! sleeps until it, so concurrent callers queue up evenly spaced no matter how
//! many of them contend.
//!
//! [`PacerMiddleware`] installs the pacer in a `reqwest-middleware` stack. Put
//! it after the retry middleware so every retry attempt also waits its turn.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next};
use tokio::time::Instant;

#[derive(Debug)]
pub struct RequestPacer {
    cooldown: Duration,
    last_slot: Mutex<Option<Instant>>,
    waiting: AtomicUsize,
}

impl RequestPacer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_slot: Mutex::new(None),
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Claims the next slot without waiting for it.
    pub fn reserve(&self) -> Instant {
        let now = Instant::now();
        let mut last = self.last_slot.lock().expect("Pacer lock poisoned");
        let slot = match *last {
            Some(previous) => now.max(previous + self.cooldown),
            None => now,
        };
        *last = Some(slot);
        slot
    }

    /// Waits for this caller's slot.
    pub async fn acquire(&self) {
        let slot = self.reserve();
        let _waiting = WaitingGuard::enter(&self.waiting);
        tokio::time::sleep_until(slot).await;
    }

    /// Callers currently waiting for their slot.
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// `reqwest-middleware` adapter around a shared [`RequestPacer`].
#[derive(Debug, Clone)]
pub struct PacerMiddleware {
    pacer: Arc<RequestPacer>,
}

impl PacerMiddleware {
    pub fn new(pacer: Arc<RequestPacer>) -> Self {
        Self { pacer }
    }
}

#[async_trait]
impl Middleware for PacerMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        self.pacer.acquire().await;
        log::debug!("{} {}", req.method(), req.url());
        next.run(req, extensions).await
    }
}
