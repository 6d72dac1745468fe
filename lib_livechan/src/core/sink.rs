//! # Listener Sinks
//!
//! The hub never touches a transport directly. Every listener is handed to it
//! as a [`ListenerSink`]: a non-blocking `send_text` and a `close`. A send that
//! cannot complete right away is a failure and gets the listener removed, so one
//! slow client can never hold up a fan-out.
//!
//! [`ChannelSink`] is the stock implementation: a bounded queue drained by the
//! transport task (the WebSocket writer in the server).

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("listener queue is full")]
    Backlogged,
    #[error("listener is closed")]
    Closed,
}

/// Outbound side of one listener.
pub trait ListenerSink: Send + Sync {
    /// Queues one text frame without waiting.
    fn send_text(&self, text: Arc<str>) -> Result<(), SinkError>;

    /// Closes the transport. Must be idempotent.
    fn close(&self);
}

/// Bounded-queue sink.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
}

/// Transport half of a [`ChannelSink`].
#[derive(Debug)]
pub struct SinkReceiver {
    rx: mpsc::Receiver<Arc<str>>,
    closed: CancellationToken,
}

impl ChannelSink {
    /// Creates a sink holding at most `capacity` undelivered frames.
    pub fn channel(capacity: usize) -> (ChannelSink, SinkReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        (
            ChannelSink { tx, closed: closed.clone() },
            SinkReceiver { rx, closed },
        )
    }
}

impl ListenerSink for ChannelSink {
    fn send_text(&self, text: Arc<str>) -> Result<(), SinkError> {
        if self.closed.is_cancelled() {
            return Err(SinkError::Closed);
        }
        self.tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Backlogged,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

impl SinkReceiver {
    /// Next queued frame, or `None` once the sink was closed (by the hub or by
    /// every sender going away).
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            frame = self.rx.recv() => frame,
        }
    }

    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        if self.closed.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Marks the sink closed from the transport side; later sends fail.
    pub fn close(&mut self) {
        self.closed.cancel();
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.send_text(Arc::from("one")).unwrap();
        sink.send_text(Arc::from("two")).unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
        assert_eq!(rx.try_recv(), None);
    }

    #[tokio::test]
    async fn full_queue_is_a_failure() {
        let (sink, _rx) = ChannelSink::channel(1);
        sink.send_text(Arc::from("one")).unwrap();
        assert_eq!(sink.send_text(Arc::from("two")), Err(SinkError::Backlogged));
    }

    #[tokio::test]
    async fn close_ends_the_receiver() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.send_text(Arc::from("pending")).unwrap();
        sink.close();
        sink.close();

        assert!(rx.is_closed());
        assert_eq!(rx.recv().await, None);
        assert_eq!(sink.send_text(Arc::from("late")), Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn dropped_receiver_is_a_failure() {
        let (sink, rx) = ChannelSink::channel(4);
        drop(rx);
        assert_eq!(sink.send_text(Arc::from("x")), Err(SinkError::Closed));
    }
}
