//! Publish/subscribe abstraction (mechanics only).
//!
//! ## Delivery contract
//!
//! - **At-most-once**: a message may be lost (subscriber offline, transport hiccup)
//! - **Duplicates possible**: some transports redeliver; consumers must be idempotent
//! - **No ordering**: messages from concurrent publishers may interleave arbitrarily
//! - **No persistence**: the bus distributes, it never stores
//!
//! A subscriber that wakes on a notification re-reads authoritative state
//! (e.g. tries to claim a job) instead of trusting the message payload.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

/// Error returned by [`Subscription::recv_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    /// Nothing arrived within the timeout.
    Timeout,
    /// The bus side of the channel is gone.
    Disconnected,
}

/// A subscription to a notification stream.
///
/// Each subscription receives its own copy of every message published after it
/// was created (fan-out). Messages published before `subscribe()` are never seen.
///
/// ```ignore
/// let mut sub = bus.subscribe();
/// loop {
///     match sub.recv_timeout(Duration::from_secs(5)).await {
///         Ok(msg) => wake(msg),
///         Err(RecvTimeoutError::Timeout) => poll_store(),
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the bus side is dropped.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Wait for up to `timeout` for a message.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(m)) => Ok(m),
            Ok(None) => Err(RecvTimeoutError::Disconnected),
            Err(_) => Err(RecvTimeoutError::Timeout),
        }
    }

    /// Discard everything currently buffered; returns how many were dropped.
    ///
    /// Used to coalesce a burst of wake-ups into a single store poll.
    pub fn drain(&mut self) -> usize {
        let mut n = 0;
        while self.receiver.try_recv().is_ok() {
            n += 1;
        }
        n
    }
}

/// Transport-agnostic notification bus.
///
/// `publish()` is fire-and-forget from the caller's perspective: an `Err`
/// means the transport refused the message right now, and callers are
/// expected to log it and carry on.
pub trait NotificationBus<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> NotificationBus<M> for Arc<B>
where
    B: NotificationBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
