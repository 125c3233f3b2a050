//! Broker and store seams consumed by the relay.
//!
//! The response log, the pub/sub channels, and the run-status lookup are all
//! owned by external systems. The relay only reads from them, so each concern
//! is a narrow trait with a Redis implementation ([`crate::RedisBroker`]) and
//! an in-process one for tests ([`crate::MemoryBroker`]).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Ordered, append-only list of JSON event records.
#[async_trait]
pub trait ResponseLog: Send + Sync {
    /// Read records `start..=end` using LRANGE index semantics
    /// (`end = -1` means "through the last record").
    async fn range(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>, RelayError>;
}

/// Opens subscriptions on named pub/sub channels.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, RelayError>;
}

/// One live subscription to one channel.
///
/// A subscription yields one message per [`next_message`](Subscription::next_message)
/// call. Owners must call [`unsubscribe`](Subscription::unsubscribe) and then
/// [`close`](Subscription::close) when done.
#[async_trait]
pub trait Subscription: Send {
    fn channel(&self) -> &str;

    /// Wait for the next payload. `Ok(None)` means the subscription ended.
    /// Dropping the returned future must not lose a message.
    async fn next_message(&mut self) -> Result<Option<String>, RelayError>;

    async fn unsubscribe(&mut self) -> Result<(), RelayError>;

    /// Release the underlying connection.
    async fn close(self: Box<Self>);
}

/// Publish side of the control channels, used when stopping runs.
#[async_trait]
pub trait ControlPublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), RelayError>;

    /// Keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, RelayError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), RelayError>;
}

/// Current status of a run, as known by the authoritative store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusRecord {
    pub status: String,
    pub thread_id: String,
}

impl RunStatusRecord {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// Point lookup of a run's status.
#[async_trait]
pub trait RunStatusSource: Send + Sync {
    async fn run_status(&self, run_id: &str) -> Result<Option<RunStatusRecord>, RelayError>;
}

/// Blanket implementations so `Arc<dyn Trait>` can be used directly.
#[async_trait]
impl<T: ResponseLog + ?Sized> ResponseLog for Arc<T> {
    async fn range(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>, RelayError> {
        (**self).range(key, start, end).await
    }
}

#[async_trait]
impl<T: Subscriber + ?Sized> Subscriber for Arc<T> {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, RelayError> {
        (**self).subscribe(channel).await
    }
}

#[async_trait]
impl<T: RunStatusSource + ?Sized> RunStatusSource for Arc<T> {
    async fn run_status(&self, run_id: &str) -> Result<Option<RunStatusRecord>, RelayError> {
        (**self).run_status(run_id).await
    }
}
