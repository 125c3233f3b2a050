//! In-process broker and status source.
//!
//! Behaves like the Redis backend (lists with LRANGE semantics, fire-and-forget
//! pub/sub, `*`-only glob key lookup) and additionally counts subscriptions so callers
//! can check that none were leaked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::broker::{ControlPublisher, ResponseLog, RunStatusRecord, RunStatusSource, Subscriber, Subscription};
use crate::error::RelayError;

/// `None` tells a subscription that it ended.
type Delivery = Option<String>;

#[derive(Default)]
struct Inner {
    lists: HashMap<String, Vec<String>>,
    channels: HashMap<String, Vec<(u64, mpsc::UnboundedSender<Delivery>)>>,
    keys: HashMap<String, String>,
    expiries: HashMap<String, Duration>,
    published: Vec<(String, String)>,
    next_subscription_id: u64,
    opened: usize,
    closed: usize,
    fail_reads: bool,
    fail_subscribe: bool,
    fail_keys: bool,
}

/// Cloneable handle to a shared in-memory broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Resolve LRANGE indices against a list of length `len`.
fn lrange_bounds(len: usize, start: isize, end: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if len == 0 || start > end || start >= len {
        return None;
    }
    Some((start as usize, end as usize))
}

/// Minimal glob: `*` matches any run of characters.
///
/// Redis `KEYS` also understands `?`, `[...]` and backslash escapes; here those are
/// matched literally. Only `*` patterns are supported.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to a list (RPUSH).
    pub fn push(&self, key: &str, record: &Value) {
        lock(&self.inner)
            .lists
            .entry(key.to_string())
            .or_default()
            .push(record.to_string());
    }

    /// Append a raw string to a list, bypassing JSON encoding.
    pub fn push_raw(&self, key: &str, raw: &str) {
        lock(&self.inner)
            .lists
            .entry(key.to_string())
            .or_default()
            .push(raw.to_string());
    }

    /// Deliver `payload` to every current subscriber of `channel`.
    /// Returns the number of receivers, like PUBLISH.
    pub fn publish_now(&self, channel: &str, payload: &str) -> usize {
        let mut inner = lock(&self.inner);
        inner.published.push((channel.to_string(), payload.to_string()));
        let Some(subscribers) = inner.channels.get_mut(channel) else {
            return 0;
        };
        subscribers.retain(|(_, tx)| tx.send(Some(payload.to_string())).is_ok());
        subscribers.len()
    }

    /// End every subscription on `channel`, as if the connection dropped.
    pub fn kill_subscriptions(&self, channel: &str) {
        let mut inner = lock(&self.inner);
        if let Some(subscribers) = inner.channels.get(channel) {
            for (_, tx) in subscribers {
                let _ = tx.send(None);
            }
        }
    }

    pub fn set_key(&self, key: &str, value: &str) {
        lock(&self.inner).keys.insert(key.to_string(), value.to_string());
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.inner).fail_reads = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        lock(&self.inner).fail_subscribe = fail;
    }

    pub fn fail_keys(&self, fail: bool) {
        lock(&self.inner).fail_keys = fail;
    }

    /// Every `(channel, payload)` published so far, in order.
    pub fn published(&self) -> Vec<(String, String)> {
        lock(&self.inner).published.clone()
    }

    pub fn expiry(&self, key: &str) -> Option<Duration> {
        lock(&self.inner).expiries.get(key).copied()
    }

    /// Subscriptions currently registered on `channel`.
    pub fn active_subscriptions(&self, channel: &str) -> usize {
        lock(&self.inner).channels.get(channel).map(Vec::len).unwrap_or(0)
    }

    /// Subscriptions registered on any channel.
    pub fn total_active_subscriptions(&self) -> usize {
        lock(&self.inner).channels.values().map(Vec::len).sum()
    }

    pub fn subscriptions_opened(&self) -> usize {
        lock(&self.inner).opened
    }

    pub fn subscriptions_closed(&self) -> usize {
        lock(&self.inner).closed
    }

    /// Wait until `channel` has at least `count` subscribers.
    pub async fn wait_for_subscribers(&self, channel: &str, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.active_subscriptions(channel) >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

#[async_trait]
impl ResponseLog for MemoryBroker {
    async fn range(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>, RelayError> {
        let inner = lock(&self.inner);
        if inner.fail_reads {
            return Err(RelayError::Unavailable("list read refused".to_string()));
        }
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match lrange_bounds(list.len(), start, end) {
            Some((from, to)) => list[from..=to].to_vec(),
            None => Vec::new(),
        })
    }
}

#[async_trait]
impl Subscriber for MemoryBroker {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, RelayError> {
        let mut inner = lock(&self.inner);
        if inner.fail_subscribe {
            return Err(RelayError::Unavailable("subscribe refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = inner.next_subscription_id;
        inner.next_subscription_id += 1;
        inner.opened += 1;
        inner.channels.entry(channel.to_string()).or_default().push((id, tx));
        Ok(Box::new(MemorySubscription {
            id,
            channel: channel.to_string(),
            rx,
            inner: self.inner.clone(),
            subscribed: true,
        }))
    }
}

#[async_trait]
impl ControlPublisher for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), RelayError> {
        self.publish_now(channel, payload);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, RelayError> {
        let inner = lock(&self.inner);
        if inner.fail_keys {
            return Err(RelayError::Unavailable("key lookup refused".to_string()));
        }
        let mut keys: Vec<String> = inner
            .keys
            .keys()
            .chain(inner.lists.keys())
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), RelayError> {
        lock(&self.inner).expiries.insert(key.to_string(), ttl);
        Ok(())
    }
}

struct MemorySubscription {
    id: u64,
    channel: String,
    rx: mpsc::UnboundedReceiver<Delivery>,
    inner: Arc<Mutex<Inner>>,
    subscribed: bool,
}

impl MemorySubscription {
    fn deregister(&mut self) {
        if !self.subscribed {
            return;
        }
        let mut inner = lock(&self.inner);
        if let Some(subscribers) = inner.channels.get_mut(&self.channel) {
            subscribers.retain(|(id, _)| *id != self.id);
        }
        self.subscribed = false;
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn next_message(&mut self) -> Result<Option<String>, RelayError> {
        Ok(self.rx.recv().await.flatten())
    }

    async fn unsubscribe(&mut self) -> Result<(), RelayError> {
        self.deregister();
        Ok(())
    }

    async fn close(mut self: Box<Self>) {
        self.deregister();
        self.rx.close();
        lock(&self.inner).closed += 1;
    }
}

/// Status source backed by a map, for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryRunStatus {
    runs: Arc<Mutex<HashMap<String, RunStatusRecord>>>,
    fail: Arc<Mutex<bool>>,
}

impl MemoryRunStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, run_id: &str, status: &str, thread_id: &str) {
        self.runs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                run_id.to_string(),
                RunStatusRecord {
                    status: status.to_string(),
                    thread_id: thread_id.to_string(),
                },
            );
    }

    pub fn fail_lookups(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|p| p.into_inner()) = fail;
    }
}

#[async_trait]
impl RunStatusSource for MemoryRunStatus {
    async fn run_status(&self, run_id: &str) -> Result<Option<RunStatusRecord>, RelayError> {
        if *self.fail.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(RelayError::Status("status store unreachable".to_string()));
        }
        Ok(self
            .runs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(run_id)
            .cloned())
    }
}
