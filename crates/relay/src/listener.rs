//! Channel listeners feeding the relay's ordering queue.
//!
//! Each subscription is drained by its own long-lived loop. Every accepted
//! message is normalized into a [`RelayItem`] and pushed onto one shared mpsc
//! queue, so the bridge loop sees items in arrival order regardless of which
//! channel produced them.
//!
//! ```text
//! response channel ──▶ listener ─┐
//!                                ├──▶ mpsc<RelayItem> ──▶ bridge loop
//! control channel  ──▶ listener ─┘
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use agentrun_core::keys::NEW_RESPONSE_PAYLOAD;
use agentrun_core::LifecycleSignal;

use crate::broker::Subscription;

/// How long a listener gets to unsubscribe and close before it is aborted.
const LISTENER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Normalized event handed from a listener to the bridge loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayItem {
    /// The worker appended at least one record to the response log.
    NewResponse,
    /// A lifecycle signal arrived on the control channel.
    Control(LifecycleSignal),
    /// A subscription died underneath its listener.
    ListenerError(String),
}

/// Which channel a listener drains; decides how payloads are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Response,
    Control,
}

impl ListenerKind {
    fn as_str(&self) -> &'static str {
        match self {
            ListenerKind::Response => "response",
            ListenerKind::Control => "control",
        }
    }
}

/// Map a raw channel payload to a relay item. Unrecognised payloads are dropped.
pub fn normalize(kind: ListenerKind, payload: &str) -> Option<RelayItem> {
    match kind {
        ListenerKind::Response if payload == NEW_RESPONSE_PAYLOAD => Some(RelayItem::NewResponse),
        ListenerKind::Control => LifecycleSignal::parse(payload).map(RelayItem::Control),
        _ => None,
    }
}

/// Drain one subscription until shutdown, a control signal, or failure.
///
/// The subscription is always unsubscribed and closed before returning.
async fn listen(
    kind: ListenerKind,
    run_id: String,
    mut subscription: Box<dyn Subscription>,
    queue: mpsc::Sender<RelayItem>,
    mut shutdown: watch::Receiver<bool>,
) {
    let channel = subscription.channel().to_string();
    debug!(run_id = %run_id, channel = %channel, listener = kind.as_str(), "listener started");

    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            message = subscription.next_message() => message,
        };

        match message {
            Ok(Some(payload)) => {
                let Some(item) = normalize(kind, &payload) else {
                    debug!(run_id = %run_id, channel = %channel, payload = %payload, "ignoring payload");
                    continue;
                };
                let is_control = matches!(item, RelayItem::Control(_));
                if is_control {
                    info!(run_id = %run_id, signal = %payload, "received control signal");
                }
                if queue.send(item).await.is_err() {
                    break;
                }
                if is_control {
                    break;
                }
            }
            Ok(None) => {
                warn!(run_id = %run_id, channel = %channel, "subscription ended unexpectedly");
                let _ = queue
                    .send(RelayItem::ListenerError("Listener stopped unexpectedly".to_string()))
                    .await;
                break;
            }
            Err(e) => {
                error!(run_id = %run_id, channel = %channel, error = %e, "listener failed");
                let _ = queue
                    .send(RelayItem::ListenerError("Listener failed".to_string()))
                    .await;
                break;
            }
        }
    }

    if let Err(e) = subscription.unsubscribe().await {
        debug!(run_id = %run_id, channel = %channel, error = %e, "unsubscribe failed");
    }
    subscription.close().await;
    debug!(run_id = %run_id, channel = %channel, "listener stopped");
}

/// The running listeners of one relay, plus the switch that stops them.
pub(crate) struct ListenerSet {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    pub(crate) fn spawn(
        &mut self,
        kind: ListenerKind,
        run_id: &str,
        subscription: Box<dyn Subscription>,
        queue: mpsc::Sender<RelayItem>,
    ) {
        let shutdown = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(listen(
            kind,
            run_id.to_string(),
            subscription,
            queue,
            shutdown,
        )));
    }

    /// Stop every listener and wait for it to release its subscription.
    ///
    /// A listener stuck past [`LISTENER_JOIN_TIMEOUT`] is aborted; the
    /// resulting cancellation is swallowed.
    pub(crate) async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for mut task in self.tasks {
            match tokio::time::timeout(LISTENER_JOIN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => debug!(error = %e, "listener task ended with error"),
                Err(_) => {
                    warn!("listener did not stop in time, aborting");
                    task.abort();
                    let _ = task.await;
                }
            }
        }
    }
}
