//! Live-run stream relay.
//!
//! One [`StreamRelay`] serves one client connection. It replays the run's
//! response log, checks whether the run is still live, and then bridges
//! pub/sub notifications into further log reads until the run ends:
//!
//! ```text
//! Replay ──▶ StatusCheck ──(not running)──▶ completed frame, done
//!                │
//!                ▼
//!            Subscribe ──▶ Bridge ──(terminal record | control | listener error)──▶ done
//! ```
//!
//! Frames go out through an mpsc sender whose receiver backs the HTTP body.
//! A closed receiver means the client went away. Server shutdown arrives on a
//! `watch` flag (see [`StreamRelay::with_shutdown`]). Every exit path,
//! including those two, stops the listeners and releases both subscriptions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use agentrun_core::{terminal_status, LifecycleSignal, RunKeys, RunStatus, StatusFrame};

use crate::broker::{ResponseLog, RunStatusSource, Subscriber};
use crate::error::RelayError;
use crate::listener::{ListenerKind, ListenerSet, RelayItem};

/// One SSE `data:` payload.
pub type Frame = Value;

/// Capacity of the queue between listeners and the bridge loop.
const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Pause after cleanup so in-flight cancellation settles before the body closes.
    pub cleanup_grace: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            cleanup_grace: Duration::from_millis(100),
        }
    }
}

/// Where the relay is in its lifecycle. Decides how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Replay,
    StatusCheck,
    Subscribe,
    Bridge,
}

impl RelayPhase {
    fn is_setup(&self) -> bool {
        !matches!(self, RelayPhase::Bridge)
    }
}

/// Per-connection count of log records already read.
///
/// Only ever advanced by the number of records a read returned, so it never
/// passes the log length.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(usize);

impl Cursor {
    pub fn position(&self) -> usize {
        self.0
    }

    /// LRANGE start index for the next refill.
    fn next_start(&self) -> isize {
        self.0 as isize
    }

    fn advance(&mut self, read: usize) {
        self.0 += read;
    }
}

/// Why the relay stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayExit {
    /// The run had already finished when the replay completed.
    NotRunning,
    /// A forwarded record carried a terminal status.
    TerminalRecord(RunStatus),
    /// A lifecycle signal arrived on the control channel.
    Control(LifecycleSignal),
    /// A subscription died.
    ListenerFailed,
    /// The client stopped reading.
    ClientDisconnected,
    /// The server is shutting down.
    ServerShutdown,
    /// Any other error.
    Failed(String),
}

/// Result of one relay run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    pub exit: RelayExit,
    pub frames_sent: usize,
    pub cursor: Cursor,
}

/// Outbound side of the connection; tracks what the client has received.
struct FrameSink {
    tx: mpsc::Sender<Frame>,
    sent: usize,
}

impl FrameSink {
    fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx, sent: 0 }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), RelayError> {
        self.tx.send(frame).await.map_err(|_| RelayError::ClientGone)?;
        self.sent += 1;
        Ok(())
    }

    fn has_emitted(&self) -> bool {
        self.sent > 0
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// The frame to emit when `phase` fails with `err`, if any.
///
/// Setup failures are reported only while the client has received nothing;
/// bridge failures are always reported.
fn failure_frame(phase: RelayPhase, has_emitted: bool, err: &RelayError) -> Option<StatusFrame> {
    if phase.is_setup() {
        (!has_emitted).then(|| StatusFrame::error_with(format!("Failed to start stream: {}", err)))
    } else {
        Some(StatusFrame::error_with(format!("Stream failed: {}", err)))
    }
}

/// Resolves once `shutdown` flips to `true`. Never resolves without a flag
/// or after its sender is gone.
async fn shutdown_requested(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        if rx.wait_for(|stopping| *stopping).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Bridges one run's response log and channels to one client.
pub struct StreamRelay {
    keys: RunKeys,
    log: Arc<dyn ResponseLog>,
    subscriber: Arc<dyn Subscriber>,
    status: Arc<dyn RunStatusSource>,
    options: RelayOptions,
    shutdown: Option<watch::Receiver<bool>>,
}

impl StreamRelay {
    pub fn new(
        run_id: impl Into<String>,
        log: Arc<dyn ResponseLog>,
        subscriber: Arc<dyn Subscriber>,
        status: Arc<dyn RunStatusSource>,
        options: RelayOptions,
    ) -> Self {
        Self {
            keys: RunKeys::new(run_id),
            log,
            subscriber,
            status,
            options,
            shutdown: None,
        }
    }

    /// End the stream (without a frame) once `shutdown` becomes `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn run_id(&self) -> &str {
        self.keys.run_id()
    }

    /// Stream the run into `tx` until it ends or the receiver is dropped.
    ///
    /// Never returns an error: failures become a terminal frame (or a log
    /// line once the client has data) and the summary records the exit.
    pub async fn run(self, tx: mpsc::Sender<Frame>) -> RelaySummary {
        let mut sink = FrameSink::new(tx);
        let mut cursor = Cursor::default();
        let mut listeners = ListenerSet::new();
        let mut phase = RelayPhase::Replay;

        let exit = match self.drive(&mut phase, &mut sink, &mut cursor, &mut listeners).await {
            Ok(exit) => exit,
            Err(RelayError::ClientGone) => {
                info!(run_id = %self.run_id(), "client disconnected");
                RelayExit::ClientDisconnected
            }
            Err(e) => {
                error!(run_id = %self.run_id(), phase = ?phase, error = %e, "stream relay failed");
                if let Some(frame) = failure_frame(phase, sink.has_emitted(), &e) {
                    let _ = sink.send(frame.to_value()).await;
                }
                RelayExit::Failed(e.to_string())
            }
        };

        listeners.shutdown().await;
        tokio::time::sleep(self.options.cleanup_grace).await;
        debug!(run_id = %self.run_id(), exit = ?exit, frames = sink.sent, "streaming cleanup complete");

        RelaySummary {
            exit,
            frames_sent: sink.sent,
            cursor,
        }
    }

    async fn drive(
        &self,
        phase: &mut RelayPhase,
        sink: &mut FrameSink,
        cursor: &mut Cursor,
        listeners: &mut ListenerSet,
    ) -> Result<RelayExit, RelayError> {
        let run_id = self.run_id();
        let list_key = self.keys.response_list();

        // Replay everything recorded so far, even for finished runs.
        *phase = RelayPhase::Replay;
        let initial = self.log.range(&list_key, 0, -1).await?;
        debug!(run_id = %run_id, count = initial.len(), "replaying recorded responses");
        for raw in &initial {
            let record: Value = serde_json::from_str(raw)?;
            sink.send(record).await?;
        }
        cursor.advance(initial.len());

        *phase = RelayPhase::StatusCheck;
        let status = self.status.run_status(run_id).await?;
        match &status {
            Some(record) if record.is_running() => {}
            other => {
                info!(
                    run_id = %run_id,
                    status = other.as_ref().map(|r| r.status.as_str()).unwrap_or("missing"),
                    "run is not running, ending stream"
                );
                sink.send(StatusFrame::completed().to_value()).await?;
                return Ok(RelayExit::NotRunning);
            }
        }

        *phase = RelayPhase::Subscribe;
        let (queue_tx, mut queue) = mpsc::channel::<RelayItem>(QUEUE_CAPACITY);
        let response_channel = self.keys.response_channel();
        let response_sub = self.subscriber.subscribe(&response_channel).await?;
        listeners.spawn(ListenerKind::Response, run_id, response_sub, queue_tx.clone());
        debug!(run_id = %run_id, channel = %response_channel, "subscribed to response channel");

        let control_channel = self.keys.control_channel();
        let control_sub = self.subscriber.subscribe(&control_channel).await?;
        listeners.spawn(ListenerKind::Control, run_id, control_sub, queue_tx);
        debug!(run_id = %run_id, channel = %control_channel, "subscribed to control channel");

        *phase = RelayPhase::Bridge;
        // Records appended before the subscriptions existed were announced to nobody.
        if let Some(status) = self.refill(&list_key, sink, cursor).await? {
            info!(run_id = %run_id, status = %status, "run finished before subscription");
            return Ok(RelayExit::TerminalRecord(status));
        }

        let mut shutdown = self.shutdown.clone();
        loop {
            let item = tokio::select! {
                item = queue.recv() => item,
                _ = sink.closed() => return Err(RelayError::ClientGone),
                _ = shutdown_requested(&mut shutdown) => {
                    info!(run_id = %run_id, "server shutting down, ending stream");
                    return Ok(RelayExit::ServerShutdown);
                }
            };

            match item {
                Some(RelayItem::NewResponse) => {
                    if let Some(status) = self.refill(&list_key, sink, cursor).await? {
                        info!(run_id = %run_id, status = %status, "run finished via status record");
                        return Ok(RelayExit::TerminalRecord(status));
                    }
                }
                Some(RelayItem::Control(signal)) => {
                    sink.send(StatusFrame::signal(signal).to_value()).await?;
                    return Ok(RelayExit::Control(signal));
                }
                Some(RelayItem::ListenerError(reason)) => {
                    error!(run_id = %run_id, reason = %reason, "listener error");
                    sink.send(StatusFrame::error().to_value()).await?;
                    return Ok(RelayExit::ListenerFailed);
                }
                None => {
                    error!(run_id = %run_id, "all listeners stopped");
                    sink.send(StatusFrame::error().to_value()).await?;
                    return Ok(RelayExit::ListenerFailed);
                }
            }
        }
    }

    /// Forward records appended since the cursor.
    ///
    /// Stops at the first terminal status record and returns its status.
    async fn refill(
        &self,
        list_key: &str,
        sink: &mut FrameSink,
        cursor: &mut Cursor,
    ) -> Result<Option<RunStatus>, RelayError> {
        let batch = self.log.range(list_key, cursor.next_start(), -1).await?;
        if batch.is_empty() {
            return Ok(None);
        }

        let mut terminal = None;
        for raw in &batch {
            let record: Value = serde_json::from_str(raw)?;
            let status = terminal_status(&record);
            sink.send(record).await?;
            if status.is_some() {
                terminal = status;
                break;
            }
        }
        cursor.advance(batch.len());
        Ok(terminal)
    }
}
