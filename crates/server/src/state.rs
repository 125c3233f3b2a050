use std::sync::Arc;

use tokio::sync::watch;

use agentrun_core::Config;
use agentrun_relay::{ControlPublisher, ResponseLog, Subscriber};

use crate::auth::TokenVerifier;
use crate::run_store::RunStore;

/// Shared handles for every request.
pub struct AppState {
    pub config: Config,
    pub verifier: TokenVerifier,
    pub log: Arc<dyn ResponseLog>,
    pub subscriber: Arc<dyn Subscriber>,
    pub control: Arc<dyn ControlPublisher>,
    /// `None` when PostgreSQL is not configured; run endpoints then return 503.
    pub runs: Option<Arc<dyn RunStore>>,
    /// Flips to `true` once the server starts shutting down; open streams end.
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Build state around one broker that serves lists, pub/sub and control.
    pub fn new<B>(config: Config, broker: Arc<B>, runs: Option<Arc<dyn RunStore>>) -> Self
    where
        B: ResponseLog + Subscriber + ControlPublisher + 'static,
    {
        let verifier = TokenVerifier::new(&config.auth);
        Self {
            config,
            verifier,
            log: broker.clone(),
            subscriber: broker.clone(),
            control: broker,
            runs,
            shutdown: watch::channel(false).0,
        }
    }

    /// Receiver handed to each stream relay.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// End every open stream. Streams started afterwards end right after setup.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
