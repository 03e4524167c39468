//! Reconnect loop and the handle the embedding program controls it with.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{validate, ConfigError, EngineSettings, TunnelConfig};
use crate::dispatch::{Dispatcher, LocalHandler};
use crate::lifecycle::Shutdown;
use crate::net::{dial, DialError};
use crate::observability::{install_panic_hook, metrics};
use crate::session::{Session, SessionState};

/// A configured, not yet running tunnel endpoint.
#[derive(Debug)]
pub struct TunnelEngine {
    settings: Arc<EngineSettings>,
    dispatcher: Arc<Dispatcher>,
}

impl TunnelEngine {
    /// Forward tunneled requests to the backend named in `config`.
    pub fn new(config: &TunnelConfig) -> Result<Self, ConfigError> {
        let settings = validate(config, None).map_err(ConfigError::Validation)?;
        Self::from_settings(settings)
    }

    /// Serve tunneled requests with an in-process `handler`.
    pub fn with_handler(
        config: &TunnelConfig,
        handler: Arc<dyn LocalHandler>,
    ) -> Result<Self, ConfigError> {
        let settings = validate(config, Some(handler)).map_err(ConfigError::Validation)?;
        Self::from_settings(settings)
    }

    pub fn from_settings(settings: EngineSettings) -> Result<Self, ConfigError> {
        let dispatcher = Dispatcher::from_settings(&settings)?;
        Ok(Self {
            settings: Arc::new(settings),
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Spawn the reconnect loop. Also installs the panic hook that logs
    /// handler panics with their stack trace.
    pub fn start(self) -> TunnelHandle {
        install_panic_hook();
        let stop = Shutdown::new();
        let (state_tx, state_rx) = watch::channel(SessionState::Closed);
        let task = tokio::spawn(run(
            self.settings,
            self.dispatcher,
            Arc::new(state_tx),
            stop.clone(),
        ));
        TunnelHandle {
            stop,
            state: state_rx,
            task,
        }
    }
}

/// Control surface of a running engine.
#[derive(Debug)]
pub struct TunnelHandle {
    stop: Shutdown,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl TunnelHandle {
    /// Ask the loop to exit once the current session ends. A dial already in
    /// progress still completes and is served as a normal session.
    pub fn stop(&self) {
        self.stop.trigger();
    }

    /// Whether a session is currently serving requests.
    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == SessionState::Serving
    }

    /// State of the current (or last) session.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait for the loop to exit.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Tunnel engine task failed");
        }
    }
}

async fn run(
    settings: Arc<EngineSettings>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<watch::Sender<SessionState>>,
    stop: Shutdown,
) {
    tracing::info!(
        tunnel = %settings.tunnel_url,
        destination = %settings.destination.describe(),
        keepalive = ?settings.keepalive_timeout,
        "Tunnel engine starting"
    );

    loop {
        match dial(&settings).await {
            Ok(ws) => {
                metrics::record_dial("connected");
                metrics::record_connected(true);
                let session = Session::new(settings.clone(), dispatcher.clone(), state.clone());
                let end = session.run(ws).await;
                metrics::record_connected(false);
                tracing::debug!(reason = %end, "Session ended");
            }
            Err(DialError::Rejected { status, body }) => {
                metrics::record_dial("rejected");
                tracing::warn!(
                    url = %settings.handshake_url(),
                    status = %status,
                    body = %body,
                    "Relay rejected tunnel handshake"
                );
            }
            Err(e) => {
                metrics::record_dial("failed");
                tracing::warn!(url = %settings.handshake_url(), error = %e, "Tunnel dial failed");
            }
        }

        if stop.is_triggered() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(settings.reconnect_delay) => {}
            _ = stop.triggered() => break,
        }
    }

    tracing::info!("Tunnel engine stopped");
}
