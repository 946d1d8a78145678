//! Startup orchestration.
//!
//! # Responsibilities
//! - Bind the listener
//! - Wire tracker, orchestrator and HTTP server together
//! - Start the accept loop
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Signal handlers are installed by the caller, so tests can drive the
//!   trigger directly
//! - A failing accept loop triggers shutdown; the orchestrator then reports
//!   the listener as gone, which ends the process with a failure code

use std::net::SocketAddr;

use axum::Router;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::http::HttpServer;
use crate::lifecycle::phase::PhaseReader;
use crate::lifecycle::shutdown::{ShutdownOrchestrator, TriggerSource};
use crate::net::{stop_channel, ConnectionTracker, Listener, ListenerError};

/// Fatal errors before the server is serving.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// A running server and the orchestrator that will shut it down.
pub struct Started {
    /// Address the listener is bound to.
    pub local_addr: SocketAddr,
    pub orchestrator: ShutdownOrchestrator,
    pub tracker: ConnectionTracker,
    pub phase: PhaseReader,
    /// The accept loop; finishes when the listener is stopped.
    pub server: JoinHandle<Result<(), ListenerError>>,
}

/// Bind and start serving `app` according to `config`.
pub async fn start(config: &AppConfig, app: Router) -> Result<Started, StartupError> {
    let listener = Listener::bind(&config.listener).await?;
    let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

    let tracker = ConnectionTracker::new();
    let (listener_handle, stop) = stop_channel();
    let orchestrator =
        ShutdownOrchestrator::new(config.shutdown.clone(), tracker.clone(), listener_handle);
    let phase = orchestrator.phase();

    let server = HttpServer::new(config, app, tracker.clone(), phase.clone());
    let trigger = orchestrator.trigger_handle();
    let server = tokio::spawn(async move {
        let result = server.run(listener, stop).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Accept loop failed");
            trigger.trigger(TriggerSource::ServerError);
        }
        result
    });

    tracing::info!(
        address = %local_addr,
        suicide_timeout_ms = config.shutdown.suicide_timeout_ms,
        exit_delay_ms = config.shutdown.exit_delay_ms,
        force = config.shutdown.force,
        perform_last_request = config.shutdown.perform_last_request,
        rejection_status_code = config.shutdown.rejection_status_code,
        "Listening for connections"
    );

    Ok(Started {
        local_addr,
        orchestrator,
        tracker,
        phase,
        server,
    })
}
