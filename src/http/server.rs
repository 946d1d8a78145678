//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wrap the application router with the request gate and tracing layers
//! - Run the accept loop until the orchestrator stops it
//! - Serve each connection with hyper HTTP/1.1 on its own task
//! - Enforce header-read and keep-alive timeouts
//! - Drop a connection's socket when the orchestrator destroys it

use std::sync::Arc;
use std::time::Duration;

use axum::{http::Request, middleware, Router};
use hyper::{body::Incoming, server::conn::http1};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::http::gate::{request_gate, RequestGate};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::PhaseReader;
use crate::net::listener::ConnectionPermit;
use crate::net::{ConnectionGuard, ConnectionTracker, Listener, ListenerError, StopSignal};

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP server whose connections are tracked for graceful shutdown.
pub struct HttpServer {
    router: Router,
    tracker: ConnectionTracker,
    http: http1::Builder,
    keep_alive_timeout: Duration,
}

impl HttpServer {
    /// Create a server for `app`, gated by the lifecycle `phase`.
    pub fn new(config: &AppConfig, app: Router, tracker: ConnectionTracker, phase: PhaseReader) -> Self {
        let gate = RequestGate::new(&config.shutdown, phase, tracker.clone());
        Self::with_gate(config, app, tracker, gate)
    }

    /// Create a server with a preconfigured gate (e.g. a custom rejection).
    pub fn with_gate(
        config: &AppConfig,
        app: Router,
        tracker: ConnectionTracker,
        gate: RequestGate,
    ) -> Self {
        let mut http = http1::Builder::new();
        http.timer(TokioTimer::new())
            .header_read_timeout(config.timeouts.headers_timeout())
            .keep_alive(true);

        Self {
            router: Self::build_router(app, gate),
            tracker,
            http,
            keep_alive_timeout: config.timeouts.keep_alive_timeout(),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(app: Router, gate: RequestGate) -> Router {
        app.layer(middleware::from_fn_with_state(gate, request_gate))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Accept connections until `stop` is requested, then close the listener.
    ///
    /// Open connections keep being served by their own tasks.
    pub async fn run(self, listener: Listener, mut stop: StopSignal) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "HTTP server starting");

        loop {
            tokio::select! {
                biased;
                _ = stop.requested() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.open(peer);
                        tokio::spawn(serve_connection(
                            self.router.clone(),
                            self.http.clone(),
                            self.keep_alive_timeout,
                            stream,
                            guard,
                            permit,
                        ));
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        drop(listener);
        stop.acknowledge();
        tracing::info!(address = %addr, "HTTP server stopped accepting connections");
        Ok(())
    }
}

/// Serve one connection until it closes, idles out, or is destroyed.
async fn serve_connection(
    router: Router,
    http: http1::Builder,
    keep_alive_timeout: Duration,
    stream: TcpStream,
    mut guard: ConnectionGuard,
    _permit: ConnectionPermit,
) {
    let id = guard.id();
    let activity = guard.activity();

    let service = {
        let activity = Arc::clone(&activity);
        hyper::service::service_fn(move |mut request: Request<Incoming>| {
            request.extensions_mut().insert(id);
            let in_flight = activity.begin_request();
            let router = router.clone();
            async move {
                let response = router.oneshot(request).await;
                drop(in_flight);
                response
            }
        })
    };

    let connection = http.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let mut closing = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(connection_id = %id, error = %e, "Connection ended with error");
                }
                break;
            }
            _ = guard.destroyed() => {
                // Dropping the hyper connection closes the socket mid-flight.
                break;
            }
            _ = activity.idle_for(keep_alive_timeout), if !closing => {
                tracing::debug!(connection_id = %id, "Keep-alive timeout, closing idle connection");
                connection.as_mut().graceful_shutdown();
                closing = true;
            }
        }
    }
}
