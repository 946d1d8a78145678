//! Request admission during shutdown.
//!
//! # Responsibilities
//! - Pass every request through while the process is running
//! - While draining, admit one final request per connection (if enabled)
//! - Refuse everything else with the configured status, without ever
//!   reaching application handlers
//! - Tell the peer to close the connection once shutdown has begun

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::config::ShutdownConfig;
use crate::http::response::{close_connection, JsonRejection, RejectionError, RejectionFactory};
use crate::lifecycle::{LifecyclePhase, PhaseReader};
use crate::net::{ConnectionId, ConnectionTracker};
use crate::observability::metrics;

/// Outcome of the admission check for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal operation.
    Pass,
    /// The connection's last request while draining.
    FinalRequest,
    /// Refused; handlers are not called.
    Reject,
}

/// State for the gate middleware.
#[derive(Clone)]
pub struct RequestGate {
    phase: PhaseReader,
    tracker: ConnectionTracker,
    perform_last_request: bool,
    rejection_status: StatusCode,
    rejection: Arc<dyn RejectionFactory>,
}

impl RequestGate {
    pub fn new(config: &ShutdownConfig, phase: PhaseReader, tracker: ConnectionTracker) -> Self {
        // Validated at load time; fall back to the default for hand-built configs.
        let rejection_status =
            StatusCode::from_u16(config.rejection_status_code).unwrap_or(StatusCode::BAD_GATEWAY);

        Self {
            phase,
            tracker,
            perform_last_request: config.perform_last_request,
            rejection_status,
            rejection: Arc::new(JsonRejection),
        }
    }

    /// Replace the response built for refused requests.
    pub fn with_rejection(mut self, factory: impl RejectionFactory) -> Self {
        self.rejection = Arc::new(factory);
        self
    }

    /// Decide what to do with a request observed in `phase`.
    ///
    /// Claims the connection's final request as a side effect.
    pub fn admit(&self, phase: LifecyclePhase, connection: Option<ConnectionId>) -> Admission {
        match phase {
            LifecyclePhase::Running => Admission::Pass,
            LifecyclePhase::Draining
                if self.perform_last_request
                    && connection.is_some_and(|id| self.tracker.claim_final_request(id)) =>
            {
                Admission::FinalRequest
            }
            _ => Admission::Reject,
        }
    }

    fn reject(&self, phase: LifecyclePhase) -> Response {
        self.rejection.rejection(RejectionError {
            status: self.rejection_status,
            phase,
        })
    }
}

/// Middleware wrapping every route.
pub async fn request_gate(
    State(gate): State<RequestGate>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // Read once: the whole decision uses a single phase.
    let phase = gate.phase.current();
    let connection = request.extensions().get::<ConnectionId>().copied();

    match gate.admit(phase, connection) {
        Admission::Pass => {
            let mut response = next.run(request).await;
            // Admitted while running, finished after shutdown began.
            if !gate.phase.current().is_running() {
                close_connection(&mut response);
            }
            response
        }
        Admission::FinalRequest => {
            tracing::info!(
                connection_id = ?connection.map(|id| id.as_u64()),
                path = %request.uri().path(),
                "Admitting final request on draining connection"
            );
            metrics::record_final_request();
            let mut response = next.run(request).await;
            close_connection(&mut response);
            response
        }
        Admission::Reject => {
            tracing::debug!(
                connection_id = ?connection.map(|id| id.as_u64()),
                phase = %phase,
                path = %request.uri().path(),
                "Rejecting request during shutdown"
            );
            metrics::record_rejected(phase);
            let mut response = gate.reject(phase);
            close_connection(&mut response);
            response
        }
    }
}
