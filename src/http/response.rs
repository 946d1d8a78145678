//! Responses produced by the shutdown machinery itself.
//!
//! # Responsibilities
//! - Define the synthetic rejection error for work refused during shutdown
//! - Let applications replace the rejection body via `RejectionFactory`
//! - Mark responses as the last one on their connection

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::lifecycle::LifecyclePhase;

/// A request refused because the server is shutting down.
///
/// Never a process-level failure; it only ever becomes a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Server unavailable, no new requests accepted during shutdown")]
pub struct RejectionError {
    pub status: StatusCode,
    pub phase: LifecyclePhase,
}

#[derive(Serialize)]
struct RejectionBody {
    error: String,
    phase: LifecyclePhase,
}

impl IntoResponse for RejectionError {
    fn into_response(self) -> Response {
        let body = RejectionBody {
            error: self.to_string(),
            phase: self.phase,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Builds the response for a rejected request.
pub trait RejectionFactory: Send + Sync + 'static {
    fn rejection(&self, error: RejectionError) -> Response;
}

/// JSON body `{"error": ..., "phase": ...}` with the configured status.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRejection;

impl RejectionFactory for JsonRejection {
    fn rejection(&self, error: RejectionError) -> Response {
        error.into_response()
    }
}

impl<F> RejectionFactory for F
where
    F: Fn(RejectionError) -> Response + Send + Sync + 'static,
{
    fn rejection(&self, error: RejectionError) -> Response {
        self(error)
    }
}

/// Ask the peer (and hyper) to close the connection after this response.
pub fn close_connection(response: &mut Response) {
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn json_rejection_carries_status_and_phase() {
        let response = JsonRejection.rejection(RejectionError {
            status: StatusCode::BAD_GATEWAY,
            phase: LifecyclePhase::Draining,
        });
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["phase"], "draining");
        assert_eq!(
            json["error"],
            "Server unavailable, no new requests accepted during shutdown"
        );
    }

    #[test]
    fn closures_are_factories() {
        let factory = |error: RejectionError| (error.status, "go away").into_response();
        let response = factory.rejection(RejectionError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            phase: LifecyclePhase::Forcing,
        });
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn close_connection_sets_header() {
        let mut response = StatusCode::OK.into_response();
        close_connection(&mut response);
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }
}
