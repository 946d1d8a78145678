//! Placeholder endpoints standing in for application logic.

use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::config::DemoConfig;

/// `GET /sleep` emulates slow work, `GET /fail` always errors.
pub fn demo_router(config: &DemoConfig) -> Router {
    Router::new()
        .route("/sleep", get(sleep))
        .route("/fail", get(fail))
        .with_state(Duration::from_millis(config.sleep_ms))
}

async fn sleep(State(duration): State<Duration>) -> Json<Value> {
    tracing::info!(sleep_ms = duration.as_millis() as u64, "Got sleep request");
    tokio::time::sleep(duration).await;
    tracing::info!("Sent sleep response");
    Json(json!({ "message": "done sleeping" }))
}

async fn fail() -> impl IntoResponse {
    tracing::warn!("Fail endpoint called");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "request failed" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test(start_paused = true)]
    async fn sleep_waits_configured_time() {
        let app = demo_router(&DemoConfig { sleep_ms: 10_000 });
        let started = tokio::time::Instant::now();

        let response = app
            .oneshot(Request::get("/sleep").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(started.elapsed() >= Duration::from_secs(10));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({ "message": "done sleeping" })
        );
    }

    #[tokio::test]
    async fn fail_returns_server_error() {
        let app = demo_router(&DemoConfig::default());
        let response = app
            .oneshot(Request::get("/fail").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
