//! Shared utilities for the shutdown integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use graceful_exit::config::AppConfig;
use graceful_exit::lifecycle::{self, Started};
use graceful_exit::net::ConnectionTracker;

/// Config bound to an ephemeral port with test-sized shutdown timings.
pub fn test_config(suicide_timeout_ms: u64, exit_delay_ms: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.timeouts.keep_alive_timeout_ms = 60_000;
    config.timeouts.headers_timeout_ms = 61_000;
    config.shutdown.suicide_timeout_ms = suicide_timeout_ms;
    config.shutdown.exit_delay_ms = exit_delay_ms;
    config
}

/// Router with `/slow` (sleeps `delay`) and `/count`, counting handler calls.
pub fn counting_app(delay: Duration) -> (Router, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let slow_calls = calls.clone();
    let count_calls = calls.clone();
    let app = Router::new()
        .route(
            "/slow",
            get(move || {
                let calls = slow_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    "slow done"
                }
            }),
        )
        .route(
            "/count",
            get(move || {
                let calls = count_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "counted"
                }
            }),
        );
    (app, calls)
}

pub async fn start_server(config: &AppConfig, app: Router) -> Started {
    lifecycle::start(config, app).await.expect("server should start")
}

pub async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("server should accept")
}

/// Wait until the tracker holds `count` connections.
pub async fn wait_for_connections(tracker: &ConnectionTracker, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while tracker.size() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connections should be tracked");
}

pub async fn send_get(stream: &mut TcpStream, path: &str) {
    let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
    stream
        .write_all(request.as_bytes())
        .await
        .expect("request should be written");
}

/// Read until the server closes the socket. A reset counts as a close.
pub async fn read_until_close(stream: &mut TcpStream, limit: Duration) -> String {
    let mut buf = Vec::new();
    let read = tokio::time::timeout(limit, stream.read_to_end(&mut buf))
        .await
        .expect("server should close the connection");
    if read.is_err() {
        buf.clear();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or_default()
}

pub fn has_connection_close(response: &str) -> bool {
    response
        .lines()
        .take_while(|line| !line.is_empty())
        .any(|line| line.eq_ignore_ascii_case("connection: close"))
}
