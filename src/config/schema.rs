//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Transport timeouts.
    pub timeouts: TimeoutConfig,

    /// Graceful shutdown behavior.
    pub shutdown: ShutdownConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Placeholder endpoints.
    pub demo: DemoConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Transport timeouts.
///
/// The keep-alive timeout must exceed the idle timeout of any load balancer
/// in front of the server (60s on common cloud balancers), otherwise the
/// balancer may reuse a socket the server is about to close.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle time after which a keep-alive connection is closed, in milliseconds.
    pub keep_alive_timeout_ms: u64,

    /// Time allowed to receive a complete request head, in milliseconds.
    pub headers_timeout_ms: u64,
}

impl TimeoutConfig {
    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_timeout_ms)
    }

    pub fn headers_timeout(&self) -> Duration {
        Duration::from_millis(self.headers_timeout_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout_ms: 65_000,
            headers_timeout_ms: 66_000,
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Maximum time to wait for open connections to close, in milliseconds.
    ///
    /// Behind a balancer with a 60s idle timeout this should be at least 60s
    /// plus the longest response time, or a request that arrives just
    /// before the idle deadline loses its response.
    pub suicide_timeout_ms: u64,

    /// Delay between finishing cleanup and exiting, in milliseconds.
    pub exit_delay_ms: u64,

    /// Destroy connections still open when the timeout fires.
    pub force: bool,

    /// Let each open connection complete one more request after draining starts.
    pub perform_last_request: bool,

    /// Status code of responses to requests refused during shutdown.
    pub rejection_status_code: u16,
}

impl ShutdownConfig {
    pub fn suicide_timeout(&self) -> Duration {
        Duration::from_millis(self.suicide_timeout_ms)
    }

    pub fn exit_delay(&self) -> Duration {
        Duration::from_millis(self.exit_delay_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            suicide_timeout_ms: 70_000,
            exit_delay_ms: 1_000,
            force: true,
            perform_last_request: false,
            rejection_status_code: 502,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Placeholder endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DemoConfig {
    /// How long `GET /sleep` takes, in milliseconds.
    pub sleep_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { sleep_ms: 10_000 }
    }
}
