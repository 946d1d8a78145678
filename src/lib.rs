//! Graceful shutdown for a long-lived HTTP server.
//!
//! On SIGINT, SIGTERM or SIGHUP the server stops accepting connections,
//! lets in-flight work finish within a bounded window, optionally serves one
//! last request per open connection, destroys whatever overstays, and exits
//! after a short delay.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::{ShutdownOrchestrator, ShutdownTrigger, SignalDispatcher};
pub use net::ConnectionTracker;
