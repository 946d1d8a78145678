//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits, stop on drain)
//!     → connection.rs (tracking, final-request flag, forced close)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Stopping the listener drops the socket; open connections are untouched

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker, TrackedConnection};
pub use listener::{stop_channel, Listener, ListenerError, ListenerHandle, StopSignal};
