//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Tracked TCP connection
//!     → server.rs (hyper HTTP/1.1, keep-alive and header timeouts)
//!     → request.rs (request ID)
//!     → gate.rs (admit / final request / reject by lifecycle phase)
//!     → application router (handlers.rs placeholders)
//!     → response.rs (rejections, `Connection: close`)
//!     → Send to client
//! ```

pub mod gate;
pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use gate::{request_gate, Admission, RequestGate};
pub use request::X_REQUEST_ID;
pub use response::{JsonRejection, RejectionError, RejectionFactory};
pub use server::HttpServer;
