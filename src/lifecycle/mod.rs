//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT/SIGHUP → ShutdownTrigger::trigger()
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Drain (bounded) → Force close → Exit delay
//!
//! Phase (phase.rs):
//!     Running → Draining → Forcing → Exiting, read by the request gate
//!
//! Startup (startup.rs):
//!     Bind listener → Build server → Wire orchestrator → Install signals
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, force, exit
//! - Shutdown has timeout: forced close after deadline
//! - One writer for the phase; everyone else holds a reader

pub mod phase;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use phase::{LifecyclePhase, PhaseController, PhaseReader};
pub use shutdown::{
    ShutdownError, ShutdownOrchestrator, ShutdownReport, ShutdownTrigger, TriggerSource,
};
pub use signals::{ShutdownSignal, SignalDispatcher};
pub use startup::{start, StartupError, Started};
